pub mod filesystem;

pub use filesystem::FilesystemDriver;
