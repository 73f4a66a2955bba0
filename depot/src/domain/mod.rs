pub mod layout;
pub mod repository;

pub use layout::{Coordinates, GenericLayout, LayoutProvider, PathAttributes};
pub use repository::{RemoteRepository, Repository};
