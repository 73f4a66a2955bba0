pub mod proxy;
pub mod record;
pub mod repository;
pub mod sink;
pub mod stream;

pub use proxy::{FetchPhase, ProxyFetchEngine, RangeSupport, RetryState};
pub use record::{ArtifactRecord, InMemoryRecordStore, NoopRecordStore, RecordStore, StreamKind};
pub use repository::ProxyRepositoryService;
pub use sink::{ByteSink, TeeSink, WriteSink};
pub use stream::{ArtifactReader, ArtifactWriter, StreamLifecycleManager, StreamState};
