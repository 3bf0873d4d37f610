// Adapters layer: concrete implementations of the domain ports.

pub mod cache;
pub mod http;
pub mod snapshot;

pub use cache::InMemoryCacheRepository;
pub use http::HttpParser;
pub use snapshot::{FileSnapshotRepository, InMemorySnapshotRepository};
