use crate::domain::model::{Lease, ParseResult, Snapshot, SourceKind};
use crate::utils::error::{Result, ScrapeError};
use async_trait::async_trait;
use std::time::Duration;

/// Scrapes one listing using the browser profile identified by `lease`.
///
/// Never called twice concurrently with the same lease.
#[async_trait]
pub trait Parser: Send + Sync {
    async fn run(
        &self,
        kind: SourceKind,
        url: &str,
        lease: &Lease,
    ) -> std::result::Result<ParseResult, ScrapeError>;
}

/// Short-lived result cache.
#[async_trait]
pub trait CacheRepository: Send + Sync {
    async fn get(&self, kind: SourceKind, url: &str) -> Result<Option<ParseResult>>;
    async fn set(&self, kind: SourceKind, url: &str, value: &ParseResult, ttl: Duration)
        -> Result<()>;
}

/// Durable, non-expiring store of the last successful result per request key.
#[async_trait]
pub trait SnapshotRepository: Send + Sync {
    async fn get(&self, kind: SourceKind, url: &str) -> Result<Option<Snapshot>>;
    async fn set(&self, kind: SourceKind, url: &str, value: &ParseResult) -> Result<()>;
}
