use crate::domain::key::RequestKey;
use crate::domain::model::{ParseResult, SourceKind};
use crate::domain::ports::CacheRepository;
use crate::utils::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::debug;

/// Every this many writes, `set` sweeps out expired entries first.
const PURGE_EVERY: u64 = 64;

struct CacheEntry {
    value: ParseResult,
    /// `None` when the TTL runs past what `Instant` can represent.
    expires_at: Option<Instant>,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

fn purge(entries: &mut HashMap<RequestKey, CacheEntry>, now: Instant) -> usize {
    let before = entries.len();
    entries.retain(|_, entry| !entry.is_expired(now));
    before - entries.len()
}

/// Process-local TTL cache keyed by [`RequestKey`].
///
/// Expired entries read as absent and are evicted on that read. Entries that
/// are never read again are swept out periodically by `set`.
#[derive(Default)]
pub struct InMemoryCacheRepository {
    entries: Mutex<HashMap<RequestKey, CacheEntry>>,
    writes: AtomicU64,
}

impl InMemoryCacheRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<RequestKey, CacheEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Drops every expired entry and returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let purged = purge(&mut self.entries(), Instant::now());
        if purged > 0 {
            debug!(purged, "Purged expired cache entries");
        }
        purged
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }
}

#[async_trait]
impl CacheRepository for InMemoryCacheRepository {
    async fn get(&self, kind: SourceKind, url: &str) -> Result<Option<ParseResult>> {
        let key = RequestKey::derive(kind, url);
        let mut entries = self.entries();

        match entries.get(&key) {
            Some(entry) if entry.is_expired(Instant::now()) => {
                debug!(%key, "Cache entry expired");
                entries.remove(&key);
                Ok(None)
            }
            Some(entry) => Ok(Some(entry.value.clone())),
            None => Ok(None),
        }
    }

    async fn set(
        &self,
        kind: SourceKind,
        url: &str,
        value: &ParseResult,
        ttl: Duration,
    ) -> Result<()> {
        let key = RequestKey::derive(kind, url);
        let now = Instant::now();
        let mut entries = self.entries();

        if (self.writes.fetch_add(1, Ordering::Relaxed) + 1) % PURGE_EVERY == 0 {
            let purged = purge(&mut entries, now);
            if purged > 0 {
                debug!(purged, "Swept expired cache entries on write");
            }
        }

        entries.insert(
            key,
            CacheEntry {
                value: value.clone(),
                expires_at: now.checked_add(ttl),
            },
        );
        Ok(())
    }
}
