use crate::core::dispatcher::{CompletionHook, Dispatcher};
use crate::core::filter::apply_response_options;
use crate::core::query::QueryOptions;
use crate::domain::model::{ParseResult, SourceKind};
use crate::domain::ports::{CacheRepository, SnapshotRepository};
use crate::utils::error::Result;
use async_trait::async_trait;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Writes every successful job to both stores, snapshot first.
///
/// Runs on the job's task, so the result is kept even if all callers left.
struct StoreWriter {
    cache: Arc<dyn CacheRepository>,
    snapshots: Arc<dyn SnapshotRepository>,
    cache_ttl: Duration,
}

#[async_trait]
impl CompletionHook for StoreWriter {
    async fn on_success(&self, kind: SourceKind, url: &str, data: &ParseResult) {
        if let Err(e) = self.snapshots.set(kind, url, data).await {
            warn!(%kind, url, error = %e, "Failed to store snapshot");
        }
        if let Err(e) = self.cache.set(kind, url, data, self.cache_ttl).await {
            warn!(%kind, url, error = %e, "Failed to store cache entry");
        }
    }
}

/// Read/write policy over cache, snapshot store and dispatcher.
///
/// Read order is cache, then snapshot (served stale while a refresh runs in
/// the background), then a blocking scrape. Only successful scrapes are
/// persisted, once per job, to both stores.
#[derive(Clone)]
pub struct ParseOrchestrationService {
    cache: Arc<dyn CacheRepository>,
    snapshots: Arc<dyn SnapshotRepository>,
    dispatcher: Dispatcher,
    background: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl ParseOrchestrationService {
    /// Installs the store writer as the dispatcher's completion hook.
    pub fn new(
        cache: Arc<dyn CacheRepository>,
        snapshots: Arc<dyn SnapshotRepository>,
        dispatcher: Dispatcher,
        cache_ttl: Duration,
    ) -> Self {
        dispatcher.set_completion_hook(Arc::new(StoreWriter {
            cache: cache.clone(),
            snapshots: snapshots.clone(),
            cache_ttl,
        }));

        Self {
            cache,
            snapshots,
            dispatcher,
            background: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub async fn get_or_parse(
        &self,
        kind: SourceKind,
        url: &str,
        options: &QueryOptions,
    ) -> Result<ParseResult> {
        match self.cache.get(kind, url).await {
            Ok(Some(cached)) => {
                info!(%kind, url, "Cache hit");
                return Ok(apply_response_options(&cached, options));
            }
            Ok(None) => {}
            Err(e) => warn!(%kind, url, error = %e, "Cache read failed, treating as miss"),
        }

        match self.snapshots.get(kind, url).await {
            Ok(Some(snapshot)) => {
                info!(
                    %kind,
                    url,
                    updated_at = %snapshot.updated_at,
                    "Serving snapshot, refreshing in background"
                );
                self.refresh_in_background(kind, url);
                return Ok(apply_response_options(&snapshot.data, options));
            }
            Ok(None) => {}
            Err(e) => warn!(%kind, url, error = %e, "Snapshot read failed, treating as miss"),
        }

        info!(%kind, url, "No cached data, parsing now");
        let fresh = self.dispatcher.enqueue(kind, url).await?;
        Ok(apply_response_options(&fresh, options))
    }

    fn refresh_in_background(&self, kind: SourceKind, url: &str) {
        let dispatcher = self.dispatcher.clone();
        let url = url.to_string();

        let handle = tokio::spawn(async move {
            match dispatcher.enqueue(kind, &url).await {
                Ok(_) => info!(%kind, url = %url, "Background refresh stored"),
                Err(e) => error!(%kind, url = %url, error = %e, "Background refresh failed"),
            }
        });

        let mut background = self
            .background
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        background.retain(|task| !task.is_finished());
        background.push(handle);
    }

    /// Background refreshes that have not finished yet.
    pub fn pending_refreshes(&self) -> usize {
        self.background
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|task| !task.is_finished())
            .count()
    }

    /// Waits for every background refresh spawned so far.
    pub async fn flush_background_refreshes(&self) {
        loop {
            let tasks = std::mem::take(
                &mut *self
                    .background
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner),
            );
            if tasks.is_empty() {
                return;
            }
            for task in tasks {
                if let Err(e) = task.await {
                    error!(error = %e, "Background refresh task panicked");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::cache::InMemoryCacheRepository;
    use crate::adapters::snapshot::InMemorySnapshotRepository;
    use crate::core::dispatcher::tests::{sample_result, wait_until, ScriptedParser};
    use crate::core::pool::ResourcePool;
    use crate::domain::model::{Review, Snapshot};
    use crate::utils::error::{ReviewError, ScrapeError};
    use std::sync::atomic::{AtomicUsize, Ordering};

    const URL: &str = "https://2gis.ru/moscow/firm/70000001/tab/reviews";
    const TTL: Duration = Duration::from_secs(60);

    struct Harness {
        parser: Arc<ScriptedParser>,
        cache: Arc<InMemoryCacheRepository>,
        snapshots: Arc<InMemorySnapshotRepository>,
        service: ParseOrchestrationService,
    }

    fn harness(parser: ScriptedParser, queue_capacity: usize) -> Harness {
        let parser = Arc::new(parser);
        let cache = Arc::new(InMemoryCacheRepository::new());
        let snapshots = Arc::new(InMemorySnapshotRepository::new());
        let dispatcher = Dispatcher::new(parser.clone(), ResourcePool::new(2), queue_capacity);
        let service =
            ParseOrchestrationService::new(cache.clone(), snapshots.clone(), dispatcher, TTL);
        Harness {
            parser,
            cache,
            snapshots,
            service,
        }
    }

    fn stale_result() -> ParseResult {
        ParseResult {
            name: Some("Stale clinic".to_string()),
            rating: Some("3.9".to_string()),
            review_count: Some("2".to_string()),
            reviews: vec![
                Review {
                    author_name: "Ivan".to_string(),
                    text: "Long queue".to_string(),
                    rating_stars: Some(2),
                    avatar_url: None,
                    date: None,
                },
                Review {
                    author_name: "Maria".to_string(),
                    text: "Good doctor".to_string(),
                    rating_stars: Some(5),
                    avatar_url: None,
                    date: None,
                },
            ],
        }
    }

    #[tokio::test]
    async fn test_cache_hit_never_reaches_dispatcher() {
        let h = harness(ScriptedParser::default(), 10);
        h.cache
            .set(SourceKind::TwoGis, URL, &stale_result(), TTL)
            .await
            .unwrap();

        let options = QueryOptions {
            min_rating: Some(4),
            ..QueryOptions::default()
        };
        let result = h
            .service
            .get_or_parse(SourceKind::TwoGis, URL, &options)
            .await
            .unwrap();

        assert_eq!(result.reviews.len(), 1);
        assert_eq!(result.reviews[0].author_name, "Maria");
        assert_eq!(h.parser.calls(), 0);
        assert_eq!(h.service.dispatcher().stats().total_jobs, 0);
        // the cached value itself is untouched
        let cached = h.cache.get(SourceKind::TwoGis, URL).await.unwrap().unwrap();
        assert_eq!(cached.reviews.len(), 2);
    }

    #[tokio::test]
    async fn test_snapshot_hit_returns_stale_data_and_refreshes() {
        let h = harness(ScriptedParser::gated(), 10);
        h.snapshots
            .set(SourceKind::TwoGis, URL, &stale_result())
            .await
            .unwrap();

        // the parser is held at its gate, so this only returns if it does not wait for it
        let result = tokio::time::timeout(
            Duration::from_millis(500),
            h.service
                .get_or_parse(SourceKind::TwoGis, URL, &QueryOptions::default()),
        )
        .await
        .expect("snapshot path must not wait for a scrape")
        .unwrap();
        assert_eq!(result, stale_result());
        let dispatcher = h.service.dispatcher().clone();
        wait_until(|| dispatcher.stats().total_jobs == 1).await;

        h.parser.open_gate(1);
        h.service.flush_background_refreshes().await;

        let fresh = sample_result(URL);
        let snapshot = h.snapshots.get(SourceKind::TwoGis, URL).await.unwrap().unwrap();
        assert_eq!(snapshot.data, fresh);
        assert_eq!(
            h.cache.get(SourceKind::TwoGis, URL).await.unwrap(),
            Some(fresh)
        );
    }

    #[tokio::test]
    async fn test_each_snapshot_hit_triggers_one_refresh() {
        let h = harness(ScriptedParser::gated(), 10);
        h.snapshots
            .set(SourceKind::TwoGis, URL, &stale_result())
            .await
            .unwrap();

        for _ in 0..3 {
            h.service
                .get_or_parse(SourceKind::TwoGis, URL, &QueryOptions::default())
                .await
                .unwrap();
        }
        let dispatcher = h.service.dispatcher().clone();
        wait_until(|| {
            let stats = dispatcher.stats();
            stats.total_jobs + stats.coalesced_requests == 3
        })
        .await;
        assert_eq!(h.service.pending_refreshes(), 3);

        h.parser.open_gate(1);
        h.service.flush_background_refreshes().await;
        // all three refreshes were folded into one scrape
        assert_eq!(h.parser.calls(), 1);
        assert_eq!(h.service.pending_refreshes(), 0);
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_old_snapshot() {
        let h = harness(ScriptedParser::default(), 10);
        h.parser.fail_with(Some(ScrapeError::CaptchaRequired));
        h.snapshots
            .set(SourceKind::TwoGis, URL, &stale_result())
            .await
            .unwrap();

        let result = h
            .service
            .get_or_parse(SourceKind::TwoGis, URL, &QueryOptions::default())
            .await
            .unwrap();
        h.service.flush_background_refreshes().await;

        assert_eq!(result, stale_result());
        assert_eq!(h.parser.calls(), 1);
        let snapshot = h.snapshots.get(SourceKind::TwoGis, URL).await.unwrap().unwrap();
        assert_eq!(snapshot.data, stale_result());
        assert_eq!(h.cache.get(SourceKind::TwoGis, URL).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_cold_requests_share_one_scrape_and_persist() {
        let h = harness(ScriptedParser::gated(), 10);
        let options = QueryOptions::default();

        let first = {
            let service = h.service.clone();
            let options = options.clone();
            tokio::spawn(async move { service.get_or_parse(SourceKind::TwoGis, URL, &options).await })
        };
        let second = {
            let service = h.service.clone();
            tokio::spawn(async move {
                service
                    .get_or_parse(SourceKind::TwoGis, URL, &options)
                    .await
            })
        };
        let dispatcher = h.service.dispatcher().clone();
        wait_until(|| dispatcher.stats().coalesced_requests == 1).await;
        h.parser.open_gate(1);

        let first = first.await.unwrap().unwrap();
        let second = second.await.unwrap().unwrap();
        assert_eq!(first, second);
        assert_eq!(h.parser.calls(), 1);

        assert_eq!(
            h.cache.get(SourceKind::TwoGis, URL).await.unwrap(),
            Some(first.clone())
        );
        let snapshot = h.snapshots.get(SourceKind::TwoGis, URL).await.unwrap().unwrap();
        assert_eq!(snapshot.data, first);
    }

    #[tokio::test]
    async fn test_abandoned_cold_caller_still_persists_result() {
        let h = harness(ScriptedParser::gated(), 10);
        let caller = {
            let service = h.service.clone();
            tokio::spawn(async move {
                service
                    .get_or_parse(SourceKind::TwoGis, URL, &QueryOptions::default())
                    .await
            })
        };
        wait_until(|| h.parser.calls() == 1).await;
        caller.abort();
        assert!(caller.await.unwrap_err().is_cancelled());

        h.parser.open_gate(1);
        let dispatcher = h.service.dispatcher().clone();
        wait_until(|| dispatcher.stats().in_flight == 0).await;

        let snapshot = h.snapshots.get(SourceKind::TwoGis, URL).await.unwrap();
        assert_eq!(snapshot.map(|s| s.data), Some(sample_result(URL)));
        assert_eq!(
            h.cache.get(SourceKind::TwoGis, URL).await.unwrap(),
            Some(sample_result(URL))
        );

        // the next caller is served from cache
        h.service
            .get_or_parse(SourceKind::TwoGis, URL, &QueryOptions::default())
            .await
            .unwrap();
        assert_eq!(h.parser.calls(), 1);
    }

    /// In-memory stores that count writes.
    #[derive(Default)]
    struct CountingStore {
        cache: InMemoryCacheRepository,
        snapshots: InMemorySnapshotRepository,
        cache_writes: AtomicUsize,
        snapshot_writes: AtomicUsize,
    }

    #[async_trait]
    impl CacheRepository for CountingStore {
        async fn get(&self, kind: SourceKind, url: &str) -> Result<Option<ParseResult>> {
            self.cache.get(kind, url).await
        }

        async fn set(
            &self,
            kind: SourceKind,
            url: &str,
            value: &ParseResult,
            ttl: Duration,
        ) -> Result<()> {
            self.cache_writes.fetch_add(1, Ordering::SeqCst);
            self.cache.set(kind, url, value, ttl).await
        }
    }

    #[async_trait]
    impl SnapshotRepository for CountingStore {
        async fn get(&self, kind: SourceKind, url: &str) -> Result<Option<Snapshot>> {
            self.snapshots.get(kind, url).await
        }

        async fn set(&self, kind: SourceKind, url: &str, value: &ParseResult) -> Result<()> {
            self.snapshot_writes.fetch_add(1, Ordering::SeqCst);
            self.snapshots.set(kind, url, value).await
        }
    }

    #[tokio::test]
    async fn test_coalesced_cold_callers_write_stores_once() {
        let parser = Arc::new(ScriptedParser::gated());
        let store = Arc::new(CountingStore::default());
        let dispatcher = Dispatcher::new(parser.clone(), ResourcePool::new(2), 10);
        let service = ParseOrchestrationService::new(store.clone(), store.clone(), dispatcher, TTL);

        let callers: Vec<_> = (0..4)
            .map(|_| {
                let service = service.clone();
                tokio::spawn(async move {
                    service
                        .get_or_parse(SourceKind::TwoGis, URL, &QueryOptions::default())
                        .await
                })
            })
            .collect();
        let dispatcher = service.dispatcher().clone();
        wait_until(|| dispatcher.stats().coalesced_requests == 3).await;
        parser.open_gate(1);

        for caller in callers {
            assert_eq!(caller.await.unwrap().unwrap(), sample_result(URL));
        }
        assert_eq!(parser.calls(), 1);
        assert_eq!(store.snapshot_writes.load(Ordering::SeqCst), 1);
        assert_eq!(store.cache_writes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cold_failure_is_returned_and_not_persisted() {
        let h = harness(ScriptedParser::default(), 10);
        h.parser.fail_with(Some(ScrapeError::CaptchaRequired));

        let result = h
            .service
            .get_or_parse(SourceKind::TwoGis, URL, &QueryOptions::default())
            .await;

        assert!(matches!(
            result,
            Err(ReviewError::Scrape(ScrapeError::CaptchaRequired))
        ));
        assert_eq!(h.cache.get(SourceKind::TwoGis, URL).await.unwrap(), None);
        assert!(h.snapshots.get(SourceKind::TwoGis, URL).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_queue_full_surfaces_on_cold_path() {
        let h = harness(ScriptedParser::gated(), 1);
        let busy = {
            let service = h.service.clone();
            tokio::spawn(async move {
                service
                    .get_or_parse(SourceKind::Doctors, "https://prodoctorov.ru/a/", &QueryOptions::default())
                    .await
            })
        };
        let dispatcher = h.service.dispatcher().clone();
        wait_until(|| dispatcher.stats().in_flight == 1).await;

        let rejected = h
            .service
            .get_or_parse(SourceKind::TwoGis, URL, &QueryOptions::default())
            .await;
        assert!(matches!(rejected, Err(ReviewError::QueueFull)));

        h.parser.open_gate(1);
        assert!(busy.await.unwrap().is_ok());
    }

    struct BrokenStore;

    #[async_trait]
    impl CacheRepository for BrokenStore {
        async fn get(&self, _kind: SourceKind, _url: &str) -> Result<Option<ParseResult>> {
            Err(ReviewError::StorageError {
                message: "connection refused".to_string(),
            })
        }

        async fn set(
            &self,
            _kind: SourceKind,
            _url: &str,
            _value: &ParseResult,
            _ttl: Duration,
        ) -> Result<()> {
            Err(ReviewError::StorageError {
                message: "connection refused".to_string(),
            })
        }
    }

    #[async_trait]
    impl SnapshotRepository for BrokenStore {
        async fn get(&self, _kind: SourceKind, _url: &str) -> Result<Option<Snapshot>> {
            Err(ReviewError::StorageError {
                message: "disk unavailable".to_string(),
            })
        }

        async fn set(&self, _kind: SourceKind, _url: &str, _value: &ParseResult) -> Result<()> {
            Err(ReviewError::StorageError {
                message: "disk unavailable".to_string(),
            })
        }
    }

    #[tokio::test]
    async fn test_store_failures_degrade_to_scraping() {
        let parser = Arc::new(ScriptedParser::default());
        let dispatcher = Dispatcher::new(parser.clone(), ResourcePool::new(1), 4);
        let service = ParseOrchestrationService::new(
            Arc::new(BrokenStore),
            Arc::new(BrokenStore),
            dispatcher,
            TTL,
        );

        let result = service
            .get_or_parse(SourceKind::TwoGis, URL, &QueryOptions::default())
            .await
            .unwrap();
        assert_eq!(result, sample_result(URL));
        assert_eq!(parser.calls(), 1);
    }
}
