//! Composition root: wires settings into pool, dispatcher, parser and stores.

use crate::adapters::{
    FileSnapshotRepository, HttpParser, InMemoryCacheRepository, InMemorySnapshotRepository,
};
use crate::config::Settings;
use crate::core::{Dispatcher, DispatcherStats, ParseOrchestrationService, ResourcePool};
use crate::domain::ports::{Parser, SnapshotRepository};
use crate::utils::error::Result;
use std::sync::Arc;
use tracing::info;

pub struct Application {
    service: ParseOrchestrationService,
    cache: Arc<InMemoryCacheRepository>,
}

impl Application {
    /// Builds the application around an [`HttpParser`] pointed at the configured worker.
    pub fn build(settings: &Settings) -> Result<Self> {
        let parser = HttpParser::new(&settings.scraper_endpoint, settings.scraper_timeout)?;
        Ok(Self::with_parser(settings, Arc::new(parser)))
    }

    pub fn with_parser(settings: &Settings, parser: Arc<dyn Parser>) -> Self {
        let pool = ResourcePool::new(settings.slots);
        let dispatcher = Dispatcher::new(parser, pool, settings.queue_capacity);

        let snapshots: Arc<dyn SnapshotRepository> = match &settings.snapshot_dir {
            Some(dir) => Arc::new(FileSnapshotRepository::new(dir)),
            None => Arc::new(InMemorySnapshotRepository::new()),
        };
        let cache = Arc::new(InMemoryCacheRepository::new());

        info!(
            slots = settings.slots,
            queue_capacity = settings.queue_capacity,
            cache_ttl_secs = settings.cache_ttl.as_secs(),
            snapshot_dir = ?settings.snapshot_dir,
            "Application initialised"
        );

        let service =
            ParseOrchestrationService::new(cache.clone(), snapshots, dispatcher, settings.cache_ttl);
        Self { service, cache }
    }

    pub fn service(&self) -> &ParseOrchestrationService {
        &self.service
    }

    pub fn stats(&self) -> DispatcherStats {
        self.service.dispatcher().stats()
    }

    /// Lets background refreshes finish, then closes the pool.
    pub async fn shutdown(&self) {
        self.service.flush_background_refreshes().await;
        self.service.dispatcher().shutdown();
        self.cache.purge_expired();
        info!("Application stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::dispatcher::tests::ScriptedParser;
    use crate::core::QueryOptions;
    use crate::domain::model::SourceKind;
    use crate::utils::error::ReviewError;
    use std::time::Duration;
    use tempfile::TempDir;

    fn settings(snapshot_dir: Option<std::path::PathBuf>) -> Settings {
        Settings {
            slots: 2,
            queue_capacity: 4,
            cache_ttl: Duration::from_secs(60),
            snapshot_dir,
            scraper_endpoint: "http://127.0.0.1:9".to_string(),
            scraper_timeout: Duration::from_secs(1),
        }
    }

    #[tokio::test]
    async fn test_file_snapshots_are_written_when_directory_configured() {
        let dir = TempDir::new().unwrap();
        let app = Application::with_parser(
            &settings(Some(dir.path().to_path_buf())),
            Arc::new(ScriptedParser::default()),
        );

        let result = app
            .service()
            .get_or_parse(
                SourceKind::TwoGis,
                "https://2gis.ru/moscow/firm/70000001",
                &QueryOptions::default(),
            )
            .await
            .unwrap();
        assert_eq!(result.reviews.len(), 1);
        assert!(dir.path().join("cache_2gis_org_70000001.json").exists());

        let stats = app.stats();
        assert_eq!((stats.slots, stats.queue_capacity, stats.total_jobs), (2, 4, 1));
    }

    #[tokio::test]
    async fn test_shutdown_closes_the_pool() {
        let app = Application::with_parser(&settings(None), Arc::new(ScriptedParser::default()));
        app.shutdown().await;

        let result = app
            .service()
            .get_or_parse(
                SourceKind::Doctors,
                "https://prodoctorov.ru/moskva/vrach/1/",
                &QueryOptions::default(),
            )
            .await;
        assert!(matches!(result, Err(ReviewError::ResourcePoolClosed)));
    }

    #[test]
    fn test_build_uses_http_parser() {
        assert!(Application::build(&settings(None)).is_ok());
    }
}
