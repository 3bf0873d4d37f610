pub mod adapters;
pub mod app;
pub mod config;
pub mod core;
pub mod domain;
pub mod utils;

#[cfg(feature = "cli")]
pub use config::CliConfig;
pub use config::{ServiceConfig, Settings};

pub use app::Application;
pub use crate::core::{
    apply_response_options, Dispatcher, DispatcherStats, ParseOrchestrationService, QueryOptions,
    ResourcePool,
};
pub use domain::key::RequestKey;
pub use domain::model::{Lease, ParseResult, Review, Snapshot, SourceKind};
pub use utils::error::{Result, ReviewError, ScrapeError};
