pub mod dispatcher;
pub mod filter;
pub mod pool;
pub mod query;
pub mod service;

pub use dispatcher::{Dispatcher, DispatcherStats};
pub use filter::apply_response_options;
pub use pool::{LeaseGuard, ResourcePool};
pub use query::QueryOptions;
pub use service::ParseOrchestrationService;
