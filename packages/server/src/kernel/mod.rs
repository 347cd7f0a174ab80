// Kernel - core infrastructure with dependency injection
//
// The ServerKernel holds all server dependencies (database, upstream API,
// queue, notifier) and provides dependency injection through traits for
// testability.
//
// IMPORTANT: Kernel is for INFRASTRUCTURE only, not business logic.
// Business logic belongs in domain layers.

pub mod albion_client;
pub mod db;
pub mod jobs;
pub mod notifier;
pub mod rate_limit;
pub mod scheduled_tasks;
pub mod server_kernel;
pub mod service_host;
pub mod test_dependencies;
pub mod traits;

pub use albion_client::{AlbionApiClient, ApiError};
pub use notifier::NoopNotifier;
pub use rate_limit::{RateLimitObserver, RateLimitStats};
pub use server_kernel::ServerKernel;
pub use service_host::{Service, ServiceHost};
pub use test_dependencies::{MockBattleApi, RecordingNotifier};
pub use traits::*;
