//! Infrastructure module - concrete implementations behind the domain seams.
//!
//! HTTP client, rate limiting, retry, credentials, configuration, and logging
//! setup. Nothing in here leaks upward: the pipelines consume the domain
//! traits plus the limiter/retry primitives only.

pub mod api_client;
pub mod api_types;
pub mod config;
pub mod credentials;
pub mod logging;
pub mod rate_limiter;
pub mod retry;

pub use api_client::{ApiClient, ApiClientConfig};
pub use config::EngineConfig;
pub use credentials::StaticCredentials;
pub use logging::init_logging;
pub use rate_limiter::ApiRateLimiter;
pub use retry::RetryPolicy;
