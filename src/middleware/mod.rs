//! HTTP middleware: request logging with request ids, API-key auth, and
//! per-caller rate limiting.

pub mod auth;
pub mod logging;
pub mod rate_limit;

pub use auth::{api_key_middleware, ApiKeyManager};
pub use logging::request_logging;
pub use rate_limit::{rate_limit_middleware, RateLimitConfig, RateLimiter};
