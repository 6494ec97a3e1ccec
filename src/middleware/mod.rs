mod error_handler;
mod panic;
pub mod rate_limit;

pub use error_handler::log_errors;
pub(crate) use panic::panic_message;
pub use panic::recover_panic;
pub use rate_limit::{RateLimiter, RateLimiterConfig, rate_limit};
