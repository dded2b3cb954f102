pub mod config;
pub mod error;
pub mod hashing;
pub mod logging;
pub mod telegram_send;
pub mod types;

pub use error::{CoreError, FailureReason, Result};
