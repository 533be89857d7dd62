//! # Boardsync Common
//!
//! Foundational types and utilities shared by the boardsync crates.
//!
//! ## Modules
//!
//! - [`error`] - Error severity classification
//! - [`logging`] - `Pretty` log formatting and subscriber setup
//! - [`retry`] - Exponential backoff retry for fallible async operations
//! - [`async_utils`] - Timeout helpers

pub mod async_utils;
pub mod error;
pub mod logging;
pub mod retry;

pub use async_utils::{with_timeout, TimeoutError};
pub use error::{ErrorSeverity, Severity};
pub use logging::{init_tracing, Pretty};
pub use retry::{RetryConfig, RetryManager, RetryableError};
