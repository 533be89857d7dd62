//! Error severity classification
//!
//! Every boardsync error type reports a severity so callers can decide how
//! loudly to surface it: a rebalance hint is a warning, a rolled back move is
//! an error the user should hear about once.

/// Severity levels for error classification
///
/// # Examples
///
/// ```rust
/// use boardsync_common::ErrorSeverity;
///
/// // Warning: handled internally, worth a log line
/// let rebalance = ErrorSeverity::Warning;
///
/// // Error: the operation failed but the board stays usable
/// let unknown_card = ErrorSeverity::Error;
///
/// // Critical: local state can no longer be trusted
/// let corrupted = ErrorSeverity::Critical;
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    /// Potential issue but operation can proceed
    Warning,

    /// Operation failed but the system can continue
    Error,

    /// System cannot continue, requires immediate attention
    Critical,
}

impl ErrorSeverity {
    /// The `tracing` level an error of this severity should be logged at
    pub fn level(&self) -> tracing::Level {
        match self {
            Self::Warning => tracing::Level::WARN,
            Self::Error | Self::Critical => tracing::Level::ERROR,
        }
    }
}

/// Trait for error types that have severity levels
///
/// ```rust
/// use boardsync_common::{ErrorSeverity, Severity};
///
/// #[derive(Debug)]
/// enum MyError {
///     Corrupted,
///     Missing,
/// }
///
/// impl Severity for MyError {
///     fn severity(&self) -> ErrorSeverity {
///         match self {
///             MyError::Corrupted => ErrorSeverity::Critical,
///             MyError::Missing => ErrorSeverity::Error,
///         }
///     }
/// }
///
/// assert_eq!(MyError::Missing.severity(), ErrorSeverity::Error);
/// ```
pub trait Severity {
    /// Get the severity level of this error
    fn severity(&self) -> ErrorSeverity;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_ordering() {
        assert!(ErrorSeverity::Warning < ErrorSeverity::Error);
        assert!(ErrorSeverity::Error < ErrorSeverity::Critical);
    }

    #[test]
    fn test_severity_level() {
        assert_eq!(ErrorSeverity::Warning.level(), tracing::Level::WARN);
        assert_eq!(ErrorSeverity::Critical.level(), tracing::Level::ERROR);
    }
}
