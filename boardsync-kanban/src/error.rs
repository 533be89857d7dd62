//! Error types for the board engine

use boardsync_common::{ErrorSeverity, Severity};
use thiserror::Error;

/// Result type for board operations
pub type Result<T> = std::result::Result<T, KanbanError>;

/// Errors that can occur in board operations
#[derive(Debug, Clone, Error, PartialEq)]
pub enum KanbanError {
    /// The board, or the list a card should live in, does not exist
    #[error("container not found: {id}")]
    UnknownContainer { id: String },

    /// No list or card with this id
    #[error("item not found: {id}")]
    UnknownItem { id: String },

    /// A drag gesture is already in progress on this board
    #[error("a gesture is already active on board {board}")]
    GestureAlreadyActive { board: String },

    /// Hover/drop/cancel without a gesture in progress
    #[error("no gesture is active on board {board}")]
    NoActiveGesture { board: String },

    /// The allocator ran out of precision between two neighbours.
    /// Handled inside the ordered collection and never returned to callers.
    #[error("position precision exhausted, container needs a rebalance")]
    RebalanceRequired,

    /// Persistence refused the mutation, or kept failing until the retry budget ran out
    #[error("persistence rejected request {request}: {reason}")]
    PersistenceRejected { request: String, reason: String },

    /// Persistence never answered within the timeout, retries included
    #[error("persistence timed out for request {request} after {attempts} attempts")]
    PersistenceTimeout { request: String, attempts: u32 },

    /// A confirmation or rejection named a request the store is not tracking
    #[error("unknown request: {id}")]
    UnknownRequest { id: String },

    /// Duplicate ID
    #[error("duplicate {item_type} ID: {id}")]
    DuplicateId { item_type: String, id: String },

    /// The item is not in the container the caller expected
    #[error("{id} is in {actual}, not {expected}")]
    ContainerMismatch {
        id: String,
        expected: String,
        actual: String,
    },

    /// Invalid field value
    #[error("invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

impl KanbanError {
    /// Create an unknown container error
    pub fn unknown_container(id: impl ToString) -> Self {
        Self::UnknownContainer { id: id.to_string() }
    }

    /// Create an unknown item error
    pub fn unknown_item(id: impl ToString) -> Self {
        Self::UnknownItem { id: id.to_string() }
    }

    /// Create a duplicate ID error
    pub fn duplicate_id(item_type: impl Into<String>, id: impl ToString) -> Self {
        Self::DuplicateId {
            item_type: item_type.into(),
            id: id.to_string(),
        }
    }

    /// Create an invalid value error
    pub fn invalid_value(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Errors that describe a failed persistence round trip rather than a bad call
    pub fn is_persistence_failure(&self) -> bool {
        matches!(
            self,
            Self::PersistenceRejected { .. } | Self::PersistenceTimeout { .. }
        )
    }

    /// Check if this is a retryable error
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::PersistenceTimeout { .. })
    }
}

impl Severity for KanbanError {
    fn severity(&self) -> ErrorSeverity {
        match self {
            Self::RebalanceRequired => ErrorSeverity::Warning,
            Self::UnknownRequest { .. } => ErrorSeverity::Warning,
            _ => ErrorSeverity::Error,
        }
    }
}
