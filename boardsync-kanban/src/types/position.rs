//! Ordering keys for lists and cards

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Ordering key of an item among its siblings.
///
/// A dense numeric key: a new item can always be placed between two
/// neighbours by taking their midpoint, until `f64` runs out of precision and
/// the container is rebalanced. Compared with [`f64::total_cmp`] so the type is
/// totally ordered.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Position(f64);

impl Position {
    /// Create a position from a raw value
    pub const fn new(value: f64) -> Self {
        Self(value)
    }

    /// Get the raw value
    pub const fn value(self) -> f64 {
        self.0
    }

    /// Finite and strictly positive, the range the allocator hands out
    pub fn is_valid(self) -> bool {
        self.0.is_finite() && self.0 > 0.0
    }
}

impl PartialEq for Position {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Position {}

impl PartialOrd for Position {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Position {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<f64> for Position {
    fn from(value: f64) -> Self {
        Self(value)
    }
}
