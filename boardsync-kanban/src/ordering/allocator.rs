//! Position allocation using fractional keys.

use crate::error::{KanbanError, Result};
use crate::types::Position;
use tracing::trace;

/// Default gap between neighbours for boundary inserts and after a rebalance
pub const DEFAULT_STEP: f64 = 1.0;

/// Computes ordering keys between neighbours.
///
/// Keys are always finite and strictly positive. A key between two neighbours
/// is their midpoint; a key past the last item is `last + step`; a key before
/// the first item is `first - step`, or the midpoint between zero and `first`
/// when that would leave the positive range.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionAllocator {
    step: f64,
}

impl Default for PositionAllocator {
    fn default() -> Self {
        Self { step: DEFAULT_STEP }
    }
}

impl PositionAllocator {
    /// Create an allocator with a custom step
    pub fn new(step: f64) -> Result<Self> {
        if !step.is_finite() || step <= 0.0 {
            return Err(KanbanError::invalid_value(
                "step",
                format!("must be a finite positive number, got {step}"),
            ));
        }
        Ok(Self { step })
    }

    /// The configured step
    pub fn step(&self) -> f64 {
        self.step
    }

    /// Key for an item inserted between `left` and `right`.
    ///
    /// Fails with [`KanbanError::RebalanceRequired`] when no representable key
    /// lies strictly between the neighbours.
    pub fn allocate(&self, left: Option<Position>, right: Option<Position>) -> Result<Position> {
        let position = match (left, right) {
            (None, None) => self.step,
            (Some(left), None) => {
                let next = left.value() + self.step;
                if !left.is_valid() || !next.is_finite() || next <= left.value() {
                    return Err(KanbanError::RebalanceRequired);
                }
                next
            }
            (None, Some(right)) => {
                if right.value() > self.step && right.is_valid() {
                    right.value() - self.step
                } else {
                    midpoint(0.0, right.value())?
                }
            }
            (Some(left), Some(right)) => {
                if !left.is_valid() {
                    return Err(KanbanError::RebalanceRequired);
                }
                midpoint(left.value(), right.value())?
            }
        };

        trace!(?left, ?right, position, "allocated position");
        Ok(Position::new(position))
    }

    /// Evenly spaced keys (`step`, `2 * step`, ...) for `count` items in order
    pub fn spaced(&self, count: usize) -> impl Iterator<Item = Position> + '_ {
        (1..=count).map(move |n| Position::new(self.step * n as f64))
    }

    /// Reassign evenly spaced keys to an ordered sequence, preserving its order
    pub fn rebalance<T: Clone>(&self, ordered: &[T]) -> Vec<(T, Position)> {
        ordered
            .iter()
            .cloned()
            .zip(self.spaced(ordered.len()))
            .collect()
    }
}

/// Midpoint of `left` and `right`, checked to land strictly between them
fn midpoint(left: f64, right: f64) -> Result<f64> {
    if !(left < right) || !right.is_finite() {
        return Err(KanbanError::RebalanceRequired);
    }

    let mid = left + (right - left) / 2.0;
    if left < mid && mid < right {
        Ok(mid)
    } else {
        Err(KanbanError::RebalanceRequired)
    }
}
