//! Core types for the board engine

mod board;
mod entity;
mod ids;
mod position;

// Re-export all types
pub use board::{Board, Card, CardMeta, CardPatch, List};
pub use entity::{EntityKind, EntityRef};
pub use ids::{BoardId, CardId, ListId, RequestId};
pub use position::Position;
