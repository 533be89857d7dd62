//! The persistence boundary

use crate::store::SyncOp;
use crate::types::{Card, EntityKind, List, Position};
use async_trait::async_trait;
use boardsync_common::RetryableError;
use thiserror::Error;

/// Failure reported by a persistence call
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SyncFailure {
    /// Network blip, overloaded backend: worth trying again
    #[error("transient persistence failure: {0}")]
    Transient(String),

    /// The backend refused the write; retrying will not help
    #[error("write rejected: {0}")]
    Rejected(String),

    /// The call did not resolve in time. It may still complete remotely.
    #[error("persistence call timed out after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },
}

impl RetryableError for SyncFailure {
    fn is_retriable(&self) -> bool {
        !matches!(self, Self::Rejected(_))
    }
}

/// Backend that stores boards.
///
/// Implementations report success or failure per entity. Transport, auth
/// and serialization are theirs to choose.
#[async_trait]
pub trait SyncAdapter: Send + Sync {
    async fn create_list(&self, list: &List) -> Result<(), SyncFailure>;

    async fn create_card(&self, card: &Card) -> Result<(), SyncFailure>;

    /// Move a list within its board, or a card into `container` at `position`
    async fn update_entity_position(
        &self,
        kind: EntityKind,
        id: &str,
        container: &str,
        position: Position,
    ) -> Result<(), SyncFailure>;

    async fn update_list(&self, list: &List) -> Result<(), SyncFailure>;

    async fn update_card(&self, card: &Card) -> Result<(), SyncFailure>;

    /// Delete an entity; deleting a list deletes its cards
    async fn delete_entity(&self, kind: EntityKind, id: &str) -> Result<(), SyncFailure>;

    /// Route a recorded operation to the matching call
    async fn execute(&self, op: &SyncOp) -> Result<(), SyncFailure> {
        match op {
            SyncOp::CreateList(list) => self.create_list(list).await,
            SyncOp::CreateCard(card) => self.create_card(card).await,
            SyncOp::PositionList {
                id,
                board,
                position,
            } => {
                self.update_entity_position(EntityKind::List, id.as_str(), board.as_str(), *position)
                    .await
            }
            SyncOp::PositionCard { id, list, position } => {
                self.update_entity_position(EntityKind::Card, id.as_str(), list.as_str(), *position)
                    .await
            }
            SyncOp::UpdateList(list) => self.update_list(list).await,
            SyncOp::UpdateCard(card) => self.update_card(card).await,
            SyncOp::Delete(entity) => self.delete_entity(entity.kind(), entity.id_str()).await,
        }
    }
}
