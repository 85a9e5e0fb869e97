//! Source checkpoint storage port

use async_trait::async_trait;
use domain::entities::{SourceCheckpoint, SourceKind};
#[cfg(test)]
use mockall::automock;

use crate::error::ApplicationError;

/// Port for per-source checkpoint persistence
#[cfg_attr(test, automock)]
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Get the checkpoint of one source, if any
    async fn get(
        &self,
        source: SourceKind,
        identifier: &str,
    ) -> Result<Option<SourceCheckpoint>, ApplicationError>;

    /// Insert or replace a checkpoint
    async fn put(&self, checkpoint: &SourceCheckpoint) -> Result<(), ApplicationError>;

    /// All known checkpoints
    async fn list(&self) -> Result<Vec<SourceCheckpoint>, ApplicationError>;
}
