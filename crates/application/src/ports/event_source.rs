//! Event source port
//!
//! The uniform capability every source adapter exposes: poll a small window
//! of normalized events, then commit what was handed off. Adapters never
//! mutate their source beyond the commit bookkeeping (queue-row status for
//! the push source, nothing at all for the relational source).

use async_trait::async_trait;
use domain::entities::{Event, SourceKind};
#[cfg(test)]
use mockall::automock;

use crate::error::ApplicationError;

/// Identity of one configured source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDescriptor {
    /// Source kind
    pub kind: SourceKind,
    /// Table, topic or queue name
    pub identifier: String,
}

impl std::fmt::Display for SourceDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind, self.identifier)
    }
}

/// Port for pluggable event sources
#[cfg_attr(test, automock)]
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Identity of this source
    fn descriptor(&self) -> SourceDescriptor;

    /// Read up to `limit` new events
    ///
    /// Source unavailability surfaces as [`ApplicationError::Source`]; the
    /// ingest worker pauses and re-polls, other workers continue.
    async fn poll(&self, limit: u32) -> Result<Vec<Event>, ApplicationError>;

    /// Acknowledge successful handoff of one polled event
    async fn commit(&self, event: &Event) -> Result<(), ApplicationError>;

    /// Acknowledge failed handoff of one polled event
    async fn reject(&self, event: &Event, reason: &str) -> Result<(), ApplicationError>;
}
