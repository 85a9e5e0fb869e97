//! HTTP push source adapter
//!
//! Drains the `pending_events` queue fed by the push endpoint. The claim
//! moves rows to `processing`; commit/reject settle them, and a sweeper
//! returns stale claims to `pending`.

use std::sync::Arc;

use async_trait::async_trait;
use domain::entities::{Event, SourceKind, SourceRef};
use tracing::instrument;

use application::ApplicationError;
use application::ports::{EventSource, OrgDirectory, PushEnvelope, PushQueue, SourceDescriptor};

/// Event source over the push queue
pub struct PushSource {
    queue: Arc<dyn PushQueue>,
    directory: Arc<dyn OrgDirectory>,
}

impl std::fmt::Debug for PushSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PushSource").finish_non_exhaustive()
    }
}

impl PushSource {
    /// Create the source over the queue and hierarchy directory
    #[must_use]
    pub fn new(queue: Arc<dyn PushQueue>, directory: Arc<dyn OrgDirectory>) -> Self {
        Self { queue, directory }
    }

    /// Map a claimed envelope to a normalized event
    ///
    /// A pushed org id may name a child org unit; the directory resolves
    /// the owning tenant.
    async fn envelope_to_event(
        &self,
        envelope: PushEnvelope,
    ) -> Result<Event, ApplicationError> {
        let mut source = SourceRef::push(envelope.id.to_string());
        source.sequence = Some(envelope.id);

        let parent = self.directory.parent_of(envelope.org_id).await?;
        let mut event = Event::new(
            parent.unwrap_or(envelope.org_id),
            envelope.event_type,
            envelope.payload,
            source,
        );
        if parent.is_some_and(|parent| parent != envelope.org_id) {
            event = event.with_org_unit(domain::value_objects::OrgUnitId::new(
                envelope.org_id.as_i64(),
            ));
        }
        Ok(event)
    }
}

#[async_trait]
impl EventSource for PushSource {
    fn descriptor(&self) -> SourceDescriptor {
        SourceDescriptor {
            kind: SourceKind::Push,
            identifier: "pending_events".to_string(),
        }
    }

    #[instrument(skip(self))]
    async fn poll(&self, limit: u32) -> Result<Vec<Event>, ApplicationError> {
        let envelopes = self.queue.claim(limit).await?;
        let mut events = Vec::with_capacity(envelopes.len());
        for envelope in envelopes {
            events.push(self.envelope_to_event(envelope).await?);
        }
        Ok(events)
    }

    async fn commit(&self, event: &Event) -> Result<(), ApplicationError> {
        match event.source.sequence {
            Some(id) => self.queue.mark_done(id).await,
            None => Ok(()),
        }
    }

    async fn reject(&self, event: &Event, reason: &str) -> Result<(), ApplicationError> {
        match event.source.sequence {
            Some(id) => self.queue.mark_failed(id, reason).await,
            None => Ok(()),
        }
    }
}
