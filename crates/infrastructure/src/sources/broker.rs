//! Streaming broker source adapter
//!
//! A partition consumer with per-partition offsets. The consumer itself is
//! a trait so deployments can plug a real broker client; the in-process
//! implementation backs tests and single-node setups.

use std::sync::Arc;

use async_trait::async_trait;
use domain::entities::{Event, SourceKind, SourceRef};
use domain::value_objects::{EventType, OrgId, OrgUnitId};
use parking_lot::RwLock;
use tracing::{debug, instrument, warn};

use application::ApplicationError;
use application::ports::{CheckpointStore, EventSource, SourceDescriptor};

/// One record read from a broker partition
#[derive(Debug, Clone)]
pub struct BrokerRecord {
    /// Partition the record lives in
    pub partition: i32,
    /// Offset within the partition; contiguous per partition
    pub offset: i64,
    /// Owning tenant
    pub org_id: OrgId,
    /// Org unit, when the producer set one
    pub org_unit: Option<OrgUnitId>,
    /// Event type name
    pub event_type: EventType,
    /// Opaque payload
    pub payload: serde_json::Value,
}

/// Minimal partition-consumer capability
#[async_trait]
pub trait BrokerConsumer: Send + Sync {
    /// Topic this consumer reads
    fn topic(&self) -> &str;

    /// Partitions assigned to this consumer
    fn partitions(&self) -> Vec<i32>;

    /// Records of one partition with `offset > after`, oldest first
    async fn fetch(
        &self,
        partition: i32,
        after: i64,
        max: u32,
    ) -> Result<Vec<BrokerRecord>, ApplicationError>;
}

/// In-process broker used by tests and single-node deployments
#[derive(Debug)]
pub struct InMemoryBroker {
    topic: String,
    partitions: Vec<RwLock<Vec<BrokerRecord>>>,
}

impl InMemoryBroker {
    /// Create a broker with the given partition count
    #[must_use]
    pub fn new(topic: impl Into<String>, partition_count: usize) -> Self {
        Self {
            topic: topic.into(),
            partitions: (0..partition_count).map(|_| RwLock::new(Vec::new())).collect(),
        }
    }

    /// Publish one record; offsets are assigned per partition
    ///
    /// Returns the assigned offset.
    pub fn publish(
        &self,
        partition: i32,
        org_id: OrgId,
        event_type: EventType,
        payload: serde_json::Value,
    ) -> Option<i64> {
        let slot = self.partitions.get(usize::try_from(partition).ok()?)?;
        let mut records = slot.write();
        let offset = records.last().map_or(1, |last| last.offset + 1);
        records.push(BrokerRecord {
            partition,
            offset,
            org_id,
            org_unit: None,
            event_type,
            payload,
        });
        Some(offset)
    }
}

#[async_trait]
impl BrokerConsumer for InMemoryBroker {
    fn topic(&self) -> &str {
        &self.topic
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
    fn partitions(&self) -> Vec<i32> {
        (0..self.partitions.len() as i32).collect()
    }

    async fn fetch(
        &self,
        partition: i32,
        after: i64,
        max: u32,
    ) -> Result<Vec<BrokerRecord>, ApplicationError> {
        let slot = usize::try_from(partition)
            .ok()
            .and_then(|index| self.partitions.get(index))
            .ok_or_else(|| {
                ApplicationError::Source(format!("unknown partition {partition}"))
            })?;
        Ok(slot
            .read()
            .iter()
            .filter(|record| record.offset > after)
            .take(max as usize)
            .cloned()
            .collect())
    }
}

/// Event source over a broker consumer with persisted offsets
pub struct BrokerSource {
    consumer: Arc<dyn BrokerConsumer>,
    checkpoints: Arc<dyn CheckpointStore>,
}

impl std::fmt::Debug for BrokerSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerSource").finish_non_exhaustive()
    }
}

impl BrokerSource {
    /// Create the source over a consumer
    #[must_use]
    pub fn new(consumer: Arc<dyn BrokerConsumer>, checkpoints: Arc<dyn CheckpointStore>) -> Self {
        Self {
            consumer,
            checkpoints,
        }
    }

    async fn committed_offset(&self, partition: i32) -> Result<i64, ApplicationError> {
        let identifier = format!("{}:{partition}", self.consumer.topic());
        Ok(self
            .checkpoints
            .get(SourceKind::Broker, &identifier)
            .await?
            .map_or(0, |checkpoint| checkpoint.last_processed_id))
    }

    fn record_to_event(&self, record: BrokerRecord) -> Event {
        let mut event = Event::new(
            record.org_id,
            record.event_type,
            record.payload,
            SourceRef::broker(self.consumer.topic(), record.partition, record.offset),
        );
        if let Some(unit) = record.org_unit {
            event = event.with_org_unit(unit);
        }
        event
    }
}

#[async_trait]
impl EventSource for BrokerSource {
    fn descriptor(&self) -> SourceDescriptor {
        SourceDescriptor {
            kind: SourceKind::Broker,
            identifier: self.consumer.topic().to_string(),
        }
    }

    #[instrument(skip(self))]
    async fn poll(&self, limit: u32) -> Result<Vec<Event>, ApplicationError> {
        let partitions = self.consumer.partitions();
        if partitions.is_empty() {
            return Ok(Vec::new());
        }

        // Spread the window across partitions; a sparse partition's unused
        // share is simply not consumed this tick.
        #[allow(clippy::cast_possible_truncation)]
        let per_partition = (limit as usize).div_ceil(partitions.len()) as u32;

        let mut events = Vec::new();
        for partition in partitions {
            let after = self.committed_offset(partition).await?;
            let records = self
                .consumer
                .fetch(partition, after, per_partition)
                .await?;
            if !records.is_empty() {
                debug!(partition, count = records.len(), "Fetched broker records");
            }
            events.extend(records.into_iter().map(|record| self.record_to_event(record)));
        }
        Ok(events)
    }

    async fn commit(&self, _event: &Event) -> Result<(), ApplicationError> {
        // Offsets are committed through the audit path's checkpoint advance.
        Ok(())
    }

    async fn reject(&self, event: &Event, reason: &str) -> Result<(), ApplicationError> {
        warn!(
            partition = ?event.source.partition,
            offset = ?event.source.sequence,
            reason,
            "Broker record handoff failed, offset not committed"
        );
        Ok(())
    }
}
