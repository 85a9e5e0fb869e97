//! Source adapters
//!
//! Pluggable readers emitting normalized events: the sequential-relational
//! poller (the primary variant), a broker partition consumer, and the HTTP
//! push queue.

mod broker;
mod push;
mod relational;

pub use broker::{BrokerConsumer, BrokerRecord, BrokerSource, InMemoryBroker};
pub use push::PushSource;
pub use relational::{RelationalSourceSettings, SequentialRelationalSource};
