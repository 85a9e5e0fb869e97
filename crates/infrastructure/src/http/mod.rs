//! Outbound HTTP

mod outbound;

pub use outbound::{OutboundClientConfig, ReqwestTransport};
