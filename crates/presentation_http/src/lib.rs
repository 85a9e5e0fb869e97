//! HTTP surface of the RelayGate delivery gateway
//!
//! The push ingestion endpoint, the admin API (integrations, execution
//! logs, scheduled deliveries, DLQ, stats) and the health probes. The
//! delivery engine itself lives in the application and infrastructure
//! layers; this crate only exposes it.

pub mod error;
pub mod handlers;
pub mod middleware;
pub mod routes;
pub mod state;

pub use error::{ApiError, ErrorResponse};
pub use routes::create_router;
pub use state::AppState;
