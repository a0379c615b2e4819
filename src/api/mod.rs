//! API layer
//!
//! HTTP handlers for:
//! - ActivityPub inboxes (for federation)
//! - Metrics (Prometheus) and health

mod inbox;
mod metrics;

pub use inbox::inbox_router;
pub use metrics::operations_router;
