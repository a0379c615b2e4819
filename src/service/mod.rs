//! Service layer
//!
//! Operations local actors and administrators trigger directly, as opposed
//! to the ones driven by inbound activities.

mod follow;
mod removal;

pub use follow::FollowService;
pub use removal::{ActorRemoval, RemovalSummary};
