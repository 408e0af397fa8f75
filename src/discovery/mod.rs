//! Discovery module
//!
//! Presence announcements and bounded flooding of discovery/search traffic.

pub mod flood;
pub mod node;
pub mod seen;
pub mod service;

// Re-exports for convenience
pub use flood::{Admission, FloodFilter};
pub use node::NodeId;
pub use seen::{DedupKey, SeenCache};
pub use service::{DiscoveryConfig, DiscoveryService};
