//! Flood admission policy
//!
//! Decides, for every packet arriving on the discovery endpoint, whether it
//! is dropped, escalated to the coordinator, and relayed onward.

use tracing::trace;

use crate::discovery::node::NodeId;
use crate::discovery::seen::SeenCache;
use crate::protocol::Packet;

/// Outcome of admitting an inbound packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// Same `(node id, sequence)` already processed
    Duplicate,
    /// Hop budget exhausted
    Expired,
    /// Sent by this node and echoed back
    SelfOriginated,
    /// Hand to the coordinator; relay `forward` if present
    Escalate { forward: Option<Packet> },
}

/// Dedup and forwarding state for one discovery endpoint
#[derive(Debug)]
pub struct FloodFilter {
    local_id: NodeId,
    seen: SeenCache,
}

impl FloodFilter {
    pub fn new(local_id: NodeId, seen: SeenCache) -> Self {
        Self { local_id, seen }
    }

    /// Record an outbound packet so its echo is treated as a duplicate
    pub fn mark_sent(&mut self, packet: &Packet) {
        self.seen.insert(packet.dedup_key());
    }

    /// Classify an inbound packet, recording it as seen
    pub fn admit(&mut self, packet: &Packet) -> Admission {
        if !self.seen.insert(packet.dedup_key()) {
            trace!("Duplicate {} seq={} from {}", packet.packet_type, packet.sequence, packet.node_id);
            return Admission::Duplicate;
        }
        if packet.ttl <= 0 {
            trace!("Expired {} seq={} ttl={}", packet.packet_type, packet.sequence, packet.ttl);
            return Admission::Expired;
        }
        if self.local_id.matches(&packet.node_id) {
            return Admission::SelfOriginated;
        }

        let forward = if packet.packet_type.is_floodable() && packet.ttl - 1 > 0 {
            let mut relayed = packet.clone();
            relayed.ttl -= 1;
            Some(relayed)
        } else {
            None
        };
        Admission::Escalate { forward }
    }

    pub fn seen_count(&self) -> usize {
        self.seen.len()
    }
}
