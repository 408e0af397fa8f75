//! Protocol module
//!
//! Packet codec and payload formats for the overlay.

pub mod packet;
pub mod search;
pub mod wire;

// Re-exports for convenience
pub use packet::{next_sequence_number, Packet, PacketType, HEADER_SIZE, MAX_PACKET_SIZE, NO_CHUNK};
pub use search::{batch_records, parse_records, SearchRecord};
pub use wire::{read_field, read_text_field, write_field};
