//! Overlay packets
//!
//! A single packet shape carries every message type. The layout is a fixed
//! header (type, sequence, ttl, chunk index as 4-byte integers, file size as 8
//! bytes) followed by five length-prefixed fields in order: originator
//! address, file identifier, chunk payload, text payload, originator node id.
//! All integers are big-endian.

use std::sync::atomic::{AtomicU32, Ordering};

use anyhow::Result;
use bytes::{Buf, BufMut, BytesMut};
use tracing::{debug, error, trace};

use crate::error::ShareError;
use crate::protocol::wire::{field_len, read_field, read_text_field, write_field};

/// Largest datagram payload a packet may occupy
pub const MAX_PACKET_SIZE: usize = 65_507;

/// Fixed header size in bytes
pub const HEADER_SIZE: usize = 4 + 4 + 4 + 4 + 8;

/// Chunk index value meaning "not set"
pub const NO_CHUNK: i32 = -1;

static NEXT_SEQUENCE: AtomicU32 = AtomicU32::new(0);

/// Allocate the next process-wide sequence number (starts at 1)
pub fn next_sequence_number() -> u32 {
    NEXT_SEQUENCE.fetch_add(1, Ordering::SeqCst).wrapping_add(1)
}

/// Packet type codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum PacketType {
    Discovery = 1,
    Search = 3,
    SearchResponse = 4,
    ChunkRequest = 5,
    ChunkResponse = 6,
    Other = 99,
}

impl PacketType {
    /// Numeric wire code
    pub fn code(self) -> u32 {
        self as u32
    }

    /// Whether packets of this type are relayed by the flood
    pub fn is_floodable(self) -> bool {
        matches!(self, PacketType::Discovery | PacketType::Search)
    }
}

impl From<u32> for PacketType {
    fn from(value: u32) -> Self {
        match value {
            1 => PacketType::Discovery,
            3 => PacketType::Search,
            4 => PacketType::SearchResponse,
            5 => PacketType::ChunkRequest,
            6 => PacketType::ChunkResponse,
            other => {
                trace!("Unknown packet type code {}, treating as Other", other);
                PacketType::Other
            }
        }
    }
}

impl std::fmt::Display for PacketType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PacketType::Discovery => write!(f, "DISCOVERY"),
            PacketType::Search => write!(f, "SEARCH"),
            PacketType::SearchResponse => write!(f, "SEARCH_RESPONSE"),
            PacketType::ChunkRequest => write!(f, "CHUNK_REQUEST"),
            PacketType::ChunkResponse => write!(f, "CHUNK_RESPONSE"),
            PacketType::Other => write!(f, "OTHER"),
        }
    }
}

/// Overlay packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Message type
    pub packet_type: PacketType,
    /// Sender-local sequence number
    pub sequence: u32,
    /// Remaining hop budget
    pub ttl: i32,
    /// Reply address of the originating node
    pub originator_addr: String,
    /// Content identifier the message refers to
    pub file_id: String,
    /// Zero-based chunk index, or `NO_CHUNK`
    pub chunk_index: i32,
    /// Chunk bytes; an empty payload is always stored as `None`
    pub chunk_payload: Option<Vec<u8>>,
    /// Hello text, search query, or newline-delimited search results
    pub text: String,
    /// Total size of the referenced file
    pub file_size: u64,
    /// Opaque per-process token of the originating node
    pub node_id: String,
}

impl Default for Packet {
    fn default() -> Self {
        Self {
            packet_type: PacketType::Other,
            sequence: 0,
            ttl: 0,
            originator_addr: String::new(),
            file_id: String::new(),
            chunk_index: NO_CHUNK,
            chunk_payload: None,
            text: String::new(),
            file_size: 0,
            node_id: String::new(),
        }
    }
}

impl Packet {
    /// Create a packet with a freshly allocated sequence number
    pub fn new(packet_type: PacketType, ttl: i32, originator_addr: impl Into<String>) -> Self {
        Self {
            packet_type,
            sequence: next_sequence_number(),
            ttl,
            originator_addr: originator_addr.into(),
            ..Self::default()
        }
    }

    pub fn with_node_id(mut self, node_id: impl Into<String>) -> Self {
        self.node_id = node_id.into();
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    pub fn with_file(mut self, file_id: impl Into<String>, file_size: u64) -> Self {
        self.file_id = file_id.into();
        self.file_size = file_size;
        self
    }

    pub fn with_chunk(mut self, index: i32, payload: Option<Vec<u8>>) -> Self {
        self.chunk_index = index;
        self.set_chunk_payload(payload);
        self
    }

    /// Set the chunk payload, normalizing an empty payload to `None`
    pub fn set_chunk_payload(&mut self, payload: Option<Vec<u8>>) {
        self.chunk_payload = payload.filter(|p| !p.is_empty());
    }

    /// Duplicate-suppression key: originator node id and sequence number
    pub fn dedup_key(&self) -> (String, u32) {
        (self.node_id.clone(), self.sequence)
    }

    /// Exact encoded size in bytes
    pub fn encoded_len(&self) -> usize {
        HEADER_SIZE
            + field_len(self.originator_addr.as_bytes())
            + field_len(self.file_id.as_bytes())
            + field_len(self.chunk_payload.as_deref().unwrap_or_default())
            + field_len(self.text.as_bytes())
            + field_len(self.node_id.as_bytes())
    }

    /// Serialize the packet; fails only if it would exceed `MAX_PACKET_SIZE`
    pub fn encode(&self) -> Result<Vec<u8>> {
        let total = self.encoded_len();
        if total > MAX_PACKET_SIZE {
            error!("Packet {} seq={} too large: {} bytes", self.packet_type, self.sequence, total);
            return Err(ShareError::protocol_error_with_source(
                "Packet exceeds datagram size ceiling",
                format!("{} > {}", total, MAX_PACKET_SIZE),
            )
            .into());
        }

        let mut buf = BytesMut::with_capacity(total);
        buf.put_u32(self.packet_type.code());
        buf.put_u32(self.sequence);
        buf.put_i32(self.ttl);
        buf.put_i32(self.chunk_index);
        buf.put_u64(self.file_size);

        write_field(&mut buf, self.originator_addr.as_bytes());
        write_field(&mut buf, self.file_id.as_bytes());
        write_field(&mut buf, self.chunk_payload.as_deref().unwrap_or_default());
        write_field(&mut buf, self.text.as_bytes());
        write_field(&mut buf, self.node_id.as_bytes());

        trace!("Encoded {} seq={}: {} bytes", self.packet_type, self.sequence, buf.len());
        Ok(buf.to_vec())
    }

    /// Parse a packet. Unknown type codes become `PacketType::Other`; only a
    /// truncated buffer is rejected.
    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut buf = data;
        if buf.remaining() < HEADER_SIZE {
            debug!("Packet too short for header: {} bytes", data.len());
            return Err(ShareError::protocol_error_with_source(
                "Packet too short",
                format!("expected at least {} bytes, got {}", HEADER_SIZE, data.len()),
            )
            .into());
        }

        let packet_type = PacketType::from(buf.get_u32());
        let sequence = buf.get_u32();
        let ttl = buf.get_i32();
        let chunk_index = buf.get_i32();
        let file_size = buf.get_u64();

        let originator_addr = read_text_field(&mut buf, "originator_addr")?;
        let file_id = read_text_field(&mut buf, "file_id")?;
        let payload = read_field(&mut buf, "chunk_payload")?;
        let text = read_text_field(&mut buf, "text")?;
        let node_id = read_text_field(&mut buf, "node_id")?;

        let mut packet = Self {
            packet_type,
            sequence,
            ttl,
            originator_addr,
            file_id,
            chunk_index,
            chunk_payload: None,
            text,
            file_size,
            node_id,
        };
        packet.set_chunk_payload(Some(payload));
        Ok(packet)
    }
}
