//! Packet framing for the ACIP wire protocol.
//!
//! 20 bytes, network byte order, followed by the payload:
//! ```text
//! [0..4]   magic: 0x41434950 ("ACIP")
//! [4..6]   packet type (u16)
//! [6..10]  payload length (u32) — must be <= MAX_PAYLOAD_LEN
//! [10..14] sequence (u32) — process-wide monotonic, wraps at 2^32
//! [14..18] crc32 of payload (u32) — 0 when payload is empty
//! [18..20] reserved (u16, must be 0)
//! [20..]   payload
//! ```

use std::sync::atomic::{AtomicU32, Ordering};

pub const PACKET_HEADER_SIZE: usize = 20;
pub const PACKET_MAGIC: u32 = 0x4143_4950; // "ACIP"
pub const MAX_PAYLOAD_LEN: usize = 16 * 1024 * 1024;

/// Allocates outbound sequence numbers. Shared across every transport a
/// process drives; wrap-around is expected and not an error.
static SEQUENCE: AtomicU32 = AtomicU32::new(0);

fn next_sequence() -> u32 {
    SEQUENCE.fetch_add(1, Ordering::Relaxed)
}

/// 1-35: media and control. 36-99: crypto handshake. 100-199: discovery-service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum PacketType {
    ImageFrame = 1,
    AudioBatch = 2,
    Ping = 3,
    Pong = 4,
    StreamStart = 5,
    StreamStop = 6,
    ClientCapabilities = 7,
    ClientJoin = 8,
    ClientLeave = 9,
    ServerState = 10,
    TextMessage = 11,
    ErrorMessage = 12,
    SizeMessage = 13,
    RemoteLog = 14,

    HandshakeInit = 36,
    HandshakeResponse = 37,
    HandshakeConfirm = 38,

    SessionCreate = 100,
    SessionCreated = 101,
    SessionLookup = 102,
    SessionInfoRequest = 103,
    SessionInfo = 104,
    SessionJoin = 105,
    SessionJoined = 106,
    WebrtcSdp = 107,
    WebrtcIce = 108,
    NatQualityAdvisory = 109,
    DiscoveryError = 110,
}

impl PacketType {
    pub fn from_u16(value: u16) -> Option<Self> {
        Some(match value {
            1 => Self::ImageFrame,
            2 => Self::AudioBatch,
            3 => Self::Ping,
            4 => Self::Pong,
            5 => Self::StreamStart,
            6 => Self::StreamStop,
            7 => Self::ClientCapabilities,
            8 => Self::ClientJoin,
            9 => Self::ClientLeave,
            10 => Self::ServerState,
            11 => Self::TextMessage,
            12 => Self::ErrorMessage,
            13 => Self::SizeMessage,
            14 => Self::RemoteLog,
            36 => Self::HandshakeInit,
            37 => Self::HandshakeResponse,
            38 => Self::HandshakeConfirm,
            100 => Self::SessionCreate,
            101 => Self::SessionCreated,
            102 => Self::SessionLookup,
            103 => Self::SessionInfoRequest,
            104 => Self::SessionInfo,
            105 => Self::SessionJoin,
            106 => Self::SessionJoined,
            107 => Self::WebrtcSdp,
            108 => Self::WebrtcIce,
            109 => Self::NatQualityAdvisory,
            110 => Self::DiscoveryError,
            _ => return None,
        })
    }

    /// Whether this type belongs to the media/control class whose sequence
    /// monotonicity is tracked per (transport, class) pair by the receiver.
    pub fn is_media_or_control(&self) -> bool {
        (*self as u16) <= 35
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub packet_type: u16,
    pub sequence: u32,
    pub payload: Vec<u8>,
}

impl Packet {
    /// Build a packet with a freshly allocated sequence number.
    pub fn new(packet_type: PacketType, payload: Vec<u8>) -> Self {
        Self {
            packet_type: packet_type as u16,
            sequence: next_sequence(),
            payload,
        }
    }

    pub fn crc(&self) -> u32 {
        if self.payload.is_empty() {
            0
        } else {
            crc32fast::hash(&self.payload)
        }
    }

    /// Serialize header + payload into a single buffer.
    pub fn encode(&self) -> Result<Vec<u8>, FrameError> {
        if self.payload.len() > MAX_PAYLOAD_LEN {
            return Err(FrameError::Oversize(self.payload.len()));
        }
        let mut buf = Vec::with_capacity(PACKET_HEADER_SIZE + self.payload.len());
        buf.extend_from_slice(&PACKET_MAGIC.to_be_bytes());
        buf.extend_from_slice(&self.packet_type.to_be_bytes());
        buf.extend_from_slice(&(self.payload.len() as u32).to_be_bytes());
        buf.extend_from_slice(&self.sequence.to_be_bytes());
        buf.extend_from_slice(&self.crc().to_be_bytes());
        buf.extend_from_slice(&0u16.to_be_bytes()); // reserved
        buf.extend_from_slice(&self.payload);
        Ok(buf)
    }

    /// Decode a packet from a buffer holding exactly one header + payload.
    /// Sequence monotonicity is the caller's concern, not checked here.
    pub fn decode(buf: &[u8]) -> Result<Self, FrameError> {
        if buf.len() < PACKET_HEADER_SIZE {
            return Err(FrameError::TooShort(buf.len()));
        }

        let magic = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
        if magic != PACKET_MAGIC {
            return Err(FrameError::MagicMismatch(magic));
        }

        let packet_type = u16::from_be_bytes([buf[4], buf[5]]);
        let length = u32::from_be_bytes([buf[6], buf[7], buf[8], buf[9]]) as usize;
        if length > MAX_PAYLOAD_LEN {
            return Err(FrameError::Oversize(length));
        }
        let sequence = u32::from_be_bytes([buf[10], buf[11], buf[12], buf[13]]);
        let crc = u32::from_be_bytes([buf[14], buf[15], buf[16], buf[17]]);

        let expected_total = PACKET_HEADER_SIZE + length;
        if buf.len() < expected_total {
            return Err(FrameError::IncompletePayload {
                expected: length,
                actual: buf.len() - PACKET_HEADER_SIZE,
            });
        }

        let payload = buf[PACKET_HEADER_SIZE..expected_total].to_vec();
        let actual_crc = if payload.is_empty() { 0 } else { crc32fast::hash(&payload) };
        if actual_crc != crc {
            return Err(FrameError::CorruptPayload);
        }

        Ok(Self {
            packet_type,
            sequence,
            payload,
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("buffer too short: {0} bytes (need at least {PACKET_HEADER_SIZE})")]
    TooShort(usize),
    #[error("bad magic: 0x{0:08x} (expected 0x{PACKET_MAGIC:08x})")]
    MagicMismatch(u32),
    #[error("payload too large: {0} bytes (max {MAX_PAYLOAD_LEN})")]
    Oversize(usize),
    #[error("incomplete payload: expected {expected} bytes, got {actual}")]
    IncompletePayload { expected: usize, actual: usize },
    #[error("CRC32 mismatch: payload corrupted in transit")]
    CorruptPayload,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_size_is_20() {
        assert_eq!(PACKET_HEADER_SIZE, 20);
    }

    #[test]
    fn magic_bytes_spell_acip() {
        assert_eq!(&PACKET_MAGIC.to_be_bytes(), b"ACIP");
    }

    #[test]
    fn roundtrip_with_payload() {
        let packet = Packet::new(PacketType::Ping, vec![1, 2, 3, 4]);
        let bytes = packet.encode().unwrap();
        let decoded = Packet::decode(&bytes).unwrap();
        assert_eq!(decoded.packet_type, PacketType::Ping as u16);
        assert_eq!(decoded.payload, vec![1, 2, 3, 4]);
    }

    #[test]
    fn roundtrip_empty_payload_has_zero_crc() {
        let packet = Packet::new(PacketType::Pong, Vec::new());
        let bytes = packet.encode().unwrap();
        let crc = u32::from_be_bytes([bytes[14], bytes[15], bytes[16], bytes[17]]);
        assert_eq!(crc, 0);
        let decoded = Packet::decode(&bytes).unwrap();
        assert!(decoded.payload.is_empty());
    }

    #[test]
    fn sequence_numbers_increase() {
        let a = Packet::new(PacketType::Ping, Vec::new());
        let b = Packet::new(PacketType::Ping, Vec::new());
        assert!(b.sequence > a.sequence || (a.sequence == u32::MAX && b.sequence == 0));
    }

    #[test]
    fn corrupt_payload_detected() {
        let packet = Packet::new(PacketType::TextMessage, vec![0xAA; 16]);
        let mut bytes = packet.encode().unwrap();
        // Flip one bit in the payload, leaving the stored CRC untouched.
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;
        match Packet::decode(&bytes) {
            Err(FrameError::CorruptPayload) => {}
            other => panic!("expected CorruptPayload, got {other:?}"),
        }
    }

    #[test]
    fn bad_magic_rejected() {
        let mut bytes = Packet::new(PacketType::Ping, Vec::new()).encode().unwrap();
        bytes[0] = 0x00;
        match Packet::decode(&bytes) {
            Err(FrameError::MagicMismatch(_)) => {}
            other => panic!("expected MagicMismatch, got {other:?}"),
        }
    }

    #[test]
    fn oversize_payload_rejected_on_encode() {
        let packet = Packet::new(PacketType::ImageFrame, vec![0u8; MAX_PAYLOAD_LEN + 1]);
        match packet.encode() {
            Err(FrameError::Oversize(_)) => {}
            other => panic!("expected Oversize, got {other:?}"),
        }
    }

    #[test]
    fn truncated_payload_reports_incomplete() {
        let packet = Packet::new(PacketType::ImageFrame, vec![0u8; 100]);
        let mut bytes = packet.encode().unwrap();
        bytes.truncate(PACKET_HEADER_SIZE + 50);
        match Packet::decode(&bytes) {
            Err(FrameError::IncompletePayload {
                expected: 100,
                actual: 50,
            }) => {}
            other => panic!("expected IncompletePayload, got {other:?}"),
        }
    }

    #[test]
    fn packet_type_from_u16_roundtrips() {
        assert_eq!(PacketType::from_u16(1), Some(PacketType::ImageFrame));
        assert_eq!(PacketType::from_u16(100), Some(PacketType::SessionCreate));
        assert_eq!(PacketType::from_u16(9999), None);
    }
}
