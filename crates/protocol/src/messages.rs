//! Payload types carried inside [`crate::frame::Packet`].
//!
//! Media and crypto payloads (image/audio frames, handshake material) are
//! raw binary and defined alongside their codec. Everything else —
//! control-plane and discovery-service chatter — is a `serde` struct or
//! enum serialized as JSON, carried inside a framed packet.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// `1..=35`: media and control payloads.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImageFrameHeader {
    pub width: u16,
    pub height: u16,
    pub timestamp_us: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AudioBatchHeader {
    pub sample_count: u32,
    pub timestamp_us: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClientCapabilities {
    pub terminal_width: u16,
    pub terminal_height: u16,
    pub color_depth: u8,
    pub renderer: String,
    pub charset: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClientJoin {
    pub client_id: Uuid,
    pub display_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClientLeave {
    pub client_id: Uuid,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServerState {
    pub participants: Vec<Uuid>,
    pub host: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TextMessage {
    pub from: Uuid,
    pub body: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorMessage {
    pub code: u16,
    pub detail: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SizeMessage {
    pub width: u16,
    pub height: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RemoteLog {
    pub level: String,
    pub line: String,
}

/// `36..=99`: crypto handshake payloads. Carry raw key material, not JSON —
/// every byte is meaningful to the handshake transcript that gets signed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeInit {
    pub ephemeral_public: [u8; 32],
    pub session_salt: [u8; 32],
    pub identity_public: Option<[u8; 32]>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeResponse {
    pub ephemeral_public: [u8; 32],
    pub identity_public: Option<[u8; 32]>,
    pub transcript_signature: Option<[u8; 64]>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeConfirm {
    pub transcript_signature: Option<[u8; 64]>,
}

impl HandshakeInit {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(65 + 32);
        buf.extend_from_slice(&self.ephemeral_public);
        buf.extend_from_slice(&self.session_salt);
        match self.identity_public {
            Some(key) => {
                buf.push(1);
                buf.extend_from_slice(&key);
            }
            None => buf.push(0),
        }
        buf
    }

    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < 65 {
            return None;
        }
        let mut ephemeral_public = [0u8; 32];
        ephemeral_public.copy_from_slice(&buf[0..32]);
        let mut session_salt = [0u8; 32];
        session_salt.copy_from_slice(&buf[32..64]);
        let identity_public = if buf[64] == 1 {
            if buf.len() < 97 {
                return None;
            }
            let mut key = [0u8; 32];
            key.copy_from_slice(&buf[65..97]);
            Some(key)
        } else {
            None
        };
        Some(Self {
            ephemeral_public,
            session_salt,
            identity_public,
        })
    }
}

impl HandshakeResponse {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(32 + 1 + 32 + 1 + 64);
        buf.extend_from_slice(&self.ephemeral_public);
        match self.identity_public {
            Some(key) => {
                buf.push(1);
                buf.extend_from_slice(&key);
            }
            None => buf.push(0),
        }
        match self.transcript_signature {
            Some(sig) => {
                buf.push(1);
                buf.extend_from_slice(&sig);
            }
            None => buf.push(0),
        }
        buf
    }

    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < 33 {
            return None;
        }
        let mut ephemeral_public = [0u8; 32];
        ephemeral_public.copy_from_slice(&buf[0..32]);
        let mut offset = 32;
        let has_identity = buf[offset];
        offset += 1;
        let identity_public = if has_identity == 1 {
            if buf.len() < offset + 32 {
                return None;
            }
            let mut key = [0u8; 32];
            key.copy_from_slice(&buf[offset..offset + 32]);
            offset += 32;
            Some(key)
        } else {
            None
        };
        if buf.len() < offset + 1 {
            return None;
        }
        let has_sig = buf[offset];
        offset += 1;
        let transcript_signature = if has_sig == 1 {
            if buf.len() < offset + 64 {
                return None;
            }
            let mut sig = [0u8; 64];
            sig.copy_from_slice(&buf[offset..offset + 64]);
            Some(sig)
        } else {
            None
        };
        Some(Self {
            ephemeral_public,
            identity_public,
            transcript_signature,
        })
    }
}

impl HandshakeConfirm {
    pub fn encode(&self) -> Vec<u8> {
        match self.transcript_signature {
            Some(sig) => {
                let mut buf = vec![1];
                buf.extend_from_slice(&sig);
                buf
            }
            None => vec![0],
        }
    }

    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.is_empty() {
            return None;
        }
        let transcript_signature = if buf[0] == 1 {
            if buf.len() < 65 {
                return None;
            }
            let mut sig = [0u8; 64];
            sig.copy_from_slice(&buf[1..65]);
            Some(sig)
        } else {
            None
        };
        Some(Self { transcript_signature })
    }
}

/// `100..=199`: discovery-service payloads.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionCreate {
    pub creator_id: Uuid,
    pub creator_pubkey: [u8; 32],
    pub session_settings: Option<crate::session_settings::SessionSettings>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionCreated {
    pub session_uuid: Uuid,
    pub session_string: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionLookup {
    pub session_string: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionInfoRequest {
    pub session_uuid: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ParticipantInfo {
    pub participant_id: Uuid,
    pub ip: String,
    pub joined_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionInfo {
    pub session_uuid: Uuid,
    pub participants: Vec<ParticipantInfo>,
    pub host_participant: Option<Uuid>,
    pub session_settings: crate::session_settings::SessionSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionJoin {
    pub session_uuid: Uuid,
    pub participant_id: Uuid,
    pub participant_pubkey: [u8; 32],
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionJoined {
    pub session_info: SessionInfo,
}

/// Addressed to a single recipient, or broadcast to the whole session when
/// `to` is the all-zero UUID.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WebrtcSdp {
    pub session_uuid: Uuid,
    pub from: Uuid,
    pub to: Uuid,
    pub sdp: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WebrtcIce {
    pub session_uuid: Uuid,
    pub from: Uuid,
    pub to: Uuid,
    pub candidate: String,
    pub media_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NatQualityAdvisory {
    pub session_uuid: Uuid,
    pub from: Uuid,
    pub to: Uuid,
    pub quality: crate::election::NatQuality,
    /// Signature over (session_uuid || from || quality) by `from`'s identity key.
    pub signature: Option<[u8; 64]>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DiscoveryError {
    pub code: u16,
    pub detail: String,
}

/// Recipient value meaning "broadcast to the whole session".
pub const BROADCAST_RECIPIENT: Uuid = Uuid::nil();

/// Relay payload size limits from the wire protocol (SDP / ICE+media-id).
pub const MAX_SDP_LEN: usize = 4 * 1024;
pub const MAX_ICE_LEN: usize = 4 * 1024;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_create_roundtrips_through_json() {
        let msg = SessionCreate {
            creator_id: Uuid::from_u128(1),
            creator_pubkey: [0u8; 32],
            session_settings: None,
        };
        let json = serde_json::to_string(&msg).unwrap();
        let back: SessionCreate = serde_json::from_str(&json).unwrap();
        assert_eq!(msg, back);
    }

    #[test]
    fn broadcast_recipient_is_nil_uuid() {
        assert_eq!(BROADCAST_RECIPIENT, Uuid::nil());
    }

    #[test]
    fn webrtc_sdp_rejects_oversize_before_relay() {
        let big = "x".repeat(MAX_SDP_LEN + 1);
        assert!(big.len() > MAX_SDP_LEN);
    }

    #[test]
    fn handshake_init_roundtrips_without_identity() {
        let msg = HandshakeInit {
            ephemeral_public: [1u8; 32],
            session_salt: [2u8; 32],
            identity_public: None,
        };
        let encoded = msg.encode();
        assert_eq!(HandshakeInit::decode(&encoded), Some(msg));
    }

    #[test]
    fn handshake_init_roundtrips_with_identity() {
        let msg = HandshakeInit {
            ephemeral_public: [1u8; 32],
            session_salt: [2u8; 32],
            identity_public: Some([3u8; 32]),
        };
        let encoded = msg.encode();
        assert_eq!(HandshakeInit::decode(&encoded), Some(msg));
    }

    #[test]
    fn handshake_response_roundtrips_with_signature() {
        let msg = HandshakeResponse {
            ephemeral_public: [4u8; 32],
            identity_public: Some([5u8; 32]),
            transcript_signature: Some([6u8; 64]),
        };
        let encoded = msg.encode();
        assert_eq!(HandshakeResponse::decode(&encoded), Some(msg));
    }

    #[test]
    fn handshake_confirm_roundtrips() {
        let msg = HandshakeConfirm {
            transcript_signature: Some([7u8; 64]),
        };
        let encoded = msg.encode();
        assert_eq!(HandshakeConfirm::decode(&encoded), Some(msg));

        let none_msg = HandshakeConfirm {
            transcript_signature: None,
        };
        assert_eq!(HandshakeConfirm::decode(&none_msg.encode()), Some(none_msg));
    }
}
