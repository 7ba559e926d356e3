//! Shared "connect to a host as a participant" sequence: perform the
//! handshake, declare capabilities, and wait for the host's join
//! acknowledgement. Used by both the plain client binary and the discovery
//! client's `ConnectingHost` state.

use std::time::Duration;

use acip_protocol::crypto::{HandshakeState, Identity, SecureChannel};
use acip_protocol::{
    AcipError, ClientCapabilities, HandshakeConfirm, HandshakeInit, HandshakeResponse, Packet,
    PacketType,
};
use acip_transport::Transport;

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

pub struct JoinedSession {
    pub secure_channel: SecureChannel,
}

/// Runs the initiator side of the handshake (the connecting participant)
/// and declares capabilities, returning the resulting secure channel.
pub async fn join_as_participant(
    transport: &dyn Transport,
    identity: Option<&Identity>,
    capabilities: ClientCapabilities,
) -> Result<JoinedSession, AcipError> {
    let state = HandshakeState::generate();
    let init = HandshakeInit {
        ephemeral_public: state.public,
        session_salt: state.session_salt,
        identity_public: identity.map(|i| i.public_bytes()),
    };
    let packet = Packet::new(PacketType::HandshakeInit, init.encode());
    transport.send(&packet.encode()?, HANDSHAKE_TIMEOUT).await?;

    let mut buf = vec![0u8; 4096];
    let n = transport.recv(&mut buf, HANDSHAKE_TIMEOUT).await?;
    if n == 0 {
        return Err(AcipError::EndOfStream);
    }
    let reply = Packet::decode(&buf[..n])?;
    if reply.packet_type != PacketType::HandshakeResponse as u16 {
        return Err(AcipError::HandshakeFailed("expected HandshakeResponse".into()));
    }
    let response = HandshakeResponse::decode(&reply.payload)
        .ok_or_else(|| AcipError::HandshakeFailed("malformed HandshakeResponse".into()))?;

    let secure_channel = state.complete(&response.ephemeral_public, true)?;

    if let (Some(sig), Some(peer_key)) = (response.transcript_signature, response.identity_public)
    {
        let transcript = transcript_bytes(&init.session_salt, &init.ephemeral_public, &response.ephemeral_public);
        acip_protocol::crypto::verify_transcript(&peer_key, &transcript, &sig)?;
    }

    let confirm = HandshakeConfirm {
        transcript_signature: identity.map(|i| {
            let transcript = transcript_bytes(&init.session_salt, &init.ephemeral_public, &response.ephemeral_public);
            i.sign(&transcript)
        }),
    };
    let packet = Packet::new(PacketType::HandshakeConfirm, confirm.encode());
    transport.send(&packet.encode()?, HANDSHAKE_TIMEOUT).await?;

    let caps_json = serde_json::to_vec(&capabilities)
        .map_err(|e| AcipError::InvalidParam(e.to_string()))?;
    let sealed_caps = secure_channel.seal(&caps_json)?;
    let packet = Packet::new(PacketType::ClientCapabilities, sealed_caps);
    transport.send(&packet.encode()?, HANDSHAKE_TIMEOUT).await?;

    Ok(JoinedSession { secure_channel })
}

fn transcript_bytes(salt: &[u8; 32], a_pub: &[u8; 32], b_pub: &[u8; 32]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(96);
    buf.extend_from_slice(salt);
    buf.extend_from_slice(a_pub);
    buf.extend_from_slice(b_pub);
    buf
}

/// Counterpart run on the host side when accepting a new client: reads the
/// `HandshakeInit`, responds, and waits for `HandshakeConfirm`.
pub async fn accept_handshake(
    transport: &dyn Transport,
    identity: Option<&Identity>,
    require_client_identity: bool,
) -> Result<SecureChannel, AcipError> {
    let mut buf = vec![0u8; 4096];
    let n = transport.recv(&mut buf, HANDSHAKE_TIMEOUT).await?;
    if n == 0 {
        return Err(AcipError::EndOfStream);
    }
    let packet = Packet::decode(&buf[..n])?;
    if packet.packet_type != PacketType::HandshakeInit as u16 {
        return Err(AcipError::HandshakeFailed("expected HandshakeInit".into()));
    }
    let init = HandshakeInit::decode(&packet.payload)
        .ok_or_else(|| AcipError::HandshakeFailed("malformed HandshakeInit".into()))?;

    if require_client_identity && init.identity_public.is_none() {
        return Err(AcipError::AuthRequired);
    }

    let state = HandshakeState::generate();
    let our_public = state.public;
    let transcript = transcript_bytes(&init.session_salt, &init.ephemeral_public, &our_public);

    let response = HandshakeResponse {
        ephemeral_public: our_public,
        identity_public: identity.map(|i| i.public_bytes()),
        transcript_signature: identity.map(|i| i.sign(&transcript)),
    };
    let packet = Packet::new(PacketType::HandshakeResponse, response.encode());
    transport.send(&packet.encode()?, HANDSHAKE_TIMEOUT).await?;

    let secure_channel = state.complete(&init.ephemeral_public, false)?;

    let mut buf = vec![0u8; 4096];
    let n = transport.recv(&mut buf, HANDSHAKE_TIMEOUT).await?;
    if n == 0 {
        return Err(AcipError::EndOfStream);
    }
    let confirm_packet = Packet::decode(&buf[..n])?;
    if confirm_packet.packet_type != PacketType::HandshakeConfirm as u16 {
        return Err(AcipError::HandshakeFailed("expected HandshakeConfirm".into()));
    }
    let confirm = HandshakeConfirm::decode(&confirm_packet.payload)
        .ok_or_else(|| AcipError::HandshakeFailed("malformed HandshakeConfirm".into()))?;

    if let (Some(sig), Some(peer_key)) = (confirm.transcript_signature, init.identity_public) {
        acip_protocol::crypto::verify_transcript(&peer_key, &transcript, &sig)?;
    } else if require_client_identity {
        return Err(AcipError::AuthRequired);
    }

    Ok(secure_channel)
}
