//! Stateless signaling relay: forwards `WebrtcSdp` / `WebrtcIce` /
//! `NatQualityAdvisory` to a named recipient, or broadcasts to every other
//! connected participant in the session when `to` is the all-zero UUID.
//! No queuing, no retry — a recipient that isn't connected right now gets
//! dropped and the sender gets a `DiscoveryError` back.

use std::time::Duration;

use acip_protocol::{
    AcipError, DiscoveryError, NatQualityAdvisory, Packet, PacketType, WebrtcIce, WebrtcSdp,
    BROADCAST_RECIPIENT, MAX_ICE_LEN, MAX_SDP_LEN,
};
use uuid::Uuid;

use crate::state::DiscoveryState;

const RELAY_SEND_TIMEOUT: Duration = Duration::from_secs(5);

async fn deliver(
    state: &DiscoveryState,
    session_uuid: Uuid,
    to: Uuid,
    packet_type: PacketType,
    payload: Vec<u8>,
) -> Result<(), AcipError> {
    let packet = Packet::new(packet_type, payload);
    let bytes = packet.encode()?;

    let targets: Vec<Uuid> = if to == BROADCAST_RECIPIENT {
        state.sessions.participant_ids(session_uuid).await
    } else {
        vec![to]
    };

    let connections = state.connections.read().await;
    let mut delivered_any = false;
    for target in targets {
        if let Some(transport) = connections.get(&target) {
            match transport.send(&bytes, RELAY_SEND_TIMEOUT).await {
                Ok(()) => delivered_any = true,
                Err(e) => tracing::debug!(target = %target, error = %e, "relay send failed"),
            }
        }
    }

    if delivered_any {
        Ok(())
    } else {
        Err(AcipError::NotFound)
    }
}

pub async fn relay_sdp(state: &DiscoveryState, sdp: WebrtcSdp) -> Result<(), AcipError> {
    if sdp.sdp.len() > MAX_SDP_LEN {
        return Err(AcipError::InvalidParam("sdp exceeds the relay size limit".into()));
    }
    let payload = serde_json::to_vec(&sdp).map_err(|e| AcipError::InvalidParam(e.to_string()))?;
    deliver(state, sdp.session_uuid, sdp.to, PacketType::WebrtcSdp, payload).await
}

pub async fn relay_ice(state: &DiscoveryState, ice: WebrtcIce) -> Result<(), AcipError> {
    if ice.candidate.len() + ice.media_id.len() > MAX_ICE_LEN {
        return Err(AcipError::InvalidParam("ice candidate exceeds the relay size limit".into()));
    }
    let payload = serde_json::to_vec(&ice).map_err(|e| AcipError::InvalidParam(e.to_string()))?;
    deliver(state, ice.session_uuid, ice.to, PacketType::WebrtcIce, payload).await
}

pub async fn relay_nat_quality(state: &DiscoveryState, advisory: NatQualityAdvisory) -> Result<(), AcipError> {
    let payload = serde_json::to_vec(&advisory).map_err(|e| AcipError::InvalidParam(e.to_string()))?;
    deliver(state, advisory.session_uuid, advisory.to, PacketType::NatQualityAdvisory, payload).await
}

/// Send a `DiscoveryError` back to `sender` over its own live transport.
pub async fn send_error_to(state: &DiscoveryState, sender: Uuid, err: &AcipError) {
    let connections = state.connections.read().await;
    let Some(transport) = connections.get(&sender) else {
        return;
    };
    let msg = DiscoveryError {
        code: err.code(),
        detail: err.to_string(),
    };
    let Ok(payload) = serde_json::to_vec(&msg) else {
        return;
    };
    let packet = Packet::new(PacketType::DiscoveryError, payload);
    if let Ok(bytes) = packet.encode() {
        let _ = transport.send(&bytes, RELAY_SEND_TIMEOUT).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rate_limit_sqlite::SwappableRateLimiter;
    use crate::session_registry::SessionRegistry;
    use acip_protocol::InMemoryRateLimiter;
    use acip_transport::TcpTransport;
    use std::sync::Arc;

    async fn paired_transports() -> (Arc<TcpTransport>, Arc<TcpTransport>) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let connect = tokio::net::TcpStream::connect(addr);
        let (accepted, connected) = tokio::join!(listener.accept(), connect);
        let (server_stream, peer) = accepted.unwrap();
        let client_stream = connected.unwrap();
        let client_peer = client_stream.peer_addr().unwrap();
        (
            Arc::new(TcpTransport::new(server_stream, peer)),
            Arc::new(TcpTransport::new(client_stream, client_peer)),
        )
    }

    fn state() -> DiscoveryState {
        DiscoveryState::new(
            SessionRegistry::new(None, false, false),
            SwappableRateLimiter::new(Box::new(InMemoryRateLimiter::new())),
            None,
            false,
            false,
        )
    }

    #[tokio::test]
    async fn sdp_too_large_is_rejected_without_a_send() {
        let state = state();
        let sdp = WebrtcSdp {
            session_uuid: Uuid::new_v4(),
            from: Uuid::new_v4(),
            to: Uuid::new_v4(),
            sdp: "x".repeat(MAX_SDP_LEN + 1),
        };
        assert!(matches!(relay_sdp(&state, sdp).await, Err(AcipError::InvalidParam(_))));
    }

    #[tokio::test]
    async fn unconnected_recipient_returns_not_found() {
        let state = state();
        let sdp = WebrtcSdp {
            session_uuid: Uuid::new_v4(),
            from: Uuid::new_v4(),
            to: Uuid::new_v4(),
            sdp: "v=0".into(),
        };
        assert!(matches!(relay_sdp(&state, sdp).await, Err(AcipError::NotFound)));
    }

    #[tokio::test]
    async fn sdp_is_forwarded_to_a_connected_recipient() {
        let state = state();
        let (host_side, far_side) = paired_transports().await;
        let recipient = Uuid::new_v4();
        state.register_connection(recipient, host_side).await;

        let session_uuid = Uuid::new_v4();
        let sdp = WebrtcSdp {
            session_uuid,
            from: Uuid::new_v4(),
            to: recipient,
            sdp: "v=0".into(),
        };
        relay_sdp(&state, sdp).await.unwrap();

        let mut buf = vec![0u8; 4096];
        let n = far_side.recv(&mut buf, Duration::from_secs(1)).await.unwrap();
        let packet = Packet::decode(&buf[..n]).unwrap();
        assert_eq!(packet.packet_type, PacketType::WebrtcSdp as u16);
    }
}
