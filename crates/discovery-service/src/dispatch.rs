//! Per-connection dispatch loop: reads framed packets off a transport and
//! routes discovery-service packet types (100-199) to the session registry
//! or the signaling relay. One task per accepted connection, whether it
//! arrived over raw TCP or a browser WebSocket upgrade.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use acip_protocol::{
    AcipError, DiscoveryError, EventKind, NatQualityAdvisory, Packet, PacketType, SessionCreate,
    SessionCreated, SessionInfoRequest, SessionJoin, SessionJoined, SessionLookup, WebrtcIce, WebrtcSdp,
};
use acip_transport::Transport;
use uuid::Uuid;

use crate::relay;
use crate::state::DiscoveryState;

const RECV_TIMEOUT: Duration = Duration::from_secs(60);
const READ_CHUNK: usize = 8 * 1024;
/// Generous enough for a `SessionInfo` reply listing every participant in a
/// full session; still well under `MAX_PAYLOAD_LEN`.
const MAX_ACCUMULATED: usize = 256 * 1024;

/// Accumulates bytes from `transport` until at least one full packet is
/// available, per the frame header's own length field. `TcpTransport` and
/// `AxumWebSocketTransport` both return partial reads, so a single `recv`
/// is not guaranteed to land on a packet boundary.
struct PacketReader {
    buf: Vec<u8>,
}

impl PacketReader {
    fn new() -> Self {
        Self { buf: Vec::new() }
    }

    async fn next_packet(&mut self, transport: &dyn Transport) -> Result<Packet, AcipError> {
        loop {
            if self.buf.len() >= acip_protocol::PACKET_HEADER_SIZE {
                let declared_len = u32::from_be_bytes([self.buf[6], self.buf[7], self.buf[8], self.buf[9]]) as usize;
                let total = acip_protocol::PACKET_HEADER_SIZE + declared_len;
                if self.buf.len() >= total {
                    let packet = Packet::decode(&self.buf[..total])?;
                    self.buf.drain(..total);
                    return Ok(packet);
                }
            }
            if self.buf.len() > MAX_ACCUMULATED {
                return Err(AcipError::InvalidParam("packet exceeds accumulation limit".into()));
            }
            let mut chunk = vec![0u8; READ_CHUNK];
            let n = transport.recv(&mut chunk, RECV_TIMEOUT).await?;
            if n == 0 {
                return Err(AcipError::EndOfStream);
            }
            self.buf.extend_from_slice(&chunk[..n]);
        }
    }
}

async fn send_reply(transport: &dyn Transport, packet_type: PacketType, payload: Vec<u8>) -> Result<(), AcipError> {
    let packet = Packet::new(packet_type, payload);
    transport.send(&packet.encode()?, RECV_TIMEOUT).await
}

async fn send_discovery_error(transport: &dyn Transport, err: &AcipError) {
    let msg = DiscoveryError {
        code: err.code(),
        detail: err.to_string(),
    };
    if let Ok(payload) = serde_json::to_vec(&msg) {
        let _ = send_reply(transport, PacketType::DiscoveryError, payload).await;
    }
}

/// Runs until the peer disconnects or a fatal error occurs. `peer_ip` feeds
/// every rate-limit check; `participant_id`, once known from a
/// `SessionCreate`/`SessionJoin`, is used to register this connection for
/// the signaling relay and is deregistered on exit.
pub async fn run(state: Arc<DiscoveryState>, transport: Arc<dyn Transport>, peer_ip: IpAddr) {
    let mut reader = PacketReader::new();
    let mut participant_id: Option<Uuid> = None;

    loop {
        let packet = match reader.next_packet(transport.as_ref()).await {
            Ok(p) => p,
            Err(AcipError::EndOfStream) => break,
            Err(e) => {
                tracing::debug!(peer = %peer_ip, error = %e, "dispatch read failed");
                break;
            }
        };

        if !state.rate_limiter.check(peer_ip, EventKind::Control).await {
            send_discovery_error(transport.as_ref(), &AcipError::RateLimited).await;
            continue;
        }
        state.rate_limiter.record(peer_ip, EventKind::Control).await;

        let Some(packet_type) = PacketType::from_u16(packet.packet_type) else {
            send_discovery_error(transport.as_ref(), &AcipError::InvalidParam("unknown packet type".into())).await;
            continue;
        };

        let result = handle_packet(&state, &transport, peer_ip, packet_type, &packet.payload, &mut participant_id).await;
        if let Err(e) = result {
            tracing::debug!(peer = %peer_ip, error = %e, "request failed");
            send_discovery_error(transport.as_ref(), &e).await;
        }
    }

    if let Some(id) = participant_id {
        state.deregister_connection(id).await;
    }
    transport.close().await;
}

async fn handle_packet(
    state: &DiscoveryState,
    transport: &Arc<dyn Transport>,
    peer_ip: IpAddr,
    packet_type: PacketType,
    payload: &[u8],
    participant_id: &mut Option<Uuid>,
) -> Result<(), AcipError> {
    match packet_type {
        PacketType::SessionCreate => {
            if !state.rate_limiter.check(peer_ip, EventKind::SessionCreate).await {
                return Err(AcipError::RateLimited);
            }
            let req: SessionCreate =
                serde_json::from_slice(payload).map_err(|e| AcipError::InvalidParam(e.to_string()))?;
            let has_identity = state.identity.is_some();
            let (session_uuid, session_string) = state
                .sessions
                .create(req.creator_id, req.creator_pubkey, peer_ip, has_identity, req.session_settings)
                .await?;
            state.rate_limiter.record(peer_ip, EventKind::SessionCreate).await;
            state.register_connection(req.creator_id, transport.clone()).await;
            *participant_id = Some(req.creator_id);

            let reply = SessionCreated { session_uuid, session_string };
            let payload = serde_json::to_vec(&reply).map_err(|e| AcipError::InvalidParam(e.to_string()))?;
            send_reply(transport.as_ref(), PacketType::SessionCreated, payload).await
        }

        PacketType::SessionLookup => {
            if !state.rate_limiter.check(peer_ip, EventKind::SessionLookup).await {
                return Err(AcipError::RateLimited);
            }
            let req: SessionLookup =
                serde_json::from_slice(payload).map_err(|e| AcipError::InvalidParam(e.to_string()))?;
            let session_uuid = state.sessions.lookup(&req.session_string).await?;
            state.rate_limiter.record(peer_ip, EventKind::SessionLookup).await;

            let info = state.sessions.info(session_uuid).await?;
            let payload = serde_json::to_vec(&info).map_err(|e| AcipError::InvalidParam(e.to_string()))?;
            send_reply(transport.as_ref(), PacketType::SessionInfo, payload).await
        }

        PacketType::SessionInfoRequest => {
            let req: SessionInfoRequest =
                serde_json::from_slice(payload).map_err(|e| AcipError::InvalidParam(e.to_string()))?;
            let info = state.sessions.info(req.session_uuid).await?;
            let payload = serde_json::to_vec(&info).map_err(|e| AcipError::InvalidParam(e.to_string()))?;
            send_reply(transport.as_ref(), PacketType::SessionInfo, payload).await
        }

        PacketType::SessionJoin => {
            if !state.rate_limiter.check(peer_ip, EventKind::SessionJoin).await {
                return Err(AcipError::RateLimited);
            }
            let req: SessionJoin =
                serde_json::from_slice(payload).map_err(|e| AcipError::InvalidParam(e.to_string()))?;
            let has_identity = state.identity.is_some();
            let info = state
                .sessions
                .join(req.session_uuid, req.participant_id, req.participant_pubkey, peer_ip, has_identity)
                .await?;
            state.rate_limiter.record(peer_ip, EventKind::SessionJoin).await;
            state.register_connection(req.participant_id, transport.clone()).await;
            *participant_id = Some(req.participant_id);

            let reply = SessionJoined { session_info: info };
            let payload = serde_json::to_vec(&reply).map_err(|e| AcipError::InvalidParam(e.to_string()))?;
            send_reply(transport.as_ref(), PacketType::SessionJoined, payload).await
        }

        PacketType::WebrtcSdp => {
            let sdp: WebrtcSdp = serde_json::from_slice(payload).map_err(|e| AcipError::InvalidParam(e.to_string()))?;
            // Errors propagate to the caller, which sends a single DiscoveryError
            // back over this same connection; relay::send_error_to is for callers
            // other than the dispatch loop itself (there are none today).
            relay::relay_sdp(state, sdp).await
        }

        PacketType::WebrtcIce => {
            let ice: WebrtcIce = serde_json::from_slice(payload).map_err(|e| AcipError::InvalidParam(e.to_string()))?;
            relay::relay_ice(state, ice).await
        }

        PacketType::NatQualityAdvisory => {
            let advisory: NatQualityAdvisory =
                serde_json::from_slice(payload).map_err(|e| AcipError::InvalidParam(e.to_string()))?;
            relay::relay_nat_quality(state, advisory).await
        }

        other => Err(AcipError::InvalidParam(format!("{other:?} is not a discovery-service packet type"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rate_limit_sqlite::SwappableRateLimiter;
    use crate::session_registry::SessionRegistry;
    use acip_protocol::InMemoryRateLimiter;
    use acip_transport::TcpTransport;

    async fn paired() -> (Arc<dyn Transport>, Arc<TcpTransport>) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let connect = tokio::net::TcpStream::connect(addr);
        let (accepted, connected) = tokio::join!(listener.accept(), connect);
        let (server_stream, peer) = accepted.unwrap();
        let client_stream = connected.unwrap();
        let client_peer = client_stream.peer_addr().unwrap();
        (
            Arc::new(TcpTransport::new(server_stream, peer)) as Arc<dyn Transport>,
            Arc::new(TcpTransport::new(client_stream, client_peer)),
        )
    }

    fn state() -> Arc<DiscoveryState> {
        Arc::new(DiscoveryState::new(
            SessionRegistry::new(None, false, false),
            SwappableRateLimiter::new(Box::new(InMemoryRateLimiter::new())),
            None,
            false,
            false,
        ))
    }

    #[tokio::test]
    async fn session_create_then_lookup_round_trips_over_the_wire() {
        let state = state();
        let (server_side, client_side) = paired().await;

        let server_state = state.clone();
        let server_task = tokio::spawn(async move {
            run(server_state, server_side, "127.0.0.1".parse().unwrap()).await;
        });

        let creator_id = Uuid::new_v4();
        let create = SessionCreate {
            creator_id,
            creator_pubkey: [7u8; 32],
            session_settings: None,
        };
        let payload = serde_json::to_vec(&create).unwrap();
        let packet = Packet::new(PacketType::SessionCreate, payload);
        client_side.send(&packet.encode().unwrap(), Duration::from_secs(1)).await.unwrap();

        let mut buf = vec![0u8; 4096];
        let n = client_side.recv(&mut buf, Duration::from_secs(1)).await.unwrap();
        let reply = Packet::decode(&buf[..n]).unwrap();
        assert_eq!(reply.packet_type, PacketType::SessionCreated as u16);
        let created: SessionCreated = serde_json::from_slice(&reply.payload).unwrap();
        assert!(crate::wordlist::is_well_formed(&created.session_string));

        client_side.close().await;
        server_task.await.unwrap();
    }
}
