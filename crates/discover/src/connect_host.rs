//! `ConnectingHost`: try the elected host's advertised address directly
//! over TCP first; if that doesn't connect within 5 s, fall back to a
//! WebRTC offer relayed through the discovery-service connection.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use acip_host::join_as_participant;
use acip_protocol::crypto::SecureChannel;
use acip_protocol::{AcipError, ClientCapabilities, Packet, PacketType, WebrtcSdp};
use acip_transport::{connect_dual_stack, TcpTransport, Transport};
use uuid::Uuid;

const DIRECT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const WEBRTC_ANSWER_TIMEOUT: Duration = Duration::from_secs(15);

pub struct ConnectedHost {
    pub transport: Arc<dyn Transport>,
    pub secure_channel: SecureChannel,
}

/// Attempts a direct TCP connection to `host_addr:host_port`. On failure,
/// sends a `WebrtcSdp` offer to `host_id` over `discovery_transport` and
/// waits for the relayed answer.
///
/// The offer/answer exchange here only covers signaling. Driving the
/// resulting data channel to a connected `Transport` (building and
/// completing an `RTCPeerConnection` through ICE) is out of scope — see
/// the Discovery Client Non-goals in SPEC_FULL.md. Once the relayed
/// answer is validated, this function reports the fallback as exhausted
/// rather than returning a connection.
pub async fn connect_to_host(
    discovery_transport: &dyn Transport,
    session_uuid: Uuid,
    self_id: Uuid,
    host_id: Uuid,
    host_addr: &str,
    host_port: u16,
    capabilities: ClientCapabilities,
) -> Result<ConnectedHost, AcipError> {
    let should_exit = Arc::new(AtomicBool::new(false));
    match connect_dual_stack(host_addr, host_port, DIRECT_CONNECT_TIMEOUT, should_exit).await {
        Ok(stream) => {
            let peer = stream
                .peer_addr()
                .map_err(|e| AcipError::InvalidParam(e.to_string()))?;
            let transport: Arc<dyn Transport> = Arc::new(TcpTransport::new(stream, peer));
            let joined = join_as_participant(transport.as_ref(), None, capabilities).await?;
            tracing::info!(host = %host_id, "connected to host directly over tcp");
            return Ok(ConnectedHost {
                transport,
                secure_channel: joined.secure_channel,
            });
        }
        Err(e) => {
            tracing::debug!(error = %e, "direct connect to host failed, trying webrtc signaling");
        }
    }

    let offer = WebrtcSdp {
        session_uuid,
        from: self_id,
        to: host_id,
        sdp: String::new(),
    };
    let payload = serde_json::to_vec(&offer).map_err(|e| AcipError::InvalidParam(e.to_string()))?;
    let packet = Packet::new(PacketType::WebrtcSdp, payload);
    discovery_transport.send(&packet.encode()?, Duration::from_secs(5)).await?;

    let mut buf = vec![0u8; 8 * 1024];
    let n = discovery_transport.recv(&mut buf, WEBRTC_ANSWER_TIMEOUT).await?;
    if n == 0 {
        return Err(AcipError::EndOfStream);
    }
    let reply = Packet::decode(&buf[..n])?;
    if reply.packet_type != PacketType::WebrtcSdp as u16 {
        return Err(AcipError::HandshakeFailed("expected a relayed webrtc answer".into()));
    }
    let answer: WebrtcSdp =
        serde_json::from_slice(&reply.payload).map_err(|e| AcipError::InvalidParam(e.to_string()))?;
    if answer.from != host_id || answer.to != self_id || answer.sdp.is_empty() {
        return Err(AcipError::HandshakeFailed(
            "webrtc answer missing or malformed; no peer-connection path wired yet".into(),
        ));
    }

    // WebRTC connection establishment (ICE/RTCPeerConnection) is a Non-goal;
    // only the SDP relay above is in scope, so a validated answer still
    // ends the fallback attempt here rather than returning a transport.
    Err(AcipError::HandshakeFailed(
        "webrtc fallback signaling succeeded; connection establishment is out of scope".into(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn direct_connect_failure_surfaces_when_nothing_is_listening() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener); // frees the port, guaranteeing nothing answers

        let (discovery_listener_side, discovery_side) = paired_loopback().await;
        discovery_listener_side.close().await;
        drop(discovery_listener_side);
        let caps = ClientCapabilities {
            terminal_width: 80,
            terminal_height: 24,
            color_depth: 24,
            renderer: "ascii".into(),
            charset: "ascii".into(),
        };
        let result = connect_to_host(
            discovery_side.as_ref(),
            Uuid::new_v4(),
            Uuid::new_v4(),
            Uuid::new_v4(),
            "127.0.0.1",
            port,
            caps,
        )
        .await;
        assert!(result.is_err());
    }

    async fn paired_loopback() -> (Arc<TcpTransport>, Arc<dyn Transport>) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let connect = tokio::net::TcpStream::connect(addr);
        let (accepted, connected) = tokio::join!(listener.accept(), connect);
        let (server_stream, peer) = accepted.unwrap();
        let client_stream = connected.unwrap();
        let client_peer = client_stream.peer_addr().unwrap();
        (
            Arc::new(TcpTransport::new(server_stream, peer)),
            Arc::new(TcpTransport::new(client_stream, client_peer)) as Arc<dyn Transport>,
        )
    }
}
