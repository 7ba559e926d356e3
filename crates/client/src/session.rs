//! Drives one client-mode connection to a known server address: connect,
//! handshake, declare capabilities, then loop receiving packets until the
//! connection ends or the caller cancels.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use acip_host::join_as_participant;
use acip_protocol::{AcipError, ClientCapabilities, Packet, PacketType};
use acip_transport::{connect_dual_stack, TcpTransport, Transport, WebSocketTransport};
use anyhow::{Context, Result};
use uuid::Uuid;

use crate::config::ClientConfig;
use crate::sink::FrameSink;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const RECV_TIMEOUT: Duration = Duration::from_secs(60);
const SEND_TIMEOUT: Duration = Duration::from_secs(5);
const READ_CHUNK: usize = 8 * 1024;
const MAX_ACCUMULATED: usize = 16 * 1024 * 1024 + 1024;

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
                let declared_len =
                    u32::from_be_bytes([self.buf[6], self.buf[7], self.buf[8], self.buf[9]]) as usize;
                let total = acip_protocol::PACKET_HEADER_SIZE + declared_len;
                if self.buf.len() >= total {
                    let packet = Packet::decode(&self.buf[..total])?;
                    self.buf.drain(..total);
                    return Ok(packet);
                }
            }
            if self.buf.len() > MAX_ACCUMULATED {
                return Err(AcipError::Oversize(self.buf.len()));
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

async fn connect_transport(config: &ClientConfig) -> Result<Arc<dyn Transport>> {
    if config.websocket {
        let url = format!("ws://{}:{}/", config.host, config.port);
        let (stream, _response) = tokio_tungstenite::connect_async(&url)
            .await
            .with_context(|| format!("websocket connect to {url} failed"))?;
        Ok(Arc::new(WebSocketTransport::new(stream, format!("{}:{}", config.host, config.port))))
    } else {
        let should_exit = Arc::new(AtomicBool::new(false));
        let stream = connect_dual_stack(&config.host, config.port, CONNECT_TIMEOUT, should_exit)
            .await
            .map_err(|e| anyhow::anyhow!("tcp connect to {}:{} failed: {e}", config.host, config.port))?;
        let peer = stream.peer_addr().context("peer address unavailable")?;
        Ok(Arc::new(TcpTransport::new(stream, peer)))
    }
}

/// Connects, completes the handshake, declares capabilities, and runs the
/// receive loop until the server disconnects. `should_exit` is polled
/// between packets so the caller can cancel a long-idle session.
pub async fn run(config: ClientConfig, sink: Arc<dyn FrameSink>, should_exit: Arc<AtomicBool>) -> Result<()> {
    let transport = connect_transport(&config).await?;
    tracing::info!(host = %config.host, port = config.port, peer_id = %transport.peer_id(), "connected");

    let capabilities = ClientCapabilities {
        terminal_width: 80,
        terminal_height: 24,
        color_depth: if config.no_encrypt { 8 } else { 24 },
        renderer: "ascii".to_string(),
        charset: "ascii".to_string(),
    };

    // `--no-encrypt` skips the long-term identity signature, not the
    // ephemeral X25519 handshake itself (every secure transport performs
    // that handshake first, per the wire protocol design); see DESIGN.md.
    let secure_channel = join_as_participant(transport.as_ref(), None, capabilities)
        .await
        .context("handshake failed")?
        .secure_channel;
    tracing::info!("handshake complete, joined session");

    let mut reader = PacketReader::new();
    loop {
        if should_exit.load(Ordering::Acquire) {
            break;
        }
        let packet = match reader.next_packet(transport.as_ref()).await {
            Ok(p) => p,
            Err(AcipError::EndOfStream) => {
                tracing::info!("server closed the connection");
                break;
            }
            Err(e) => {
                tracing::warn!(error = %e, "receive loop error");
                break;
            }
        };

        let Some(packet_type) = PacketType::from_u16(packet.packet_type) else {
            continue;
        };

        let plaintext = match secure_channel.open(&packet.payload) {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(error = %e, "failed to open packet, disconnecting");
                break;
            }
        };

        match packet_type {
            PacketType::Ping => {
                if let Ok(sealed) = secure_channel.seal(&[]) {
                    let pong = Packet::new(PacketType::Pong, sealed);
                    if let Ok(bytes) = pong.encode() {
                        let _ = transport.send(&bytes, SEND_TIMEOUT).await;
                    }
                }
            }
            PacketType::ImageFrame => sink.on_image_frame(Uuid::nil(), &plaintext),
            PacketType::AudioBatch => sink.on_audio_batch(Uuid::nil(), &plaintext),
            PacketType::TextMessage => {
                if let Ok(msg) = serde_json::from_slice::<acip_protocol::TextMessage>(&plaintext) {
                    sink.on_text_message(msg.from, &msg.body);
                }
            }
            PacketType::ServerState => {
                if let Ok(state) = serde_json::from_slice::<acip_protocol::ServerState>(&plaintext) {
                    tracing::info!(participants = state.participants.len(), host = ?state.host, "server state");
                }
            }
            PacketType::ClientJoin => {
                if let Ok(join) = serde_json::from_slice::<acip_protocol::ClientJoin>(&plaintext) {
                    tracing::info!(client_id = %join.client_id, "peer joined");
                }
            }
            PacketType::ClientLeave => {
                if let Ok(leave) = serde_json::from_slice::<acip_protocol::ClientLeave>(&plaintext) {
                    tracing::info!(client_id = %leave.client_id, reason = %leave.reason, "peer left");
                }
            }
            PacketType::ErrorMessage => {
                if let Ok(err) = serde_json::from_slice::<acip_protocol::ErrorMessage>(&plaintext) {
                    tracing::warn!(code = err.code, detail = %err.detail, "server error");
                }
            }
            other => tracing::debug!("unhandled packet type {other:?}"),
        }
    }

    transport.close().await;
    Ok(())
}
