//! What `StartingHost` does once the election says we host: open a
//! listener and run the same per-client lifecycle shape as `acip-server`
//! (handshake, capability declaration, registry join, media fan-out), but
//! scoped to the one ad-hoc session this discovery attempt negotiated —
//! no ping/disconnect bookkeeping beyond what the registry already gives
//! us, since a migrating two-or-three-party mesh doesn't need the full
//! server's connection-count-at-scale concerns.

use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use acip_host::{accept_handshake, fan_out_media_frame, run_client_writer, ClientEvent, ClientRecord, ClientRegistry, NullMixer};
use acip_protocol::{AcipError, ClientCapabilities, InMemoryRateLimiter, Packet, PacketType, RateLimiter};
use acip_transport::{TcpTransport, Transport};
use tokio::net::TcpListener;
use uuid::Uuid;

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

/// Binds `port` and serves connections until `should_exit` is set. Returns
/// once the listener is torn down (caller cancellation or a bind error).
pub async fn run(port: u16, should_exit: Arc<AtomicBool>) -> anyhow::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    tracing::info!(port, "discovery client hosting: listening");

    let registry = Arc::new(ClientRegistry::new());
    let rate_limiter: Arc<dyn RateLimiter> = Arc::new(InMemoryRateLimiter::new());
    let mixer = Arc::new(NullMixer);

    loop {
        if should_exit.load(Ordering::Acquire) {
            return Ok(());
        }
        let accept = tokio::time::timeout(Duration::from_millis(100), listener.accept()).await;
        let (stream, peer) = match accept {
            Ok(Ok(pair)) => pair,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "accept failed");
                continue;
            }
            Err(_) => continue,
        };
        let transport: Arc<dyn Transport> = Arc::new(TcpTransport::new(stream, peer));
        tokio::spawn(handle_peer(
            registry.clone(),
            rate_limiter.clone(),
            mixer.clone(),
            transport,
            peer.ip(),
        ));
    }
}

async fn handle_peer(
    registry: Arc<ClientRegistry>,
    rate_limiter: Arc<dyn RateLimiter>,
    mixer: Arc<NullMixer>,
    transport: Arc<dyn Transport>,
    peer_ip: IpAddr,
) {
    let client_id = Uuid::new_v4();
    let short_id = match registry.allocate_short_id().await {
        Ok(id) => id,
        Err(e) => {
            tracing::warn!(peer = %peer_ip, error = %e, "no short id available");
            transport.close().await;
            return;
        }
    };

    let record = ClientRecord::new(client_id, short_id, peer_ip, transport.clone(), rate_limiter.clone());
    if record.apply(ClientEvent::BeginHandshake).await.is_err() {
        registry.remove(client_id).await;
        transport.close().await;
        return;
    }

    let secure_channel = match accept_handshake(transport.as_ref(), None, false).await {
        Ok(channel) => channel,
        Err(e) => {
            tracing::debug!(client_id = %client_id, error = %e, "handshake failed");
            let _ = record.apply(ClientEvent::Error).await;
            registry.remove(client_id).await;
            transport.close().await;
            return;
        }
    };
    record.set_secure_channel(secure_channel);
    if record.apply(ClientEvent::HandshakeComplete).await.is_err() {
        registry.remove(client_id).await;
        transport.close().await;
        return;
    }

    let mut reader = PacketReader::new();
    let caps_packet = match reader.next_packet(transport.as_ref()).await {
        Ok(p) => p,
        Err(_) => {
            let _ = record.apply(ClientEvent::Error).await;
            registry.remove(client_id).await;
            transport.close().await;
            return;
        }
    };
    if caps_packet.packet_type == PacketType::ClientCapabilities as u16 {
        if let Ok(plaintext) = record.open(&caps_packet.payload) {
            if let Ok(caps) = serde_json::from_slice::<ClientCapabilities>(&plaintext) {
                *record.capabilities.write().await = Some(caps);
            }
        }
    }

    registry.insert(record.clone()).await;
    if record.apply(ClientEvent::Join).await.is_err() {
        registry.remove(client_id).await;
        transport.close().await;
        return;
    }
    tracing::info!(client_id = %client_id, short_id, peer = %peer_ip, "peer joined the hosted session");

    let writer_task = tokio::spawn({
        let registry = registry.clone();
        let record = record.clone();
        async move { run_client_writer(&registry, record).await }
    });

    loop {
        let packet = match reader.next_packet(transport.as_ref()).await {
            Ok(p) => p,
            Err(_) => break,
        };
        let Some(packet_type) = PacketType::from_u16(packet.packet_type) else {
            continue;
        };
        let plaintext = match record.open(&packet.payload) {
            Ok(p) => p,
            Err(e) => {
                tracing::debug!(client_id = %client_id, error = %e, "failed to open packet, disconnecting");
                break;
            }
        };
        match packet_type {
            PacketType::Ping => {
                let _ = record.send_sealed(PacketType::Pong, &[], SEND_TIMEOUT).await;
            }
            PacketType::ImageFrame => {
                fan_out_media_frame(&registry, mixer.as_ref(), PacketType::ImageFrame, client_id, &plaintext).await;
            }
            PacketType::AudioBatch => {
                fan_out_media_frame(&registry, mixer.as_ref(), PacketType::AudioBatch, client_id, &plaintext).await;
            }
            PacketType::ClientLeave => break,
            _ => {}
        }
    }

    writer_task.abort();
    let _ = record.apply(ClientEvent::Disconnect).await;
    let _ = record.apply(ClientEvent::Remove).await;
    registry.remove(client_id).await;
    transport.close().await;
}
