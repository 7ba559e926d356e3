//! The server's per-client lifecycle: accept the handshake, negotiate
//! capabilities, join the shared [`acip_host::ClientRegistry`], then run
//! the receive loop that dispatches every packet type 1-38 until the
//! client disconnects or errors out.
//!
//! Sequence monotonicity is tracked per-connection for the
//! media/control class (packet types 1-35); a regression is fatal to this
//! connection only. Crypto
//! handshake packets (36-38) never reach this loop — they're consumed by
//! [`acip_host::accept_handshake`] before the client is registered.
//!
//! Every packet exchanged after the handshake is AEAD-framed through the
//! client's [`acip_host::ClientRecord`]-held `SecureChannel`: inbound
//! payloads are opened before dispatch, outbound payloads (including
//! fanned-out media, which is re-sealed per recipient) are sealed before
//! hitting the transport.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use acip_host::{
    accept_handshake, fan_out_media_frame, run_client_writer, ClientEvent, ClientRecord,
    ClientRegistry, FrameMixer,
};
use acip_protocol::{
    AcipError, ClientCapabilities, ClientJoin, ClientLeave, EventKind, Packet, PacketType,
    RateLimiter, ServerState,
};
use acip_transport::Transport;
use uuid::Uuid;

const RECV_TIMEOUT: Duration = Duration::from_secs(60);
const SEND_TIMEOUT: Duration = Duration::from_secs(5);
const READ_CHUNK: usize = 8 * 1024;
const MAX_ACCUMULATED: usize = 16 * 1024 * 1024 + 1024;
const PING_INTERVAL: Duration = Duration::from_secs(5);
const MISSED_PONGS_BEFORE_DISCONNECT: i64 = 3;

/// Shared state for the one session this server process hosts.
pub struct SessionHost {
    pub registry: ClientRegistry,
    pub rate_limiter: Arc<dyn RateLimiter>,
    pub mixer: Arc<dyn FrameMixer>,
}

impl SessionHost {
    pub fn new(rate_limiter: Arc<dyn RateLimiter>, mixer: Arc<dyn FrameMixer>) -> Self {
        Self {
            registry: ClientRegistry::new(),
            rate_limiter,
            mixer,
        }
    }
}

/// Same accumulate-until-a-full-packet strategy as the discovery-service's
/// dispatch loop: a single `recv` is not guaranteed to land on a frame
/// boundary.
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

/// Accepts whether `sequence` is a legal successor to `last`, treating the
/// counter as wrapping at 2^32: a small positive signed delta
/// is a monotonic advance, not a regression.
fn is_monotonic_advance(last: u32, sequence: u32) -> bool {
    (sequence.wrapping_sub(last) as i32) > 0
}

/// Seals and sends `payload` individually to every client but `except` —
/// each client has its own `SecureChannel`, so the ciphertext can't be
/// shared across recipients the way a plaintext broadcast could.
async fn broadcast_except(host: &SessionHost, except: Uuid, packet_type: PacketType, payload: Vec<u8>) {
    for client in host.registry.snapshot().await {
        if client.id == except {
            continue;
        }
        if let Err(e) = client.send_sealed(packet_type, &payload, SEND_TIMEOUT).await {
            tracing::debug!(client_id = %client.id, error = %e, "broadcast send failed");
        }
    }
}

/// Drives one accepted connection end-to-end: handshake, capability
/// negotiation, registry join, writer/ping tasks, then the receive loop.
/// Every exit path removes the client from the registry and closes its
/// transport exactly once.
pub async fn handle_client(host: Arc<SessionHost>, transport: Arc<dyn Transport>, peer_ip: IpAddr) {
    let client_id = Uuid::new_v4();

    if !host.rate_limiter.check(peer_ip, EventKind::Connection).await {
        tracing::debug!(peer = %peer_ip, "connection rate limited");
        transport.close().await;
        return;
    }
    host.rate_limiter.record(peer_ip, EventKind::Connection).await;

    let short_id = match host.registry.allocate_short_id().await {
        Ok(id) => id,
        Err(e) => {
            tracing::warn!(peer = %peer_ip, error = %e, "no short id available, rejecting connection");
            transport.close().await;
            return;
        }
    };

    let record = ClientRecord::new(client_id, short_id, peer_ip, transport.clone(), host.rate_limiter.clone());
    if let Err(e) = record.apply(ClientEvent::BeginHandshake).await {
        tracing::warn!(client_id = %client_id, error = %e, "bad initial state");
        host.registry.remove(client_id).await;
        transport.close().await;
        return;
    }

    let secure_channel = match accept_handshake(transport.as_ref(), None, false).await {
        Ok(channel) => channel,
        Err(e) => {
            tracing::debug!(client_id = %client_id, error = %e, "handshake failed");
            let _ = record.apply(ClientEvent::Error).await;
            host.registry.remove(client_id).await;
            transport.close().await;
            return;
        }
    };
    record.set_secure_channel(secure_channel);
    if let Err(e) = record.apply(ClientEvent::HandshakeComplete).await {
        tracing::warn!(client_id = %client_id, error = %e, "illegal post-handshake transition");
        host.registry.remove(client_id).await;
        transport.close().await;
        return;
    }

    let mut reader = PacketReader::new();
    let caps_packet = match reader.next_packet(transport.as_ref()).await {
        Ok(p) => p,
        Err(e) => {
            tracing::debug!(client_id = %client_id, error = %e, "did not receive capabilities");
            let _ = record.apply(ClientEvent::Error).await;
            host.registry.remove(client_id).await;
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

    host.registry.insert(record.clone()).await;
    if let Err(e) = record.apply(ClientEvent::Join).await {
        tracing::warn!(client_id = %client_id, error = %e, "illegal join transition");
        host.registry.remove(client_id).await;
        transport.close().await;
        return;
    }

    tracing::info!(client_id = %client_id, short_id, peer = %peer_ip, "client joined");

    let participants: Vec<Uuid> = host.registry.snapshot().await.into_iter().map(|c| c.id).collect();
    let state_msg = ServerState {
        participants,
        host: Some(client_id),
    };
    if let Ok(payload) = serde_json::to_vec(&state_msg) {
        let _ = record.send_sealed(PacketType::ServerState, &payload, SEND_TIMEOUT).await;
    }
    if let Ok(payload) = serde_json::to_vec(&ClientJoin {
        client_id,
        display_name: client_id.to_string(),
    }) {
        broadcast_except(&host, client_id, PacketType::ClientJoin, payload).await;
    }

    let writer_client = record.clone();
    let writer_task = tokio::spawn({
        let host = host.clone();
        async move { run_client_writer(&host.registry, writer_client).await }
    });

    let ping_task = tokio::spawn(ping_loop(host.clone(), record.clone(), transport.clone()));

    let mut last_media_sequence: u32 = 0;
    loop {
        let packet = match reader.next_packet(transport.as_ref()).await {
            Ok(p) => p,
            Err(AcipError::EndOfStream) => break,
            Err(e) => {
                tracing::debug!(client_id = %client_id, error = %e, "receive loop error");
                break;
            }
        };

        let Some(packet_type) = PacketType::from_u16(packet.packet_type) else {
            tracing::debug!(client_id = %client_id, "unknown packet type {}", packet.packet_type);
            continue;
        };

        if packet_type.is_media_or_control() {
            if !is_monotonic_advance(last_media_sequence, packet.sequence) && last_media_sequence != 0 {
                tracing::warn!(client_id = %client_id, last = last_media_sequence, got = packet.sequence, "sequence regression, disconnecting");
                break;
            }
            last_media_sequence = packet.sequence;
        }

        let plaintext = match record.open(&packet.payload) {
            Ok(p) => p,
            Err(e) => {
                tracing::debug!(client_id = %client_id, error = %e, "failed to open packet, disconnecting");
                break;
            }
        };

        if let Err(disconnect) = dispatch_packet(&host, &record, client_id, packet_type, plaintext).await {
            if disconnect {
                break;
            }
        }
    }

    writer_task.abort();
    ping_task.abort();
    let _ = record.apply(ClientEvent::Disconnect).await;
    let _ = record.apply(ClientEvent::Remove).await;
    host.registry.remove(client_id).await;
    transport.close().await;

    if let Ok(payload) = serde_json::to_vec(&ClientLeave {
        client_id,
        reason: "disconnected".to_string(),
    }) {
        broadcast_except(&host, client_id, PacketType::ClientLeave, payload).await;
    }
    tracing::info!(client_id = %client_id, "client removed");
}

/// Returns `Err(true)` when this client should be disconnected (rate-limit
/// exhaustion or a protocol violation), `Err(false)` for a logged-and-
/// continue condition.
async fn dispatch_packet(
    host: &Arc<SessionHost>,
    record: &Arc<ClientRecord>,
    client_id: Uuid,
    packet_type: PacketType,
    payload: Vec<u8>,
) -> Result<(), bool> {
    match packet_type {
        PacketType::Ping => {
            if record.record_offense(EventKind::Ping).await {
                return Err(true);
            }
            let _ = record.send_sealed(PacketType::Pong, &[], SEND_TIMEOUT).await;
            Ok(())
        }
        PacketType::Pong => {
            record.touch_pong(now_unix_ms());
            Ok(())
        }
        PacketType::ImageFrame => {
            if record.record_offense(EventKind::ImageFrame).await {
                return Err(true);
            }
            fan_out_media_frame(&host.registry, host.mixer.as_ref(), PacketType::ImageFrame, client_id, &payload).await;
            Ok(())
        }
        PacketType::AudioBatch => {
            if record.record_offense(EventKind::Audio).await {
                return Err(true);
            }
            fan_out_media_frame(&host.registry, host.mixer.as_ref(), PacketType::AudioBatch, client_id, &payload).await;
            Ok(())
        }
        PacketType::ClientLeave => Err(true),
        PacketType::TextMessage
        | PacketType::StreamStart
        | PacketType::StreamStop
        | PacketType::SizeMessage
        | PacketType::RemoteLog => {
            if record.record_offense(EventKind::Control).await {
                return Err(true);
            }
            broadcast_except(host, client_id, packet_type, payload).await;
            Ok(())
        }
        PacketType::ErrorMessage => {
            tracing::debug!(client_id = %client_id, "client reported error");
            Ok(())
        }
        other => {
            tracing::debug!(client_id = %client_id, "packet type {other:?} not valid post-join, ignoring");
            Ok(())
        }
    }
}

async fn ping_loop(host: Arc<SessionHost>, record: Arc<ClientRecord>, transport: Arc<dyn Transport>) {
    let mut ticker = tokio::time::interval(PING_INTERVAL);
    let mut missed = 0i64;
    let started_at = now_unix_ms();
    record.touch_pong(started_at);
    loop {
        ticker.tick().await;
        if record.send_sealed(PacketType::Ping, &[], SEND_TIMEOUT).await.is_err() {
            break;
        }
        let elapsed_intervals = ((now_unix_ms() - record.last_pong()) as u64) / PING_INTERVAL.as_millis() as u64;
        missed = elapsed_intervals as i64;
        if missed >= MISSED_PONGS_BEFORE_DISCONNECT {
            tracing::warn!(client_id = %record.id, "missed {missed} pongs, disconnecting");
            host.registry.remove(record.id).await;
            transport.close().await;
            break;
        }
    }
}

fn now_unix_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn monotonic_advance_detects_regression() {
        assert!(is_monotonic_advance(10, 11));
        assert!(!is_monotonic_advance(11, 10));
        assert!(!is_monotonic_advance(10, 10));
    }

    #[test]
    fn monotonic_advance_tolerates_wraparound() {
        assert!(is_monotonic_advance(u32::MAX, 0));
        assert!(is_monotonic_advance(u32::MAX - 1, u32::MAX));
    }
}
