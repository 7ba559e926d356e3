use std::sync::Arc;

use acip_protocol::{Packet, PacketType};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::client::BACKPRESSURE_TIMEOUT;
use crate::mixer::FrameMixer;
use crate::registry::ClientRegistry;

/// Invoked once per inbound media frame from `sender`. Reads the current
/// client snapshot, transcodes once per other client, seals the result
/// with that client's own secure channel, and enqueues the framed
/// ciphertext onto each destination's drop-oldest media queue — enqueue
/// itself never blocks (overflow drops the oldest queued frame). The
/// backpressure timeout below guards against the queue growing while the
/// *actual* socket write in each client's writer task stalls; that write,
/// not the enqueue, is what observes `BACKPRESSURE_TIMEOUT` before the
/// client is disconnected, so one wedged destination can't stall fan-out
/// to others.
pub async fn fan_out_media_frame(
    registry: &ClientRegistry,
    mixer: &dyn FrameMixer,
    packet_type: PacketType,
    sender: Uuid,
    frame: &[u8],
) {
    let clients = registry.snapshot().await;
    for client in clients {
        if client.id == sender {
            continue;
        }
        let transcoded = mixer.transcode(sender, client.id, frame);
        let sealed = match client.seal(&transcoded) {
            Ok(sealed) => sealed,
            Err(e) => {
                warn!(client_id = %client.id, error = %e, "failed to seal fan-out frame, skipping recipient");
                continue;
            }
        };
        match Packet::new(packet_type, sealed).encode() {
            Ok(bytes) => client.enqueue_media(bytes).await,
            Err(e) => warn!(client_id = %client.id, error = %e, "failed to encode fan-out frame"),
        }
    }
    debug!(sender = %sender, "fan-out pass complete");
}

/// Drains `client`'s media queue and writes each frame to its transport,
/// one client per writer task. A write that doesn't complete within
/// [`BACKPRESSURE_TIMEOUT`] disconnects this client without affecting any
/// other client's writer task.
pub async fn run_client_writer(registry: &ClientRegistry, client: Arc<crate::client::ClientRecord>) {
    loop {
        let frame = client.media_queue.pop().await;
        match tokio::time::timeout(BACKPRESSURE_TIMEOUT, client.transport.send(&frame, BACKPRESSURE_TIMEOUT)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(client_id = %client.id, error = %e, "write failed, disconnecting");
                client.transport.close().await;
                let _ = registry.remove(client.id).await;
                return;
            }
            Err(_) => {
                warn!(client_id = %client.id, "backpressure timeout exceeded, disconnecting");
                client.transport.close().await;
                let _ = registry.remove(client.id).await;
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ClientRecord;
    use crate::mixer::NullMixer;
    use acip_protocol::crypto::HandshakeState;
    use acip_protocol::rate_limit::InMemoryRateLimiter;
    use acip_transport::TcpTransport;
    use std::net::IpAddr;

    async fn connected_record(id: Uuid, short_id: u32) -> Arc<ClientRecord> {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let connect = tokio::net::TcpStream::connect(addr);
        let (accepted, connected) = tokio::join!(listener.accept(), connect);
        let (stream, peer) = accepted.unwrap();
        let _other_side = connected.unwrap();
        let transport = Arc::new(TcpTransport::new(stream, peer));
        let rate_limiter = Arc::new(InMemoryRateLimiter::new());
        let ip: IpAddr = "127.0.0.1".parse().unwrap();
        let record = ClientRecord::new(id, short_id, ip, transport, rate_limiter);
        record
    }

    #[tokio::test]
    async fn fan_out_skips_sender_and_reaches_others() {
        let registry = ClientRegistry::new();
        let sender_id = Uuid::new_v4();
        let other_id = Uuid::new_v4();
        registry.insert(connected_record(sender_id, 0).await).await;
        let other = connected_record(other_id, 1).await;
        registry.insert(other.clone()).await;

        // Give the recipient a real channel so `fan_out_media_frame` can seal
        // into it; the peer side just needs the matching channel to open.
        let host_side = HandshakeState::generate();
        let peer_side = HandshakeState::generate();
        let host_public = host_side.public;
        let peer_public = peer_side.public;
        let mut peer_side = peer_side;
        peer_side.session_salt = host_side.session_salt;
        let host_channel = host_side.complete(&peer_public, true).unwrap();
        let peer_channel = peer_side.complete(&host_public, false).unwrap();
        other.set_secure_channel(host_channel);

        fan_out_media_frame(&registry, &NullMixer, PacketType::ImageFrame, sender_id, b"frame").await;

        let received = other.media_queue.pop().await;
        let packet = Packet::decode(&received).unwrap();
        assert_eq!(packet.packet_type, PacketType::ImageFrame as u16);
        let opened = peer_channel.open(&packet.payload).unwrap();
        assert_eq!(opened, b"frame");
    }
}
