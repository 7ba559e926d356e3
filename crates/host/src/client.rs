use std::collections::VecDeque;
use std::net::IpAddr;
use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use acip_protocol::crypto::SecureChannel;
use acip_protocol::{AcipError, ClientCapabilities, Packet, PacketType, RateLimiter};
use acip_transport::Transport;
use tokio::sync::{Mutex, Notify, RwLock};
use uuid::Uuid;

pub const SHORT_ID_POOL_SIZE: u32 = 32;
pub const MEDIA_QUEUE_DEPTH: usize = 8;
pub const RATE_LIMIT_OFFENSES_BEFORE_DISCONNECT: u32 = 3;
pub const BACKPRESSURE_TIMEOUT: Duration = Duration::from_secs(2);

/// `Accepted -> Handshaking -> Joined -> Active -> (Disconnecting | Errored) -> Removed`.
/// `Removed` is terminal and idempotent; every other transition is driven
/// by packet arrival and rejected if attempted out of order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Accepted,
    Handshaking,
    Joined,
    Active,
    Disconnecting,
    Errored,
    Removed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientEvent {
    BeginHandshake,
    HandshakeComplete,
    Join,
    Activate,
    Disconnect,
    Error,
    Remove,
}

impl ClientState {
    pub fn transition(self, event: ClientEvent) -> Result<ClientState, AcipError> {
        use ClientEvent::*;
        use ClientState::*;
        if self == Removed {
            // Idempotent terminal state: any event is absorbed without error.
            return Ok(Removed);
        }
        let next = match (self, event) {
            (Accepted, BeginHandshake) => Handshaking,
            (Handshaking, HandshakeComplete) => Joined,
            (Joined, Join) => Active,
            (Active, Activate) => Active,
            (_, Disconnect) if self != Errored => Disconnecting,
            (_, Error) => Errored,
            (Disconnecting, Remove) | (Errored, Remove) => Removed,
            _ => {
                return Err(AcipError::InvalidState(format!(
                    "illegal transition {self:?} -({event:?})-> ?"
                )))
            }
        };
        Ok(next)
    }
}

/// A bounded, reusable ring of short ids handed out to accepted clients.
pub struct ShortIdPool {
    free: VecDeque<u32>,
}

impl ShortIdPool {
    pub fn new() -> Self {
        Self {
            free: (0..SHORT_ID_POOL_SIZE).collect(),
        }
    }

    pub fn allocate(&mut self) -> Option<u32> {
        self.free.pop_front()
    }

    pub fn free(&mut self, id: u32) {
        debug_assert!(id < SHORT_ID_POOL_SIZE);
        self.free.push_back(id);
    }
}

impl Default for ShortIdPool {
    fn default() -> Self {
        Self::new()
    }
}

/// A bounded ring buffer that drops the oldest entry on overflow instead of
/// rejecting the newest, matching the fan-out loop's media-packet policy.
pub struct DropOldestQueue {
    items: Mutex<VecDeque<Vec<u8>>>,
    capacity: usize,
    notify: Notify,
}

impl DropOldestQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            notify: Notify::new(),
        }
    }

    pub async fn push(&self, item: Vec<u8>) {
        let mut items = self.items.lock().await;
        if items.len() >= self.capacity {
            items.pop_front();
        }
        items.push_back(item);
        drop(items);
        self.notify.notify_one();
    }

    pub async fn pop(&self) -> Vec<u8> {
        loop {
            {
                let mut items = self.items.lock().await;
                if let Some(item) = items.pop_front() {
                    return item;
                }
            }
            self.notify.notified().await;
        }
    }
}

/// Everything the host tracks about one joined (or joining) participant.
pub struct ClientRecord {
    pub id: Uuid,
    pub short_id: u32,
    pub ip: IpAddr,
    pub transport: Arc<dyn Transport>,
    pub capabilities: RwLock<Option<ClientCapabilities>>,
    state: RwLock<ClientState>,
    rate_limiter: Arc<dyn RateLimiter>,
    rate_offenses: AtomicU32,
    last_pong_unix_ms: AtomicI64,

    /// Drop-oldest bounded queue for media packet types, drained by this
    /// client's dedicated writer task. Control and crypto-handshake
    /// packets skip this queue entirely: they're written synchronously
    /// with a timeout (block-with-timeout, never-drop) directly against
    /// `transport`, which serializes concurrent senders under its own
    /// internal write lock so the two paths never interleave mid-packet.
    pub media_queue: DropOldestQueue,

    /// Set once, right after the handshake completes (`accept_handshake`'s
    /// return value). Every packet exchanged with this client from then on
    /// is AEAD-framed through it; `seal`/`open` fail with `InvalidState`
    /// if called before it's set.
    secure_channel: OnceLock<SecureChannel>,
}

impl ClientRecord {
    pub fn new(
        id: Uuid,
        short_id: u32,
        ip: IpAddr,
        transport: Arc<dyn Transport>,
        rate_limiter: Arc<dyn RateLimiter>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id,
            short_id,
            ip,
            transport,
            capabilities: RwLock::new(None),
            state: RwLock::new(ClientState::Accepted),
            rate_limiter,
            rate_offenses: AtomicU32::new(0),
            last_pong_unix_ms: AtomicI64::new(0),
            media_queue: DropOldestQueue::new(MEDIA_QUEUE_DEPTH),
            secure_channel: OnceLock::new(),
        })
    }

    /// Installs the secure channel derived from this client's handshake.
    /// A second call is a no-op — there is exactly one handshake per
    /// connection, so callers should only ever call this once.
    pub fn set_secure_channel(&self, channel: SecureChannel) {
        let _ = self.secure_channel.set(channel);
    }

    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, AcipError> {
        self.secure_channel
            .get()
            .ok_or_else(|| AcipError::InvalidState("secure channel not established".into()))?
            .seal(plaintext)
    }

    pub fn open(&self, ciphertext: &[u8]) -> Result<Vec<u8>, AcipError> {
        self.secure_channel
            .get()
            .ok_or_else(|| AcipError::InvalidState("secure channel not established".into()))?
            .open(ciphertext)
    }

    /// Seals `plaintext`, frames it as `packet_type`, and writes it
    /// directly to this client's transport (not the media queue) with
    /// `timeout`.
    pub async fn send_sealed(&self, packet_type: PacketType, plaintext: &[u8], timeout: Duration) -> Result<(), AcipError> {
        let sealed = self.seal(plaintext)?;
        let packet = Packet::new(packet_type, sealed);
        self.transport.send(&packet.encode()?, timeout).await
    }

    pub async fn state(&self) -> ClientState {
        *self.state.read().await
    }

    pub async fn apply(&self, event: ClientEvent) -> Result<ClientState, AcipError> {
        let mut state = self.state.write().await;
        let next = state.transition(event)?;
        *state = next;
        Ok(next)
    }

    /// Enqueue a media frame for fan-out, dropping the oldest queued frame
    /// rather than blocking the fan-out loop when this client is slow.
    pub async fn enqueue_media(&self, bytes: Vec<u8>) {
        self.media_queue.push(bytes).await;
    }

    pub async fn record_offense(&self, kind: acip_protocol::EventKind) -> bool {
        let _ = self.rate_limiter.check(self.ip, kind).await;
        self.rate_limiter.record(self.ip, kind).await;
        if !self.rate_limiter.check(self.ip, kind).await {
            let count = self.rate_offenses.fetch_add(1, Ordering::AcqRel) + 1;
            return count >= RATE_LIMIT_OFFENSES_BEFORE_DISCONNECT;
        }
        false
    }

    pub fn touch_pong(&self, unix_ms: i64) {
        self.last_pong_unix_ms.store(unix_ms, Ordering::Release);
    }

    pub fn last_pong(&self) -> i64 {
        self.last_pong_unix_ms.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_transitions() {
        use ClientEvent::*;
        use ClientState::*;
        let mut state = Accepted;
        state = state.transition(BeginHandshake).unwrap();
        assert_eq!(state, Handshaking);
        state = state.transition(HandshakeComplete).unwrap();
        assert_eq!(state, Joined);
        state = state.transition(Join).unwrap();
        assert_eq!(state, Active);
    }

    #[test]
    fn removed_is_idempotent() {
        use ClientEvent::*;
        use ClientState::*;
        assert_eq!(Removed.transition(Disconnect).unwrap(), Removed);
        assert_eq!(Removed.transition(Remove).unwrap(), Removed);
    }

    #[test]
    fn illegal_transition_rejected() {
        use ClientEvent::*;
        use ClientState::*;
        assert!(Accepted.transition(Join).is_err());
        assert!(Accepted.transition(Remove).is_err());
    }

    #[test]
    fn error_reachable_from_any_non_removed_state() {
        use ClientEvent::*;
        use ClientState::*;
        for state in [Accepted, Handshaking, Joined, Active, Disconnecting] {
            assert_eq!(state.transition(Error).unwrap(), Errored);
        }
    }

    #[test]
    fn short_id_pool_recycles() {
        let mut pool = ShortIdPool::new();
        let a = pool.allocate().unwrap();
        let b = pool.allocate().unwrap();
        assert_ne!(a, b);
        pool.free(a);
        let c = pool.allocate().unwrap();
        assert_eq!(c, a);
    }

    #[test]
    fn short_id_pool_exhausts_at_capacity() {
        let mut pool = ShortIdPool::new();
        let mut allocated = Vec::new();
        for _ in 0..SHORT_ID_POOL_SIZE {
            allocated.push(pool.allocate().unwrap());
        }
        assert!(pool.allocate().is_none());
    }
}
