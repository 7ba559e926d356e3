//! Transport abstraction: one trait, three backends.
//!
//! Every backend obeys the same invariants: exactly one owner at a time,
//! `close` is idempotent, `recv` returns `Ok(0)` on a clean end-of-stream
//! rather than an error, and a short read returns the partial byte count
//! rather than failing outright.

pub mod axum_ws;
pub mod connect;
pub mod tcp;
pub mod webrtc_transport;
pub mod websocket;

use std::time::Duration;

use acip_protocol::AcipError;
use async_trait::async_trait;

pub use axum_ws::AxumWebSocketTransport;
pub use connect::connect_dual_stack;
pub use tcp::TcpTransport;
pub use webrtc_transport::WebRtcTransport;
pub use websocket::WebSocketTransport;

#[async_trait]
pub trait Transport: Send + Sync {
    /// Send `bytes` as one logical message, failing with `Timeout` if the
    /// peer isn't ready to accept it within `timeout`.
    async fn send(&self, bytes: &[u8], timeout: Duration) -> Result<(), AcipError>;

    /// Receive up to `buf.len()` bytes, returning the number actually read.
    /// `Ok(0)` means the peer closed the connection cleanly.
    async fn recv(&self, buf: &mut [u8], timeout: Duration) -> Result<usize, AcipError>;

    /// Idempotent: calling `close` more than once is a no-op, not an error.
    async fn close(&self);

    fn peer_id(&self) -> String;

    fn is_alive(&self) -> bool;
}
