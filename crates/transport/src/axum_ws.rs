//! Server-side WebSocket transport over an already-upgraded `axum` socket.
//!
//! `axum::extract::ws::WebSocket` is its own message-framed type, not an
//! `AsyncRead`/`AsyncWrite` stream, so it can't go through
//! [`crate::websocket::WebSocketTransport`]'s generic `S`. This is the
//! accept-side counterpart: every discovery-service and server-mode listener
//! upgrades incoming WebSocket connections through axum (matching the
//! teacher's `handle_browser_ws`), then wraps the resulting socket here
//! before handing it to the rest of the stack as a plain `dyn Transport`.
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use acip_protocol::AcipError;
use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::Mutex;

use crate::websocket::{MAX_WS_MESSAGE_SIZE, REASSEMBLY_DEADLINE};
use crate::Transport;

pub struct AxumWebSocketTransport {
    inner: Mutex<WebSocket>,
    peer: String,
    closing: AtomicBool,
}

impl AxumWebSocketTransport {
    pub fn new(socket: WebSocket, peer: String) -> Self {
        Self {
            inner: Mutex::new(socket),
            peer,
            closing: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl Transport for AxumWebSocketTransport {
    async fn send(&self, bytes: &[u8], timeout: Duration) -> Result<(), AcipError> {
        if self.closing.load(Ordering::Acquire) {
            return Err(AcipError::NotOpen);
        }
        if bytes.len() > MAX_WS_MESSAGE_SIZE {
            return Err(AcipError::Oversize(bytes.len()));
        }
        let mut ws = self.inner.lock().await;
        if self.closing.load(Ordering::Acquire) {
            return Err(AcipError::NotOpen);
        }
        tokio::time::timeout(timeout, ws.send(Message::Binary(bytes.to_vec().into())))
            .await
            .map_err(|_| AcipError::Timeout)?
            .map_err(|_| AcipError::ConnectionReset)
    }

    async fn recv(&self, buf: &mut [u8], timeout: Duration) -> Result<usize, AcipError> {
        if self.closing.load(Ordering::Acquire) {
            return Err(AcipError::NotOpen);
        }
        let mut ws = self.inner.lock().await;
        let deadline = timeout.min(REASSEMBLY_DEADLINE);
        let start = tokio::time::Instant::now();

        loop {
            if self.closing.load(Ordering::Acquire) {
                return Err(AcipError::NotOpen);
            }
            let remaining = deadline.saturating_sub(start.elapsed());
            if remaining.is_zero() {
                return Err(AcipError::Timeout);
            }
            let next = tokio::time::timeout(remaining, ws.next())
                .await
                .map_err(|_| AcipError::Timeout)?;

            match next {
                Some(Ok(Message::Binary(data))) => {
                    let n = data.len().min(buf.len());
                    buf[..n].copy_from_slice(&data[..n]);
                    return Ok(n);
                }
                Some(Ok(Message::Close(_))) | None => {
                    self.closing.store(true, Ordering::Release);
                    return Ok(0);
                }
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) | Some(Ok(Message::Text(_))) => {
                    continue;
                }
                Some(Err(_)) => return Err(AcipError::ConnectionReset),
            }
        }
    }

    async fn close(&self) {
        if self.closing.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut ws = self.inner.lock().await;
        let _ = ws.close().await;
    }

    fn peer_id(&self) -> String {
        self.peer.clone()
    }

    fn is_alive(&self) -> bool {
        !self.closing.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shares_the_same_message_size_cap_as_the_client_side_transport() {
        assert_eq!(MAX_WS_MESSAGE_SIZE, acip_protocol::MAX_PAYLOAD_LEN);
    }
}
