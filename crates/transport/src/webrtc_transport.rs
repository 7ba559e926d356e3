use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use acip_protocol::AcipError;
use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{mpsc, Mutex};
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::RTCDataChannel;

use crate::Transport;

/// A WebRTC DataChannel transport, used only for the unreliable-unordered
/// "one data channel, no media tracks" path this codebase needs for
/// discovery-mode peer connections — there is no video/audio track wiring
/// here, that lives entirely outside this abstraction.
///
/// The channel's open/closed state is driven by `on_open`/`on_close`
/// callbacks and cached in `open`/`closing` atomics so a callback firing
/// after a caller has already moved on is harmless to observe.
pub struct WebRtcTransport {
    channel: Arc<RTCDataChannel>,
    open: Arc<AtomicBool>,
    closing: Arc<AtomicBool>,
    inbox: Mutex<mpsc::Receiver<Vec<u8>>>,
    peer: String,
}

impl WebRtcTransport {
    pub fn new(channel: Arc<RTCDataChannel>, peer: String) -> Self {
        use webrtc::data_channel::data_channel_state::RTCDataChannelState;

        let open = Arc::new(AtomicBool::new(
            channel.ready_state() == RTCDataChannelState::Open,
        ));
        let closing = Arc::new(AtomicBool::new(false));
        let (tx, rx) = mpsc::channel(256);

        let open_for_open_cb = open.clone();
        channel.on_open(Box::new(move || {
            open_for_open_cb.store(true, Ordering::Release);
            Box::pin(async {})
        }));

        let open_for_close_cb = open.clone();
        let closing_for_close_cb = closing.clone();
        channel.on_close(Box::new(move || {
            open_for_close_cb.store(false, Ordering::Release);
            closing_for_close_cb.store(true, Ordering::Release);
            Box::pin(async {})
        }));

        channel.on_message(Box::new(move |msg: DataChannelMessage| {
            let tx = tx.clone();
            Box::pin(async move {
                let _ = tx.send(msg.data.to_vec()).await;
            })
        }));

        Self {
            channel,
            open,
            closing,
            inbox: Mutex::new(rx),
            peer,
        }
    }
}

#[async_trait]
impl Transport for WebRtcTransport {
    async fn send(&self, bytes: &[u8], timeout: Duration) -> Result<(), AcipError> {
        if !self.open.load(Ordering::Acquire) {
            return Err(AcipError::NotOpen);
        }
        let channel = self.channel.clone();
        let data = Bytes::copy_from_slice(bytes);
        tokio::time::timeout(timeout, channel.send(&data))
            .await
            .map_err(|_| AcipError::Timeout)?
            .map_err(|_| AcipError::ConnectionReset)?;
        Ok(())
    }

    async fn recv(&self, buf: &mut [u8], timeout: Duration) -> Result<usize, AcipError> {
        let mut inbox = self.inbox.lock().await;
        match tokio::time::timeout(timeout, inbox.recv()).await {
            Ok(Some(data)) => {
                let n = data.len().min(buf.len());
                buf[..n].copy_from_slice(&data[..n]);
                Ok(n)
            }
            Ok(None) => {
                self.closing.store(true, Ordering::Release);
                Ok(0)
            }
            Err(_) => Err(AcipError::Timeout),
        }
    }

    async fn close(&self) {
        if self.closing.swap(true, Ordering::AcqRel) {
            return;
        }
        self.open.store(false, Ordering::Release);
        let _ = self.channel.close().await;
    }

    fn peer_id(&self) -> String {
        self.peer.clone()
    }

    fn is_alive(&self) -> bool {
        !self.closing.load(Ordering::Acquire)
    }
}
