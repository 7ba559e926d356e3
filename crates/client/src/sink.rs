//! The seam where rendering would live. ASCII/terminal display is out of
//! scope for the core — this trait exists only so the receive
//! loop has somewhere to hand decoded frames.

use uuid::Uuid;

pub trait FrameSink: Send + Sync {
    fn on_image_frame(&self, sender: Uuid, frame: &[u8]);
    fn on_audio_batch(&self, sender: Uuid, frame: &[u8]);
    fn on_text_message(&self, from: Uuid, body: &str);
}

/// Logs what it receives. Stands in for the terminal renderer and audio
/// device that live outside this crate.
pub struct NullSink;

impl FrameSink for NullSink {
    fn on_image_frame(&self, sender: Uuid, frame: &[u8]) {
        tracing::debug!(sender = %sender, bytes = frame.len(), "image frame received");
    }

    fn on_audio_batch(&self, sender: Uuid, frame: &[u8]) {
        tracing::debug!(sender = %sender, bytes = frame.len(), "audio batch received");
    }

    fn on_text_message(&self, from: Uuid, body: &str) {
        tracing::info!(from = %from, "{body}");
    }
}
