use uuid::Uuid;

/// External media-transcoding hook. Real rendering, ASCII conversion, and
/// audio mixing live outside this crate entirely; the fan-out loop only
/// needs something that takes one client's frame and produces what every
/// other client should receive.
pub trait FrameMixer: Send + Sync {
    /// Produce the bytes destined for `recipient`, given the frame `sender`
    /// just sent. Excludes the sender's own contribution for audio mixing.
    fn transcode(&self, sender: Uuid, recipient: Uuid, frame: &[u8]) -> Vec<u8>;
}

/// Passes bytes through unchanged. Used in tests and as the default when no
/// real mixer/renderer is wired in.
pub struct NullMixer;

impl FrameMixer for NullMixer {
    fn transcode(&self, _sender: Uuid, _recipient: Uuid, frame: &[u8]) -> Vec<u8> {
        frame.to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_mixer_passes_bytes_through() {
        let mixer = NullMixer;
        let out = mixer.transcode(Uuid::nil(), Uuid::nil(), b"frame-bytes");
        assert_eq!(out, b"frame-bytes");
    }
}
