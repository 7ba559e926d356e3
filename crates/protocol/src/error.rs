//! The error taxonomy from the protocol design, as one flat `thiserror` enum.
//!
//! Every variant carries a stable numeric code used in wire
//! `ErrorMessage`/`DiscoveryError` payloads, and every variant knows
//! whether it's recoverable (caller retries or drops) or connection-fatal
//! (close and mark `Errored`; other connections are unaffected).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AcipError {
    // --- Input ---
    #[error("invalid parameter: {0}")]
    InvalidParam(String),
    #[error("oversize: {0} bytes")]
    Oversize(usize),
    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(u8),

    // --- Protocol ---
    #[error("magic mismatch: 0x{0:08x}")]
    MagicMismatch(u32),
    #[error("corrupt payload: CRC32 mismatch")]
    CorruptPayload,
    #[error("sequence regression: expected > {last}, got {got}")]
    SequenceRegression { last: u32, got: u32 },
    #[error("unknown packet type: {0}")]
    UnknownType(u16),

    // --- Transport ---
    #[error("timed out")]
    Timeout,
    #[error("connection refused")]
    ConnectionRefused,
    #[error("connection reset")]
    ConnectionReset,
    #[error("end of stream")]
    EndOfStream,
    #[error("transport not open")]
    NotOpen,

    // --- Crypto ---
    #[error("handshake failed: {0}")]
    HandshakeFailed(String),
    #[error("identity authentication required but missing")]
    AuthRequired,
    #[error("identity signature did not verify")]
    AuthMismatch,
    #[error("AEAD open/seal failed")]
    AeadFailed,
    #[error("nonce space exhausted")]
    NonceExhausted,

    // --- Resource ---
    #[error("out of memory")]
    OutOfMemory,
    #[error("exhausted: {0}")]
    Exhausted(String),
    #[error("rate limited")]
    RateLimited,

    // --- Application ---
    #[error("session not found")]
    NotFound,
    #[error("session full")]
    Full,
    #[error("participant already joined")]
    AlreadyJoined,
    #[error("not the session host")]
    NotHost,
    #[error("migration already in progress")]
    MigrationInProgress,

    // --- Internal ---
    #[error("invalid state: {0}")]
    InvalidState(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropagationClass {
    /// Caller retries or drops this one operation; the connection survives.
    Recoverable,
    /// This connection closes and is marked `Errored`; others are unaffected.
    Fatal,
}

impl AcipError {
    /// Stable numeric code for wire `ErrorMessage`/`DiscoveryError` payloads.
    pub fn code(&self) -> u16 {
        use AcipError::*;
        match self {
            InvalidParam(_) => 1000,
            Oversize(_) => 1001,
            UnsupportedVersion(_) => 1002,
            MagicMismatch(_) => 1100,
            CorruptPayload => 1101,
            SequenceRegression { .. } => 1102,
            UnknownType(_) => 1103,
            Timeout => 1200,
            ConnectionRefused => 1201,
            ConnectionReset => 1202,
            EndOfStream => 1203,
            NotOpen => 1204,
            HandshakeFailed(_) => 1300,
            AuthRequired => 1301,
            AuthMismatch => 1302,
            AeadFailed => 1303,
            NonceExhausted => 1304,
            OutOfMemory => 1400,
            Exhausted(_) => 1401,
            RateLimited => 1402,
            NotFound => 1500,
            Full => 1501,
            AlreadyJoined => 1502,
            NotHost => 1503,
            MigrationInProgress => 1504,
            InvalidState(_) => 1600,
        }
    }

    pub fn propagation(&self) -> PropagationClass {
        use AcipError::*;
        use PropagationClass::*;
        match self {
            Timeout | RateLimited | NotOpen | CorruptPayload => Recoverable,
            SequenceRegression { .. } | AuthMismatch | AeadFailed | NonceExhausted => Fatal,
            _ => Fatal,
        }
    }
}

impl From<crate::frame::FrameError> for AcipError {
    fn from(e: crate::frame::FrameError) -> Self {
        use crate::frame::FrameError as F;
        match e {
            F::TooShort(n) => AcipError::InvalidParam(format!("frame too short: {n} bytes")),
            F::MagicMismatch(m) => AcipError::MagicMismatch(m),
            F::Oversize(n) => AcipError::Oversize(n),
            F::IncompletePayload { .. } => AcipError::EndOfStream,
            F::CorruptPayload => AcipError::CorruptPayload,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recoverable_errors_stay_local() {
        assert_eq!(AcipError::Timeout.propagation(), PropagationClass::Recoverable);
        assert_eq!(AcipError::RateLimited.propagation(), PropagationClass::Recoverable);
        assert_eq!(AcipError::NotOpen.propagation(), PropagationClass::Recoverable);
        assert_eq!(AcipError::CorruptPayload.propagation(), PropagationClass::Recoverable);
    }

    #[test]
    fn connection_fatal_errors_are_fatal() {
        assert_eq!(
            AcipError::SequenceRegression { last: 5, got: 2 }.propagation(),
            PropagationClass::Fatal
        );
        assert_eq!(AcipError::AuthMismatch.propagation(), PropagationClass::Fatal);
        assert_eq!(AcipError::AeadFailed.propagation(), PropagationClass::Fatal);
        assert_eq!(AcipError::NonceExhausted.propagation(), PropagationClass::Fatal);
    }

    #[test]
    fn codes_are_stable_and_distinct_within_category() {
        assert_ne!(AcipError::NotFound.code(), AcipError::Full.code());
        assert_eq!(AcipError::Timeout.code(), 1200);
    }

    #[test]
    fn frame_error_converts_to_acip_error() {
        let fe = crate::frame::FrameError::CorruptPayload;
        let ae: AcipError = fe.into();
        assert!(matches!(ae, AcipError::CorruptPayload));
    }
}
