//! X25519 ephemeral handshake, HKDF-SHA256 key derivation, and a
//! ChaCha20Poly1305-secured per-direction message channel. Long-term
//! Ed25519 identity keys optionally sign the handshake transcript.

use std::sync::atomic::{AtomicU64, Ordering};

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use hkdf::Hkdf;
use rand_core::{OsRng, RngCore};
use sha2::{Digest, Sha256};
use x25519_dalek::{EphemeralSecret, PublicKey};

use crate::error::AcipError;

pub const IDENTITY_FILE_SIZE: usize = 96; // 32-byte public + 64-byte secret

/// One side's ephemeral handshake state before the shared secret is derived.
pub struct HandshakeState {
    secret: EphemeralSecret,
    pub public: [u8; 32],
    pub session_salt: [u8; 32],
}

impl HandshakeState {
    pub fn generate() -> Self {
        let secret = EphemeralSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);
        let mut session_salt = [0u8; 32];
        OsRng.fill_bytes(&mut session_salt);
        Self {
            secret,
            public: public.to_bytes(),
            session_salt,
        }
    }

    /// Complete the exchange with the peer's ephemeral public key, deriving
    /// one key per direction. `we_are_initiator` picks which derived key is
    /// used for sending vs. receiving so both sides agree on direction.
    pub fn complete(
        self,
        peer_public: &[u8; 32],
        we_are_initiator: bool,
    ) -> Result<SecureChannel, AcipError> {
        let peer_public = PublicKey::from(*peer_public);
        let shared = self.secret.diffie_hellman(&peer_public);

        let hk = Hkdf::<Sha256>::new(Some(&self.session_salt), shared.as_bytes());
        let mut initiator_to_responder = [0u8; 32];
        let mut responder_to_initiator = [0u8; 32];
        hk.expand(b"acip initiator->responder", &mut initiator_to_responder)
            .map_err(|_| AcipError::HandshakeFailed("HKDF expand failed".into()))?;
        hk.expand(b"acip responder->initiator", &mut responder_to_initiator)
            .map_err(|_| AcipError::HandshakeFailed("HKDF expand failed".into()))?;

        let (send_key, recv_key) = if we_are_initiator {
            (initiator_to_responder, responder_to_initiator)
        } else {
            (responder_to_initiator, initiator_to_responder)
        };

        Ok(SecureChannel::new(send_key, recv_key))
    }
}

/// A per-direction monotonic nonce counter. The transport is torn down on
/// overflow rather than reusing a nonce.
struct NonceCounter(AtomicU64);

impl NonceCounter {
    fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    fn next(&self) -> Result<[u8; 12], AcipError> {
        let n = self.0.fetch_add(1, Ordering::Relaxed);
        if n == u64::MAX {
            return Err(AcipError::NonceExhausted);
        }
        let mut nonce = [0u8; 12];
        nonce[4..].copy_from_slice(&n.to_be_bytes());
        Ok(nonce)
    }
}

/// AEAD-secured channel derived from a completed handshake. `seal`/`open`
/// frame each message as nonce (implicit, tracked here) + ciphertext + tag;
/// callers only see plaintext in and ciphertext out.
pub struct SecureChannel {
    send_cipher: ChaCha20Poly1305,
    recv_cipher: ChaCha20Poly1305,
    send_nonce: NonceCounter,
}

impl SecureChannel {
    fn new(send_key: [u8; 32], recv_key: [u8; 32]) -> Self {
        Self {
            send_cipher: ChaCha20Poly1305::new(Key::from_slice(&send_key)),
            recv_cipher: ChaCha20Poly1305::new(Key::from_slice(&recv_key)),
            send_nonce: NonceCounter::new(),
        }
    }

    /// Returns explicit nonce (12 bytes) ∥ ciphertext ∥ 16-byte tag.
    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, AcipError> {
        let nonce_bytes = self.send_nonce.next()?;
        let nonce = Nonce::from_slice(&nonce_bytes);
        let ciphertext = self
            .send_cipher
            .encrypt(nonce, plaintext)
            .map_err(|_| AcipError::AeadFailed)?;
        let mut out = Vec::with_capacity(12 + ciphertext.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// Expects the same nonce ∥ ciphertext ∥ tag layout `seal` produces.
    /// The nonce travels with every message, so receive order need not
    /// match a local counter — but a regressing nonce from the peer is
    /// still a protocol violation the caller should treat as fatal.
    pub fn open(&self, framed: &[u8]) -> Result<Vec<u8>, AcipError> {
        if framed.len() < 12 {
            return Err(AcipError::InvalidParam("ciphertext shorter than nonce".into()));
        }
        let (nonce_bytes, ciphertext) = framed.split_at(12);
        let nonce = Nonce::from_slice(nonce_bytes);
        self.recv_cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| AcipError::AeadFailed)
    }
}

/// Long-term Ed25519 identity, persisted as 32-byte public || 64-byte secret.
pub struct Identity {
    pub signing_key: SigningKey,
}

impl Identity {
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    pub fn public_bytes(&self) -> [u8; 32] {
        self.signing_key.verifying_key().to_bytes()
    }

    pub fn sign(&self, transcript: &[u8]) -> [u8; 64] {
        self.signing_key.sign(transcript).to_bytes()
    }

    pub fn fingerprint(&self) -> String {
        fingerprint_of(&self.public_bytes())
    }

    /// 32-byte public key followed by the 64-byte keypair encoding
    /// (32-byte seed || 32-byte public key) that `ed25519-dalek` and most
    /// Ed25519 implementations call the "secret key".
    pub fn to_file_bytes(&self) -> [u8; IDENTITY_FILE_SIZE] {
        let mut buf = [0u8; IDENTITY_FILE_SIZE];
        buf[0..32].copy_from_slice(&self.public_bytes());
        buf[32..96].copy_from_slice(&self.signing_key.to_keypair_bytes());
        buf
    }

    pub fn from_file_bytes(buf: &[u8]) -> Result<Self, AcipError> {
        if buf.len() != IDENTITY_FILE_SIZE {
            return Err(AcipError::InvalidParam(format!(
                "identity file must be {IDENTITY_FILE_SIZE} bytes, got {}",
                buf.len()
            )));
        }
        let mut seed = [0u8; 32];
        seed.copy_from_slice(&buf[32..64]);
        let signing_key = SigningKey::from_bytes(&seed);
        Ok(Self { signing_key })
    }
}

/// Verify a transcript signature against a peer's claimed public identity key.
pub fn verify_transcript(
    public_key: &[u8; 32],
    transcript: &[u8],
    signature: &[u8; 64],
) -> Result<(), AcipError> {
    let verifying_key = VerifyingKey::from_bytes(public_key)
        .map_err(|_| AcipError::AuthMismatch)?;
    let signature = Signature::from_bytes(signature);
    verifying_key
        .verify(transcript, &signature)
        .map_err(|_| AcipError::AuthMismatch)
}

/// `SHA-256:<64-hex>` over a 32-byte public key.
pub fn fingerprint_of(public_key: &[u8; 32]) -> String {
    let digest = Sha256::digest(public_key);
    let mut hex = String::with_capacity(7 + 64);
    hex.push_str("SHA-256:");
    for byte in digest {
        hex.push_str(&format!("{byte:02x}"));
    }
    hex
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handshake_derives_matching_directional_keys() {
        let initiator = HandshakeState::generate();
        let responder = HandshakeState::generate();
        let initiator_public = initiator.public;
        let responder_public = responder.public;
        // Both sides must agree on the session salt out of band for this
        // test; in the real handshake the initiator's salt travels in
        // HandshakeInit.
        let salt = initiator.session_salt;
        let mut responder = responder;
        responder.session_salt = salt;

        let initiator_channel = initiator.complete(&responder_public, true).unwrap();
        let responder_channel = responder.complete(&initiator_public, false).unwrap();

        let sealed = initiator_channel.seal(b"hello").unwrap();
        let opened = responder_channel.open(&sealed).unwrap();
        assert_eq!(opened, b"hello");
    }

    #[test]
    fn tampered_ciphertext_fails_to_open() {
        let initiator = HandshakeState::generate();
        let responder = HandshakeState::generate();
        let initiator_public = initiator.public;
        let responder_public = responder.public;
        let salt = initiator.session_salt;
        let mut responder = responder;
        responder.session_salt = salt;

        let initiator_channel = initiator.complete(&responder_public, true).unwrap();
        let responder_channel = responder.complete(&initiator_public, false).unwrap();

        let mut sealed = initiator_channel.seal(b"hello").unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0x01;
        assert!(responder_channel.open(&sealed).is_err());
    }

    #[test]
    fn identity_roundtrips_through_file_bytes() {
        let identity = Identity::generate();
        let bytes = identity.to_file_bytes();
        let loaded = Identity::from_file_bytes(&bytes).unwrap();
        assert_eq!(identity.public_bytes(), loaded.public_bytes());
    }

    #[test]
    fn transcript_signature_verifies() {
        let identity = Identity::generate();
        let transcript = b"session-uuid || ephemeral-a || ephemeral-b";
        let signature = identity.sign(transcript);
        assert!(verify_transcript(&identity.public_bytes(), transcript, &signature).is_ok());
    }

    #[test]
    fn tampered_transcript_fails_verification() {
        let identity = Identity::generate();
        let signature = identity.sign(b"original");
        assert!(verify_transcript(&identity.public_bytes(), b"tampered", &signature).is_err());
    }

    #[test]
    fn fingerprint_has_expected_format() {
        let identity = Identity::generate();
        let fp = identity.fingerprint();
        assert!(fp.starts_with("SHA-256:"));
        assert_eq!(fp.len(), "SHA-256:".len() + 64);
    }
}
