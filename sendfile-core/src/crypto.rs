//! Per-connection crypto: ephemeral X25519 agreement and one ChaCha20-Poly1305 cipher per direction.

use chacha20poly1305::aead::{Aead, KeyInit, Nonce};
use chacha20poly1305::{ChaCha20Poly1305, Key};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use x25519_dalek::EphemeralSecret;

const SESSION_LABEL: &[u8] = b"sendfile-session-v1";

/// X25519 public key as sent in the hello frame.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
pub struct PublicKey(pub [u8; 32]);

impl PublicKey {
    /// First 8 bytes of its SHA-256, hex. Enough to tell peers apart in logs.
    pub fn fingerprint(&self) -> String {
        hex::encode(&Sha256::digest(self.0)[..8])
    }
}

/// Which side opened the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Initiator,
    Responder,
}

/// Single-use key pair. Agreement consumes it, so a secret never outlives its handshake.
pub struct Keypair {
    secret: EphemeralSecret,
    public: PublicKey,
}

impl Keypair {
    pub fn generate() -> Self {
        let secret = EphemeralSecret::random_from_rng(OsRng);
        let public = PublicKey(x25519_dalek::PublicKey::from(&secret).to_bytes());
        Self { secret, public }
    }

    pub fn public_key(&self) -> PublicKey {
        self.public
    }

    /// Agree on a shared secret with the peer and derive both direction ciphers.
    /// A password, when given, is mixed into each key.
    pub fn agree(self, remote: &PublicKey, role: Role, password: Option<&[u8]>) -> CipherPair {
        let shared = self
            .secret
            .diffie_hellman(&x25519_dalek::PublicKey::from(remote.0));
        let i2r = direction_key(shared.as_bytes(), b"i2r", password);
        let r2i = direction_key(shared.as_bytes(), b"r2i", password);
        let (outbound, inbound) = match role {
            Role::Initiator => (i2r, r2i),
            Role::Responder => (r2i, i2r),
        };
        CipherPair {
            outbound: DirectionCipher::new(&outbound),
            inbound: DirectionCipher::new(&inbound),
        }
    }
}

fn direction_key(shared: &[u8; 32], direction: &[u8], password: Option<&[u8]>) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(SESSION_LABEL);
    hasher.update(direction);
    hasher.update(shared);
    if let Some(pw) = password {
        hasher.update((pw.len() as u64).to_le_bytes());
        hasher.update(pw);
    }
    hasher.finalize().into()
}

pub struct CipherPair {
    pub outbound: DirectionCipher,
    pub inbound: DirectionCipher,
}

/// AEAD for one direction of a connection. The nonce is a record counter, so records must
/// be opened in the order they were sealed.
pub struct DirectionCipher {
    aead: ChaCha20Poly1305,
    counter: u64,
}

impl DirectionCipher {
    fn new(key: &[u8; 32]) -> Self {
        Self {
            aead: ChaCha20Poly1305::new(Key::from_slice(key)),
            counter: 0,
        }
    }

    fn next_nonce(&mut self) -> Result<Nonce<ChaCha20Poly1305>, CryptoError> {
        let mut nonce = [0u8; 12];
        nonce[4..].copy_from_slice(&self.counter.to_le_bytes());
        self.counter = self.counter.checked_add(1).ok_or(CryptoError::Exhausted)?;
        Ok(Nonce::<ChaCha20Poly1305>::clone_from_slice(&nonce))
    }

    pub fn seal(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let nonce = self.next_nonce()?;
        self.aead
            .encrypt(&nonce, plaintext)
            .map_err(|_| CryptoError::Seal)
    }

    /// Fails on tampering, reordering or a key mismatch.
    pub fn open(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let nonce = self.next_nonce()?;
        self.aead
            .decrypt(&nonce, ciphertext)
            .map_err(|_| CryptoError::Open)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("sealing a record failed")]
    Seal,
    #[error("record failed authentication")]
    Open,
    #[error("record counter exhausted")]
    Exhausted,
}
