//! Session-key payload protection.
//!
//! Once a connection has authenticated, both ends hold the same SRP session
//! key. A `SecureChannel` turns it into an in-place AEAD transform over
//! frame payloads: ChaCha20-Poly1305 with a per-direction counter nonce.
//! The per-connection FIFO ordering guarantee makes the counters line up
//! without carrying nonces on the wire.

use chacha20poly1305::aead::{AeadInPlace, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce, Tag};
use zeroize::Zeroizing;

/// Poly1305 tag bytes appended to every sealed payload.
pub const TAG_LENGTH: usize = 16;

#[derive(Debug, PartialEq, Eq)]
pub enum SealError {
    /// Session key was not the expected size.
    BadKey,
    /// Authentication tag mismatch or malformed sealed payload.
    IntegrityCheckFailed,
}

#[derive(Debug)]
pub struct SecureChannel {
    cipher: ChaCha20Poly1305,
    /// Nonce domain separator: the host seals under 0, the user under 1.
    seal_direction: u8,
    seal_counter: u64,
    open_counter: u64,
}

impl SecureChannel {
    /// Builds a channel from an SRP session key; the first 32 bytes key the
    /// cipher. The role picks the nonce domain, so the two directions of
    /// one session never collide.
    pub fn new(session_key: &[u8], is_host: bool) -> Result<Self, SealError> {
        if session_key.len() < 32 {
            return Err(SealError::BadKey);
        }
        let key = Zeroizing::new(<[u8; 32]>::try_from(&session_key[..32]).unwrap());
        Ok(Self {
            cipher: ChaCha20Poly1305::new(Key::from_slice(&*key)),
            seal_direction: if is_host { 0 } else { 1 },
            seal_counter: 0,
            open_counter: 0,
        })
    }

    /// Encrypts a payload in place and returns the tag to append. `aad`
    /// binds the frame header so a sealed payload cannot be replayed under
    /// a different context.
    pub fn seal_in_place(
        &mut self,
        aad: &[u8],
        buffer: &mut [u8],
    ) -> Result<[u8; TAG_LENGTH], SealError> {
        let nonce = self.next_nonce(true);
        self.cipher
            .encrypt_in_place_detached(Nonce::from_slice(&nonce), aad, buffer)
            .map(|tag| tag.into())
            .map_err(|_| SealError::IntegrityCheckFailed)
    }

    /// Decrypts a payload in place, verifying the detached tag.
    pub fn open_in_place(
        &mut self,
        aad: &[u8],
        buffer: &mut [u8],
        tag: &[u8],
    ) -> Result<(), SealError> {
        if tag.len() != TAG_LENGTH {
            return Err(SealError::IntegrityCheckFailed);
        }
        let nonce = self.next_nonce(false);
        self.cipher
            .decrypt_in_place_detached(Nonce::from_slice(&nonce), aad, buffer, Tag::from_slice(tag))
            .map_err(|_| SealError::IntegrityCheckFailed)
    }

    fn next_nonce(&mut self, sealing: bool) -> [u8; 12] {
        let (direction, counter) = if sealing {
            let c = self.seal_counter;
            self.seal_counter += 1;
            (self.seal_direction, c)
        } else {
            let c = self.open_counter;
            self.open_counter += 1;
            (1 - self.seal_direction, c)
        };
        let mut nonce = [0u8; 12];
        nonce[0] = direction;
        nonce[4..].copy_from_slice(&counter.to_be_bytes());
        nonce
    }
}
