//! # fpc-payload
//!
//! The fixed-format record anchoring a node's FPC vote on a reality,
//! content-addressed by blake2b-256 of `(nonce, like)`.
//!
//! ## Wire format
//!
//! Exactly 44 bytes:
//!
//! ```text
//! [type: u32 LE = 10895][length: u32 LE = 36][nonce: 32][like: u32 LE]
//! ```
//!
//! ## Lazy materialization
//!
//! Both the identity and the marshaled form are pure functions of the
//! immutable `(nonce, like)` pair, computed on first access and cached.
//! Each cache sits behind its own reader/writer lock with double-checked
//! initialization: readers observe either nothing or the fully initialized
//! value, never a partial state. Racing writers compute the same result, so
//! a lost race is benign.

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use shared_types::{blake2b256, PayloadId};
use thiserror::Error;

/// Size of the vote nonce.
pub const NONCE_SIZE: usize = 32;

/// Type word identifying an FPC vote payload on the wire.
pub const PAYLOAD_TYPE: u32 = 10895;

/// Length word of the payload content: nonce plus the like word.
pub const CONTENT_LENGTH: usize = NONCE_SIZE + 4;

/// Total marshaled size: type word, length word, content.
pub const MARSHALED_LENGTH: usize = 8 + CONTENT_LENGTH;

/// Errors parsing a marshaled payload.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PayloadParseError {
    #[error("payload needs {} bytes, found {found}", MARSHALED_LENGTH)]
    UnexpectedEnd { found: usize },

    #[error("payload type word is {found}, expected {}", PAYLOAD_TYPE)]
    WrongType { found: u32 },

    #[error("payload length word is {found}, expected {}", CONTENT_LENGTH)]
    WrongLength { found: u32 },
}

/// An FPC vote: an opaque nonce and the like bit of the voting round.
///
/// `nonce` and `like` are immutable after construction; the identity and
/// the wire form are derived lazily and shared across readers.
pub struct Payload {
    nonce: [u8; NONCE_SIZE],
    like: u32,
    id: RwLock<Option<PayloadId>>,
    bytes: RwLock<Option<Arc<[u8]>>>,
}

impl Payload {
    pub fn new(like: u32, nonce: [u8; NONCE_SIZE]) -> Self {
        Self {
            nonce,
            like,
            id: RwLock::new(None),
            bytes: RwLock::new(None),
        }
    }

    pub fn nonce(&self) -> &[u8; NONCE_SIZE] {
        &self.nonce
    }

    pub fn like(&self) -> u32 {
        self.like
    }

    /// The content-addressed identity: `blake2b256(nonce ‖ like_le32)`.
    pub fn id(&self) -> PayloadId {
        if let Some(id) = *self.id.read() {
            return id;
        }

        let mut slot = self.id.write();
        if let Some(id) = *slot {
            return id;
        }

        let mut preimage = [0u8; CONTENT_LENGTH];
        preimage[..NONCE_SIZE].copy_from_slice(&self.nonce);
        preimage[NONCE_SIZE..].copy_from_slice(&self.like.to_le_bytes());
        let id = PayloadId::new(blake2b256(&preimage));
        *slot = Some(id);
        id
    }

    /// The marshaled wire form, shared across callers.
    pub fn to_bytes(&self) -> Arc<[u8]> {
        if let Some(bytes) = self.bytes.read().as_ref() {
            return bytes.clone();
        }

        let mut slot = self.bytes.write();
        if let Some(bytes) = slot.as_ref() {
            return bytes.clone();
        }

        let mut out = Vec::with_capacity(MARSHALED_LENGTH);
        out.extend_from_slice(&PAYLOAD_TYPE.to_le_bytes());
        out.extend_from_slice(&(CONTENT_LENGTH as u32).to_le_bytes());
        out.extend_from_slice(&self.nonce);
        out.extend_from_slice(&self.like.to_le_bytes());
        let bytes: Arc<[u8]> = out.into();
        *slot = Some(bytes.clone());
        bytes
    }

    /// Parses a marshaled payload, validating the type and length words.
    /// The consumed bytes are kept as the cached wire form.
    pub fn from_bytes(data: &[u8]) -> Result<Self, PayloadParseError> {
        if data.len() < MARSHALED_LENGTH {
            return Err(PayloadParseError::UnexpectedEnd { found: data.len() });
        }

        let type_word = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
        if type_word != PAYLOAD_TYPE {
            return Err(PayloadParseError::WrongType { found: type_word });
        }

        let length_word = u32::from_le_bytes([data[4], data[5], data[6], data[7]]);
        if length_word != CONTENT_LENGTH as u32 {
            return Err(PayloadParseError::WrongLength { found: length_word });
        }

        let mut nonce = [0u8; NONCE_SIZE];
        nonce.copy_from_slice(&data[8..8 + NONCE_SIZE]);
        let like = u32::from_le_bytes([
            data[8 + NONCE_SIZE],
            data[9 + NONCE_SIZE],
            data[10 + NONCE_SIZE],
            data[11 + NONCE_SIZE],
        ]);

        let payload = Self::new(like, nonce);
        *payload.bytes.write() = Some(data[..MARSHALED_LENGTH].to_vec().into());
        Ok(payload)
    }
}

impl PartialEq for Payload {
    fn eq(&self, other: &Self) -> bool {
        self.nonce == other.nonce && self.like == other.like
    }
}

impl Eq for Payload {}

impl Clone for Payload {
    fn clone(&self) -> Self {
        Self {
            nonce: self.nonce,
            like: self.like,
            id: RwLock::new(*self.id.read()),
            bytes: RwLock::new(self.bytes.read().clone()),
        }
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Payload")
            .field("id", &self.id())
            .field("like", &self.like)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_id_is_blake2b_of_nonce_and_like() {
        let payload = Payload::new(1, [0u8; NONCE_SIZE]);

        let mut preimage = [0u8; CONTENT_LENGTH];
        preimage[NONCE_SIZE..].copy_from_slice(&1u32.to_le_bytes());
        assert_eq!(payload.id().as_bytes(), &blake2b256(&preimage));

        // Computed once, stable afterwards.
        assert_eq!(payload.id(), payload.id());
    }

    #[test]
    fn test_marshaled_literal_bytes() {
        let payload = Payload::new(1, [0u8; NONCE_SIZE]);
        let bytes = payload.to_bytes();

        assert_eq!(bytes.len(), MARSHALED_LENGTH);
        // 10895 = 0x2A8F, 36 = 0x24, both little-endian.
        assert_eq!(&bytes[..8], &[0x8F, 0x2A, 0x00, 0x00, 0x24, 0x00, 0x00, 0x00]);
        assert_eq!(&bytes[8..8 + NONCE_SIZE], &[0u8; NONCE_SIZE]);
        assert_eq!(&bytes[8 + NONCE_SIZE..], &[0x01, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn test_marshal_round_trip() {
        let payload = Payload::new(7, [0xAB; NONCE_SIZE]);
        let bytes = payload.to_bytes();

        let parsed = Payload::from_bytes(&bytes).unwrap();
        assert_eq!(parsed, payload);
        assert_eq!(parsed.id(), payload.id());
        assert_eq!(parsed.to_bytes(), bytes);
    }

    #[test]
    fn test_parse_rejects_truncated_input() {
        let err = Payload::from_bytes(&[0u8; 10]).unwrap_err();
        assert_eq!(err, PayloadParseError::UnexpectedEnd { found: 10 });
    }

    #[test]
    fn test_parse_rejects_wrong_type_word() {
        let payload = Payload::new(0, [0u8; NONCE_SIZE]);
        let mut bytes = payload.to_bytes().to_vec();
        bytes[0] = 0x90;
        let err = Payload::from_bytes(&bytes).unwrap_err();
        assert!(matches!(err, PayloadParseError::WrongType { .. }));
    }

    #[test]
    fn test_parse_rejects_wrong_length_word() {
        let payload = Payload::new(0, [0u8; NONCE_SIZE]);
        let mut bytes = payload.to_bytes().to_vec();
        bytes[4] = 0x25;
        let err = Payload::from_bytes(&bytes).unwrap_err();
        assert_eq!(err, PayloadParseError::WrongLength { found: 0x25 });
    }

    #[test]
    fn test_concurrent_materialization_agrees() {
        let payload = std::sync::Arc::new(Payload::new(3, [0x5A; NONCE_SIZE]));

        let expected_id = {
            let mut preimage = [0u8; CONTENT_LENGTH];
            preimage[..NONCE_SIZE].copy_from_slice(&[0x5A; NONCE_SIZE]);
            preimage[NONCE_SIZE..].copy_from_slice(&3u32.to_le_bytes());
            blake2b256(&preimage)
        };

        thread::scope(|scope| {
            for _ in 0..8 {
                let payload = payload.clone();
                scope.spawn(move || {
                    assert_eq!(payload.id().as_bytes(), &expected_id);
                    assert_eq!(payload.to_bytes().len(), MARSHALED_LENGTH);
                });
            }
        });
    }

    #[test]
    fn test_clone_preserves_identity() {
        let payload = Payload::new(2, [0x11; NONCE_SIZE]);
        let id = payload.id();
        let clone = payload.clone();
        assert_eq!(clone.id(), id);
        assert_eq!(clone, payload);
    }
}
