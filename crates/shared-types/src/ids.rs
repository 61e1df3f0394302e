//! # Content-Addressed Identifiers
//!
//! Fixed 32-byte opaque identifiers for realities, transfers, addresses,
//! conflict sets, and vote payloads. Equality and ordering are
//! byte-lexicographic.
//!
//! ## Rendering
//!
//! Test suites build identifiers from short ASCII tags zero-padded to 32
//! bytes. `Display` strips the padding and prints the tag when the
//! significant bytes are printable UTF-8, and falls back to hex otherwise,
//! so log lines stay readable for both kinds of id.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::hashing::blake2b256;

/// Byte width of every identifier type.
pub const ID_LENGTH: usize = 32;

/// A byte slice did not have the width an identifier requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("identifier needs {expected} bytes, found {found}")]
pub struct InvalidLength {
    pub expected: usize,
    pub found: usize,
}

pub(crate) fn fmt_id_bytes(bytes: &[u8], f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let significant = match bytes.iter().rposition(|&b| b != 0) {
        Some(last) => &bytes[..=last],
        None => &bytes[..0],
    };
    match std::str::from_utf8(significant) {
        Ok(tag) if !tag.is_empty() && tag.chars().all(|c| !c.is_control()) => f.write_str(tag),
        _ => write!(f, "0x{}", hex::encode(bytes)),
    }
}

macro_rules! define_id {
    ($(#[$attr:meta])* $name:ident) => {
        $(#[$attr])*
        #[derive(
            Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
        )]
        pub struct $name([u8; ID_LENGTH]);

        impl $name {
            /// Byte width of this identifier.
            pub const LENGTH: usize = ID_LENGTH;

            pub const fn new(bytes: [u8; ID_LENGTH]) -> Self {
                Self(bytes)
            }

            /// Builds an identifier from a short string tag, zero-padded to
            /// the full width. Tags longer than the width are truncated.
            pub const fn from_tag(tag: &str) -> Self {
                let src = tag.as_bytes();
                let mut bytes = [0u8; ID_LENGTH];
                let mut i = 0;
                while i < src.len() && i < ID_LENGTH {
                    bytes[i] = src[i];
                    i += 1;
                }
                Self(bytes)
            }

            /// Reads an identifier from the front of `data`.
            pub fn from_slice(data: &[u8]) -> Result<Self, InvalidLength> {
                if data.len() < ID_LENGTH {
                    return Err(InvalidLength {
                        expected: ID_LENGTH,
                        found: data.len(),
                    });
                }
                let mut bytes = [0u8; ID_LENGTH];
                bytes.copy_from_slice(&data[..ID_LENGTH]);
                Ok(Self(bytes))
            }

            pub const fn as_bytes(&self) -> &[u8; ID_LENGTH] {
                &self.0
            }
        }

        impl AsRef<[u8]> for $name {
            fn as_ref(&self) -> &[u8] {
                &self.0
            }
        }

        impl From<[u8; ID_LENGTH]> for $name {
            fn from(bytes: [u8; ID_LENGTH]) -> Self {
                Self(bytes)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt_id_bytes(&self.0, f)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!(stringify!($name), "({})"), self)
            }
        }
    };
}

pub(crate) use define_id;

define_id! {
    /// Identifier of a reality: a named branch of ledger history.
    RealityId
}

define_id! {
    /// Hash identifying a transfer.
    TransferHash
}

define_id! {
    /// Hash identifying an address.
    AddressHash
}

define_id! {
    /// Identifier of a conflict set: the group of transfers competing for
    /// the same output.
    ConflictId
}

define_id! {
    /// Content-addressed identity of an FPC vote payload.
    PayloadId
}

/// The canonical root reality, created at store initialization.
pub const MAIN_REALITY_ID: RealityId = RealityId::from_tag("MAIN_REALITY");

impl ConflictId {
    /// Derives the conflict set identifier for a contested output:
    /// `blake2b256(transfer ‖ address)`.
    pub fn from_output_reference(transfer_hash: &TransferHash, address_hash: &AddressHash) -> Self {
        let mut preimage = [0u8; ID_LENGTH * 2];
        preimage[..ID_LENGTH].copy_from_slice(transfer_hash.as_bytes());
        preimage[ID_LENGTH..].copy_from_slice(address_hash.as_bytes());
        Self(blake2b256(&preimage))
    }
}
