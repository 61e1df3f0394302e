//! # Shared Types Crate
//!
//! Cross-crate domain types for the Meshledger node: fixed-width
//! content-addressed identifiers, colored balances, and the blake2b-256
//! helper every identity derivation goes through.
//!
//! ## Design Principles
//!
//! - **Single Source of Truth**: every identifier that crosses a crate
//!   boundary is defined here, once.
//! - **Opaque bytes**: identifiers are 32-byte values with byte-lexicographic
//!   ordering; nothing downstream inspects their structure.
//! - **Readable rendering**: identifiers built from short string tags (the
//!   convention used throughout the test suites) display as text, everything
//!   else as hex.

pub mod balance;
pub mod hashing;
pub mod ids;

pub use balance::{Color, ColoredBalance, COLOR_IOTA, COLOR_NEW};
pub use hashing::blake2b256;
pub use ids::{
    AddressHash, ConflictId, InvalidLength, PayloadId, RealityId, TransferHash, ID_LENGTH,
    MAIN_REALITY_ID,
};
