//! # Domain Errors
//!
//! Error taxonomy of the ledger core.
//!
//! Balance and reality errors are reported to the caller and never retried
//! here. Storage faults surface unchanged, fatal to the current booking
//! only. A stored reality whose parents cannot be loaded indicates
//! corruption, not recoverable state, and aborts the process at the call
//! site.

use std::fmt;

use shared_types::RealityId;
use thiserror::Error;

use crate::domain::entities::TransferOutputReference;

/// Errors reported by ledger operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// A referenced transfer output does not exist.
    InputMissing { reference: TransferOutputReference },

    /// Inputs and outputs do not net to zero per color.
    BalanceMismatch { detail: &'static str },

    /// An input's reality is not an ancestor of the booking's target reality.
    WrongReality {
        input_reality: RealityId,
        target_reality: RealityId,
    },

    /// A referenced reality is not stored.
    UnknownReality { reality_id: RealityId },

    /// The filter list contained a combination that cannot be compiled.
    BadFilter { detail: &'static str },

    /// The underlying keyspace failed.
    StorageFault { message: String },
}

impl fmt::Display for LedgerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LedgerError::InputMissing { reference } => {
                write!(f, "missing input in transfer: {}", reference)
            }
            LedgerError::BalanceMismatch { detail } => {
                write!(f, "the sum of the balance changes is not 0: {}", detail)
            }
            LedgerError::WrongReality {
                input_reality,
                target_reality,
            } => {
                write!(
                    f,
                    "the referenced funds of reality {} do not exist in reality {}",
                    input_reality, target_reality
                )
            }
            LedgerError::UnknownReality { reality_id } => {
                write!(f, "referenced reality does not exist: {}", reality_id)
            }
            LedgerError::BadFilter { detail } => {
                write!(f, "invalid output filter: {}", detail)
            }
            LedgerError::StorageFault { message } => {
                write!(f, "keyspace failure: {}", message)
            }
        }
    }
}

impl std::error::Error for LedgerError {}

impl From<KvStoreError> for LedgerError {
    fn from(err: KvStoreError) -> Self {
        LedgerError::StorageFault {
            message: err.to_string(),
        }
    }
}

/// Key-value backing store errors.
#[derive(Debug, Clone, Error)]
pub enum KvStoreError {
    /// I/O error during read/write.
    #[error("key-value store I/O error: {message}")]
    Io { message: String },

    /// Stored bytes do not match the record layout.
    #[error("key-value store corruption: {message}")]
    Corruption { message: String },
}

impl KvStoreError {
    pub fn corruption(message: impl Into<String>) -> Self {
        KvStoreError::Corruption {
            message: message.into(),
        }
    }
}
