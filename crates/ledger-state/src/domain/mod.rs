//! Domain layer of the ledger: records, the cached object store, the
//! reality graph with the booking engine, and query filter compilation.

pub mod entities;
pub mod errors;
pub mod filters;
pub mod ledger;
pub mod object_store;

pub use entities::{
    Reality, Transfer, TransferOutput, TransferOutputBooking, TransferOutputReference,
    BOOKING_KEY_LENGTH, OUTPUT_KEY_LENGTH,
};
pub use errors::{KvStoreError, LedgerError};
pub use filters::{OutputFilter, SpentIndicator};
pub use ledger::{CacheStats, LedgerConfig, LedgerState, PendingElevation};
pub use object_store::{shared_backing, CachedHandle, ObjectStore, SharedKv, StorableObject};
