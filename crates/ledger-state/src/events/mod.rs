//! Events raised by the ledger core for its collaborators.

pub mod payloads;

pub use payloads::{CollectingSink, EventSink, LedgerEvent};
