//! Ports of the ledger-state crate: the driving API it exposes and the
//! driven storage interface it requires from the host.

pub mod inbound;
pub mod outbound;

pub use inbound::LedgerStateApi;
pub use outbound::KeyValueStore;
