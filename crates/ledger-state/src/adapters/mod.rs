//! Adapters implementing the ledger's driven ports.

pub mod memory;

pub use memory::InMemoryKvStore;
