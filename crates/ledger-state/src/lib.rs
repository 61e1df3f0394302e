//! # ledger-state
//!
//! Multi-reality UTXO ledger core of the Meshledger node.
//!
//! The ledger maintains transfer outputs whose existence is conditional on
//! a **reality**: a named branch of history descending from the canonical
//! main reality. A double-spend is not rejected; it forks a new reality in
//! which the conflicting transfer is valid, and both alternatives stay
//! alive and queryable until an external voting mechanism picks a winner.
//!
//! ## Layout
//!
//! - `domain`: records, cached object store, reality graph, booking engine,
//!   query filters.
//! - `ports`: the driving [`ports::LedgerStateApi`] and the driven
//!   [`ports::KeyValueStore`] backing-store interface.
//! - `adapters`: in-memory backing store for tests.
//! - `events`: events raised towards collaborators.
//!
//! ## Out of scope
//!
//! Gossip transport, HTTP endpoints, plugin wiring, and reality resolution:
//! picking a winning reality is an input to the core (`confirm_reality`),
//! not its responsibility.

pub mod adapters;
pub mod domain;
pub mod events;
pub mod ports;

pub use adapters::InMemoryKvStore;
pub use domain::*;
pub use events::{CollectingSink, EventSink, LedgerEvent};
pub use ports::{KeyValueStore, LedgerStateApi};
