//! # Inbound Ports (Driving Ports)
//!
//! The public API the ledger exposes to collaborators (gossip, HTTP
//! endpoints, the faucet, CLI pruning). Their whole contract with the core
//! is: submit a transfer, read outputs, subscribe to events.

use shared_types::{AddressHash, ColoredBalance, RealityId, TransferHash};

use crate::domain::entities::{Transfer, TransferOutput};
use crate::domain::errors::LedgerError;
use crate::domain::filters::OutputFilter;
use crate::domain::object_store::CachedHandle;

/// Primary API of the ledger core.
pub trait LedgerStateApi {
    /// Mints an output on the main reality. This is the faucet path used to
    /// seed balances; regular value movement goes through [`Self::book_transfer`].
    fn add_transfer_output(
        &self,
        transfer_hash: TransferHash,
        address_hash: AddressHash,
        balances: Vec<ColoredBalance>,
    ) -> Result<(), LedgerError>;

    /// Books a transfer: resolves its inputs, checks balance conservation,
    /// registers consumers, and materializes the outputs, forking a new
    /// reality when the transfer double-spends.
    fn book_transfer(&self, transfer: &Transfer) -> Result<(), LedgerError>;

    /// Streams transfer outputs matching the filter list, in key order per
    /// compiled prefix. The callback returns whether to continue.
    fn for_each_transfer_output(
        &self,
        callback: &mut dyn FnMut(CachedHandle<TransferOutput>) -> bool,
        filters: &[OutputFilter],
    ) -> Result<(), LedgerError>;

    /// External-oracle input: a reality has been declared winning.
    fn confirm_reality(&self, reality_id: RealityId) -> Result<(), LedgerError>;

    /// Drops all stored state and re-creates the main reality.
    fn prune(&self) -> Result<(), LedgerError>;
}
