//! # Ledger State
//!
//! The aggregate tying the three cached keyspaces together: the reality
//! graph, the transfer booking engine, and the output query layer.
//!
//! ## Booking flow
//!
//! `book_transfer` resolves every input, merges the input realities into a
//! target reality, checks per-color balance conservation, registers the
//! transfer as consumer of each input, and materializes the outputs. A
//! double-spend does not reject the transfer; it forks a new reality (id =
//! transfer hash, parent = target reality) in which the transfer is valid,
//! and both alternatives stay alive until the external voting mechanism
//! selects one.
//!
//! ## Invariants
//!
//! - Every spent booking has a matching stored output.
//! - Every parent referenced by a stored reality is stored; a missing
//!   parent indicates corruption and aborts the process.
//! - Merging realities is order-invariant: the aggregated id is the
//!   blake2b-256 of the byte-lexicographically sorted surviving ids.
//! - Input handles stay retained until consumer registration has committed,
//!   so a racing booker of the same input observes the conflict.

use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use shared_types::{
    blake2b256, AddressHash, Color, ColoredBalance, ConflictId, RealityId, TransferHash,
    COLOR_NEW, ID_LENGTH, MAIN_REALITY_ID,
};
use tracing::{info, warn};

use crate::domain::entities::{
    Reality, Transfer, TransferOutput, TransferOutputBooking, TransferOutputReference,
    OUTPUT_KEY_LENGTH,
};
use crate::domain::errors::LedgerError;
use crate::domain::filters::{compile_filters, FilterPlan, OutputFilter};
use crate::domain::object_store::{shared_backing, CachedHandle, ObjectStore};
use crate::events::{EventSink, LedgerEvent};
use crate::ports::inbound::LedgerStateApi;
use crate::ports::outbound::KeyValueStore;

/// Configuration of a ledger instance.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// Namespace prefix under which the three keyspaces live in the backing
    /// store, so several ledgers can share one database.
    pub storage_id: String,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            storage_id: "ledger".to_string(),
        }
    }
}

/// Requirement recorded when a conflicting spend displaces an earlier
/// consumer: the prior consumer must be elevated into a sibling branch of
/// `sibling_reality`. The elevation walk itself is performed by an external
/// resolver; until it runs, later consumers of the displaced transfer must
/// re-book.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingElevation {
    pub conflict_id: ConflictId,
    pub consumer: TransferHash,
    pub sibling_reality: RealityId,
}

/// Cache residency of the three keyspaces, for leak diagnostics. Handles
/// release their slot on drop, so a quiescent ledger reports all zeroes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub outputs: usize,
    pub bookings: usize,
    pub realities: usize,
}

/// A resolved booking input: the reference, the retained handle, and the
/// record snapshot taken at resolution time.
struct BookingInput {
    reference: TransferOutputReference,
    handle: CachedHandle<TransferOutput>,
    record: Arc<TransferOutput>,
}

/// The multi-reality UTXO ledger.
pub struct LedgerState {
    transfer_outputs: ObjectStore<TransferOutput>,
    transfer_output_bookings: ObjectStore<TransferOutputBooking>,
    realities: ObjectStore<Reality>,
    pending_elevations: Mutex<Vec<PendingElevation>>,
    sinks: RwLock<Vec<Arc<dyn EventSink>>>,
}

impl LedgerState {
    /// Opens a ledger over `backing` and creates the main reality.
    pub fn new(
        config: LedgerConfig,
        backing: impl KeyValueStore + 'static,
    ) -> Result<Self, LedgerError> {
        let backing = shared_backing(backing);
        let ledger = Self {
            transfer_outputs: ObjectStore::new(
                backing.clone(),
                format!("{}TRANSFER_OUTPUTS", config.storage_id),
            ),
            transfer_output_bookings: ObjectStore::new(
                backing.clone(),
                format!("{}TRANSFER_OUTPUT_BOOKING", config.storage_id),
            ),
            realities: ObjectStore::new(backing, format!("{}REALITIES", config.storage_id)),
            pending_elevations: Mutex::new(Vec::new()),
            sinks: RwLock::new(Vec::new()),
        };
        ledger.realities.store(Reality::main())?;
        Ok(ledger)
    }

    /// Registers a receiver for ledger events.
    pub fn register_sink(&self, sink: Arc<dyn EventSink>) {
        self.sinks.write().push(sink);
    }

    fn emit(&self, event: LedgerEvent) {
        for sink in self.sinks.read().iter() {
            sink.publish(&event);
        }
    }

    /// Drains the elevation requirements recorded by conflicting bookings.
    pub fn take_pending_elevations(&self) -> Vec<PendingElevation> {
        std::mem::take(&mut *self.pending_elevations.lock())
    }

    pub fn cache_stats(&self) -> CacheStats {
        CacheStats {
            outputs: self.transfer_outputs.cached_len(),
            bookings: self.transfer_output_bookings.cached_len(),
            realities: self.realities.cached_len(),
        }
    }

    // =========================================================================
    // REALITY GRAPH
    // =========================================================================

    pub fn get_reality(&self, reality_id: RealityId) -> Result<CachedHandle<Reality>, LedgerError> {
        self.realities.load(reality_id.as_bytes())
    }

    /// Inserts a reality. Without explicit parents the new reality descends
    /// from the main reality; an empty parent set is reserved for the main
    /// reality itself.
    pub fn create_reality(
        &self,
        reality_id: RealityId,
        parent_realities: Vec<RealityId>,
    ) -> Result<CachedHandle<Reality>, LedgerError> {
        let parents = if parent_realities.is_empty() && reality_id != MAIN_REALITY_ID {
            vec![MAIN_REALITY_ID]
        } else {
            parent_realities
        };
        for parent in &parents {
            if !self.get_reality(*parent)?.exists() {
                return Err(LedgerError::UnknownReality {
                    reality_id: *parent,
                });
            }
        }

        let handle = self.realities.store(Reality::new(reality_id, parents.clone()))?;
        self.emit(LedgerEvent::RealityCreated {
            reality_id,
            parent_realities: parents,
        });
        Ok(handle)
    }

    /// Whether `descendant` refines `ancestor`: the reflexive-transitive
    /// closure over parent edges. Terminates because parent edges always
    /// point at previously created realities.
    pub fn descends_from(
        &self,
        descendant: RealityId,
        ancestor: RealityId,
    ) -> Result<bool, LedgerError> {
        if descendant == ancestor {
            return Ok(true);
        }

        let mut visited: HashSet<RealityId> = HashSet::new();
        let mut queue: VecDeque<RealityId> = VecDeque::new();
        {
            let handle = self.get_reality(descendant)?;
            let reality = handle.get().ok_or(LedgerError::UnknownReality {
                reality_id: descendant,
            })?;
            queue.extend(reality.parent_realities().iter().copied());
        }

        while let Some(reality_id) = queue.pop_front() {
            if !visited.insert(reality_id) {
                continue;
            }
            if reality_id == ancestor {
                return Ok(true);
            }
            let handle = self.get_reality(reality_id)?;
            let reality = handle.get().unwrap_or_else(|| {
                panic!("corrupted reality graph: parent reality {} is not stored", reality_id)
            });
            queue.extend(reality.parent_realities().iter().copied());
        }
        Ok(false)
    }

    /// Returns a handle representing the conjunction of `reality_ids`.
    ///
    /// Inputs that descend from other inputs are dropped (the more
    /// specialized reality wins). When several independent realities
    /// survive the reduction, a new aggregated reality is prepared, not
    /// stored, whose id is the blake2b-256 of the sorted surviving ids,
    /// making aggregation order-invariant.
    pub fn merge_realities(
        &self,
        reality_ids: &[RealityId],
    ) -> Result<CachedHandle<Reality>, LedgerError> {
        match reality_ids {
            [] => {
                let handle = self.get_reality(MAIN_REALITY_ID)?;
                if !handle.exists() {
                    return Err(LedgerError::UnknownReality {
                        reality_id: MAIN_REALITY_ID,
                    });
                }
                Ok(handle)
            }
            [single] => {
                let handle = self.get_reality(*single)?;
                if !handle.exists() {
                    return Err(LedgerError::UnknownReality {
                        reality_id: *single,
                    });
                }
                Ok(handle)
            }
            _ => {
                let mut aggregated: Vec<(RealityId, CachedHandle<Reality>)> = Vec::new();

                'candidates: for &reality_id in reality_ids {
                    if aggregated.iter().any(|(kept, _)| *kept == reality_id) {
                        continue;
                    }
                    let candidate = self.get_reality(reality_id)?;
                    if !candidate.exists() {
                        return Err(LedgerError::UnknownReality { reality_id });
                    }

                    let mut replace_at = None;
                    for (index, (kept, _)) in aggregated.iter().enumerate() {
                        // A kept member refining the candidate is the more
                        // specialized of the two; the candidate adds nothing.
                        if self.descends_from(*kept, reality_id)? {
                            continue 'candidates;
                        }
                        if self.descends_from(reality_id, *kept)? {
                            replace_at = Some(index);
                            break;
                        }
                    }
                    match replace_at {
                        Some(index) => aggregated[index] = (reality_id, candidate),
                        None => aggregated.push((reality_id, candidate)),
                    }
                }

                if aggregated.len() == 1 {
                    if let Some((_, handle)) = aggregated.pop() {
                        return Ok(handle);
                    }
                }

                let mut sorted_ids: Vec<RealityId> =
                    aggregated.iter().map(|(kept, _)| *kept).collect();
                sorted_ids.sort();

                let aggregated_id = Self::aggregated_reality_id(&sorted_ids);
                Ok(self
                    .realities
                    .prepare(Reality::new(aggregated_id, sorted_ids)))
            }
        }
    }

    fn aggregated_reality_id(sorted_ids: &[RealityId]) -> RealityId {
        let mut preimage = Vec::with_capacity(sorted_ids.len() * ID_LENGTH);
        for reality_id in sorted_ids {
            preimage.extend_from_slice(reality_id.as_bytes());
        }
        RealityId::new(blake2b256(&preimage))
    }

    /// All realities `reality_id` descends from, itself included.
    fn ancestor_realities(&self, reality_id: RealityId) -> Result<Vec<RealityId>, LedgerError> {
        let mut result = vec![reality_id];
        let mut visited: HashSet<RealityId> = HashSet::from([reality_id]);
        let mut queue: VecDeque<RealityId> = VecDeque::from([reality_id]);

        while let Some(current) = queue.pop_front() {
            let handle = self.get_reality(current)?;
            let reality = match handle.get() {
                Some(reality) => reality,
                None if current == reality_id => {
                    return Err(LedgerError::UnknownReality { reality_id })
                }
                None => panic!(
                    "corrupted reality graph: parent reality {} is not stored",
                    current
                ),
            };
            for parent in reality.parent_realities() {
                if visited.insert(*parent) {
                    result.push(*parent);
                    queue.push_back(*parent);
                }
            }
        }
        Ok(result)
    }

    // =========================================================================
    // OUTPUT RESOLUTION
    // =========================================================================

    /// Looks up the output created under `reference`, across all realities.
    ///
    /// Outputs are keyed reality-first, so a reference lookup matches on the
    /// transfer and address key segments instead of a prefix.
    pub fn get_transfer_output(
        &self,
        reference: &TransferOutputReference,
    ) -> Result<Option<CachedHandle<TransferOutput>>, LedgerError> {
        let mut found: Option<CachedHandle<TransferOutput>> = None;
        self.transfer_outputs.for_each(None, |key, handle| {
            if key.len() == OUTPUT_KEY_LENGTH
                && &key[ID_LENGTH..2 * ID_LENGTH] == reference.transfer_hash().as_bytes()
                && &key[2 * ID_LENGTH..] == reference.address_hash().as_bytes()
            {
                found = Some(handle);
                false
            } else {
                true
            }
        })?;
        Ok(found)
    }

    // =========================================================================
    // BOOKING
    // =========================================================================

    fn resolve_inputs(&self, transfer: &Transfer) -> Result<Vec<BookingInput>, LedgerError> {
        let mut seen: HashSet<TransferOutputReference> = HashSet::new();
        let mut inputs = Vec::with_capacity(transfer.inputs().len());

        for reference in transfer.inputs() {
            // A transfer consuming the same output twice resolves the first
            // occurrence and fails the second, like any other missing input.
            if !seen.insert(*reference) {
                return Err(LedgerError::InputMissing {
                    reference: *reference,
                });
            }
            let handle = self
                .get_transfer_output(reference)?
                .ok_or(LedgerError::InputMissing {
                    reference: *reference,
                })?;
            let record = handle.get().ok_or(LedgerError::InputMissing {
                reference: *reference,
            })?;
            inputs.push(BookingInput {
                reference: *reference,
                handle,
                record,
            });
        }
        Ok(inputs)
    }

    /// Sums input balances by color, subtracts output balances, and demands
    /// a zero residual. `NEW` balances on the input side form a mint budget
    /// that must exactly cover colors absent from the inputs; `NEW` itself
    /// never appears in outputs.
    fn check_transfer_balances(
        inputs: &[BookingInput],
        outputs: &BTreeMap<AddressHash, Vec<ColoredBalance>>,
    ) -> Result<(), LedgerError> {
        let mut totals: BTreeMap<Color, i128> = BTreeMap::new();
        let mut input_colors: BTreeSet<Color> = BTreeSet::new();
        let mut mint_budget: u128 = 0;

        for input in inputs {
            for balance in input.record.balances() {
                if balance.color() == COLOR_NEW {
                    mint_budget += u128::from(balance.value());
                } else {
                    *totals.entry(balance.color()).or_insert(0) += i128::from(balance.value());
                    input_colors.insert(balance.color());
                }
            }
        }

        for balances in outputs.values() {
            let mut colors_in_output: BTreeSet<Color> = BTreeSet::new();
            for balance in balances {
                if balance.color() == COLOR_NEW {
                    return Err(LedgerError::BalanceMismatch {
                        detail: "the NEW color marks minting inputs and never appears in outputs",
                    });
                }
                if !colors_in_output.insert(balance.color()) {
                    return Err(LedgerError::BalanceMismatch {
                        detail: "an output lists the same color twice",
                    });
                }
                *totals.entry(balance.color()).or_insert(0) -= i128::from(balance.value());
            }
        }

        let mut minted: u128 = 0;
        for (color, net) in &totals {
            if *net == 0 {
                continue;
            }
            if *net < 0 && !input_colors.contains(color) {
                minted += net.unsigned_abs();
            } else {
                return Err(LedgerError::BalanceMismatch {
                    detail: "inputs and outputs do not net to zero per color",
                });
            }
        }
        if minted != mint_budget {
            return Err(LedgerError::BalanceMismatch {
                detail: "minted balances do not match the NEW input allowance",
            });
        }
        Ok(())
    }

    fn book_transfer_outputs(
        &self,
        reality_id: RealityId,
        transfer_hash: TransferHash,
        outputs: &BTreeMap<AddressHash, Vec<ColoredBalance>>,
    ) -> Result<(), LedgerError> {
        for (address_hash, balances) in outputs {
            self.transfer_outputs.store(TransferOutput::new(
                reality_id,
                transfer_hash,
                *address_hash,
                balances.clone(),
            ))?;
            self.transfer_output_bookings.store(TransferOutputBooking::new(
                reality_id,
                *address_hash,
                false,
                transfer_hash,
            ))?;
        }
        Ok(())
    }
}

impl LedgerStateApi for LedgerState {
    fn add_transfer_output(
        &self,
        transfer_hash: TransferHash,
        address_hash: AddressHash,
        balances: Vec<ColoredBalance>,
    ) -> Result<(), LedgerError> {
        let mut colors: BTreeSet<Color> = BTreeSet::new();
        for balance in &balances {
            if !colors.insert(balance.color()) {
                return Err(LedgerError::BalanceMismatch {
                    detail: "an output lists the same color twice",
                });
            }
        }

        self.transfer_outputs.store(TransferOutput::new(
            MAIN_REALITY_ID,
            transfer_hash,
            address_hash,
            balances,
        ))?;
        self.transfer_output_bookings.store(TransferOutputBooking::new(
            MAIN_REALITY_ID,
            address_hash,
            false,
            transfer_hash,
        ))?;
        Ok(())
    }

    fn book_transfer(&self, transfer: &Transfer) -> Result<(), LedgerError> {
        if transfer.inputs().is_empty() {
            return Err(LedgerError::BalanceMismatch {
                detail: "a transfer without inputs cannot conserve value",
            });
        }

        // 1. Resolve inputs. The handles stay retained until the end of the
        //    booking so a racing spender of a shared input observes our
        //    consumer registration.
        let inputs = self.resolve_inputs(transfer)?;

        // 2. The target reality is the conjunction of the input realities.
        let input_reality_ids: Vec<RealityId> =
            inputs.iter().map(|input| input.record.reality_id()).collect();
        let target_reality = self.merge_realities(&input_reality_ids)?;
        let target_reality_id = target_reality
            .get()
            .ok_or_else(|| LedgerError::StorageFault {
                message: "target reality vanished during booking".to_string(),
            })?
            .id();

        // 3. Balance conservation per color.
        Self::check_transfer_balances(&inputs, transfer.outputs())?;

        // 4. Every input must be assumed by the target reality.
        for input in &inputs {
            if !self.descends_from(target_reality_id, input.record.reality_id())? {
                return Err(LedgerError::WrongReality {
                    input_reality: input.record.reality_id(),
                    target_reality: target_reality_id,
                });
            }
        }

        // 5. Consume the inputs. Registration happens under the slot write
        //    lock, which serializes racing bookings of the same output.
        let mut conflicts: Vec<(TransferOutputReference, Vec<TransferHash>)> = Vec::new();
        for input in &inputs {
            let prior_consumers = input
                .handle
                .update(|output| output.register_consumer(transfer.hash()))?;
            self.transfer_output_bookings.store(TransferOutputBooking::new(
                input.record.reality_id(),
                input.reference.address_hash(),
                true,
                input.reference.transfer_hash(),
            ))?;
            if let Some(prior_consumers) = prior_consumers {
                conflicts.push((input.reference, prior_consumers));
            }
        }

        // 6/7. Commit the target reality now that the booking can only fail
        //    on storage faults, then branch if any input was conflicting.
        target_reality.commit()?;

        let booking_reality_id = if conflicts.is_empty() {
            target_reality_id
        } else {
            let branch_id = RealityId::new(*transfer.hash().as_bytes());
            let _branch = self.create_reality(branch_id, vec![target_reality_id])?;

            let mut pending = Vec::new();
            for (reference, prior_consumers) in &conflicts {
                for consumer in prior_consumers {
                    if *consumer == transfer.hash() {
                        continue;
                    }
                    warn!(
                        conflict = %reference.conflict_id(),
                        consumer = %consumer,
                        sibling = %branch_id,
                        "conflicting spend; prior consumer awaits elevation into a sibling branch"
                    );
                    pending.push(PendingElevation {
                        conflict_id: reference.conflict_id(),
                        consumer: *consumer,
                        sibling_reality: branch_id,
                    });
                }
            }
            self.pending_elevations.lock().extend(pending);
            branch_id
        };

        self.book_transfer_outputs(booking_reality_id, transfer.hash(), transfer.outputs())?;

        info!(
            transfer = %transfer.hash(),
            reality = %booking_reality_id,
            conflicting = !conflicts.is_empty(),
            "transfer booked"
        );
        self.emit(LedgerEvent::ValueTransactionReceived {
            transfer_hash: transfer.hash(),
            reality_id: booking_reality_id,
        });

        // 8. Input and reality handles release on drop.
        Ok(())
    }

    fn for_each_transfer_output(
        &self,
        callback: &mut dyn FnMut(CachedHandle<TransferOutput>) -> bool,
        filters: &[OutputFilter],
    ) -> Result<(), LedgerError> {
        // A reality filter covers the reality and everything it inherits:
        // expand it to the ancestor set before compiling prefixes.
        let mut expanded: Vec<OutputFilter> = Vec::with_capacity(filters.len());
        for filter in filters {
            match filter {
                OutputFilter::Reality(reality_id) => {
                    for ancestor in self.ancestor_realities(*reality_id)? {
                        expanded.push(OutputFilter::Reality(ancestor));
                    }
                }
                other => expanded.push(*other),
            }
        }

        match compile_filters(&expanded)? {
            FilterPlan::BookingPrefixes(prefixes) => {
                for prefix in prefixes {
                    let mut resolve_error: Option<LedgerError> = None;
                    self.transfer_output_bookings
                        .for_each(Some(&prefix), |_key, booking_handle| {
                            let Some(booking) = booking_handle.get() else {
                                return true;
                            };
                            let output_key = TransferOutput::key_for(
                                &booking.reality_id(),
                                &booking.transfer_hash(),
                                &booking.address_hash(),
                            );
                            match self.transfer_outputs.load(&output_key) {
                                Ok(output_handle) => callback(output_handle),
                                Err(err) => {
                                    resolve_error = Some(err);
                                    false
                                }
                            }
                        })?;
                    if let Some(err) = resolve_error {
                        return Err(err);
                    }
                }
                Ok(())
            }
            FilterPlan::OutputScan {
                transfers,
                addresses,
            } => self.transfer_outputs.for_each(None, |key, handle| {
                if key.len() != OUTPUT_KEY_LENGTH {
                    return true;
                }
                let transfer_segment = &key[ID_LENGTH..2 * ID_LENGTH];
                let address_segment = &key[2 * ID_LENGTH..];
                let matches = transfers
                    .iter()
                    .any(|transfer| transfer_segment == transfer.as_bytes())
                    && (addresses.is_empty()
                        || addresses
                            .iter()
                            .any(|address| address_segment == address.as_bytes()));
                if matches {
                    callback(handle)
                } else {
                    true
                }
            }),
            FilterPlan::FullScan => self
                .transfer_outputs
                .for_each(None, |_key, handle| callback(handle)),
        }
    }

    fn confirm_reality(&self, reality_id: RealityId) -> Result<(), LedgerError> {
        if !self.get_reality(reality_id)?.exists() {
            return Err(LedgerError::UnknownReality { reality_id });
        }
        info!(reality = %reality_id, "reality confirmed by the voting oracle");
        self.emit(LedgerEvent::Confirmed { reality_id });
        Ok(())
    }

    fn prune(&self) -> Result<(), LedgerError> {
        self.transfer_outputs.prune()?;
        self.transfer_output_bookings.prune()?;
        self.realities.prune()?;
        self.pending_elevations.lock().clear();

        self.realities.store(Reality::main())?;
        info!("ledger pruned; main reality re-created");
        Ok(())
    }
}
