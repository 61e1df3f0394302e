//! # Ledger Records
//!
//! The three persisted record types of the ledger (transfer outputs, their
//! secondary-index bookings, and realities) plus the transient transfer
//! submitted for booking.
//!
//! Every record serializes deterministically; the storage key carries the
//! identifying fields and the value carries the rest. Key layouts:
//!
//! - outputs:   `reality(32) ‖ transfer(32) ‖ address(32)`
//! - bookings:  `reality(32) ‖ address(32) ‖ spent(1) ‖ transfer(32)`
//! - realities: `reality(32)`
//!
//! The booking key order is chosen so that any prefix
//! `reality ‖ address ‖ spent` yields an ordered range.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use shared_types::{
    AddressHash, ColoredBalance, ConflictId, RealityId, TransferHash, ID_LENGTH, MAIN_REALITY_ID,
};

use crate::domain::errors::KvStoreError;
use crate::domain::object_store::StorableObject;

/// Width of a transfer output storage key.
pub const OUTPUT_KEY_LENGTH: usize = 3 * ID_LENGTH;

/// Width of a booking storage key.
pub const BOOKING_KEY_LENGTH: usize = 3 * ID_LENGTH + 1;

/// Cursor over a marshaled record value.
struct ValueReader<'a> {
    data: &'a [u8],
}

impl<'a> ValueReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    fn read_bytes(&mut self, len: usize, what: &str) -> Result<&'a [u8], KvStoreError> {
        if self.data.len() < len {
            return Err(KvStoreError::corruption(format!(
                "truncated {}: need {} bytes, found {}",
                what,
                len,
                self.data.len()
            )));
        }
        let (head, rest) = self.data.split_at(len);
        self.data = rest;
        Ok(head)
    }

    fn read_u32_le(&mut self, what: &str) -> Result<u32, KvStoreError> {
        let bytes = self.read_bytes(4, what)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }
}

// =============================================================================
// TRANSFER OUTPUT
// =============================================================================

/// A UTXO: value held at an address, conditional on a reality.
///
/// Outputs are value-immutable once booked; only the consumer list grows,
/// when later transfers spend the output. Removal happens only through
/// pruning.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransferOutput {
    reality_id: RealityId,
    transfer_hash: TransferHash,
    address_hash: AddressHash,
    balances: Vec<ColoredBalance>,
    consumers: Vec<TransferHash>,
}

impl TransferOutput {
    pub fn new(
        reality_id: RealityId,
        transfer_hash: TransferHash,
        address_hash: AddressHash,
        balances: Vec<ColoredBalance>,
    ) -> Self {
        Self {
            reality_id,
            transfer_hash,
            address_hash,
            balances,
            consumers: Vec::new(),
        }
    }

    pub fn reality_id(&self) -> RealityId {
        self.reality_id
    }

    pub fn transfer_hash(&self) -> TransferHash {
        self.transfer_hash
    }

    pub fn address_hash(&self) -> AddressHash {
        self.address_hash
    }

    pub fn balances(&self) -> &[ColoredBalance] {
        &self.balances
    }

    pub fn consumers(&self) -> &[TransferHash] {
        &self.consumers
    }

    pub fn is_spent(&self) -> bool {
        !self.consumers.is_empty()
    }

    /// Registers `consumer` as a spender of this output.
    ///
    /// Returns the previously registered consumers when the spend is
    /// conflicting, i.e. the output already had at least one consumer.
    pub fn register_consumer(&mut self, consumer: TransferHash) -> Option<Vec<TransferHash>> {
        let prior = if self.consumers.is_empty() {
            None
        } else {
            Some(self.consumers.clone())
        };
        if !self.consumers.contains(&consumer) {
            self.consumers.push(consumer);
        }
        prior
    }

    /// Builds the storage key of the output identified by the triple.
    pub fn key_for(
        reality_id: &RealityId,
        transfer_hash: &TransferHash,
        address_hash: &AddressHash,
    ) -> Vec<u8> {
        let mut key = Vec::with_capacity(OUTPUT_KEY_LENGTH);
        key.extend_from_slice(reality_id.as_bytes());
        key.extend_from_slice(transfer_hash.as_bytes());
        key.extend_from_slice(address_hash.as_bytes());
        key
    }
}

impl StorableObject for TransferOutput {
    fn storage_key(&self) -> Vec<u8> {
        Self::key_for(&self.reality_id, &self.transfer_hash, &self.address_hash)
    }

    fn marshal_value(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(
            8 + self.balances.len() * ColoredBalance::MARSHALED_LENGTH
                + self.consumers.len() * ID_LENGTH,
        );
        out.extend_from_slice(&(self.balances.len() as u32).to_le_bytes());
        for balance in &self.balances {
            balance.marshal_into(&mut out);
        }
        out.extend_from_slice(&(self.consumers.len() as u32).to_le_bytes());
        for consumer in &self.consumers {
            out.extend_from_slice(consumer.as_bytes());
        }
        out
    }

    fn unmarshal(key: &[u8], value: &[u8]) -> Result<Self, KvStoreError> {
        if key.len() != OUTPUT_KEY_LENGTH {
            return Err(KvStoreError::corruption(format!(
                "transfer output key has {} bytes, expected {}",
                key.len(),
                OUTPUT_KEY_LENGTH
            )));
        }
        let reality_id = RealityId::from_slice(&key[..ID_LENGTH])
            .map_err(|e| KvStoreError::corruption(e.to_string()))?;
        let transfer_hash = TransferHash::from_slice(&key[ID_LENGTH..2 * ID_LENGTH])
            .map_err(|e| KvStoreError::corruption(e.to_string()))?;
        let address_hash = AddressHash::from_slice(&key[2 * ID_LENGTH..])
            .map_err(|e| KvStoreError::corruption(e.to_string()))?;

        let mut reader = ValueReader::new(value);
        let balance_count = reader.read_u32_le("balance count")? as usize;
        let mut balances = Vec::with_capacity(balance_count);
        for _ in 0..balance_count {
            let bytes = reader.read_bytes(ColoredBalance::MARSHALED_LENGTH, "colored balance")?;
            balances
                .push(ColoredBalance::unmarshal(bytes).map_err(|e| {
                    KvStoreError::corruption(e.to_string())
                })?);
        }
        let consumer_count = reader.read_u32_le("consumer count")? as usize;
        let mut consumers = Vec::with_capacity(consumer_count);
        for _ in 0..consumer_count {
            let bytes = reader.read_bytes(ID_LENGTH, "consumer hash")?;
            consumers.push(
                TransferHash::from_slice(bytes)
                    .map_err(|e| KvStoreError::corruption(e.to_string()))?,
            );
        }

        Ok(Self {
            reality_id,
            transfer_hash,
            address_hash,
            balances,
            consumers,
        })
    }
}

// =============================================================================
// TRANSFER OUTPUT BOOKING
// =============================================================================

/// Secondary-index record making outputs discoverable by
/// `(reality, address, spent)` prefix. The key carries all information; the
/// value is empty.
///
/// An output owns two bookings over its lifetime: `spent = false` written at
/// creation and a sibling `spent = true` written when it is consumed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransferOutputBooking {
    reality_id: RealityId,
    address_hash: AddressHash,
    spent: bool,
    transfer_hash: TransferHash,
}

impl TransferOutputBooking {
    pub fn new(
        reality_id: RealityId,
        address_hash: AddressHash,
        spent: bool,
        transfer_hash: TransferHash,
    ) -> Self {
        Self {
            reality_id,
            address_hash,
            spent,
            transfer_hash,
        }
    }

    pub fn reality_id(&self) -> RealityId {
        self.reality_id
    }

    pub fn address_hash(&self) -> AddressHash {
        self.address_hash
    }

    pub fn is_spent(&self) -> bool {
        self.spent
    }

    pub fn transfer_hash(&self) -> TransferHash {
        self.transfer_hash
    }
}

impl StorableObject for TransferOutputBooking {
    fn storage_key(&self) -> Vec<u8> {
        let mut key = Vec::with_capacity(BOOKING_KEY_LENGTH);
        key.extend_from_slice(self.reality_id.as_bytes());
        key.extend_from_slice(self.address_hash.as_bytes());
        key.push(u8::from(self.spent));
        key.extend_from_slice(self.transfer_hash.as_bytes());
        key
    }

    fn marshal_value(&self) -> Vec<u8> {
        Vec::new()
    }

    fn unmarshal(key: &[u8], _value: &[u8]) -> Result<Self, KvStoreError> {
        if key.len() != BOOKING_KEY_LENGTH {
            return Err(KvStoreError::corruption(format!(
                "booking key has {} bytes, expected {}",
                key.len(),
                BOOKING_KEY_LENGTH
            )));
        }
        let reality_id = RealityId::from_slice(&key[..ID_LENGTH])
            .map_err(|e| KvStoreError::corruption(e.to_string()))?;
        let address_hash = AddressHash::from_slice(&key[ID_LENGTH..2 * ID_LENGTH])
            .map_err(|e| KvStoreError::corruption(e.to_string()))?;
        let spent = match key[2 * ID_LENGTH] {
            0 => false,
            1 => true,
            other => {
                return Err(KvStoreError::corruption(format!(
                    "booking spent byte is {}, expected 0 or 1",
                    other
                )))
            }
        };
        let transfer_hash = TransferHash::from_slice(&key[2 * ID_LENGTH + 1..])
            .map_err(|e| KvStoreError::corruption(e.to_string()))?;

        Ok(Self {
            reality_id,
            address_hash,
            spent,
            transfer_hash,
        })
    }
}

// =============================================================================
// REALITY
// =============================================================================

/// A node of the reality graph: a named branch of ledger history with the
/// set of realities it refines as parents.
///
/// The root reality has an empty parent set. Parent edges are fixed at
/// creation and always point at previously created realities, so the graph
/// is acyclic by construction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Reality {
    id: RealityId,
    parent_realities: Vec<RealityId>,
}

impl Reality {
    pub fn new(id: RealityId, parent_realities: Vec<RealityId>) -> Self {
        Self {
            id,
            parent_realities,
        }
    }

    /// The canonical root reality.
    pub fn main() -> Self {
        Self::new(MAIN_REALITY_ID, Vec::new())
    }

    pub fn id(&self) -> RealityId {
        self.id
    }

    pub fn parent_realities(&self) -> &[RealityId] {
        &self.parent_realities
    }

    /// Whether this reality represents the conjunction of several branches.
    pub fn is_aggregated(&self) -> bool {
        self.parent_realities.len() > 1
    }
}

impl StorableObject for Reality {
    fn storage_key(&self) -> Vec<u8> {
        self.id.as_bytes().to_vec()
    }

    fn marshal_value(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(4 + self.parent_realities.len() * ID_LENGTH);
        out.extend_from_slice(&(self.parent_realities.len() as u32).to_le_bytes());
        for parent in &self.parent_realities {
            out.extend_from_slice(parent.as_bytes());
        }
        out
    }

    fn unmarshal(key: &[u8], value: &[u8]) -> Result<Self, KvStoreError> {
        let id =
            RealityId::from_slice(key).map_err(|e| KvStoreError::corruption(e.to_string()))?;

        let mut reader = ValueReader::new(value);
        let parent_count = reader.read_u32_le("parent count")? as usize;
        let mut parent_realities = Vec::with_capacity(parent_count);
        for _ in 0..parent_count {
            let bytes = reader.read_bytes(ID_LENGTH, "parent reality id")?;
            parent_realities.push(
                RealityId::from_slice(bytes)
                    .map_err(|e| KvStoreError::corruption(e.to_string()))?,
            );
        }

        Ok(Self {
            id,
            parent_realities,
        })
    }
}

// =============================================================================
// TRANSFER
// =============================================================================

/// Pointer to a transfer output: the `(transfer, address)` pair under which
/// it was created.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TransferOutputReference {
    transfer_hash: TransferHash,
    address_hash: AddressHash,
}

impl TransferOutputReference {
    pub fn new(transfer_hash: TransferHash, address_hash: AddressHash) -> Self {
        Self {
            transfer_hash,
            address_hash,
        }
    }

    pub fn transfer_hash(&self) -> TransferHash {
        self.transfer_hash
    }

    pub fn address_hash(&self) -> AddressHash {
        self.address_hash
    }

    /// Identifier of the conflict set that forms when this output is
    /// double-spent.
    pub fn conflict_id(&self) -> ConflictId {
        ConflictId::from_output_reference(&self.transfer_hash, &self.address_hash)
    }
}

impl fmt::Display for TransferOutputReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.transfer_hash, self.address_hash)
    }
}

/// A transfer submitted for booking: consumed output references and the
/// balances to materialize per target address.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Transfer {
    hash: TransferHash,
    inputs: Vec<TransferOutputReference>,
    outputs: BTreeMap<AddressHash, Vec<ColoredBalance>>,
}

impl Transfer {
    pub fn new(hash: TransferHash) -> Self {
        Self {
            hash,
            inputs: Vec::new(),
            outputs: BTreeMap::new(),
        }
    }

    pub fn add_input(mut self, input: TransferOutputReference) -> Self {
        self.inputs.push(input);
        self
    }

    pub fn add_output(mut self, address_hash: AddressHash, balances: Vec<ColoredBalance>) -> Self {
        self.outputs.entry(address_hash).or_default().extend(balances);
        self
    }

    pub fn hash(&self) -> TransferHash {
        self.hash
    }

    pub fn inputs(&self) -> &[TransferOutputReference] {
        &self.inputs
    }

    pub fn outputs(&self) -> &BTreeMap<AddressHash, Vec<ColoredBalance>> {
        &self.outputs
    }
}
