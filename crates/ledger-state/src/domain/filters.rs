//! # Output Query Filters
//!
//! Filters accepted by `for_each_transfer_output` and their compilation
//! into keyspace access plans.
//!
//! Compilation rules:
//!
//! 1. Any reality filter present → iterate the bookings keyspace over the
//!    ordered prefixes `reality [‖ address [‖ spent]]`, enumerated over the
//!    cross product of the provided realities × addresses × optional spent
//!    state; each booking hit resolves its output.
//! 2. Else any transfer filter present → scan the outputs keyspace matched
//!    on the transfer (and address) key segments, since outputs are keyed
//!    reality-first and no prefix exists for a transfer alone.
//! 3. Else → full scan of the outputs keyspace.
//!
//! A spent filter without a reality filter cannot be compiled: the spend
//! state of an output only exists relative to a reality.

use serde::{Deserialize, Serialize};
use shared_types::{AddressHash, RealityId, TransferHash, ID_LENGTH};

use crate::domain::errors::LedgerError;

/// Spend-state restriction for booking lookups.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpentIndicator {
    Unspent,
    Spent,
}

impl SpentIndicator {
    /// The byte this state occupies in a booking key.
    pub fn as_byte(self) -> u8 {
        match self {
            SpentIndicator::Unspent => 0,
            SpentIndicator::Spent => 1,
        }
    }
}

/// One restriction on the streamed output set.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputFilter {
    /// Restrict to outputs of this reality.
    Reality(RealityId),
    /// Restrict to outputs held at this address.
    Address(AddressHash),
    /// Restrict to outputs created by this transfer.
    Transfer(TransferHash),
    /// Restrict by spend state; only meaningful with a reality filter.
    Spent(SpentIndicator),
}

/// Compiled access plan for a filter list.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum FilterPlan {
    /// Iterate the bookings keyspace over these prefixes, in order.
    BookingPrefixes(Vec<Vec<u8>>),
    /// Scan the outputs keyspace, matching on key segments.
    OutputScan {
        transfers: Vec<TransferHash>,
        addresses: Vec<AddressHash>,
    },
    /// Deliver every output.
    FullScan,
}

pub(crate) fn compile_filters(filters: &[OutputFilter]) -> Result<FilterPlan, LedgerError> {
    let mut realities: Vec<RealityId> = Vec::new();
    let mut addresses: Vec<AddressHash> = Vec::new();
    let mut transfers: Vec<TransferHash> = Vec::new();
    let mut filter_spent = false;
    let mut filter_unspent = false;

    for filter in filters {
        match filter {
            OutputFilter::Reality(reality_id) => realities.push(*reality_id),
            OutputFilter::Address(address_hash) => addresses.push(*address_hash),
            OutputFilter::Transfer(transfer_hash) => transfers.push(*transfer_hash),
            OutputFilter::Spent(SpentIndicator::Spent) => filter_spent = true,
            OutputFilter::Spent(SpentIndicator::Unspent) => filter_unspent = true,
        }
    }

    if (filter_spent || filter_unspent) && realities.is_empty() {
        return Err(LedgerError::BadFilter {
            detail: "a spent filter is only meaningful together with a reality filter",
        });
    }

    if !realities.is_empty() {
        // TODO: also narrow booking prefixes by the transfer filter once the
        // booking key carries the transfer at a filterable position.
        let mut prefixes = Vec::new();
        for reality_id in &realities {
            if addresses.is_empty() {
                prefixes.push(reality_id.as_bytes().to_vec());
                continue;
            }
            for address_hash in &addresses {
                let mut prefix = Vec::with_capacity(2 * ID_LENGTH + 1);
                prefix.extend_from_slice(reality_id.as_bytes());
                prefix.extend_from_slice(address_hash.as_bytes());
                // Contradictory spent + unspent filters cancel out and the
                // prefix stops at the address.
                if filter_spent != filter_unspent {
                    prefix.push(if filter_spent {
                        SpentIndicator::Spent.as_byte()
                    } else {
                        SpentIndicator::Unspent.as_byte()
                    });
                }
                prefixes.push(prefix);
            }
        }
        return Ok(FilterPlan::BookingPrefixes(prefixes));
    }

    if !transfers.is_empty() {
        return Ok(FilterPlan::OutputScan {
            transfers,
            addresses,
        });
    }

    Ok(FilterPlan::FullScan)
}
