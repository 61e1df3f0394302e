//! # Ledger Flow Scenarios
//!
//! End-to-end walks through the ledger: every scenario starts from a fresh
//! ledger over the in-memory backing store and drives it exclusively
//! through the public API.

use std::sync::Arc;

use ledger_state::{
    CacheStats, CollectingSink, InMemoryKvStore, LedgerConfig, LedgerError, LedgerEvent,
    LedgerState, LedgerStateApi, OutputFilter, SpentIndicator, Transfer, TransferOutputReference,
};
use shared_types::{
    blake2b256, AddressHash, ColoredBalance, RealityId, TransferHash, COLOR_IOTA,
    MAIN_REALITY_ID,
};

/// Fresh ledger over an in-memory backing store.
pub fn make_ledger() -> LedgerState {
    LedgerState::new(LedgerConfig::default(), InMemoryKvStore::new())
        .expect("ledger initialization")
}

pub fn iota(value: u64) -> Vec<ColoredBalance> {
    vec![ColoredBalance::new(COLOR_IOTA, value)]
}

pub fn reference(transfer: &str, address: &str) -> TransferOutputReference {
    TransferOutputReference::new(
        TransferHash::from_tag(transfer),
        AddressHash::from_tag(address),
    )
}

/// Collects `(reality, transfer, address)` triples matching the filters.
pub fn collect_outputs(
    ledger: &LedgerState,
    filters: &[OutputFilter],
) -> Vec<(RealityId, TransferHash, AddressHash)> {
    let mut seen = Vec::new();
    ledger
        .for_each_transfer_output(
            &mut |handle| {
                if let Some(output) = handle.get() {
                    seen.push((
                        output.reality_id(),
                        output.transfer_hash(),
                        output.address_hash(),
                    ));
                }
                true
            },
            filters,
        )
        .expect("output query");
    seen
}

#[cfg(test)]
mod tests {
    use super::*;
    use fpc_payload::{Payload, MARSHALED_LENGTH, NONCE_SIZE};

    #[test]
    fn test_main_reality_spend_end_to_end() {
        let ledger = make_ledger();
        ledger
            .add_transfer_output(
                TransferHash::from_tag("T1"),
                AddressHash::from_tag("A1"),
                iota(100),
            )
            .unwrap();

        let transfer = Transfer::new(TransferHash::from_tag("T2"))
            .add_input(reference("T1", "A1"))
            .add_output(AddressHash::from_tag("A2"), iota(100));
        ledger.book_transfer(&transfer).unwrap();

        // The new output lives on main.
        let created = ledger
            .get_transfer_output(&reference("T2", "A2"))
            .unwrap()
            .expect("booked output");
        let output = created.get().unwrap();
        assert_eq!(output.reality_id(), MAIN_REALITY_ID);
        assert_eq!(output.balances(), &[ColoredBalance::new(COLOR_IOTA, 100)]);

        // The consumed input is discoverable through the spent booking.
        let spent = collect_outputs(
            &ledger,
            &[
                OutputFilter::Reality(MAIN_REALITY_ID),
                OutputFilter::Address(AddressHash::from_tag("A1")),
                OutputFilter::Spent(SpentIndicator::Spent),
            ],
        );
        assert_eq!(
            spent,
            vec![(
                MAIN_REALITY_ID,
                TransferHash::from_tag("T1"),
                AddressHash::from_tag("A1"),
            )]
        );
    }

    #[test]
    fn test_balance_mismatch_is_rejected() {
        let ledger = make_ledger();
        ledger
            .add_transfer_output(
                TransferHash::from_tag("T1"),
                AddressHash::from_tag("A1"),
                iota(100),
            )
            .unwrap();

        let transfer = Transfer::new(TransferHash::from_tag("T3"))
            .add_input(reference("T1", "A1"))
            .add_output(AddressHash::from_tag("A2"), iota(99));
        let err = ledger.book_transfer(&transfer).unwrap_err();
        assert!(matches!(err, LedgerError::BalanceMismatch { .. }));

        // Nothing was materialized for the rejected transfer.
        assert!(ledger
            .get_transfer_output(&reference("T3", "A2"))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_double_spend_branch_keeps_both_views() {
        let ledger = make_ledger();
        let sink = Arc::new(CollectingSink::new());
        ledger.register_sink(sink.clone());

        ledger
            .add_transfer_output(
                TransferHash::from_tag("T1"),
                AddressHash::from_tag("A1"),
                iota(100),
            )
            .unwrap();

        let first = Transfer::new(TransferHash::from_tag("T2"))
            .add_input(reference("T1", "A1"))
            .add_output(AddressHash::from_tag("A2"), iota(100));
        ledger.book_transfer(&first).unwrap();

        let second = Transfer::new(TransferHash::from_tag("T4"))
            .add_input(reference("T1", "A1"))
            .add_output(AddressHash::from_tag("A3"), iota(100));
        ledger.book_transfer(&second).unwrap();

        // The conflict forked a branch: id = transfer hash, parent = main.
        let branch_id = RealityId::new(*TransferHash::from_tag("T4").as_bytes());
        let branch = ledger.get_reality(branch_id).unwrap();
        assert_eq!(branch.get().unwrap().parent_realities(), &[MAIN_REALITY_ID]);

        // Main does not see the branch output.
        let main_view = collect_outputs(&ledger, &[OutputFilter::Reality(MAIN_REALITY_ID)]);
        assert!(!main_view
            .iter()
            .any(|(_, transfer, _)| *transfer == TransferHash::from_tag("T4")));

        // The branch sees its own output plus what main still carries.
        let branch_view = collect_outputs(&ledger, &[OutputFilter::Reality(branch_id)]);
        assert!(branch_view.iter().any(|(reality, transfer, _)| {
            *reality == branch_id && *transfer == TransferHash::from_tag("T4")
        }));
        assert!(branch_view.iter().any(|(reality, transfer, _)| {
            *reality == MAIN_REALITY_ID && *transfer == TransferHash::from_tag("T2")
        }));

        // The displaced consumer was queued for elevation into a sibling.
        let pending = ledger.take_pending_elevations();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].consumer, TransferHash::from_tag("T2"));
        assert_eq!(pending[0].sibling_reality, branch_id);
        assert_eq!(
            pending[0].conflict_id,
            reference("T1", "A1").conflict_id()
        );

        // Both bookings were announced.
        let booked: Vec<_> = sink
            .events()
            .into_iter()
            .filter(|event| matches!(event, LedgerEvent::ValueTransactionReceived { .. }))
            .collect();
        assert_eq!(booked.len(), 2);
    }

    #[test]
    fn test_aggregated_reality_id_is_permutation_stable() {
        let ledger = make_ledger();
        let ra = RealityId::from_tag("RA");
        let rb = RealityId::from_tag("RB");
        ledger.create_reality(ra, vec![]).unwrap();
        ledger.create_reality(rb, vec![]).unwrap();

        let ab = ledger.merge_realities(&[ra, rb]).unwrap();
        let ba = ledger.merge_realities(&[rb, ra]).unwrap();
        assert_eq!(ab.get().unwrap().id(), ba.get().unwrap().id());

        let mut sorted = [ra, rb];
        sorted.sort();
        let mut preimage = Vec::new();
        preimage.extend_from_slice(sorted[0].as_bytes());
        preimage.extend_from_slice(sorted[1].as_bytes());
        assert_eq!(ab.get().unwrap().id().as_bytes(), &blake2b256(&preimage));
    }

    #[test]
    fn test_merge_prefers_descendant_over_ancestor() {
        let ledger = make_ledger();
        let ra = RealityId::from_tag("RA");
        let rc = RealityId::from_tag("RC");
        ledger.create_reality(ra, vec![]).unwrap();
        ledger.create_reality(rc, vec![ra]).unwrap();

        let merged = ledger.merge_realities(&[ra, rc]).unwrap();
        assert_eq!(merged.get().unwrap().id(), rc);

        let merged = ledger.merge_realities(&[MAIN_REALITY_ID, rc]).unwrap();
        assert_eq!(merged.get().unwrap().id(), rc);
    }

    #[test]
    fn test_payload_identity_and_wire_format() {
        let payload = Payload::new(1, [0u8; NONCE_SIZE]);

        // id = blake2b256(nonce ‖ like_le32)
        let mut preimage = [0u8; NONCE_SIZE + 4];
        preimage[NONCE_SIZE..].copy_from_slice(&1u32.to_le_bytes());
        assert_eq!(payload.id().as_bytes(), &blake2b256(&preimage));

        // 8F 2A 00 00 | 24 00 00 00 | 32·00 | 01 00 00 00
        let bytes = payload.to_bytes();
        assert_eq!(bytes.len(), MARSHALED_LENGTH);
        let mut expected = vec![0x8F, 0x2A, 0x00, 0x00, 0x24, 0x00, 0x00, 0x00];
        expected.extend_from_slice(&[0u8; NONCE_SIZE]);
        expected.extend_from_slice(&[0x01, 0x00, 0x00, 0x00]);
        assert_eq!(bytes.as_ref(), expected.as_slice());
    }

    #[test]
    fn test_handles_release_and_cache_drains() {
        let ledger = make_ledger();
        ledger
            .add_transfer_output(
                TransferHash::from_tag("T1"),
                AddressHash::from_tag("A1"),
                iota(100),
            )
            .unwrap();

        let retained = ledger
            .get_transfer_output(&reference("T1", "A1"))
            .unwrap()
            .expect("seeded output");
        assert_eq!(
            ledger.cache_stats(),
            CacheStats {
                outputs: 1,
                bookings: 0,
                realities: 0,
            }
        );

        drop(retained);
        assert_eq!(ledger.cache_stats(), CacheStats::default());
    }

    #[test]
    fn test_prune_drops_state_and_recreates_main() {
        let ledger = make_ledger();
        ledger
            .add_transfer_output(
                TransferHash::from_tag("T1"),
                AddressHash::from_tag("A1"),
                iota(100),
            )
            .unwrap();
        let transfer = Transfer::new(TransferHash::from_tag("T2"))
            .add_input(reference("T1", "A1"))
            .add_output(AddressHash::from_tag("A2"), iota(100));
        ledger.book_transfer(&transfer).unwrap();

        ledger.prune().unwrap();

        assert!(collect_outputs(&ledger, &[]).is_empty());
        assert!(ledger.get_reality(MAIN_REALITY_ID).unwrap().exists());

        // The pruned ledger accepts new bookings from scratch.
        ledger
            .add_transfer_output(
                TransferHash::from_tag("T1"),
                AddressHash::from_tag("A1"),
                iota(50),
            )
            .unwrap();
        let transfer = Transfer::new(TransferHash::from_tag("T2"))
            .add_input(reference("T1", "A1"))
            .add_output(AddressHash::from_tag("A2"), iota(50));
        ledger.book_transfer(&transfer).unwrap();
    }

    #[test]
    fn test_spending_already_spent_output_conflicts_again() {
        let ledger = make_ledger();
        ledger
            .add_transfer_output(
                TransferHash::from_tag("T1"),
                AddressHash::from_tag("A1"),
                iota(100),
            )
            .unwrap();

        for hash in ["T2", "T4", "T5"] {
            let transfer = Transfer::new(TransferHash::from_tag(hash))
                .add_input(reference("T1", "A1"))
                .add_output(AddressHash::from_tag("A2"), iota(100));
            ledger.book_transfer(&transfer).unwrap();
        }

        // Every conflicting spend after the first forked its own branch.
        for hash in ["T4", "T5"] {
            let branch_id = RealityId::new(*TransferHash::from_tag(hash).as_bytes());
            assert!(ledger.get_reality(branch_id).unwrap().exists());
        }

        // The first consumer keeps accumulating elevation requirements.
        let pending = ledger.take_pending_elevations();
        assert_eq!(pending.len(), 3);
    }

    #[test]
    fn test_confirmed_event_reaches_subscribers() {
        let ledger = make_ledger();
        let sink = Arc::new(CollectingSink::new());
        ledger.register_sink(sink.clone());

        ledger
            .add_transfer_output(
                TransferHash::from_tag("T1"),
                AddressHash::from_tag("A1"),
                iota(100),
            )
            .unwrap();
        for (hash, address) in [("T2", "A2"), ("T4", "A3")] {
            let transfer = Transfer::new(TransferHash::from_tag(hash))
                .add_input(reference("T1", "A1"))
                .add_output(AddressHash::from_tag(address), iota(100));
            ledger.book_transfer(&transfer).unwrap();
        }

        let branch_id = RealityId::new(*TransferHash::from_tag("T4").as_bytes());
        ledger.confirm_reality(branch_id).unwrap();

        assert!(sink.events().iter().any(|event| matches!(
            event,
            LedgerEvent::Confirmed { reality_id } if *reality_id == branch_id
        )));
    }
}
