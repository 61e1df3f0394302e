//! Property tests for the ledger's marshaling laws and the order
//! invariance of reality aggregation.

use ledger_state::{
    InMemoryKvStore, LedgerConfig, LedgerState, Reality, StorableObject, Transfer,
    TransferOutput, TransferOutputBooking,
};
use proptest::collection::vec;
use proptest::prelude::*;
use shared_types::{
    AddressHash, Color, ColoredBalance, RealityId, TransferHash, MAIN_REALITY_ID,
};

fn arb_balance() -> impl Strategy<Value = ColoredBalance> {
    (any::<[u8; 32]>(), any::<u64>())
        .prop_map(|(color, value)| ColoredBalance::new(Color::new(color), value))
}

proptest! {
    #[test]
    fn transfer_output_marshal_round_trips(
        reality in any::<[u8; 32]>(),
        transfer in any::<[u8; 32]>(),
        address in any::<[u8; 32]>(),
        balances in vec(arb_balance(), 0..8),
        consumers in vec(any::<[u8; 32]>(), 0..4),
    ) {
        let mut output = TransferOutput::new(
            RealityId::new(reality),
            TransferHash::new(transfer),
            AddressHash::new(address),
            balances,
        );
        for consumer in consumers {
            output.register_consumer(TransferHash::new(consumer));
        }

        let key = output.storage_key();
        let value = output.marshal_value();
        prop_assert_eq!(TransferOutput::unmarshal(&key, &value).unwrap(), output);
    }

    #[test]
    fn booking_marshal_round_trips(
        reality in any::<[u8; 32]>(),
        address in any::<[u8; 32]>(),
        spent in any::<bool>(),
        transfer in any::<[u8; 32]>(),
    ) {
        let booking = TransferOutputBooking::new(
            RealityId::new(reality),
            AddressHash::new(address),
            spent,
            TransferHash::new(transfer),
        );

        let key = booking.storage_key();
        let value = booking.marshal_value();
        prop_assert!(value.is_empty());
        prop_assert_eq!(TransferOutputBooking::unmarshal(&key, &value).unwrap(), booking);
    }

    #[test]
    fn reality_marshal_round_trips(
        id in any::<[u8; 32]>(),
        parents in vec(any::<[u8; 32]>(), 0..5),
    ) {
        let reality = Reality::new(
            RealityId::new(id),
            parents.into_iter().map(RealityId::new).collect(),
        );

        let key = reality.storage_key();
        let value = reality.marshal_value();
        prop_assert_eq!(Reality::unmarshal(&key, &value).unwrap(), reality);
    }

    #[test]
    fn merge_realities_is_permutation_invariant(
        raw_ids in vec(any::<[u8; 32]>(), 2..5),
    ) {
        let ledger = LedgerState::new(LedgerConfig::default(), InMemoryKvStore::new()).unwrap();

        let mut reality_ids = Vec::new();
        for raw in raw_ids {
            let reality_id = RealityId::new(raw);
            prop_assume!(reality_id != MAIN_REALITY_ID);
            if !reality_ids.contains(&reality_id) {
                ledger.create_reality(reality_id, vec![]).unwrap();
                reality_ids.push(reality_id);
            }
        }

        let forward = ledger.merge_realities(&reality_ids).unwrap();
        let forward_id = forward.get().unwrap().id();
        drop(forward);

        let mut reversed = reality_ids.clone();
        reversed.reverse();
        let backward = ledger.merge_realities(&reversed).unwrap();
        prop_assert_eq!(backward.get().unwrap().id(), forward_id);
    }

    #[test]
    fn booking_preserves_total_value_per_color(
        amounts in vec(1u64..1_000, 1..5),
    ) {
        use ledger_state::{LedgerStateApi, OutputFilter};
        use shared_types::COLOR_IOTA;

        let ledger = LedgerState::new(LedgerConfig::default(), InMemoryKvStore::new()).unwrap();
        let total: u64 = amounts.iter().sum();

        for (index, amount) in amounts.iter().enumerate() {
            ledger
                .add_transfer_output(
                    TransferHash::new([index as u8 + 1; 32]),
                    AddressHash::from_tag("source"),
                    vec![ColoredBalance::new(COLOR_IOTA, *amount)],
                )
                .unwrap();
        }

        // Sweep everything into one output; the per-color sum over unspent
        // outputs is unchanged.
        let mut sweep = Transfer::new(TransferHash::from_tag("sweep"));
        for (index, _) in amounts.iter().enumerate() {
            sweep = sweep.add_input(ledger_state::TransferOutputReference::new(
                TransferHash::new([index as u8 + 1; 32]),
                AddressHash::from_tag("source"),
            ));
        }
        sweep = sweep.add_output(
            AddressHash::from_tag("sink"),
            vec![ColoredBalance::new(COLOR_IOTA, total)],
        );
        ledger.book_transfer(&sweep).unwrap();

        let mut unspent_total = 0u64;
        ledger
            .for_each_transfer_output(
                &mut |handle| {
                    if let Some(output) = handle.get() {
                        if !output.is_spent() {
                            unspent_total += output
                                .balances()
                                .iter()
                                .map(ColoredBalance::value)
                                .sum::<u64>();
                        }
                    }
                    true
                },
                &[OutputFilter::Reality(MAIN_REALITY_ID)],
            )
            .unwrap();
        prop_assert_eq!(unspent_total, total);
    }
}
