//! Property tests for the aggregation contract

use fednest::aggregation::{Aggregator, MeanDelta, Update, decode_f32, encode_f32};
use proptest::prelude::*;

fn updates_strategy() -> impl Strategy<Value = (Vec<f32>, Vec<Update>)> {
    (1usize..8).prop_flat_map(|dim| {
        let base = prop::collection::vec(-100.0f32..100.0, dim);
        let updates = prop::collection::vec(
            (prop::collection::vec(-10.0f32..10.0, dim), 0.1f64..50.0),
            1..6,
        )
        .prop_map(|entries| {
            entries
                .into_iter()
                .enumerate()
                .map(|(i, (values, weight))| Update {
                    participant_id: format!("edge-{:03}", i),
                    weight,
                    delta: encode_f32(&values),
                })
                .collect::<Vec<_>>()
        });
        (base, updates)
    })
}

proptest! {
    #[test]
    fn prop_arrival_order_is_irrelevant(
        (base, updates) in updates_strategy(),
        rotation in 0usize..6,
        reverse in any::<bool>(),
    ) {
        let base = encode_f32(&base);
        let expected = MeanDelta.aggregate(&base, &updates).unwrap();

        let mut shuffled = updates.clone();
        let len = shuffled.len();
        shuffled.rotate_left(rotation % len);
        if reverse {
            shuffled.reverse();
        }

        prop_assert_eq!(MeanDelta.aggregate(&base, &shuffled).unwrap(), expected);
    }

    #[test]
    fn prop_aggregation_is_repeatable((base, updates) in updates_strategy()) {
        let base = encode_f32(&base);
        let first = MeanDelta.aggregate(&base, &updates).unwrap();
        let second = MeanDelta.aggregate(&base, &updates).unwrap();
        prop_assert_eq!(first, second);
    }

    #[test]
    fn prop_output_keeps_base_shape((base, updates) in updates_strategy()) {
        let dim = base.len();
        let out = MeanDelta.aggregate(&encode_f32(&base), &updates).unwrap();
        prop_assert_eq!(decode_f32(&out).unwrap().len(), dim);
    }

    #[test]
    fn prop_equal_deltas_shift_base_by_that_delta(
        base in prop::collection::vec(-100.0f32..100.0, 1..8),
        weights in prop::collection::vec(0.1f64..50.0, 1..5),
    ) {
        let delta = vec![0.5f32; base.len()];
        let updates: Vec<Update> = weights
            .iter()
            .enumerate()
            .map(|(i, w)| Update {
                participant_id: format!("p{}", i),
                weight: *w,
                delta: encode_f32(&delta),
            })
            .collect();

        let out = decode_f32(&MeanDelta.aggregate(&encode_f32(&base), &updates).unwrap()).unwrap();
        for (o, b) in out.iter().zip(&base) {
            prop_assert!((o - (b + 0.5)).abs() < 1e-4);
        }
    }
}
