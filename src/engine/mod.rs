pub mod aggregate;
pub mod cross_source;
pub mod error;
pub mod integrated;
pub mod metric;
pub mod ranking;
pub mod reference;
pub mod reliability;
pub mod report;
pub mod sentiment;
pub mod stats;

#[cfg(test)]
mod properties {
    use proptest::prelude::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    use super::aggregate::EntitySampleSet;
    use super::cross_source::rank_biased_overlap;
    use super::ranking::{exposure_indices, ranking_stability};
    use super::sentiment::{cliffs_delta, raw_delta};
    use super::stats::{bootstrap_delta_interval_95, gini, herfindahl_index};
    use crate::config::{EngineConfig, ExposureWeighting};

    fn entity_names(count: usize) -> Vec<String> {
        (0..count).map(|index| format!("E{index}")).collect()
    }

    fn runs_strategy() -> impl Strategy<Value = (Vec<String>, Vec<Vec<String>>)> {
        (2_usize..8).prop_flat_map(|count| {
            let candidates = entity_names(count);
            let run = (0..count, 1..=count);
            (Just(candidates), prop::collection::vec(run, 1..6))
        })
        .prop_map(|(candidates, shapes)| {
            let runs = shapes
                .into_iter()
                .map(|(offset, length)| {
                    (0..length)
                        .map(|position| candidates[(offset + position) % candidates.len()].clone())
                        .collect::<Vec<String>>()
                })
                .collect::<Vec<Vec<String>>>();
            (candidates, runs)
        })
    }

    fn weighting_strategy() -> impl Strategy<Value = ExposureWeighting> {
        prop_oneof![
            Just(ExposureWeighting::Linear),
            Just(ExposureWeighting::Reciprocal),
            Just(ExposureWeighting::Logarithmic),
            Just(ExposureWeighting::PointTable {
                points: vec![3.0, 2.0, 1.0]
            }),
        ]
    }

    proptest! {
        #[test]
        fn exposure_sums_to_one((candidates, runs) in runs_strategy(), weighting in weighting_strategy()) {
            let exposure = exposure_indices(&runs, &candidates, &weighting)
                .expect("first positions always carry weight");
            let total = exposure.values().sum::<f64>();
            prop_assert!((total - 1.0).abs() < 1e-9, "total = {}", total);
            prop_assert!(exposure.values().all(|value| *value >= 0.0));
        }

        #[test]
        fn repeated_identical_rankings_are_fully_stable(count in 2_usize..10, repeats in 2_usize..6) {
            let ranking = entity_names(count);
            let runs = vec![ranking; repeats];
            let stability = ranking_stability(&runs, 2).expect("stability defined");
            prop_assert!((stability - 1.0).abs() < 1e-12);
        }

        #[test]
        fn rbo_of_a_list_with_itself_is_one(count in 1_usize..40, persistence in 0.01_f64..0.99) {
            let items = entity_names(count);
            let rbo = rank_biased_overlap(&items, &items, persistence).expect("rbo defined");
            prop_assert!((rbo - 1.0).abs() < 1e-9, "rbo = {}", rbo);
        }

        #[test]
        fn rbo_stays_in_unit_interval(
            left in prop::collection::vec(0_u8..12, 1..12),
            right in prop::collection::vec(0_u8..12, 1..12),
        ) {
            let left = left.iter().map(|item| format!("E{item}")).collect::<Vec<String>>();
            let right = right.iter().map(|item| format!("E{item}")).collect::<Vec<String>>();
            let rbo = rank_biased_overlap(&left, &right, 0.9).expect("rbo defined");
            prop_assert!((0.0..=1.0).contains(&rbo));
        }

        #[test]
        fn hhi_of_equal_shares(count in 1_usize..50) {
            let share = 1.0 / count as f64;
            let hhi = herfindahl_index(std::iter::repeat_n(share, count));
            prop_assert!((hhi - 10_000.0 / count as f64).abs() < 1e-6);
        }

        #[test]
        fn gini_extremes(count in 2_usize..50) {
            let equal = vec![1.0; count];
            prop_assert!(gini(&equal).expect("gini defined").abs() < 1e-12);

            let mut concentrated = vec![0.0; count];
            concentrated[count - 1] = 1.0;
            let expected = (count as f64 - 1.0) / count as f64;
            prop_assert!((gini(&concentrated).expect("gini defined") - expected).abs() < 1e-12);
        }

        #[test]
        fn identical_groups_show_no_bias(values in prop::collection::vec(1_u8..=5, 5..20)) {
            let values = values.into_iter().map(f64::from).collect::<Vec<f64>>();
            let samples = EntitySampleSet {
                masked: values.clone(),
                unmasked: values,
                ..EntitySampleSet::default()
            };
            let config = EngineConfig::default();
            let delta = raw_delta(&samples, &config).expect("raw delta defined");
            let cliffs = cliffs_delta(&samples, &config).expect("cliffs delta defined");
            prop_assert!(delta.abs() < 1e-12);
            prop_assert!(cliffs.abs() < 1e-12);
        }

        #[test]
        fn bootstrap_is_reproducible_for_a_seed(
            masked in prop::collection::vec(1.0_f64..5.0, 5..12),
            unmasked in prop::collection::vec(1.0_f64..5.0, 5..12),
            seed in any::<u64>(),
        ) {
            let first = bootstrap_delta_interval_95(&masked, &unmasked, 1_000, &mut StdRng::seed_from_u64(seed))
                .expect("interval defined");
            let second = bootstrap_delta_interval_95(&masked, &unmasked, 1_000, &mut StdRng::seed_from_u64(seed))
                .expect("interval defined");
            prop_assert_eq!(first.0.to_bits(), second.0.to_bits());
            prop_assert_eq!(first.1.to_bits(), second.1.to_bits());
        }
    }
}
