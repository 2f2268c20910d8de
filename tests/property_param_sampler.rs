use std::collections::HashSet;

use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde_json::{json, Value};

use rollout::domain::models::{ParamSpace, ParamSpaceDimension};
use rollout::services::param_sampler::{combination_count, ParamOptions};
use rollout::services::{
    even_split_counts, param_sets_from_grid, param_sets_from_random, plan_runs, PlanRequest,
    SamplingError, SamplingMode,
};

/// Options with `sizes[i]` distinct values for dimension `d{i}`.
fn options(sizes: &[usize]) -> ParamOptions {
    sizes
        .iter()
        .enumerate()
        .map(|(d, &n)| {
            let values: Vec<Value> = (0..n).map(|v| json!(format!("d{d}v{v}"))).collect();
            (format!("d{d}"), values)
        })
        .collect()
}

fn as_keys(sets: &[rollout::services::param_sampler::ParamSet]) -> HashSet<String> {
    sets.iter()
        .map(|s| serde_json::to_string(s).unwrap())
        .collect()
}

proptest! {
    /// Property: even splits cover the total with balanced, front-loaded counts
    #[test]
    fn prop_even_split_is_balanced(total in 0usize..500, buckets in 1usize..40) {
        let counts = even_split_counts(total, buckets).unwrap();
        prop_assert_eq!(counts.len(), buckets);
        prop_assert_eq!(counts.iter().sum::<usize>(), total);

        let max = *counts.iter().max().unwrap();
        let min = *counts.iter().min().unwrap();
        prop_assert!(max - min <= 1);
        prop_assert!(counts.windows(2).all(|w| w[0] >= w[1]));
        prop_assert_eq!(min, total / buckets);
    }

    /// Property: the grid is the full cross product, without duplicates,
    /// with the first dimension varying slowest
    #[test]
    fn prop_grid_is_full_cross_product(sizes in prop::collection::vec(1usize..5, 1..4)) {
        let opts = options(&sizes);
        let sets = param_sets_from_grid(&opts);
        let expected: usize = sizes.iter().product();

        prop_assert_eq!(sets.len(), expected);
        prop_assert_eq!(as_keys(&sets).len(), expected);
        prop_assert_eq!(combination_count(&opts), Some(expected));

        let block = expected / sizes[0];
        for (i, set) in sets.iter().enumerate() {
            prop_assert_eq!(&set["d0"], &opts[0].1[i / block]);
        }
    }

    /// Property: random draws are distinct members of the grid
    #[test]
    fn prop_random_draws_are_distinct_grid_points(
        sizes in prop::collection::vec(1usize..5, 1..4),
        seed in any::<u64>(),
        fraction in 0.0f64..=1.0,
    ) {
        let opts = options(&sizes);
        let available: usize = sizes.iter().product();
        let run_count = ((available as f64) * fraction).floor() as usize;

        let mut rng = StdRng::seed_from_u64(seed);
        let drawn = param_sets_from_random(&opts, run_count, &mut rng).unwrap();
        prop_assert_eq!(drawn.len(), run_count);

        let drawn_keys = as_keys(&drawn);
        prop_assert_eq!(drawn_keys.len(), run_count);
        let grid_keys = as_keys(&param_sets_from_grid(&opts));
        prop_assert!(drawn_keys.is_subset(&grid_keys));
    }

    /// Property: asking for more draws than combinations always fails
    #[test]
    fn prop_random_rejects_oversized_requests(
        sizes in prop::collection::vec(1usize..4, 1..3),
        extra in 1usize..10,
    ) {
        let opts = options(&sizes);
        let available: usize = sizes.iter().product();
        let mut rng = StdRng::seed_from_u64(0);

        let err = param_sets_from_random(&opts, available + extra, &mut rng).unwrap_err();
        prop_assert_eq!(
            err,
            SamplingError::NotEnoughCombinations { requested: available + extra, available }
        );
    }

    /// Property: grid planning spreads replicas with even_split_counts
    #[test]
    fn prop_grid_plan_replicas(levels in 1usize..6, runs in 1usize..30) {
        let space = ParamSpace {
            dimensions: vec![ParamSpaceDimension::enumeration(
                "level",
                (0..levels).map(|l| json!(l)).collect(),
            )],
        };
        let plans = plan_runs(&space, &PlanRequest {
            mode: SamplingMode::Grid,
            run_count: runs,
            ..PlanRequest::default()
        }).unwrap();

        prop_assert_eq!(plans.len(), runs);
        prop_assert!(plans.iter().enumerate().all(|(i, p)| p.run_index == i));

        let expected = even_split_counts(runs, levels).unwrap();
        for (level, count) in expected.iter().enumerate() {
            let seen = plans.iter().filter(|p| p.params["level"] == json!(level)).count();
            prop_assert_eq!(seen, *count);
        }
    }
}

#[test]
fn test_seeded_random_plans_are_reproducible() {
    let space = ParamSpace {
        dimensions: vec![
            ParamSpaceDimension::enumeration("lang", vec![json!("c"), json!("rust"), json!("go")]),
            ParamSpaceDimension::enumeration("opt", vec![json!(0), json!(1), json!(2), json!(3)]),
        ],
    };
    let request = PlanRequest {
        mode: SamplingMode::Random,
        run_count: 5,
        seed: Some(42),
        ..PlanRequest::default()
    };

    let first = plan_runs(&space, &request).unwrap();
    let second = plan_runs(&space, &request).unwrap();
    assert_eq!(first, second);
    assert_eq!(first.len(), 5);
}

#[test]
fn test_even_split_example() {
    assert_eq!(even_split_counts(10, 3).unwrap(), vec![4, 3, 3]);
    assert_eq!(even_split_counts(2, 4).unwrap(), vec![1, 1, 0, 0]);
}
