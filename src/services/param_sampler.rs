//! Param-space sampler and run planner.
//!
//! Expands declared dimensions into concrete parameter sets: the full
//! factorial for grid exploration, or distinct draws without replacement for
//! random exploration. Independent of the per-session loop.

use std::collections::{BTreeMap, HashSet};

use rand::prelude::*;
use rand::seq::index;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::domain::models::{DimensionKind, ParamSpace, ParamSpaceDimension};
use crate::domain::DomainError;

/// One concrete assignment of dimension key to value.
pub type ParamSet = BTreeMap<String, Value>;

/// Ordered `(dimension key, ordered values)` pairs.
pub type ParamOptions = Vec<(String, Vec<Value>)>;

#[derive(Debug, Error, PartialEq)]
pub enum SamplingError {
    #[error("requested {requested} distinct parameter sets but only {available} combinations exist")]
    NotEnoughCombinations { requested: usize, available: usize },

    #[error("cannot split {total} runs across zero buckets")]
    NoBuckets { total: usize },

    #[error("invalid dimension '{key}': {reason}")]
    InvalidDimension { key: String, reason: String },

    #[error("invalid value for '{key}': {value}")]
    InvalidValue { key: String, value: Value },
}

impl From<SamplingError> for DomainError {
    fn from(err: SamplingError) -> Self {
        DomainError::Configuration(err.to_string())
    }
}

/// Which exploration a caller is planning; selects the dimensions whose
/// matching `allow_*` flag is set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SamplingMode {
    #[default]
    Grid,
    Random,
    Manual,
}

impl SamplingMode {
    fn allows(self, dim: &ParamSpaceDimension) -> bool {
        match self {
            Self::Grid => dim.allow_grid,
            Self::Random => dim.allow_random,
            Self::Manual => dim.allow_manual,
        }
    }
}

fn invalid(dim: &ParamSpaceDimension, reason: impl Into<String>) -> SamplingError {
    SamplingError::InvalidDimension {
        key: dim.key.clone(),
        reason: reason.into(),
    }
}

/// Largest value list an int range may expand to.
pub const MAX_INT_OPTIONS: usize = 10_000;

/// Ordered candidate values of one dimension.
pub fn dimension_values(dim: &ParamSpaceDimension) -> Result<Vec<Value>, SamplingError> {
    if dim.key.trim().is_empty() {
        return Err(invalid(dim, "empty key"));
    }
    if !dim.options.is_empty() {
        return Ok(dim.options.clone());
    }

    match dim.kind {
        DimensionKind::Bool => Ok(vec![Value::Bool(false), Value::Bool(true)]),
        DimensionKind::Int => {
            let (Some(min), Some(max)) = (dim.min, dim.max) else {
                return Err(invalid(dim, "int dimension needs options or min/max bounds"));
            };
            if min.fract() != 0.0 || max.fract() != 0.0 {
                return Err(invalid(dim, "int bounds must be whole numbers"));
            }
            if min > max {
                return Err(invalid(dim, format!("min {min} exceeds max {max}")));
            }
            let step = dim.step.unwrap_or(1);
            if step <= 0 {
                return Err(invalid(dim, format!("step must be positive, got {step}")));
            }
            // i64::MAX rounds up to 2^63 as f64, so the upper check is exclusive.
            #[allow(clippy::cast_precision_loss)]
            let (lowest, highest) = (i64::MIN as f64, i64::MAX as f64);
            if min < lowest || max >= highest {
                return Err(invalid(dim, "int bounds do not fit in a 64-bit integer"));
            }
            #[allow(clippy::cast_possible_truncation)]
            let (min, max) = (min as i64, max as i64);
            let count = (i128::from(max) - i128::from(min)) / i128::from(step) + 1;
            if usize::try_from(count).map_or(true, |n| n > MAX_INT_OPTIONS) {
                return Err(invalid(
                    dim,
                    format!("range expands to {count} values, more than {MAX_INT_OPTIONS}"),
                ));
            }
            Ok(std::iter::successors(Some(min), |current| current.checked_add(step))
                .take_while(|current| *current <= max)
                .map(Value::from)
                .collect())
        }
        DimensionKind::Enum | DimensionKind::Float | DimensionKind::String => {
            Err(invalid(dim, "no options declared"))
        }
    }
}

/// Candidate values for every dimension `mode` may vary, in declaration
/// order.
pub fn options_from_param_space(space: &ParamSpace, mode: SamplingMode) -> Result<ParamOptions, SamplingError> {
    let mut seen = HashSet::new();
    let mut options = Vec::new();
    for dim in &space.dimensions {
        if !seen.insert(dim.key.as_str()) {
            return Err(invalid(dim, "declared more than once"));
        }
        if mode.allows(dim) {
            options.push((dim.key.clone(), dimension_values(dim)?));
        }
    }
    Ok(options)
}

/// Number of distinct combinations, `None` on overflow.
pub fn combination_count(options: &ParamOptions) -> Option<usize> {
    if options.iter().any(|(_, values)| values.is_empty()) {
        return Some(0);
    }
    options
        .iter()
        .try_fold(1usize, |acc, (_, values)| acc.checked_mul(values.len()))
}

/// Full cross product; the first dimension varies slowest.
pub fn param_sets_from_grid(options: &ParamOptions) -> Vec<ParamSet> {
    let mut sets = vec![ParamSet::new()];
    for (key, values) in options {
        sets = sets
            .iter()
            .flat_map(|set| {
                values.iter().map(move |value| {
                    let mut next = set.clone();
                    next.insert(key.clone(), value.clone());
                    next
                })
            })
            .collect();
    }
    sets
}

/// `run_count` pairwise-distinct sets drawn without replacement.
pub fn param_sets_from_random<R: Rng + ?Sized>(
    options: &ParamOptions,
    run_count: usize,
    rng: &mut R,
) -> Result<Vec<ParamSet>, SamplingError> {
    match combination_count(options) {
        Some(available) if run_count > available => Err(SamplingError::NotEnoughCombinations {
            requested: run_count,
            available,
        }),
        Some(available) => Ok(index::sample(rng, available, run_count)
            .into_iter()
            .map(|i| decode_index(options, i))
            .collect()),
        // Space too large to index: redraw on the rare collision.
        None => {
            let mut drawn: HashSet<Vec<usize>> = HashSet::with_capacity(run_count);
            let mut sets = Vec::with_capacity(run_count);
            while sets.len() < run_count {
                let picks: Vec<usize> = options.iter().map(|(_, v)| rng.gen_range(0..v.len())).collect();
                if drawn.insert(picks.clone()) {
                    sets.push(
                        options
                            .iter()
                            .zip(&picks)
                            .map(|((key, values), &i)| (key.clone(), values[i].clone()))
                            .collect(),
                    );
                }
            }
            Ok(sets)
        }
    }
}

/// The `index`-th grid combination, last dimension fastest.
fn decode_index(options: &ParamOptions, mut index: usize) -> ParamSet {
    let mut set = ParamSet::new();
    for (key, values) in options.iter().rev() {
        set.insert(key.clone(), values[index % values.len()].clone());
        index /= values.len();
    }
    set
}

/// Split `total` into `buckets` near-equal counts, larger ones first.
///
/// `even_split_counts(10, 3) == [4, 3, 3]`.
pub fn even_split_counts(total: usize, buckets: usize) -> Result<Vec<usize>, SamplingError> {
    if buckets == 0 {
        return if total == 0 {
            Ok(Vec::new())
        } else {
            Err(SamplingError::NoBuckets { total })
        };
    }
    let base = total / buckets;
    let remainder = total % buckets;
    Ok((0..buckets).map(|i| base + usize::from(i < remainder)).collect())
}

/// What to plan.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlanRequest {
    pub mode: SamplingMode,
    /// Grid: total runs spread over the grid points (0 = one per point).
    /// Random: distinct draws. Manual: replicas (0 = one).
    #[serde(default)]
    pub run_count: usize,
    #[serde(default)]
    pub seed: Option<u64>,
    /// Manual-mode assignments.
    #[serde(default)]
    pub manual: ParamSet,
}

/// One planned run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunPlan {
    pub run_index: usize,
    /// Replica number among runs sharing `params`.
    pub replica: usize,
    pub params: ParamSet,
}

/// Expand a declared space into concrete runs.
///
/// Dimensions outside the selected mode keep their `default_value`; a
/// required dimension with neither a sampled value nor a default is an
/// error.
pub fn plan_runs(space: &ParamSpace, request: &PlanRequest) -> Result<Vec<RunPlan>, SamplingError> {
    let options = options_from_param_space(space, request.mode)?;

    let (sets, replicas): (Vec<ParamSet>, Vec<usize>) = match request.mode {
        SamplingMode::Grid => {
            let sets = param_sets_from_grid(&options);
            let counts = if request.run_count == 0 {
                vec![1; sets.len()]
            } else {
                even_split_counts(request.run_count, sets.len())?
            };
            (sets, counts)
        }
        SamplingMode::Random => {
            let mut rng = match request.seed {
                Some(seed) => StdRng::seed_from_u64(seed),
                None => StdRng::from_entropy(),
            };
            let sets = param_sets_from_random(&options, request.run_count, &mut rng)?;
            let counts = vec![1; sets.len()];
            (sets, counts)
        }
        SamplingMode::Manual => {
            let set = manual_set(space, &options, &request.manual)?;
            (vec![set], vec![request.run_count.max(1)])
        }
    };

    let mut plans = Vec::new();
    for (mut params, count) in sets.into_iter().zip(replicas) {
        fill_defaults(space, &mut params)?;
        for replica in 0..count {
            plans.push(RunPlan {
                run_index: plans.len(),
                replica,
                params: params.clone(),
            });
        }
    }
    Ok(plans)
}

fn manual_set(space: &ParamSpace, options: &ParamOptions, manual: &ParamSet) -> Result<ParamSet, SamplingError> {
    for (key, value) in manual {
        let Some((_, values)) = options.iter().find(|(k, _)| k == key) else {
            let reason = if space.dimensions.iter().any(|d| &d.key == key) {
                "not settable manually"
            } else {
                "not declared"
            };
            return Err(SamplingError::InvalidDimension {
                key: key.clone(),
                reason: reason.to_string(),
            });
        };
        if !values.contains(value) {
            return Err(SamplingError::InvalidValue {
                key: key.clone(),
                value: value.clone(),
            });
        }
    }
    Ok(manual.clone())
}

fn fill_defaults(space: &ParamSpace, params: &mut ParamSet) -> Result<(), SamplingError> {
    for dim in &space.dimensions {
        if params.contains_key(&dim.key) {
            continue;
        }
        match (&dim.default_value, dim.required) {
            (Some(default), _) => {
                params.insert(dim.key.clone(), default.clone());
            }
            (None, true) => return Err(invalid(dim, "required but has no value or default")),
            (None, false) => {}
        }
    }
    Ok(())
}
