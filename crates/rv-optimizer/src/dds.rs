//! Dynamically Dimensioned Search.
//!
//! A single-solution greedy search: every iteration perturbs a random
//! subset of dimensions of the best vector found so far. The expected
//! subset size shrinks as the budget is consumed, moving the search from
//! global to local.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rv_types::{Bounds, ObjectiveDirection, ObjectiveResult, OptimizerError, ParameterVector};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::state::{OptimizationOutcome, OptimizationState};

/// Neighbourhood size, as a fraction of each dimension's range.
pub const DEFAULT_PERTURBATION: f64 = 0.2;

/// Lower clamp on the per-dimension selection probability.
pub const MIN_PERTURBATION_PROBABILITY: f64 = 1e-3;

/// Common trait for search strategies.
pub trait SearchStrategy: Send {
    /// Next vector to evaluate, or `None` once the budget is spent.
    /// Calling again before `report` returns the same candidate.
    fn suggest(&mut self) -> Option<ParameterVector>;

    /// Report the result for the last suggested candidate. Returns whether
    /// it became the new best.
    fn report(&mut self, result: ObjectiveResult) -> Result<bool, OptimizerError>;

    fn state(&self) -> &OptimizationState;

    /// Human-readable strategy name.
    fn name(&self) -> &str;
}

/// Configuration for one DDS run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DdsConfig {
    pub initial: ParameterVector,
    pub bounds: Bounds,
    /// Total model evaluations, including the initial point.
    pub budget: usize,
    /// Seed for the random stream; drawn from entropy when absent.
    pub seed: Option<u64>,
    pub direction: ObjectiveDirection,
    pub perturbation: f64,
}

impl DdsConfig {
    pub fn new(initial: ParameterVector, bounds: Bounds, budget: usize) -> Self {
        Self {
            initial,
            bounds,
            budget,
            seed: None,
            direction: ObjectiveDirection::Maximize,
            perturbation: DEFAULT_PERTURBATION,
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_direction(mut self, direction: ObjectiveDirection) -> Self {
        self.direction = direction;
        self
    }

    pub fn with_perturbation(mut self, perturbation: f64) -> Self {
        self.perturbation = perturbation;
        self
    }

    pub fn validate(&self) -> Result<(), OptimizerError> {
        let invalid = |message: String| Err(OptimizerError::InvalidConfig { message });
        if self.budget == 0 {
            return invalid("evaluation budget must be at least 1".to_string());
        }
        if self.bounds.dims() == 0 {
            return invalid("bounds must cover at least one parameter".to_string());
        }
        if self.initial.len() != self.bounds.dims() {
            return invalid(format!(
                "initial vector has {} values but bounds have {}",
                self.initial.len(),
                self.bounds.dims()
            ));
        }
        if !self.bounds.contains(&self.initial) {
            return invalid("initial vector lies outside the bounds".to_string());
        }
        if !(self.perturbation.is_finite() && self.perturbation > 0.0) {
            return invalid(format!("perturbation must be positive, got {}", self.perturbation));
        }
        Ok(())
    }
}

/// Probability of perturbing each dimension on search iteration `iteration`
/// (1-indexed) of `iterations`.
pub fn selection_probability(iteration: usize, iterations: usize) -> f64 {
    if iterations <= 1 {
        return 1.0;
    }
    let p = 1.0 - (iteration as f64).ln() / (iterations as f64).ln();
    p.max(MIN_PERTURBATION_PROBABILITY)
}

/// Mirror `value` back into `[lower, upper]`, folding as many times as
/// needed. Values already inside (boundaries included) are returned as is;
/// a zero-width range pins the value to `lower`.
pub fn reflect(value: f64, lower: f64, upper: f64) -> f64 {
    let width = upper - lower;
    if width <= 0.0 || !value.is_finite() {
        return lower;
    }
    if (lower..=upper).contains(&value) {
        return value;
    }
    let period = 2.0 * width;
    let mut offset = (value - lower).rem_euclid(period);
    if offset > width {
        offset = period - offset;
    }
    (lower + offset).clamp(lower, upper)
}

/// Standard normal draw (Box-Muller, cosine branch). Consumes exactly two
/// uniforms so the stream position stays predictable.
fn standard_normal<R: Rng>(rng: &mut R) -> f64 {
    let u1 = 1.0 - rng.gen::<f64>();
    let u2 = rng.gen::<f64>();
    (-2.0 * u1.ln()).sqrt() * (std::f64::consts::TAU * u2).cos()
}

/// Dynamically Dimensioned Search over a box-constrained space.
///
/// The initial vector is the first evaluation. Each of the remaining
/// `budget - 1` iterations draws, in order: one uniform per dimension for
/// selection, one index if nothing was selected, then two uniforms per
/// selected dimension (ascending) for its perturbation.
#[derive(Debug, Clone)]
pub struct DdsSearch {
    config: DdsConfig,
    rng: ChaCha8Rng,
    state: OptimizationState,
    pending: Option<ParameterVector>,
}

impl DdsSearch {
    pub fn new(config: DdsConfig) -> Result<Self, OptimizerError> {
        config.validate()?;
        let seed = config.seed.unwrap_or_else(rand::random);
        Ok(Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
            state: OptimizationState::new(config.budget, config.direction, seed),
            config,
            pending: None,
        })
    }

    pub fn config(&self) -> &DdsConfig {
        &self.config
    }

    /// Seed actually in use, including one drawn from entropy.
    pub fn seed(&self) -> u64 {
        self.state.seed
    }

    fn perturb(&mut self) -> ParameterVector {
        let iteration = self.state.evaluations;
        let p = selection_probability(iteration, self.config.budget - 1);
        let dims = self.config.bounds.dims();

        let mut selected = Vec::with_capacity(dims);
        for dim in 0..dims {
            if self.rng.gen::<f64>() < p {
                selected.push(dim);
            }
        }
        if selected.is_empty() {
            selected.push(self.rng.gen_range(0..dims));
        }

        let mut values = match &self.state.best_vector {
            Some(best) => best.values().to_vec(),
            None => self.config.initial.values().to_vec(),
        };
        for dim in selected {
            let lower = self.config.bounds.lower()[dim];
            let upper = self.config.bounds.upper()[dim];
            let sigma = self.config.perturbation * (upper - lower);
            let z = standard_normal(&mut self.rng);
            values[dim] = reflect(values[dim] + sigma * z, lower, upper);
        }
        ParameterVector::new(values)
    }

    pub fn into_outcome(self) -> Result<OptimizationOutcome, OptimizerError> {
        let OptimizationState {
            evaluations,
            seed,
            best_vector,
            best_result,
            history,
            ..
        } = self.state;
        match (best_vector, best_result) {
            (Some(best_vector), Some(best_result)) => Ok(OptimizationOutcome {
                best_vector,
                best_result,
                history,
                evaluations,
                seed,
            }),
            _ => Err(OptimizerError::InvalidConfig {
                message: "no evaluations were reported".to_string(),
            }),
        }
    }
}

impl SearchStrategy for DdsSearch {
    fn suggest(&mut self) -> Option<ParameterVector> {
        if let Some(pending) = &self.pending {
            return Some(pending.clone());
        }
        if self.state.is_exhausted() {
            return None;
        }
        let candidate = if self.state.evaluations == 0 {
            self.config.initial.clone()
        } else {
            self.perturb()
        };
        self.pending = Some(candidate.clone());
        Some(candidate)
    }

    fn report(&mut self, result: ObjectiveResult) -> Result<bool, OptimizerError> {
        let candidate = self.pending.take().ok_or(OptimizerError::NoPendingCandidate)?;
        let score = result.score;
        let improved = self.state.record(candidate, result);
        if improved {
            debug!(
                evaluation = self.state.evaluations,
                score,
                "new best parameter vector"
            );
        }
        Ok(improved)
    }

    fn state(&self) -> &OptimizationState {
        &self.state
    }

    fn name(&self) -> &str {
        "dds"
    }
}
