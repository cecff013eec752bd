//! # rv-optimizer
//!
//! Bound-constrained, derivative-free calibration for Rivulet.
//!
//! Provides the Dynamically Dimensioned Search strategy, the per-run
//! optimization state, and a synchronous [`optimize`] driver. Callers that
//! need to interleave their own checks between evaluations (cancellation,
//! progress reporting) drive a [`SearchStrategy`] directly through
//! `suggest`/`report`.

mod dds;
mod state;

pub use dds::{
    reflect, selection_probability, DdsConfig, DdsSearch, SearchStrategy,
    DEFAULT_PERTURBATION, MIN_PERTURBATION_PROBABILITY,
};
pub use state::{OptimizationOutcome, OptimizationState};

use rv_types::{ObjectiveResult, OptimizerError, ParameterVector};
use tracing::debug;

/// Run DDS to completion, calling `evaluate` once per budgeted evaluation.
///
/// The first failing evaluation aborts the run with
/// `OptimizerError::Evaluation`; failures are never retried.
pub fn optimize<F, E>(config: DdsConfig, mut evaluate: F) -> Result<OptimizationOutcome, OptimizerError>
where
    F: FnMut(&ParameterVector) -> Result<ObjectiveResult, E>,
    E: std::fmt::Display,
{
    let mut search = DdsSearch::new(config)?;
    while let Some(candidate) = search.suggest() {
        let evaluation = search.state().evaluations + 1;
        let result = evaluate(&candidate).map_err(|e| OptimizerError::Evaluation {
            evaluation,
            message: e.to_string(),
        })?;
        debug!(evaluation, score = result.score, "candidate evaluated");
        search.report(result)?;
    }
    search.into_outcome()
}
