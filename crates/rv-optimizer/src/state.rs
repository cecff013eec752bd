//! Optimization run state and outcome.

use rv_types::{ObjectiveDirection, ObjectiveResult, ParameterVector};
use serde::{Deserialize, Serialize};

/// State of one running optimizer. Owned by a single search and never
/// shared between jobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationState {
    /// Evaluations reported so far, including the initial point.
    pub evaluations: usize,
    pub budget: usize,
    pub direction: ObjectiveDirection,
    /// Seed of the random stream driving this run.
    pub seed: u64,
    pub best_vector: Option<ParameterVector>,
    pub best_result: Option<ObjectiveResult>,
    /// Best-so-far score after each evaluation.
    pub history: Vec<f64>,
}

impl OptimizationState {
    pub fn new(budget: usize, direction: ObjectiveDirection, seed: u64) -> Self {
        Self {
            evaluations: 0,
            budget,
            direction,
            seed,
            best_vector: None,
            best_result: None,
            history: Vec::with_capacity(budget),
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.evaluations >= self.budget
    }

    pub fn best_score(&self) -> Option<f64> {
        self.best_result.as_ref().map(|r| r.score)
    }

    /// Record one evaluation. Replaces the best when `result` strictly
    /// improves on it and appends the best-so-far score to the history.
    /// Returns whether the best changed.
    pub fn record(&mut self, vector: ParameterVector, result: ObjectiveResult) -> bool {
        self.evaluations += 1;

        let improved = match &self.best_result {
            None => true,
            Some(current_best) => self.direction.is_better(result.score, current_best.score),
        };
        if improved {
            self.best_vector = Some(vector);
            self.best_result = Some(result);
        }
        if let Some(best) = self.best_score() {
            self.history.push(best);
        }
        improved
    }
}

/// Final result of an optimization run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationOutcome {
    pub best_vector: ParameterVector,
    pub best_result: ObjectiveResult,
    pub history: Vec<f64>,
    pub evaluations: usize,
    pub seed: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vector(x: f64) -> ParameterVector {
        ParameterVector::new(vec![x])
    }

    #[test]
    fn best_tracking_maximize() {
        let mut state = OptimizationState::new(10, ObjectiveDirection::Maximize, 1);

        assert!(state.record(vector(0.1), ObjectiveResult::new(1.5)));
        assert!(state.record(vector(0.2), ObjectiveResult::new(2.0)));
        // Worse result should not replace
        assert!(!state.record(vector(0.3), ObjectiveResult::new(1.0)));

        assert_eq!(state.best_score(), Some(2.0));
        assert_eq!(state.best_vector, Some(vector(0.2)));
        assert_eq!(state.history, vec![1.5, 2.0, 2.0]);
        assert_eq!(state.evaluations, 3);
    }

    #[test]
    fn best_tracking_minimize() {
        let mut state = OptimizationState::new(10, ObjectiveDirection::Minimize, 1);

        state.record(vector(0.1), ObjectiveResult::new(0.15));
        state.record(vector(0.2), ObjectiveResult::new(0.05));
        state.record(vector(0.3), ObjectiveResult::new(0.10));

        assert_eq!(state.best_score(), Some(0.05));
        assert_eq!(state.history, vec![0.15, 0.05, 0.05]);
    }

    #[test]
    fn ties_keep_the_incumbent() {
        let mut state = OptimizationState::new(10, ObjectiveDirection::Maximize, 1);
        state.record(vector(0.1), ObjectiveResult::new(1.0));
        assert!(!state.record(vector(0.9), ObjectiveResult::new(1.0)));
        assert_eq!(state.best_vector, Some(vector(0.1)));
    }

    #[test]
    fn nan_scores_never_win() {
        let mut state = OptimizationState::new(10, ObjectiveDirection::Maximize, 1);
        state.record(vector(0.1), ObjectiveResult::new(f64::NAN));
        assert!(state.record(vector(0.2), ObjectiveResult::new(-5.0)));
        assert!(!state.record(vector(0.3), ObjectiveResult::new(f64::NAN)));
        assert_eq!(state.best_score(), Some(-5.0));
    }

    #[test]
    fn exhaustion() {
        let mut state = OptimizationState::new(2, ObjectiveDirection::Maximize, 1);
        assert!(!state.is_exhausted());
        state.record(vector(0.1), ObjectiveResult::new(1.0));
        state.record(vector(0.1), ObjectiveResult::new(1.0));
        assert!(state.is_exhausted());
    }
}
