//! # rv-model
//!
//! Model invocation adapters for Rivulet.
//!
//! A [`ModelAdapter`] runs one evaluation of an external, deterministic
//! model for a parameter vector, stores what the run produced through an
//! [`ArtifactSink`], and extracts the objective metric from the run's
//! diagnostics.
//!
//! Two adapters are provided:
//! - [`CommandModel`] launches an executable in a scratch directory.
//! - [`FnModel`] wraps a closure, for embedding and tests.

mod command;
mod diagnostics;
mod function;

pub use command::CommandModel;
pub use diagnostics::Diagnostics;
pub use function::FnModel;

use async_trait::async_trait;
use rv_store::ArtifactSink;
use rv_types::{ArtifactRef, ModelError, ObjectiveDirection, ObjectiveResult, ParameterVector};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Default diagnostic used as the objective.
pub const DEFAULT_OBJECTIVE_METRIC: &str = "DIAG_NASH_SUTCLIFFE";

/// Which diagnostic is scored and in which direction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Objective {
    pub metric: String,
    pub direction: ObjectiveDirection,
}

impl Default for Objective {
    fn default() -> Self {
        Self {
            metric: DEFAULT_OBJECTIVE_METRIC.to_string(),
            direction: ObjectiveDirection::Maximize,
        }
    }
}

/// Everything a single evaluation needs besides the parameter vector.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelContext {
    /// Opaque references to forcing data (paths or URLs).
    pub forcing: Vec<String>,
    /// Free-form model configuration, passed through untouched.
    pub config: BTreeMap<String, Value>,
    pub objective: Objective,
    /// Prefix for the artifacts of this run.
    pub run_label: String,
}

impl ModelContext {
    pub fn new(run_label: impl Into<String>) -> Self {
        Self {
            run_label: run_label.into(),
            ..Self::default()
        }
    }

    pub fn with_forcing(mut self, forcing: Vec<String>) -> Self {
        self.forcing = forcing;
        self
    }

    pub fn with_config(mut self, key: impl Into<String>, value: Value) -> Self {
        self.config.insert(key.into(), value);
        self
    }

    pub fn with_objective(mut self, objective: Objective) -> Self {
        self.objective = objective;
        self
    }

    /// Same context under another run label.
    pub fn for_run(&self, run_label: impl Into<String>) -> Self {
        Self {
            run_label: run_label.into(),
            ..self.clone()
        }
    }

    pub fn artifact_name(&self, suffix: &str) -> String {
        if self.run_label.is_empty() {
            suffix.to_string()
        } else {
            format!("{}-{suffix}", self.run_label)
        }
    }
}

/// One black-box model evaluation.
///
/// Implementations write at least one artifact per call, failed calls
/// included, and keep no mutable state shared between concurrent calls.
#[async_trait]
pub trait ModelAdapter: Send + Sync + std::fmt::Debug {
    async fn evaluate(
        &self,
        ctx: &ModelContext,
        vector: &ParameterVector,
        sink: &dyn ArtifactSink,
    ) -> Result<ObjectiveResult, ModelError>;

    fn name(&self) -> &str;
}

/// Score `diagnostics` against the context's objective.
pub(crate) fn score(
    ctx: &ModelContext,
    diagnostics: &Diagnostics,
    artifacts: Vec<ArtifactRef>,
) -> Result<ObjectiveResult, ModelError> {
    let score = diagnostics.metric(&ctx.objective.metric)?;
    Ok(ObjectiveResult {
        score,
        metrics: diagnostics.numeric(),
        artifacts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn artifact_names_use_run_label() {
        let ctx = ModelContext::new("eval-0003");
        assert_eq!(ctx.artifact_name("diagnostics.csv"), "eval-0003-diagnostics.csv");
        assert_eq!(ModelContext::default().artifact_name("stdout.log"), "stdout.log");

        let other = ctx
            .with_config("run_name", Value::from("salmon"))
            .for_run("run-1");
        assert_eq!(other.run_label, "run-1");
        assert_eq!(other.config["run_name"], Value::from("salmon"));
        assert_eq!(other.objective.metric, DEFAULT_OBJECTIVE_METRIC);
    }
}
