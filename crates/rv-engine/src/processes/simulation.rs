use async_trait::async_trait;
use rv_model::ModelAdapter;
use rv_store::ArtifactSink;
use rv_types::{InputSpec, OutputSpec, ParameterVector, ProcessInputs, ProcessSchema, RvResult};
use serde_json::json;
use std::sync::Arc;
use tracing::info;

use super::{model_context, step_percent, validate_model_inputs, with_model_inputs, MODEL_SIMULATION};
use crate::context::JobContext;
use crate::registry::{ProcessDescriptor, ProcessHandler};

/// Parameter sets accepted by one simulation request.
const MAX_PARAMETER_SETS: usize = 32;

/// One model run per supplied parameter set.
#[derive(Debug, Clone)]
pub struct ModelSimulation {
    model: Arc<dyn ModelAdapter>,
}

impl ModelSimulation {
    pub fn new(model: Arc<dyn ModelAdapter>) -> Self {
        Self { model }
    }

    pub fn schema() -> ProcessSchema {
        with_model_inputs(ProcessSchema::new())
            .input(
                InputSpec::float_list("params")
                    .title("Comma separated list of model parameters")
                    .required()
                    .max_occurs(MAX_PARAMETER_SETS),
            )
            .output(OutputSpec::new("diagnostics", "Performance diagnostics per run", "text/csv"))
            .output(OutputSpec::new("summary", "Scores of every run", "application/json"))
    }

    pub fn descriptor(model: Arc<dyn ModelAdapter>) -> ProcessDescriptor {
        ProcessDescriptor::new(MODEL_SIMULATION, "Model simulation", Self::schema(), Self::new(model))
            .with_description("Run the hydrological model once for each parameter set")
    }
}

#[async_trait]
impl ProcessHandler for ModelSimulation {
    async fn run(&self, ctx: &JobContext, inputs: &ProcessInputs) -> RvResult<()> {
        let base = model_context(inputs)?;
        let sets = inputs.float_lists("params");
        ctx.progress(1, "Inputs are read");

        let total = sets.len();
        let mut runs = Vec::with_capacity(total);
        for (i, params) in sets.iter().enumerate() {
            ctx.checkpoint()?;
            let label = if total == 1 {
                base.run_label.clone()
            } else {
                format!("{}-{:02}", base.run_label, i + 1)
            };
            let run_ctx = base.for_run(label.clone());

            let result = self
                .model
                .evaluate(&run_ctx, &ParameterVector::new(params.to_vec()), ctx)
                .await?;
            ctx.checkpoint()?;

            info!(job_id = %ctx.job_id(), run = %label, score = result.score, "model run finished");
            runs.push(json!({
                "run": label,
                "params": params,
                "score": result.score,
                "metrics": result.metrics,
            }));
            ctx.progress(step_percent(i + 1, total), format!("Model run {} of {total} finished", i + 1));
        }

        let summary = json!({
            "objective": base.objective,
            "runs": runs,
        });
        ctx.write("summary.json", serde_json::to_vec_pretty(&summary)?).await?;
        Ok(())
    }

    fn validate(&self, inputs: &ProcessInputs) -> RvResult<()> {
        validate_model_inputs(inputs)
    }
}
