use async_trait::async_trait;
use rv_model::ModelAdapter;
use rv_optimizer::{DdsConfig, DdsSearch, SearchStrategy};
use rv_store::ArtifactSink;
use rv_types::{
    validation_error, Bounds, CalibrationProgress, InputSpec, ModelError, OptimizerError,
    OutputSpec, ParameterVector, ProcessInputs, ProcessSchema, RvError, RvResult,
};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info};

use super::{
    model_context, objective, step_percent, validate_model_inputs, with_model_inputs,
    MODEL_CALIBRATION,
};
use crate::context::JobContext;
use crate::registry::{ProcessDescriptor, ProcessHandler};

/// Hard cap on the evaluation budget of one calibration.
const MAX_EVALUATIONS: f64 = 100_000.0;

/// Calibrate model parameters with Dynamically Dimensioned Search.
#[derive(Debug, Clone)]
pub struct ModelCalibration {
    model: Arc<dyn ModelAdapter>,
    default_max_evals: usize,
}

impl ModelCalibration {
    pub fn new(model: Arc<dyn ModelAdapter>, default_max_evals: usize) -> Self {
        Self {
            model,
            default_max_evals: default_max_evals.max(1),
        }
    }

    pub fn schema() -> ProcessSchema {
        with_model_inputs(ProcessSchema::new())
            .input(
                InputSpec::float_list("params")
                    .title("Initial parameter set")
                    .required(),
            )
            .input(
                InputSpec::float_list("lowerBounds")
                    .title("Lower bound of every parameter")
                    .required(),
            )
            .input(
                InputSpec::float_list("upperBounds")
                    .title("Upper bound of every parameter")
                    .required(),
            )
            .input(
                InputSpec::string("algorithm")
                    .title("Optimization algorithm")
                    .one_of(&["DDS"])
                    .with_default(json!("DDS")),
            )
            .input(
                InputSpec::integer("MaxEvals")
                    .title("Maximum number of model evaluations")
                    .range(1.0, MAX_EVALUATIONS),
            )
            .input(
                InputSpec::integer("random_seed")
                    .title("Seed of the random number generator")
                    .at_least(0.0),
            )
            .output(OutputSpec::new("diagnostics", "Diagnostics of every evaluation", "text/csv"))
            .output(OutputSpec::new(
                "calibration",
                "Best parameters, score and search history",
                "application/json",
            ))
    }

    pub fn descriptor(model: Arc<dyn ModelAdapter>, default_max_evals: usize) -> ProcessDescriptor {
        ProcessDescriptor::new(
            MODEL_CALIBRATION,
            "Model calibration",
            Self::schema(),
            Self::new(model, default_max_evals),
        )
        .with_description("Calibrate model parameters against observations with DDS")
    }

    fn search_config(&self, inputs: &ProcessInputs) -> RvResult<DdsConfig> {
        let bounds = Bounds::new(
            inputs.float_list("lowerBounds")?.to_vec(),
            inputs.float_list("upperBounds")?.to_vec(),
        )?;
        let initial = ParameterVector::new(inputs.float_list("params")?.to_vec());
        let budget = match inputs.get("MaxEvals") {
            Some(_) => inputs.integer("MaxEvals")? as usize,
            None => self.default_max_evals,
        };

        let mut config = DdsConfig::new(initial, bounds, budget)
            .with_direction(objective(inputs)?.direction);
        if inputs.contains("random_seed") {
            config = config.with_seed(inputs.integer("random_seed")? as u64);
        }
        config
            .validate()
            .map_err(|e| validation_error!("{e}"))?;
        Ok(config)
    }
}

fn progress_of(search: &DdsSearch) -> CalibrationProgress {
    let state = search.state();
    CalibrationProgress {
        evaluations: state.evaluations,
        budget: state.budget,
        best_score: state.best_score(),
        best_vector: state.best_vector.as_ref().map(|v| v.values().to_vec()),
        seed: state.seed,
    }
}

#[async_trait]
impl ProcessHandler for ModelCalibration {
    async fn run(&self, ctx: &JobContext, inputs: &ProcessInputs) -> RvResult<()> {
        let base = model_context(inputs)?;
        let mut search = DdsSearch::new(self.search_config(inputs)?)?;
        let budget = search.config().budget;
        ctx.progress(1, "Inputs are read");
        ctx.update_calibration(progress_of(&search));
        info!(
            job_id = %ctx.job_id(),
            budget,
            seed = search.seed(),
            objective = %base.objective.metric,
            "calibration started"
        );

        let mut best_run = None;
        while let Some(candidate) = search.suggest() {
            ctx.checkpoint()?;
            let evaluation = search.state().evaluations + 1;
            let run_label = format!("{}-eval-{evaluation:04}", base.run_label);
            let run_ctx = base.for_run(run_label.clone());

            let result = match self.model.evaluate(&run_ctx, &candidate, ctx).await {
                Ok(result) => result,
                Err(ModelError::Storage(e)) => return Err(RvError::Storage(e)),
                Err(e) => {
                    return Err(OptimizerError::Evaluation {
                        evaluation,
                        message: e.to_string(),
                    }
                    .into())
                }
            };
            // A cancelled or timed-out job discards the in-flight result.
            ctx.checkpoint()?;

            let score = result.score;
            if search.report(result)? {
                best_run = Some(run_label);
            }
            debug!(job_id = %ctx.job_id(), evaluation, score, "evaluation reported");
            ctx.update_calibration(progress_of(&search));
            ctx.progress(
                step_percent(evaluation, budget),
                format!("Evaluation {evaluation} of {budget} finished"),
            );
        }

        let outcome = search.into_outcome()?;
        info!(
            job_id = %ctx.job_id(),
            best_score = outcome.best_result.score,
            evaluations = outcome.evaluations,
            "calibration finished"
        );
        let report = json!({
            "algorithm": "DDS",
            "objective": base.objective,
            "seed": outcome.seed,
            "budget": budget,
            "evaluations": outcome.evaluations,
            "best_vector": outcome.best_vector,
            "calibparams": outcome.best_vector.to_csv_line(),
            "best_score": outcome.best_result.score,
            "best_metrics": outcome.best_result.metrics,
            "best_run": best_run,
            "history": outcome.history,
        });
        ctx.write("calibration.json", serde_json::to_vec_pretty(&report)?)
            .await?;
        Ok(())
    }

    fn validate(&self, inputs: &ProcessInputs) -> RvResult<()> {
        validate_model_inputs(inputs)?;
        self.search_config(inputs).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ProcessRegistry;
    use crate::scheduler::{Scheduler, SchedulerConfig};
    use rv_model::FnModel;
    use rv_store::{ArtifactStore, MemoryArtifactStore, RetryPolicy};
    use rv_types::{JobErrorKind, JobStatus};
    use serde_json::Value;
    use std::collections::BTreeMap;
    use std::time::Duration;

    fn scheduler(model: FnModel) -> (Scheduler, Arc<MemoryArtifactStore>) {
        let store = Arc::new(MemoryArtifactStore::new());
        let registry = ProcessRegistry::builder()
            .register(ModelCalibration::descriptor(Arc::new(model), 50))
            .build()
            .unwrap();
        let config = SchedulerConfig {
            workers: 2,
            job_timeout: None,
            retry: RetryPolicy::no_retry(),
        };
        (Scheduler::new(Arc::new(registry), store.clone(), config), store)
    }

    fn paraboloid() -> FnModel {
        FnModel::scalar("DIAG_NASH_SUTCLIFFE", |v| {
            -(v[0] - 0.8).powi(2) - (v[1] - 0.2).powi(2)
        })
    }

    fn request(extra: Value) -> serde_json::Map<String, Value> {
        let mut raw = json!({
            "ts": "/data/salmon/forcing.nc",
            "algorithm": "dds",
            "params": "0.5, 0.5",
            "lowerBounds": "0, 0",
            "upperBounds": "1, 1",
            "MaxEvals": 20,
            "random_seed": 7,
        });
        if let (Some(raw), Some(extra)) = (raw.as_object_mut(), extra.as_object()) {
            raw.extend(extra.clone());
        }
        raw.as_object().cloned().unwrap()
    }

    async fn calibrate(scheduler: &Scheduler, store: &MemoryArtifactStore, raw: serde_json::Map<String, Value>) -> Value {
        let job_id = scheduler.submit(MODEL_CALIBRATION, &raw).unwrap();
        let report = tokio::time::timeout(Duration::from_secs(10), scheduler.wait(job_id))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(report.status, JobStatus::Succeeded, "{:?}", report.error);

        let artifact = report
            .artifacts
            .iter()
            .find(|a| a.name == "calibration.json")
            .unwrap();
        serde_json::from_slice(&store.get(&artifact.locator).await.unwrap()).unwrap()
    }

    #[tokio::test]
    async fn calibration_converges_reproducibly() {
        let (scheduler, store) = scheduler(paraboloid());

        let first = calibrate(&scheduler, &store, request(json!({}))).await;
        let second = calibrate(&scheduler, &store, request(json!({}))).await;

        assert_eq!(first["evaluations"], 20);
        assert_eq!(first["seed"], 7);
        assert!(first["best_score"].as_f64().unwrap() > -0.01);
        assert_eq!(first["best_vector"], second["best_vector"]);
        assert_eq!(first["history"], second["history"]);

        let history: Vec<f64> = serde_json::from_value(first["history"].clone()).unwrap();
        assert_eq!(history.len(), 20);
        assert!(history.windows(2).all(|w| w[1] >= w[0]));
    }

    #[tokio::test]
    async fn every_evaluation_leaves_diagnostics_and_progress() {
        let (scheduler, _) = scheduler(paraboloid());
        let job_id = scheduler
            .submit(MODEL_CALIBRATION, &request(json!({"MaxEvals": 5, "run_name": "salmon"})))
            .unwrap();
        let report = scheduler.wait(job_id).await.unwrap();

        let names: Vec<_> = report.artifacts.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names.len(), 6);
        assert_eq!(names[0], "salmon-eval-0001-diagnostics.csv");
        assert_eq!(names[4], "salmon-eval-0005-diagnostics.csv");
        assert_eq!(names[5], "calibration.json");

        let calibration = report.calibration.unwrap();
        assert_eq!(calibration.evaluations, 5);
        assert_eq!(calibration.budget, 5);
        assert_eq!(calibration.seed, 7);
        assert!(calibration.best_score.is_some());
        assert_eq!(report.progress.percent, 100);
    }

    #[tokio::test]
    async fn default_budget_and_entropy_seed() {
        let (scheduler, store) = scheduler(paraboloid());
        let mut raw = request(json!({}));
        raw.remove("MaxEvals");
        raw.remove("random_seed");

        let outcome = calibrate(&scheduler, &store, raw).await;
        assert_eq!(outcome["budget"], 50);
        assert!(outcome["seed"].is_u64());
    }

    #[tokio::test]
    async fn minimizing_an_error_metric() {
        let model = FnModel::new("rmse", |v: &ParameterVector| {
            let x = v.values();
            Ok(BTreeMap::from([(
                "DIAG_RMSE".to_string(),
                (x[0] - 0.8).powi(2) + (x[1] - 0.2).powi(2),
            )]))
        });
        let (scheduler, store) = scheduler(model);
        let outcome = calibrate(
            &scheduler,
            &store,
            request(json!({"objective": "DIAG_RMSE", "direction": "minimize"})),
        )
        .await;

        let history: Vec<f64> = serde_json::from_value(outcome["history"].clone()).unwrap();
        assert!(history.windows(2).all(|w| w[1] <= w[0]));
        assert!(outcome["best_score"].as_f64().unwrap() < 0.01);
    }

    #[tokio::test]
    async fn invalid_requests_are_rejected_at_submission() {
        let (scheduler, _) = scheduler(paraboloid());
        for extra in [
            json!({"lowerBounds": "0", "upperBounds": "1, 1"}),
            json!({"lowerBounds": "0, 2", "upperBounds": "1, 1"}),
            json!({"params": "1.5, 0.5"}),
            json!({"params": "0.5"}),
            json!({"algorithm": "SCE-UA"}),
            json!({"MaxEvals": 0}),
            json!({"random_seed": -1}),
            json!({"direction": "sideways"}),
        ] {
            let err = scheduler.submit(MODEL_CALIBRATION, &request(extra.clone())).unwrap_err();
            assert!(matches!(err, RvError::InvalidInput(_)), "{extra}: {err}");
        }
        assert!(scheduler.list().is_empty());
    }

    #[tokio::test]
    async fn model_failure_is_an_evaluation_error() {
        let model = FnModel::new("flaky", |v: &ParameterVector| {
            if v.values()[0] == 0.5 {
                Ok(BTreeMap::from([("DIAG_NASH_SUTCLIFFE".to_string(), 0.1)]))
            } else {
                Err("model exited with status 1".to_string())
            }
        });
        let (scheduler, _) = scheduler(model);
        let job_id = scheduler.submit(MODEL_CALIBRATION, &request(json!({}))).unwrap();
        let report = scheduler.wait(job_id).await.unwrap();

        assert_eq!(report.status, JobStatus::Failed);
        let error = report.error.unwrap();
        assert_eq!(error.kind, JobErrorKind::Evaluation);
        assert!(error.message.contains("Evaluation 2"), "{}", error.message);
        // First evaluation's diagnostics and second evaluation's error log.
        assert_eq!(report.artifacts.len(), 2);
        assert_eq!(report.calibration.unwrap().evaluations, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn cancellation_stops_between_evaluations() {
        let model = FnModel::new("slow", |v: &ParameterVector| {
            std::thread::sleep(Duration::from_millis(5));
            Ok(BTreeMap::from([("DIAG_NASH_SUTCLIFFE".to_string(), -v.values()[0])]))
        });
        let (scheduler, _) = scheduler(model);
        let job_id = scheduler
            .submit(MODEL_CALIBRATION, &request(json!({"MaxEvals": 10_000})))
            .unwrap();

        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let report = scheduler.status(job_id).unwrap();
                if report.calibration.is_some_and(|c| c.evaluations >= 3) {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        scheduler.cancel(job_id).unwrap();
        let report = scheduler.wait(job_id).await.unwrap();
        assert_eq!(report.status, JobStatus::Cancelled);
        let evaluations = report.calibration.unwrap().evaluations;
        assert!(evaluations >= 3 && evaluations < 10_000);
        assert!(!report.artifacts.iter().any(|a| a.name == "calibration.json"));
    }
}
