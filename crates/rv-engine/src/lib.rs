//! Rivulet processing engine.
//!
//! Accepts named process requests, runs them as asynchronous jobs on a
//! bounded worker pool and reports their status and artifacts. The
//! `model-calibration` process drives the DDS optimizer over a hydrological
//! model; the geospatial processes are delegated to an upstream service.

pub mod config;
pub mod context;
pub mod processes;
pub mod registry;
pub mod scheduler;
pub mod service;
pub mod status;

pub use config::ServiceConfig;
pub use context::JobContext;
pub use processes::standard_registry;
pub use registry::{ProcessDescriptor, ProcessHandler, ProcessRegistry, RegistryBuilder};
pub use scheduler::{Scheduler, SchedulerConfig};
pub use status::{ProcessSummary, StatusReport};

use rv_model::{CommandModel, ModelAdapter};
use rv_store::FsArtifactStore;
use rv_types::{config_error, RvResult};
use std::sync::Arc;
use tracing::{info, warn};

/// Model adapter named by the configuration, if any.
pub fn configured_model(config: &ServiceConfig) -> RvResult<Option<Arc<dyn ModelAdapter>>> {
    let Some(command) = &config.model_command else {
        warn!("no model command configured; model processes are disabled");
        return Ok(None);
    };
    let model = CommandModel::parse(command)
        .ok_or_else(|| config_error!("model command {command:?} names no program"))?;
    info!(program = %model.program().display(), "using command model");
    Ok(Some(Arc::new(model)))
}

/// Build the scheduler the service runs: filesystem artifact store under
/// `data_dir`, the configured model and the standard processes.
///
/// Must be called from within a tokio runtime.
pub fn build_scheduler(config: &ServiceConfig) -> RvResult<Scheduler> {
    config.validate()?;
    let store = FsArtifactStore::new(&config.data_dir)?;
    let registry = standard_registry(config, configured_model(config)?)?;
    Ok(Scheduler::new(
        Arc::new(registry),
        Arc::new(store),
        SchedulerConfig::from(config),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use processes::{MODEL_CALIBRATION, MODEL_SIMULATION};
    use rv_types::JobStatus;
    use serde_json::json;

    #[tokio::test]
    async fn scheduler_without_model_or_upstream() {
        let dir = tempfile::tempdir().unwrap();
        let config = ServiceConfig {
            data_dir: dir.path().join("artifacts"),
            ..ServiceConfig::default()
        };
        let scheduler = build_scheduler(&config).unwrap();
        assert!(scheduler.processes().is_empty());
        assert_eq!(scheduler.store().name(), "filesystem");
    }

    #[test]
    fn blank_model_command_is_rejected() {
        let config = ServiceConfig {
            model_command: Some("   ".to_string()),
            ..ServiceConfig::default()
        };
        assert!(configured_model(&config).is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn command_model_simulation_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("model.sh");
        std::fs::write(
            &script,
            "test -f \"$1\" || exit 3\nprintf 'DIAG_NASH_SUTCLIFFE,DIAG_RMSE\\n0.71,3.2\\n' > diagnostics.csv\n",
        )
        .unwrap();
        let config = ServiceConfig {
            data_dir: dir.path().join("artifacts"),
            model_command: Some(format!("sh {}", script.display())),
            ..ServiceConfig::default()
        };
        let scheduler = build_scheduler(&config).unwrap();
        let names: Vec<_> = scheduler.processes().into_iter().map(|p| p.name).collect();
        assert_eq!(names, [MODEL_CALIBRATION, MODEL_SIMULATION]);

        let raw = json!({"ts": "/data/salmon/forcing.nc", "params": "0.5, 1.0"});
        let job_id = scheduler
            .submit(MODEL_SIMULATION, raw.as_object().unwrap())
            .unwrap();
        let report = scheduler.wait(job_id).await.unwrap();
        assert_eq!(report.status, JobStatus::Succeeded, "{:?}", report.error);

        let diagnostics = scheduler
            .artifact(job_id, "run-diagnostics.csv")
            .await
            .unwrap();
        assert!(String::from_utf8(diagnostics).unwrap().contains("0.71"));
        assert!(dir.path().join("artifacts").join(job_id.to_string()).is_dir());
    }
}
