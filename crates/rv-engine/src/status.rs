//! Caller-facing renderings of jobs and processes.

use chrono::{DateTime, Utc};
use rv_types::{
    ArtifactRef, CalibrationProgress, InputSpec, Job, JobError, JobId, JobProgress, JobStatus,
    OutputSpec,
};
use serde::{Deserialize, Serialize};

use crate::registry::ProcessDescriptor;

/// Snapshot of one job as reported to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    pub job_id: JobId,
    pub process: String,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub progress: JobProgress,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JobError>,
    /// Artifacts written so far, in write order. Populated for failed and
    /// cancelled jobs too.
    pub artifacts: Vec<ArtifactRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub calibration: Option<CalibrationProgress>,
}

impl From<&Job> for StatusReport {
    fn from(job: &Job) -> Self {
        Self {
            job_id: job.id,
            process: job.process.clone(),
            status: job.status,
            created_at: job.created_at,
            started_at: job.started_at,
            finished_at: job.finished_at,
            progress: job.progress.clone(),
            error: job.error.clone(),
            artifacts: job.artifacts.clone(),
            calibration: job.calibration.clone(),
        }
    }
}

/// Public description of a registered process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessSummary {
    pub name: String,
    pub title: String,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub description: String,
    pub inputs: Vec<InputSpec>,
    pub outputs: Vec<OutputSpec>,
}

impl From<&ProcessDescriptor> for ProcessSummary {
    fn from(descriptor: &ProcessDescriptor) -> Self {
        Self {
            name: descriptor.name.clone(),
            title: descriptor.title.clone(),
            description: descriptor.description.clone(),
            inputs: descriptor.schema.inputs.clone(),
            outputs: descriptor.schema.outputs.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rv_types::{JobErrorKind, ProcessInputs};

    #[test]
    fn failed_job_report_carries_error() {
        let mut job = Job::new("model-calibration", ProcessInputs::default());
        job.mark_running();
        job.mark_failed(JobError::new(JobErrorKind::ModelExecution, "model exited with 3"));

        let report = StatusReport::from(&job);
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["error"]["kind"], "model_execution");
        assert!(json.get("calibration").is_none());
    }
}
