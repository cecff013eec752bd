//! Job records and their lifecycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::artifact::ArtifactRef;
use crate::errors::{ModelError, OptimizerError, RvError};
use crate::process::ProcessInputs;

/// Unique job identifier
pub type JobId = Uuid;

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Accepted,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }

    /// Allowed edges: `Accepted -> Running`, `Running -> terminal`, and
    /// `Accepted -> Cancelled` for jobs cancelled while still queued.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        match (self, next) {
            (Self::Accepted, Self::Running) => true,
            (Self::Accepted, Self::Cancelled) => true,
            (Self::Running, next) => next.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Accepted => "accepted",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Classification of a job failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobErrorKind {
    InvalidInput,
    ModelExecution,
    ObjectiveMissing,
    Evaluation,
    Storage,
    Collaborator,
    TimedOut,
    Panicked,
    Internal,
}

/// Error record captured when a job fails.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobError {
    pub kind: JobErrorKind,
    pub message: String,
}

impl JobError {
    pub fn new(kind: JobErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl From<&RvError> for JobError {
    fn from(error: &RvError) -> Self {
        let kind = match error {
            RvError::InvalidInput(_) => JobErrorKind::InvalidInput,
            RvError::Model(ModelError::Execution { .. }) => JobErrorKind::ModelExecution,
            RvError::Model(ModelError::ObjectiveMissing { .. }) => JobErrorKind::ObjectiveMissing,
            RvError::Model(ModelError::Storage(_)) | RvError::Storage(_) => JobErrorKind::Storage,
            RvError::Optimizer(OptimizerError::Evaluation { .. }) => JobErrorKind::Evaluation,
            RvError::Collaborator { .. } => JobErrorKind::Collaborator,
            RvError::TimedOut { .. } => JobErrorKind::TimedOut,
            _ => JobErrorKind::Internal,
        };
        Self::new(kind, error.to_string())
    }
}

/// Coarse progress reported by a running work function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobProgress {
    pub percent: u8,
    pub message: String,
}

impl Default for JobProgress {
    fn default() -> Self {
        Self {
            percent: 0,
            message: "Process accepted".to_string(),
        }
    }
}

/// Running diagnostics of a calibration job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationProgress {
    pub evaluations: usize,
    pub budget: usize,
    pub best_score: Option<f64>,
    pub best_vector: Option<Vec<f64>>,
    pub seed: u64,
}

/// A tracked execution of one process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub process: String,
    pub inputs: ProcessInputs,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub artifacts: Vec<ArtifactRef>,
    pub error: Option<JobError>,
    pub cancel_requested: bool,
    pub progress: JobProgress,
    pub calibration: Option<CalibrationProgress>,
}

impl Job {
    pub fn new(process: impl Into<String>, inputs: ProcessInputs) -> Self {
        Self {
            id: Uuid::new_v4(),
            process: process.into(),
            inputs,
            status: JobStatus::Accepted,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            artifacts: Vec::new(),
            error: None,
            cancel_requested: false,
            progress: JobProgress::default(),
            calibration: None,
        }
    }

    /// Apply a lifecycle transition. Returns `false` and leaves the record
    /// untouched when the edge is not allowed.
    fn transition(&mut self, next: JobStatus) -> bool {
        if !self.status.can_transition_to(next) {
            return false;
        }
        self.status = next;
        if next == JobStatus::Running {
            self.started_at = Some(Utc::now());
        }
        if next.is_terminal() {
            self.finished_at = Some(Utc::now());
        }
        true
    }

    pub fn mark_running(&mut self) -> bool {
        self.transition(JobStatus::Running)
    }

    pub fn mark_succeeded(&mut self) -> bool {
        let applied = self.transition(JobStatus::Succeeded);
        if applied {
            self.progress = JobProgress {
                percent: 100,
                message: "Process succeeded".to_string(),
            };
        }
        applied
    }

    pub fn mark_failed(&mut self, error: JobError) -> bool {
        let applied = self.transition(JobStatus::Failed);
        if applied {
            self.error = Some(error);
        }
        applied
    }

    pub fn mark_cancelled(&mut self) -> bool {
        self.transition(JobStatus::Cancelled)
    }

    /// Record an artifact produced by this job; ignored once terminal.
    pub fn record_artifact(&mut self, artifact: ArtifactRef) {
        if !self.status.is_terminal() {
            self.artifacts.push(artifact);
        }
    }

    pub fn set_progress(&mut self, percent: u8, message: impl Into<String>) {
        if !self.status.is_terminal() {
            self.progress = JobProgress {
                percent: percent.min(100),
                message: message.into(),
            };
        }
    }
}
