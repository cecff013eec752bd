//! Per-job execution context handed to work functions.

use async_trait::async_trait;
use parking_lot::RwLock;
use rv_store::{ArtifactSink, JobArtifacts};
use rv_types::{ArtifactRef, CalibrationProgress, Job, JobId, RvError, RvResult, StoreResult};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// What a running work function sees of its job: the artifact sink,
/// progress reporting, and the cancellation/timeout checkpoint.
///
/// Artifacts written through the context are recorded on the job as soon
/// as they are stored, so they stay retrievable if the job later fails.
#[derive(Clone)]
pub struct JobContext {
    job_id: JobId,
    record: Arc<RwLock<Job>>,
    artifacts: JobArtifacts,
    cancel: CancellationToken,
    deadline: Option<(Instant, Duration)>,
}

impl JobContext {
    pub(crate) fn new(
        record: Arc<RwLock<Job>>,
        artifacts: JobArtifacts,
        cancel: CancellationToken,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            job_id: artifacts.job_id(),
            record,
            artifacts,
            cancel,
            deadline: timeout.map(|t| (Instant::now() + t, t)),
        }
    }

    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Fails with `Cancelled` once cancellation was requested and with
    /// `TimedOut` once the job's deadline has passed.
    pub fn checkpoint(&self) -> RvResult<()> {
        if self.cancel.is_cancelled() {
            return Err(RvError::Cancelled);
        }
        if let Some((deadline, timeout)) = self.deadline {
            if Instant::now() >= deadline {
                return Err(RvError::TimedOut {
                    timeout_seconds: timeout.as_secs(),
                });
            }
        }
        Ok(())
    }

    pub fn progress(&self, percent: u8, message: impl Into<String>) {
        let message = message.into();
        debug!(job_id = %self.job_id, percent, message = %message, "progress");
        self.record.write().set_progress(percent, message);
    }

    pub fn update_calibration(&self, progress: CalibrationProgress) {
        let mut record = self.record.write();
        if !record.status.is_terminal() {
            record.calibration = Some(progress);
        }
    }
}

#[async_trait]
impl ArtifactSink for JobContext {
    async fn write(&self, name: &str, bytes: Vec<u8>) -> StoreResult<ArtifactRef> {
        let artifact = self.artifacts.write(name, bytes).await?;
        self.record.write().record_artifact(artifact.clone());
        Ok(artifact)
    }
}
