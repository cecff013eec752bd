//! Job-scoped artifact writers.

use async_trait::async_trait;
use rv_types::{ArtifactRef, JobId, StoreResult};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::ArtifactStore;

/// Somewhere a single job can write its named artifacts.
#[async_trait]
pub trait ArtifactSink: Send + Sync {
    async fn write(&self, name: &str, bytes: Vec<u8>) -> StoreResult<ArtifactRef>;
}

/// Bounded retry with exponential backoff for transient storage faults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(50),
        }
    }
}

impl RetryPolicy {
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff: Duration::ZERO,
        }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        self.initial_backoff * 2u32.saturating_pow(attempt.saturating_sub(1))
    }
}

/// Writes artifacts for one job, retrying transient faults.
#[derive(Debug, Clone)]
pub struct JobArtifacts {
    store: Arc<dyn ArtifactStore>,
    job_id: JobId,
    retry: RetryPolicy,
}

impl JobArtifacts {
    pub fn new(store: Arc<dyn ArtifactStore>, job_id: JobId, retry: RetryPolicy) -> Self {
        Self {
            store,
            job_id,
            retry,
        }
    }

    pub fn job_id(&self) -> JobId {
        self.job_id
    }
}

#[async_trait]
impl ArtifactSink for JobArtifacts {
    async fn write(&self, name: &str, bytes: Vec<u8>) -> StoreResult<ArtifactRef> {
        let mut attempt = 1;
        loop {
            match self.store.put(self.job_id, name, bytes.clone()).await {
                Ok(artifact) => return Ok(artifact),
                Err(e) if e.is_transient() && attempt < self.retry.max_attempts => {
                    let delay = self.retry.backoff(attempt);
                    warn!(
                        job_id = %self.job_id,
                        artifact = %name,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "transient storage fault, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
