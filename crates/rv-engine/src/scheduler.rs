//! Job scheduler and executor.
//!
//! Accepted jobs wait in a FIFO queue. A dispatcher task takes a worker
//! permit, then the next queued job, and runs the job's work function on
//! its own task so a panic or error is caught at the worker boundary and
//! recorded on the job instead of taking the scheduler down.

use dashmap::DashMap;
use parking_lot::RwLock;
use rv_store::{ArtifactStore, JobArtifacts, RetryPolicy};
use rv_types::{
    internal_error, validation_error, ArtifactRef, Job, JobError, JobErrorKind, JobId, JobStatus,
    RvError, RvResult, StoreError,
};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::ServiceConfig;
use crate::context::JobContext;
use crate::registry::ProcessRegistry;
use crate::status::{ProcessSummary, StatusReport};

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Maximum number of concurrently running jobs.
    pub workers: usize,
    pub job_timeout: Option<Duration>,
    pub retry: RetryPolicy,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            job_timeout: None,
            retry: RetryPolicy::default(),
        }
    }
}

impl From<&ServiceConfig> for SchedulerConfig {
    fn from(config: &ServiceConfig) -> Self {
        Self {
            workers: config.workers,
            job_timeout: config.job_timeout(),
            retry: config.retry_policy(),
        }
    }
}

struct JobHandle {
    record: Arc<RwLock<Job>>,
    cancel: CancellationToken,
    /// Notified whenever the job reaches a terminal state.
    finished: Notify,
}

struct Shared {
    registry: Arc<ProcessRegistry>,
    store: Arc<dyn ArtifactStore>,
    jobs: DashMap<JobId, Arc<JobHandle>>,
    /// Job ids in submission order.
    order: RwLock<Vec<JobId>>,
    config: SchedulerConfig,
}

/// Cheap to clone; every clone drives the same queue and job table.
#[derive(Clone)]
pub struct Scheduler {
    shared: Arc<Shared>,
    queue: mpsc::UnboundedSender<JobId>,
    shutdown: CancellationToken,
}

impl Scheduler {
    /// Create the scheduler and start its dispatcher on the current tokio
    /// runtime.
    pub fn new(registry: Arc<ProcessRegistry>, store: Arc<dyn ArtifactStore>, config: SchedulerConfig) -> Self {
        let config = SchedulerConfig {
            workers: config.workers.max(1),
            ..config
        };
        info!(
            workers = config.workers,
            processes = registry.len(),
            store = store.name(),
            "starting scheduler"
        );

        let shared = Arc::new(Shared {
            registry,
            store,
            jobs: DashMap::new(),
            order: RwLock::new(Vec::new()),
            config,
        });
        let (queue, receiver) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();
        tokio::spawn(dispatch(shared.clone(), receiver, shutdown.clone()));

        Self {
            shared,
            queue,
            shutdown,
        }
    }

    pub fn registry(&self) -> &ProcessRegistry {
        &self.shared.registry
    }

    pub fn store(&self) -> Arc<dyn ArtifactStore> {
        self.shared.store.clone()
    }

    fn handle(&self, job_id: JobId) -> RvResult<Arc<JobHandle>> {
        self.shared
            .jobs
            .get(&job_id)
            .map(|entry| entry.value().clone())
            .ok_or(RvError::NotFound { job_id })
    }

    /// Validate `inputs` for `process`, record a new `Accepted` job and
    /// queue it. Nothing is recorded when validation fails.
    pub fn submit(&self, process: &str, inputs: &Map<String, Value>) -> RvResult<JobId> {
        if self.shutdown.is_cancelled() {
            return Err(internal_error!("scheduler is shutting down"));
        }
        let descriptor = self
            .shared
            .registry
            .get(process)
            .ok_or_else(|| validation_error!("unknown process {process}"))?;
        let inputs = descriptor.validate(inputs)?;

        let job = Job::new(process, inputs);
        let job_id = job.id;
        let handle = Arc::new(JobHandle {
            record: Arc::new(RwLock::new(job)),
            cancel: self.shutdown.child_token(),
            finished: Notify::new(),
        });
        self.shared.jobs.insert(job_id, handle);
        self.shared.order.write().push(job_id);

        if self.queue.send(job_id).is_err() {
            self.shared.jobs.remove(&job_id);
            self.shared.order.write().retain(|id| *id != job_id);
            return Err(internal_error!("scheduler queue is closed"));
        }

        info!(job_id = %job_id, process = %process, "job accepted");
        Ok(job_id)
    }

    pub fn status(&self, job_id: JobId) -> RvResult<StatusReport> {
        let handle = self.handle(job_id)?;
        let record = handle.record.read();
        Ok(StatusReport::from(&*record))
    }

    /// Request cancellation. A queued job is cancelled at once; a running
    /// job stops at its next checkpoint. Terminal jobs are left untouched.
    /// Returns the status right after the request.
    pub fn cancel(&self, job_id: JobId) -> RvResult<JobStatus> {
        let handle = self.handle(job_id)?;
        let (status, dequeued) = {
            let mut record = handle.record.write();
            let dequeued = match record.status {
                JobStatus::Accepted => {
                    record.cancel_requested = true;
                    record.mark_cancelled()
                }
                JobStatus::Running => {
                    record.cancel_requested = true;
                    handle.cancel.cancel();
                    false
                }
                _ => false,
            };
            (record.status, dequeued)
        };

        if dequeued {
            handle.finished.notify_waiters();
            info!(job_id = %job_id, "queued job cancelled");
        } else if status == JobStatus::Running {
            info!(job_id = %job_id, "cancellation requested");
        } else {
            debug!(job_id = %job_id, status = %status, "cancel ignored for finished job");
        }
        Ok(status)
    }

    /// Artifacts of a succeeded job.
    pub fn result(&self, job_id: JobId) -> RvResult<Vec<ArtifactRef>> {
        let handle = self.handle(job_id)?;
        let record = handle.record.read();
        if record.status != JobStatus::Succeeded {
            return Err(RvError::NotReady {
                job_id,
                status: record.status.to_string(),
            });
        }
        Ok(record.artifacts.clone())
    }

    /// Bytes of a named artifact of any job, finished or not.
    pub async fn artifact(&self, job_id: JobId, name: &str) -> RvResult<Vec<u8>> {
        let locator = {
            let handle = self.handle(job_id)?;
            let record = handle.record.read();
            record
                .artifacts
                .iter()
                .find(|a| a.name == name)
                .map(|a| a.locator.clone())
                .ok_or_else(|| StoreError::NotFound {
                    locator: format!("{job_id}/{name}"),
                })?
        };
        Ok(self.shared.store.get(&locator).await?)
    }

    /// Status reports of all jobs, in submission order.
    pub fn list(&self) -> Vec<StatusReport> {
        let order = self.shared.order.read();
        order
            .iter()
            .filter_map(|id| self.shared.jobs.get(id))
            .map(|handle| StatusReport::from(&*handle.record.read()))
            .collect()
    }

    pub fn processes(&self) -> Vec<ProcessSummary> {
        self.shared
            .registry
            .descriptors()
            .into_iter()
            .map(ProcessSummary::from)
            .collect()
    }

    /// Wait until the job reaches a terminal state.
    pub async fn wait(&self, job_id: JobId) -> RvResult<StatusReport> {
        let handle = self.handle(job_id)?;
        loop {
            let finished = handle.finished.notified();
            {
                let record = handle.record.read();
                if record.status.is_terminal() {
                    return Ok(StatusReport::from(&*record));
                }
            }
            finished.await;
        }
    }

    /// Stop dispatching, cancel queued jobs and signal running ones.
    pub fn shutdown(&self) {
        info!("scheduler shutting down");
        self.shutdown.cancel();
        for entry in self.shared.jobs.iter() {
            let cancelled = {
                let mut record = entry.record.write();
                record.status == JobStatus::Accepted && record.mark_cancelled()
            };
            if cancelled {
                entry.finished.notify_waiters();
            }
        }
    }
}

async fn dispatch(shared: Arc<Shared>, mut queue: mpsc::UnboundedReceiver<JobId>, shutdown: CancellationToken) {
    let permits = Arc::new(Semaphore::new(shared.config.workers));
    loop {
        let permit = tokio::select! {
            _ = shutdown.cancelled() => break,
            permit = permits.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };
        let job_id = tokio::select! {
            _ = shutdown.cancelled() => break,
            next = queue.recv() => match next {
                Some(job_id) => job_id,
                None => break,
            },
        };

        let Some(handle) = shared.jobs.get(&job_id).map(|entry| entry.value().clone()) else {
            continue;
        };
        // Linearized with `cancel` through the record lock.
        if !handle.record.write().mark_running() {
            debug!(job_id = %job_id, "skipping job cancelled while queued");
            continue;
        }
        tokio::spawn(run_job(shared.clone(), handle, permit));
    }
    debug!("dispatcher stopped");
}

async fn run_job(shared: Arc<Shared>, handle: Arc<JobHandle>, _permit: OwnedSemaphorePermit) {
    let (job_id, process, inputs) = {
        let record = handle.record.read();
        (record.id, record.process.clone(), record.inputs.clone())
    };
    info!(job_id = %job_id, process = %process, "job started");

    let finished = match shared.registry.get(&process) {
        Some(descriptor) => {
            let handler = descriptor.handler();
            let ctx = JobContext::new(
                handle.record.clone(),
                JobArtifacts::new(shared.store.clone(), job_id, shared.config.retry),
                handle.cancel.clone(),
                shared.config.job_timeout,
            );
            tokio::spawn(async move { handler.run(&ctx, &inputs).await })
                .await
                .map_err(worker_fault)
        }
        None => Err(JobError::new(
            JobErrorKind::Internal,
            format!("process {process} is not registered"),
        )),
    };

    let (status, error) = {
        let mut record = handle.record.write();
        match finished {
            Ok(Ok(())) => record.mark_succeeded(),
            Ok(Err(RvError::Cancelled)) => record.mark_cancelled(),
            Ok(Err(e)) => record.mark_failed(JobError::from(&e)),
            Err(fault) => record.mark_failed(fault),
        };
        (record.status, record.error.clone())
    };
    handle.finished.notify_waiters();

    match (status, error) {
        (JobStatus::Failed, Some(error)) => {
            warn!(job_id = %job_id, process = %process, kind = ?error.kind, error = %error.message, "job failed")
        }
        (status, _) => info!(job_id = %job_id, process = %process, status = %status, "job finished"),
    }
}

/// Convert a crashed or aborted work function into an error record.
fn worker_fault(fault: JoinError) -> JobError {
    if !fault.is_panic() {
        return JobError::new(JobErrorKind::Internal, "work function was aborted");
    }
    let payload = fault.into_panic();
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".to_string());
    error!(panic = %message, "work function panicked");
    JobError::new(JobErrorKind::Panicked, format!("work function panicked: {message}"))
}
