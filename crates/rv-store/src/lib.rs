//! # rv-store
//!
//! Append-only artifact storage for Rivulet jobs.
//!
//! Provides the [`ArtifactStore`] trait with in-memory and filesystem
//! backends, plus [`JobArtifacts`], a job-scoped writer that retries
//! transient I/O faults.

mod filesystem;
mod memory;
mod sink;

pub use filesystem::FsArtifactStore;
pub use memory::MemoryArtifactStore;
pub use sink::{ArtifactSink, JobArtifacts, RetryPolicy};

use async_trait::async_trait;
use rv_types::{ArtifactRef, JobId, Locator, StoreResult};

/// Persistent, append-only storage for job artifacts.
///
/// A `(job_id, name)` pair is written at most once; a second `put` fails
/// with `StoreError::AlreadyExists`. An artifact is visible to `get` and
/// `list` only once its `put` has returned.
#[async_trait]
pub trait ArtifactStore: Send + Sync + std::fmt::Debug {
    async fn put(&self, job_id: JobId, name: &str, bytes: Vec<u8>) -> StoreResult<ArtifactRef>;

    async fn get(&self, locator: &Locator) -> StoreResult<Vec<u8>>;

    async fn list(&self, job_id: JobId) -> StoreResult<Vec<Locator>>;

    /// Backend name, for logging.
    fn name(&self) -> &str;
}
