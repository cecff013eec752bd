use async_trait::async_trait;
use dashmap::DashMap;
use rv_types::{is_valid_artifact_name, ArtifactRef, JobId, Locator, StoreError, StoreResult};
use std::sync::Arc;

use crate::ArtifactStore;

/// In-memory artifact store. Locators look like `mem://{job_id}/{name}`.
#[derive(Debug, Default)]
pub struct MemoryArtifactStore {
    blobs: DashMap<Locator, Arc<Vec<u8>>>,
    /// Artifacts per job, in write order.
    jobs: DashMap<JobId, Vec<ArtifactRef>>,
}

impl MemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn locator(job_id: JobId, name: &str) -> Locator {
        Locator::new(format!("mem://{job_id}/{name}"))
    }

    /// Total number of stored artifacts.
    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }
}

#[async_trait]
impl ArtifactStore for MemoryArtifactStore {
    async fn put(&self, job_id: JobId, name: &str, bytes: Vec<u8>) -> StoreResult<ArtifactRef> {
        if !is_valid_artifact_name(name) {
            return Err(StoreError::InvalidName {
                name: name.to_string(),
            });
        }

        // The job entry stays locked until the artifact is recorded, so two
        // writers of the same name cannot both succeed.
        let mut entry = self.jobs.entry(job_id).or_default();
        if entry.iter().any(|a| a.name == name) {
            return Err(StoreError::AlreadyExists {
                job_id,
                name: name.to_string(),
            });
        }

        let locator = Self::locator(job_id, name);
        let artifact = ArtifactRef::new(name, locator.clone(), bytes.len() as u64);
        self.blobs.insert(locator, Arc::new(bytes));
        entry.push(artifact.clone());
        Ok(artifact)
    }

    async fn get(&self, locator: &Locator) -> StoreResult<Vec<u8>> {
        self.blobs
            .get(locator)
            .map(|blob| blob.as_ref().clone())
            .ok_or_else(|| StoreError::NotFound {
                locator: locator.to_string(),
            })
    }

    async fn list(&self, job_id: JobId) -> StoreResult<Vec<Locator>> {
        Ok(self
            .jobs
            .get(&job_id)
            .map(|artifacts| artifacts.iter().map(|a| a.locator.clone()).collect())
            .unwrap_or_default())
    }

    fn name(&self) -> &str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[tokio::test]
    async fn put_get_list() {
        let store = MemoryArtifactStore::new();
        let job = Uuid::new_v4();

        let a = store.put(job, "diagnostics.csv", b"DIAG_RMSE\n1.0\n".to_vec()).await.unwrap();
        let b = store.put(job, "summary.json", b"{}".to_vec()).await.unwrap();

        assert_eq!(a.locator.as_str(), format!("mem://{job}/diagnostics.csv"));
        assert_eq!(a.size_bytes, 14);
        assert_eq!(store.get(&b.locator).await.unwrap(), b"{}".to_vec());
        assert_eq!(store.list(job).await.unwrap(), vec![a.locator, b.locator]);
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn write_once_per_job() {
        let store = MemoryArtifactStore::new();
        let job = Uuid::new_v4();
        store.put(job, "out.csv", vec![1]).await.unwrap();

        let err = store.put(job, "out.csv", vec![2]).await.unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists { .. }));

        // Same name under another job is a separate namespace.
        store.put(Uuid::new_v4(), "out.csv", vec![3]).await.unwrap();
        let first = store.list(job).await.unwrap();
        assert_eq!(store.get(&first[0]).await.unwrap(), vec![1]);
    }

    #[tokio::test]
    async fn unknown_locator() {
        let store = MemoryArtifactStore::new();
        let err = store.get(&Locator::new("mem://nope/x")).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
        assert!(store.list(Uuid::new_v4()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn rejects_path_like_names() {
        let store = MemoryArtifactStore::new();
        let err = store.put(Uuid::new_v4(), "../escape", vec![]).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidName { .. }));
    }
}
