use async_trait::async_trait;
use rv_types::{is_valid_artifact_name, ArtifactRef, JobId, Locator, StoreError, StoreResult};
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};
use url::Url;
use uuid::Uuid;

use crate::ArtifactStore;

/// Filesystem artifact store laid out as `{root}/{job_id}/{name}`.
///
/// Locators are `file://` URLs with the path percent-encoded. Each artifact is written to a hidden
/// partial file first and then hard-linked into place, so a reader never
/// sees a half-written artifact and an existing name is never replaced.
#[derive(Debug)]
pub struct FsArtifactStore {
    data_root: PathBuf,
}

impl FsArtifactStore {
    pub fn new<P: AsRef<Path>>(data_root: P) -> StoreResult<Self> {
        std::fs::create_dir_all(data_root.as_ref())?;
        let data_root = std::fs::canonicalize(data_root.as_ref())?;
        Ok(Self { data_root })
    }

    pub fn data_root(&self) -> &Path {
        &self.data_root
    }

    fn job_dir(&self, job_id: JobId) -> PathBuf {
        self.data_root.join(job_id.to_string())
    }

    fn locator_for(path: &Path) -> StoreResult<Locator> {
        let url = Url::from_file_path(path).map_err(|()| StoreError::InvalidLocator {
            locator: path.display().to_string(),
        })?;
        Ok(Locator::new(url.as_str()))
    }

    /// Resolve a locator to a path inside the data root.
    fn path_for(&self, locator: &Locator) -> StoreResult<PathBuf> {
        let invalid = || StoreError::InvalidLocator {
            locator: locator.to_string(),
        };
        let url = Url::parse(locator.as_str()).map_err(|_| invalid())?;
        if url.scheme() != "file" {
            return Err(invalid());
        }
        let path = url.to_file_path().map_err(|()| invalid())?;
        let escapes = path
            .components()
            .any(|c| matches!(c, Component::ParentDir | Component::CurDir));
        if escapes || !path.starts_with(&self.data_root) {
            return Err(invalid());
        }
        Ok(path)
    }
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    async fn put(&self, job_id: JobId, name: &str, bytes: Vec<u8>) -> StoreResult<ArtifactRef> {
        if !is_valid_artifact_name(name) {
            return Err(StoreError::InvalidName {
                name: name.to_string(),
            });
        }

        let dir = self.job_dir(job_id);
        tokio::fs::create_dir_all(&dir).await?;

        let target = dir.join(name);
        let partial = dir.join(format!(".{name}.{}.partial", Uuid::new_v4()));
        let size = bytes.len() as u64;
        tokio::fs::write(&partial, bytes).await?;

        let linked = tokio::fs::hard_link(&partial, &target).await;
        if let Err(e) = tokio::fs::remove_file(&partial).await {
            warn!(path = %partial.display(), error = %e, "failed to remove partial artifact");
        }
        match linked {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(StoreError::AlreadyExists {
                    job_id,
                    name: name.to_string(),
                });
            }
            Err(e) => return Err(e.into()),
        }

        debug!(job_id = %job_id, artifact = %name, bytes = size, "artifact stored");
        Ok(ArtifactRef::new(name, Self::locator_for(&target)?, size))
    }

    async fn get(&self, locator: &Locator) -> StoreResult<Vec<u8>> {
        let path = self.path_for(locator)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(StoreError::NotFound {
                locator: locator.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self, job_id: JobId) -> StoreResult<Vec<Locator>> {
        let dir = self.job_dir(job_id);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut paths = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let hidden = entry.file_name().to_string_lossy().starts_with('.');
            if !hidden && entry.file_type().await?.is_file() {
                paths.push(entry.path());
            }
        }
        paths.sort();
        paths.iter().map(|p| Self::locator_for(p)).collect()
    }

    fn name(&self) -> &str {
        "filesystem"
    }
}
