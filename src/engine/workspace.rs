use std::path::{Path, PathBuf};

use uuid::Uuid;

/// Per-run scratch directory under the scratch root. Names come from a fresh
/// UUID and the directory is created non-recursively, so a collision fails
/// instead of sharing a directory between runs.
#[derive(Debug)]
pub struct Workspace {
    id: Uuid,
    path: PathBuf,
    removed: bool,
}

impl Workspace {
    pub async fn create(root: &Path) -> std::io::Result<Self> {
        let id = Uuid::new_v4();
        let path = root.join(format!("run-{}", id.as_simple()));
        tokio::fs::create_dir(&path).await?;
        tracing::debug!(run_id = %id, workspace = %path.display(), "workspace created");
        Ok(Self {
            id,
            path,
            removed: false,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn write_file(&self, name: &str, contents: &[u8]) -> std::io::Result<PathBuf> {
        let target = self.path.join(name);
        tokio::fs::write(&target, contents).await?;
        Ok(target)
    }

    /// Deletes the whole tree. Failures are logged, never returned.
    pub async fn remove(mut self) {
        self.removed = true;
        if let Err(err) = tokio::fs::remove_dir_all(&self.path).await {
            if err.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(
                    run_id = %self.id,
                    workspace = %self.path.display(),
                    error = %err,
                    "failed to remove workspace"
                );
            }
        }
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if self.removed {
            return;
        }
        // Reached only when the owning future was dropped or panicked.
        if let Err(err) = std::fs::remove_dir_all(&self.path) {
            if err.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(
                    run_id = %self.id,
                    workspace = %self.path.display(),
                    error = %err,
                    "failed to remove abandoned workspace"
                );
            }
        }
    }
}
