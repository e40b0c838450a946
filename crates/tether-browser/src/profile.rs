use crate::Result;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// A browser profile directory under the managed config root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagedProfile {
    path: PathBuf,
}

impl ManagedProfile {
    /// Use the profile at `path`, creating the directory if needed
    pub fn ensure(path: PathBuf) -> Result<Self> {
        if !path.exists() {
            tracing::debug!("Creating profile directory {:?}", path);
            std::fs::create_dir_all(&path)?;
        }
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file(&self, name: &str) -> PathBuf {
        self.path.join(name)
    }
}

/// Best-effort delete: one retry after `retry_delay`, then give up quietly.
/// Returns whether the directory is gone.
pub async fn remove_profile(path: &Path, retry_delay: Duration) -> bool {
    if !path.exists() {
        return true;
    }

    for attempt in 0..2 {
        if attempt > 0 {
            tokio::time::sleep(retry_delay).await;
        }
        match tokio::fs::remove_dir_all(path).await {
            Ok(()) => {
                tracing::debug!("Removed profile {:?}", path);
                return true;
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return true,
            Err(e) => tracing::debug!("Failed to remove profile {:?}: {}", path, e),
        }
    }

    false
}
