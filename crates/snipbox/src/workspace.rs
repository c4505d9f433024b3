//! Per-job workspaces
//!
//! Every job gets a fresh, uniquely named directory under the configured
//! temporary root. The [`WorkspacePool`] bounds how many exist at once; the
//! permit travels with the [`Workspace`] and is released when it is dropped.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::job::Language;

/// Stem of every file written inside a workspace
const SOURCE_STEM: &str = "main";
const BINARY_NAME: &str = "program";
const ASSEMBLY_NAME: &str = "program.s";
const VALGRIND_LOG_NAME: &str = "valgrind.log";

#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("no free job slot within {0:?}")]
    AtCapacity(Duration),

    #[error("workspace pool is closed")]
    PoolClosed,

    #[error("failed to create workspace {path}: {source}")]
    Create {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("workspace I/O error: {0}")]
    Io(#[from] io::Error),
}

/// A job's private directory
///
/// # Cleanup
///
/// Call [`destroy()`](Self::destroy) once the job is finished. Dropping a
/// workspace that was not destroyed removes the directory synchronously and
/// logs a warning; that path exists so a cancelled job still leaves nothing
/// behind.
#[derive(Debug)]
pub struct Workspace {
    id: Uuid,
    path: PathBuf,
    destroyed: bool,
    _permit: Option<OwnedSemaphorePermit>,
}

impl Workspace {
    /// Create a fresh workspace directory under `root`
    #[instrument]
    pub async fn create(root: &Path) -> Result<Self, WorkspaceError> {
        tokio::fs::create_dir_all(root)
            .await
            .map_err(|source| WorkspaceError::Create {
                path: root.to_path_buf(),
                source,
            })?;

        let id = Uuid::new_v4();
        let path = root.join(format!("job-{id}"));
        // create_dir, not create_dir_all: an existing directory is an error
        tokio::fs::create_dir(&path)
            .await
            .map_err(|source| WorkspaceError::Create {
                path: path.clone(),
                source,
            })?;

        debug!(path = %path.display(), "workspace created");

        Ok(Self {
            id,
            path,
            destroyed: false,
            _permit: None,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Directory all tools run in
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Where the submitted source lives
    pub fn source_path(&self, language: Language) -> PathBuf {
        self.path
            .join(format!("{SOURCE_STEM}.{}", language.extension()))
    }

    /// Where the compiled executable is written
    pub fn binary_path(&self) -> PathBuf {
        self.path.join(BINARY_NAME)
    }

    /// Where generated assembly is written
    pub fn assembly_path(&self) -> PathBuf {
        self.path.join(ASSEMBLY_NAME)
    }

    /// Where valgrind writes its report
    pub fn valgrind_log_path(&self) -> PathBuf {
        self.path.join(VALGRIND_LOG_NAME)
    }

    /// Write the job's source into the workspace
    #[instrument(skip(self, source))]
    pub async fn write_source(
        &self,
        language: Language,
        source: &str,
    ) -> Result<PathBuf, WorkspaceError> {
        let path = self.source_path(language);
        tokio::fs::write(&path, source).await?;
        debug!(path = %path.display(), len = source.len(), "wrote source");
        Ok(path)
    }

    /// Remove host paths of this workspace from tool output
    pub fn scrub(&self, text: &str) -> String {
        let prefix = format!("{}/", self.path.display());
        text.replace(&prefix, "")
            .replace(&*self.path.to_string_lossy(), ".")
    }

    /// Remove the workspace directory.
    ///
    /// Idempotent: a second call, or a directory that is already gone, is not
    /// an error.
    #[instrument(skip(self), fields(path = %self.path.display()))]
    pub async fn destroy(&mut self) -> Result<(), WorkspaceError> {
        if self.destroyed {
            return Ok(());
        }

        match tokio::fs::remove_dir_all(&self.path).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                warn!(error = %e, "failed to remove workspace");
                return Err(e.into());
            }
        }

        self.destroyed = true;
        debug!("workspace destroyed");
        Ok(())
    }

    /// Check whether the directory has been removed
    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    /// Attach a pool permit to this workspace
    pub(crate) fn with_permit(mut self, permit: OwnedSemaphorePermit) -> Self {
        self._permit = Some(permit);
        self
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if self.destroyed {
            return;
        }

        warn!(
            path = %self.path.display(),
            "workspace dropped without destroy(), removing synchronously"
        );
        match std::fs::remove_dir_all(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), error = %e, "workspace removal failed"),
        }
    }
}

/// Bounded source of workspaces
///
/// The pool's capacity is the global cap on jobs in flight. A caller that
/// cannot get a slot within the acquire timeout is refused instead of
/// queuing without bound.
#[derive(Debug, Clone)]
pub struct WorkspacePool {
    root: PathBuf,
    capacity: usize,
    acquire_timeout: Duration,
    semaphore: Arc<Semaphore>,
}

impl WorkspacePool {
    /// Create a new pool
    pub fn new(root: impl Into<PathBuf>, capacity: usize, acquire_timeout: Duration) -> Self {
        Self {
            root: root.into(),
            capacity,
            acquire_timeout,
            semaphore: Arc::new(Semaphore::new(capacity)),
        }
    }

    /// Acquire a slot and create a workspace in it
    #[instrument(skip(self))]
    pub async fn acquire(&self) -> Result<Workspace, WorkspaceError> {
        let permit = tokio::time::timeout(
            self.acquire_timeout,
            self.semaphore.clone().acquire_owned(),
        )
        .await
        .map_err(|_| WorkspaceError::AtCapacity(self.acquire_timeout))?
        .map_err(|_| WorkspaceError::PoolClosed)?;

        debug!(available = self.available(), "acquired job slot");

        let workspace = Workspace::create(&self.root).await?;
        Ok(workspace.with_permit(permit))
    }

    /// Directory under which workspaces are created
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Number of free slots
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Total number of slots
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_and_destroy() {
        let root = tempfile::tempdir().unwrap();
        let mut workspace = Workspace::create(root.path()).await.unwrap();
        assert!(workspace.path().is_dir());
        assert!(workspace.path().starts_with(root.path()));

        workspace.destroy().await.unwrap();
        assert!(!workspace.path().exists());
        assert!(workspace.is_destroyed());

        // second destroy is a no-op
        workspace.destroy().await.unwrap();
    }

    #[tokio::test]
    async fn destroy_tolerates_missing_directory() {
        let root = tempfile::tempdir().unwrap();
        let mut workspace = Workspace::create(root.path()).await.unwrap();
        std::fs::remove_dir_all(workspace.path()).unwrap();
        assert!(workspace.destroy().await.is_ok());
    }

    #[tokio::test]
    async fn drop_removes_directory() {
        let root = tempfile::tempdir().unwrap();
        let workspace = Workspace::create(root.path()).await.unwrap();
        workspace
            .write_source(Language::C, "int main(void) { return 0; }")
            .await
            .unwrap();
        let path = workspace.path().to_path_buf();
        drop(workspace);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn workspaces_are_distinct() {
        let root = tempfile::tempdir().unwrap();
        let mut a = Workspace::create(root.path()).await.unwrap();
        let mut b = Workspace::create(root.path()).await.unwrap();
        assert_ne!(a.path(), b.path());
        assert_ne!(a.id(), b.id());
        a.destroy().await.unwrap();
        b.destroy().await.unwrap();
    }

    #[tokio::test]
    async fn file_names() {
        let root = tempfile::tempdir().unwrap();
        let mut workspace = Workspace::create(root.path()).await.unwrap();
        assert!(workspace.source_path(Language::C).ends_with("main.c"));
        assert!(workspace.source_path(Language::Cpp).ends_with("main.cpp"));
        assert!(workspace.binary_path().ends_with("program"));
        assert!(workspace.assembly_path().ends_with("program.s"));

        let written = workspace
            .write_source(Language::Cpp, "int main() {}")
            .await
            .unwrap();
        assert_eq!(std::fs::read_to_string(written).unwrap(), "int main() {}");
        workspace.destroy().await.unwrap();
    }

    #[tokio::test]
    async fn scrub_removes_host_paths() {
        let root = tempfile::tempdir().unwrap();
        let mut workspace = Workspace::create(root.path()).await.unwrap();
        let line = format!(
            "{}/main.c:3:5: error: expected ';'",
            workspace.path().display()
        );
        assert_eq!(workspace.scrub(&line), "main.c:3:5: error: expected ';'");
        workspace.destroy().await.unwrap();
    }

    #[tokio::test]
    async fn pool_releases_slot_on_drop() {
        let root = tempfile::tempdir().unwrap();
        let pool = WorkspacePool::new(root.path(), 2, Duration::from_millis(50));
        assert_eq!(pool.available(), 2);

        let mut first = pool.acquire().await.unwrap();
        assert_eq!(pool.available(), 1);
        first.destroy().await.unwrap();
        drop(first);
        assert_eq!(pool.available(), 2);
    }

    #[tokio::test]
    async fn pool_refuses_when_full() {
        let root = tempfile::tempdir().unwrap();
        let pool = WorkspacePool::new(root.path(), 1, Duration::from_millis(20));

        let mut held = pool.acquire().await.unwrap();
        let refused = pool.acquire().await;
        assert!(matches!(refused, Err(WorkspaceError::AtCapacity(_))));

        held.destroy().await.unwrap();
        drop(held);
        let mut next = pool.acquire().await.unwrap();
        next.destroy().await.unwrap();
    }
}
