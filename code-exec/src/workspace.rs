use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, error};
use uuid::Uuid;

use crate::{
    error::Error,
    registry::{TemplateVars, ToolchainRecipe},
    Result,
};

/// Hands out private per-request directories under a common root
#[derive(Debug, Clone)]
pub struct WorkspaceManager {
    root: PathBuf,
}

impl WorkspaceManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create a fresh workspace for one execution of `recipe`.
    pub async fn acquire(&self, recipe: &ToolchainRecipe) -> Result<Workspace> {
        fs::create_dir_all(&self.root).await.map_err(|e| {
            Error::Workspace(format!(
                "Failed to create workspace root {}: {}",
                self.root.display(),
                e
            ))
        })?;

        let id = Uuid::new_v4();
        let dir = self.root.join(format!("ws-{}", id.simple()));

        // create_dir, not create_dir_all: an existing directory is never reused
        fs::create_dir(&dir)
            .await
            .map_err(|e| Error::Workspace(format!("Failed to create workspace: {}", e)))?;

        debug!(workspace = %id, language = recipe.language(), "Acquired workspace");

        Ok(Workspace {
            id,
            source_path: dir.join(recipe.source_file_name()),
            binary_path: dir.join(recipe.stem().to_lowercase()),
            stem: recipe.stem().to_string(),
            dir,
            released: false,
        })
    }
}

/// A uniquely named directory owned by exactly one request.
///
/// Removed by [`Workspace::release`], or on drop if release was never
/// reached.
#[derive(Debug)]
pub struct Workspace {
    id: Uuid,
    dir: PathBuf,
    source_path: PathBuf,
    binary_path: PathBuf,
    stem: String,
    released: bool,
}

impl Workspace {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn source_path(&self) -> &Path {
        &self.source_path
    }

    pub async fn write_source(&self, code: &str) -> Result<()> {
        fs::write(&self.source_path, code)
            .await
            .map_err(|e| Error::Workspace(format!("Failed to write source file: {}", e)))
    }

    pub fn template_vars(&self) -> TemplateVars {
        TemplateVars {
            source: self
                .source_path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            binary: self.binary_path.clone(),
            dir: self.dir.clone(),
            stem: self.stem.clone(),
        }
    }

    /// Remove the directory and everything in it. Safe to call repeatedly.
    pub async fn release(&mut self) -> Result<()> {
        if self.released {
            return Ok(());
        }
        match fs::remove_dir_all(&self.dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => {
                return Err(Error::Workspace(format!(
                    "Failed to remove workspace {}: {}",
                    self.id, e
                )))
            }
        }
        self.released = true;
        debug!(workspace = %self.id, "Released workspace");
        Ok(())
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        match std::fs::remove_dir_all(&self.dir) {
            Ok(()) => debug!(workspace = %self.id, "Removed workspace on drop"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => error!(workspace = %self.id, "Failed to clean up workspace: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Registry;
    use std::collections::HashSet;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_acquire_and_release() -> Result<()> {
        let root = tempdir()?;
        let registry = Registry::builtin()?;
        let manager = WorkspaceManager::new(root.path());

        let mut workspace = manager.acquire(registry.resolve("java").unwrap()).await?;
        workspace.write_source("class Main {}").await?;

        assert!(workspace.dir().starts_with(root.path()));
        assert_eq!(workspace.source_path().file_name().unwrap(), "Main.java");
        assert_eq!(
            std::fs::read_to_string(workspace.source_path())?,
            "class Main {}"
        );

        workspace.release().await?;
        assert!(!workspace.dir().exists());
        // second release is a no-op
        workspace.release().await?;
        Ok(())
    }

    #[tokio::test]
    async fn test_drop_removes_directory() -> Result<()> {
        let root = tempdir()?;
        let registry = Registry::builtin()?;
        let manager = WorkspaceManager::new(root.path());

        let workspace = manager.acquire(registry.resolve("python").unwrap()).await?;
        workspace.write_source("print(1)").await?;
        let dir = workspace.dir().to_path_buf();
        drop(workspace);

        assert!(!dir.exists());
        Ok(())
    }

    #[tokio::test]
    async fn test_release_tolerates_missing_directory() -> Result<()> {
        let root = tempdir()?;
        let registry = Registry::builtin()?;
        let manager = WorkspaceManager::new(root.path());

        let mut workspace = manager.acquire(registry.resolve("bash").unwrap()).await?;
        std::fs::remove_dir_all(workspace.dir())?;
        workspace.release().await?;
        Ok(())
    }

    #[tokio::test]
    async fn test_concurrent_acquire_is_unique() -> Result<()> {
        let root = tempdir()?;
        let registry = std::sync::Arc::new(Registry::builtin()?);
        let manager = WorkspaceManager::new(root.path());

        let mut handles = vec![];
        for _ in 0..32 {
            let manager = manager.clone();
            let registry = registry.clone();
            handles.push(tokio::spawn(async move {
                manager.acquire(registry.resolve("python").unwrap()).await
            }));
        }

        let mut workspaces = vec![];
        for handle in handles {
            workspaces.push(handle.await.unwrap()?);
        }
        let dirs: HashSet<_> = workspaces.iter().map(|w| w.dir().to_path_buf()).collect();
        assert_eq!(dirs.len(), 32);

        drop(workspaces);
        assert_eq!(std::fs::read_dir(root.path())?.count(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_unwritable_root_is_workspace_error() -> Result<()> {
        let root = tempdir()?;
        let file = root.path().join("not-a-dir");
        std::fs::write(&file, "")?;
        let registry = Registry::builtin()?;
        let manager = WorkspaceManager::new(&file);

        let result = manager.acquire(registry.resolve("python").unwrap()).await;
        assert!(matches!(result, Err(Error::Workspace(_))));
        Ok(())
    }
}
