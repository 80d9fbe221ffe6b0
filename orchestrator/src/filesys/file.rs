//! File operations

use std::path::{Path, PathBuf};

use serde::{de::DeserializeOwned, Serialize};
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::errors::OrchestratorError;

/// A file wrapper with path
#[derive(Debug, Clone)]
pub struct File {
    path: PathBuf,
}

impl File {
    /// Create a new file reference
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Get the file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Check if the file exists
    pub async fn exists(&self) -> bool {
        fs::metadata(&self.path)
            .await
            .map(|m| m.is_file())
            .unwrap_or(false)
    }

    /// Read file contents as string
    pub async fn read_string(&self) -> Result<String, OrchestratorError> {
        Ok(fs::read_to_string(&self.path).await?)
    }

    /// Read file contents as bytes
    pub async fn read_bytes(&self) -> Result<Vec<u8>, OrchestratorError> {
        Ok(fs::read(&self.path).await?)
    }

    /// Read file as JSON
    pub async fn read_json<T: DeserializeOwned>(&self) -> Result<T, OrchestratorError> {
        let contents = self.read_string().await?;
        let value = serde_json::from_str(&contents)?;
        Ok(value)
    }

    /// Write JSON to file atomically
    pub async fn write_json<T: Serialize>(&self, value: &T) -> Result<(), OrchestratorError> {
        let contents = serde_json::to_vec_pretty(value)?;
        self.write_atomic(&contents).await
    }

    /// Create the file exclusively, failing with `AlreadyExists` if it exists.
    ///
    /// The contents are written to a temporary sibling first and hard-linked
    /// into place, so the file never appears partially written.
    pub async fn create_new(&self, contents: &[u8]) -> Result<(), OrchestratorError> {
        self.ensure_parent().await?;

        let temp_path = self.sibling(&format!("{}.tmp", uuid::Uuid::new_v4().simple()));
        let mut file = fs::File::create(&temp_path).await?;
        let written = async {
            file.write_all(contents).await?;
            file.sync_all().await
        }
        .await;
        drop(file);

        let linked = match written {
            Ok(()) => fs::hard_link(&temp_path, &self.path).await,
            Err(e) => Err(e),
        };
        let _ = fs::remove_file(&temp_path).await;
        Ok(linked?)
    }

    /// Path next to this file, named `.<file name>.<suffix>`
    pub fn sibling(&self, suffix: &str) -> PathBuf {
        let file_name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "state".to_string());
        self.path.with_file_name(format!(".{}.{}", file_name, suffix))
    }

    /// Copy this file to `dest`, creating the destination's parent directories
    pub async fn copy_to(&self, dest: &Path) -> Result<u64, OrchestratorError> {
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).await?;
        }
        Ok(fs::copy(&self.path, dest).await?)
    }

    /// Delete the file
    pub async fn delete(&self) -> Result<(), OrchestratorError> {
        match fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Atomic write using a temporary sibling file and rename.
    ///
    /// Readers observe either the previous contents or the new contents,
    /// never a partial write.
    pub async fn write_atomic(&self, contents: &[u8]) -> Result<(), OrchestratorError> {
        self.ensure_parent().await?;

        let temp_path = self.sibling(&format!("{}.tmp", std::process::id()));

        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(contents).await?;
        file.sync_all().await?;
        drop(file);

        fs::rename(&temp_path, &self.path).await?;
        Ok(())
    }

    async fn ensure_parent(&self) -> Result<(), OrchestratorError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }
        Ok(())
    }
}
