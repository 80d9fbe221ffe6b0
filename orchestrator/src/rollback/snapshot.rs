//! Rollback point records and configuration capture

use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::OrchestratorError;
use crate::filesys::dir::Dir;
use crate::filesys::file::File;
use crate::runtime::ContainerState;
use crate::utils::sha256_hash;

/// Which services a rollback point covers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RollbackTargets {
    All,
    Services(Vec<String>),
}

impl RollbackTargets {
    pub fn from_list(services: Vec<String>) -> Self {
        if services.is_empty() {
            RollbackTargets::All
        } else {
            RollbackTargets::Services(services)
        }
    }

    pub fn describe(&self) -> String {
        match self {
            RollbackTargets::All => "all".to_string(),
            RollbackTargets::Services(services) => services.join(","),
        }
    }
}

/// A configuration file captured in a rollback point
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigFileEntry {
    /// Path relative to the project root
    pub path: PathBuf,
    pub sha256: String,
    pub size: u64,
}

/// `metadata.json` of a rollback point
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollbackMetadata {
    pub id: String,
    pub description: String,
    pub targets: RollbackTargets,
    pub created_at: DateTime<Utc>,
    pub files: Vec<ConfigFileEntry>,
}

/// `state.json` of a rollback point
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub captured_at: DateTime<Utc>,
    pub containers: Vec<ContainerState>,
}

impl StateSnapshot {
    /// Services that were running when captured
    pub fn running(&self) -> Vec<String> {
        self.containers
            .iter()
            .filter(|c| c.running)
            .map(|c| c.service.clone())
            .collect()
    }
}

/// Listing entry for a rollback point
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollbackSummary {
    pub id: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub targets: String,
    pub files: usize,
}

impl From<&RollbackMetadata> for RollbackSummary {
    fn from(metadata: &RollbackMetadata) -> Self {
        Self {
            id: metadata.id.clone(),
            description: metadata.description.clone(),
            created_at: metadata.created_at,
            targets: metadata.targets.describe(),
            files: metadata.files.len(),
        }
    }
}

/// On-disk layout of one rollback point
#[derive(Debug, Clone)]
pub struct PointDir {
    dir: Dir,
}

impl PointDir {
    pub fn new(dir: Dir) -> Self {
        Self { dir }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn metadata_file(&self) -> File {
        self.dir.file("metadata.json")
    }

    pub fn state_file(&self) -> File {
        self.dir.file("state.json")
    }

    pub fn config_dir(&self) -> Dir {
        self.dir.subdir("config")
    }
}

/// A snapshot path must stay under both the project root and the point directory
pub fn check_snapshot_path(path: &Path) -> Result<(), String> {
    if path.as_os_str().is_empty() {
        return Err("snapshot path is empty".to_string());
    }
    for component in path.components() {
        match component {
            Component::Normal(_) | Component::CurDir => {}
            _ => {
                return Err(format!(
                    "snapshot path {} must be relative to the project root without '..'",
                    path.display()
                ))
            }
        }
    }
    Ok(())
}

fn contained(path: &Path) -> Result<(), OrchestratorError> {
    check_snapshot_path(path).map_err(OrchestratorError::RollbackError)
}

/// Copy `paths` (files or directories, relative to `root`) into `dest`.
///
/// Missing paths are skipped; they have nothing to restore.
pub async fn capture_config(
    root: &Path,
    paths: &[PathBuf],
    dest: &Dir,
) -> Result<Vec<ConfigFileEntry>, OrchestratorError> {
    let mut relative_files = Vec::new();
    for path in paths {
        contained(path)?;
        let absolute = root.join(path);
        let source_dir = Dir::new(&absolute);
        if source_dir.exists().await {
            for file in source_dir.walk_files().await? {
                relative_files.push(path.join(file));
            }
        } else if File::new(&absolute).exists().await {
            relative_files.push(path.clone());
        } else {
            debug!(path = %absolute.display(), "snapshot path absent, skipping");
        }
    }

    dest.create().await?;
    let mut entries = Vec::with_capacity(relative_files.len());
    for relative in relative_files {
        contained(&relative)?;
        let source = File::new(root.join(&relative));
        let contents = source.read_bytes().await?;
        source.copy_to(&dest.path().join(&relative)).await?;
        entries.push(ConfigFileEntry {
            sha256: sha256_hash(&contents),
            size: contents.len() as u64,
            path: relative,
        });
    }
    Ok(entries)
}

/// Copy captured files from `source` back under `root`, verifying each digest first
pub async fn restore_config(
    root: &Path,
    source: &Dir,
    entries: &[ConfigFileEntry],
) -> Result<usize, OrchestratorError> {
    for entry in entries {
        contained(&entry.path)?;
        let stored = source.file(&entry.path);
        let contents = stored.read_bytes().await?;
        if sha256_hash(&contents) != entry.sha256 {
            return Err(OrchestratorError::RollbackError(format!(
                "snapshot copy of {} is corrupt",
                entry.path.display()
            )));
        }
    }

    for entry in entries {
        let target = File::new(root.join(&entry.path));
        target.write_atomic(&source.file(&entry.path).read_bytes().await?).await?;
    }
    Ok(entries.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_capture_and_restore_files_and_directories() {
        let project = tempfile::tempdir().unwrap();
        let root = project.path();
        std::fs::write(root.join("docker-compose.yml"), "services: {}\n").unwrap();
        std::fs::create_dir_all(root.join("infrastructure/monitoring")).unwrap();
        std::fs::write(root.join("infrastructure/monitoring/prometheus.yml"), "scrape: []\n").unwrap();

        let store = tempfile::tempdir().unwrap();
        let dest = Dir::new(store.path().join("config"));
        let entries = capture_config(
            root,
            &[
                PathBuf::from("docker-compose.yml"),
                PathBuf::from(".env"),
                PathBuf::from("infrastructure/monitoring"),
            ],
            &dest,
        )
        .await
        .unwrap();

        assert_eq!(entries.len(), 2);
        assert_eq!(
            entries[1].path,
            PathBuf::from("infrastructure/monitoring/prometheus.yml")
        );

        std::fs::write(root.join("docker-compose.yml"), "services: {broken: true}\n").unwrap();
        let restored = restore_config(root, &dest, &entries).await.unwrap();
        assert_eq!(restored, 2);
        assert_eq!(
            std::fs::read_to_string(root.join("docker-compose.yml")).unwrap(),
            "services: {}\n"
        );
    }

    #[tokio::test]
    async fn test_corrupt_snapshot_is_not_restored() {
        let project = tempfile::tempdir().unwrap();
        let root = project.path();
        std::fs::write(root.join(".env"), "A=1\n").unwrap();

        let store = tempfile::tempdir().unwrap();
        let dest = Dir::new(store.path());
        let entries = capture_config(root, &[PathBuf::from(".env")], &dest)
            .await
            .unwrap();
        std::fs::write(store.path().join(".env"), "A=tampered\n").unwrap();
        std::fs::write(root.join(".env"), "A=2\n").unwrap();

        let result = restore_config(root, &dest, &entries).await;
        assert!(matches!(result, Err(OrchestratorError::RollbackError(_))));
        assert_eq!(std::fs::read_to_string(root.join(".env")).unwrap(), "A=2\n");
    }

    #[tokio::test]
    async fn test_capture_rejects_paths_outside_the_project() {
        let project = tempfile::tempdir().unwrap();
        let root = project.path();
        let compose = root.join("docker-compose.yml");
        std::fs::write(&compose, "services: {}\n").unwrap();

        let store = tempfile::tempdir().unwrap();
        let dest = Dir::new(store.path().join("config"));
        for path in [compose.clone(), PathBuf::from("../docker-compose.yml")] {
            let result = capture_config(root, &[path], &dest).await;
            assert!(matches!(result, Err(OrchestratorError::RollbackError(_))));
        }
        assert_eq!(std::fs::read_to_string(&compose).unwrap(), "services: {}\n");
    }

    #[tokio::test]
    async fn test_restore_rejects_escaping_entries() {
        let project = tempfile::tempdir().unwrap();
        let store = tempfile::tempdir().unwrap();
        let entries = vec![ConfigFileEntry {
            path: PathBuf::from("../outside.yml"),
            sha256: sha256_hash(b""),
            size: 0,
        }];
        let result = restore_config(project.path(), &Dir::new(store.path()), &entries).await;
        assert!(matches!(result, Err(OrchestratorError::RollbackError(_))));
    }

    #[test]
    fn test_check_snapshot_path() {
        assert!(check_snapshot_path(Path::new("docker-compose.yml")).is_ok());
        assert!(check_snapshot_path(Path::new("./infrastructure/monitoring")).is_ok());
        assert!(check_snapshot_path(Path::new("/etc/passwd")).is_err());
        assert!(check_snapshot_path(Path::new("config/../../x")).is_err());
        assert!(check_snapshot_path(Path::new("")).is_err());
    }

    #[test]
    fn test_targets_from_empty_list_is_all() {
        assert_eq!(RollbackTargets::from_list(vec![]), RollbackTargets::All);
        assert_eq!(
            RollbackTargets::from_list(vec!["redis".into()]).describe(),
            "redis"
        );
    }
}
