//! Build cache
//!
//! Maps `service@arch` to the digest of the last image built for it. Build
//! tasks read and write concurrently; each key only ever has one writer since
//! a service is built by at most one task per run.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::errors::OrchestratorError;
use crate::filesys::file::File;

/// Build cache entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildCacheEntry {
    pub digest: String,
    pub built_at: DateTime<Utc>,
}

/// Persistent digest cache
#[derive(Debug)]
pub struct BuildCache {
    file: File,
    entries: RwLock<HashMap<String, BuildCacheEntry>>,
}

impl BuildCache {
    /// Load the cache from `file`; missing or unreadable means empty
    pub async fn load(file: File) -> Self {
        let entries = if file.exists().await {
            match file.read_json::<HashMap<String, BuildCacheEntry>>().await {
                Ok(entries) => entries,
                Err(e) => {
                    warn!(path = %file.path().display(), "Ignoring unreadable build cache: {}", e);
                    HashMap::new()
                }
            }
        } else {
            HashMap::new()
        };

        Self {
            file,
            entries: RwLock::new(entries),
        }
    }

    pub fn key(service: &str, arch: &str) -> String {
        format!("{}@{}", service, arch)
    }

    pub fn get(&self, service: &str, arch: &str) -> Option<BuildCacheEntry> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.get(&Self::key(service, arch)).cloned()
    }

    /// Record the digest produced for `service` on `arch`
    pub fn record(&self, service: &str, arch: &str, digest: &str) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.insert(
            Self::key(service, arch),
            BuildCacheEntry {
                digest: digest.to_string(),
                built_at: Utc::now(),
            },
        );
    }

    /// Snapshot of every entry, sorted by key
    pub fn entries(&self) -> BTreeMap<String, BuildCacheEntry> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Write the cache back to disk
    pub async fn persist(&self) -> Result<(), OrchestratorError> {
        let snapshot = self.entries();
        self.file.write_json(&snapshot).await?;
        debug!(entries = snapshot.len(), "build cache persisted");
        Ok(())
    }
}
