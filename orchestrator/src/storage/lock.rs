//! Single-run lock
//!
//! The checkpoint store and audit trail assume a single writer. The lock file
//! records the holder's pid and is published complete, so a lock that cannot
//! be read is treated as held. A lock whose holder is no longer alive is
//! removed under a separate reclaim guard before a new one is published.

use std::io::ErrorKind;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::errors::OrchestratorError;
use crate::filesys::file::File;
use crate::telemetry::process_alive;

/// Acquire attempts, each of which may reclaim one stale lock
const RECLAIM_ATTEMPTS: usize = 3;

/// A reclaim guard older than this was left by a run that died mid-reclaim
const RECLAIM_GUARD_TTL: std::time::Duration = std::time::Duration::from_secs(60);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockOwner {
    pub pid: u32,
    pub command: String,
    pub acquired_at: DateTime<Utc>,
}

/// Held for the lifetime of a run; released on drop
#[derive(Debug)]
pub struct RunLock {
    file: File,
    released: bool,
}

impl RunLock {
    /// Acquire the lock for `command`
    pub async fn acquire(file: File, command: &str) -> Result<Self, OrchestratorError> {
        let owner = LockOwner {
            pid: std::process::id(),
            command: command.to_string(),
            acquired_at: Utc::now(),
        };
        let contents = serde_json::to_vec(&owner)?;

        for _ in 0..RECLAIM_ATTEMPTS {
            match file.create_new(&contents).await {
                Ok(()) => {
                    debug!(path = %file.path().display(), "run lock acquired");
                    return Ok(Self {
                        file,
                        released: false,
                    });
                }
                Err(OrchestratorError::IoError(e)) if e.kind() == ErrorKind::AlreadyExists => {}
                Err(e) => return Err(e),
            }

            let holder = match file.read_json::<LockOwner>().await {
                Ok(holder) => holder,
                // released between our attempt and the read
                Err(OrchestratorError::IoError(e)) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => {
                    return Err(OrchestratorError::Locked(format!(
                        "{} is unreadable ({}); remove it if no run is active",
                        file.path().display(),
                        e
                    )))
                }
            };
            if process_alive(holder.pid) {
                return Err(held_by(&holder));
            }
            reclaim(&file, &holder).await?;
        }

        Err(OrchestratorError::Locked(format!(
            "could not acquire {}",
            file.path().display()
        )))
    }

    /// Release the lock explicitly
    pub async fn release(mut self) -> Result<(), OrchestratorError> {
        self.released = true;
        self.file.delete().await
    }
}

fn held_by(holder: &LockOwner) -> OrchestratorError {
    OrchestratorError::Locked(format!(
        "'{}' (pid {}) since {}",
        holder.command, holder.pid, holder.acquired_at
    ))
}

/// Remove a dead holder's lock while holding the reclaim guard.
///
/// Only one run may reclaim at a time, and it removes the lock only if it
/// still names the dead holder, so a freshly published lock is never removed.
async fn reclaim(file: &File, stale: &LockOwner) -> Result<(), OrchestratorError> {
    let guard = File::new(file.sibling("reclaim"));
    if let Err(e) = guard.create_new(std::process::id().to_string().as_bytes()).await {
        return match e {
            OrchestratorError::IoError(e) if e.kind() == ErrorKind::AlreadyExists => {
                if guard_abandoned(&guard).await {
                    warn!(path = %guard.path().display(), "Removing abandoned reclaim guard");
                    guard.delete().await
                } else {
                    Err(OrchestratorError::Locked(format!(
                        "{} is being reclaimed",
                        file.path().display()
                    )))
                }
            }
            e => Err(e),
        };
    }

    let current = file.read_json::<LockOwner>().await.ok();
    let removed = if current.as_ref() == Some(stale) {
        warn!(
            path = %file.path().display(),
            pid = stale.pid,
            "Reclaiming stale run lock"
        );
        file.delete().await
    } else {
        Ok(())
    };
    guard.delete().await?;
    removed
}

async fn guard_abandoned(guard: &File) -> bool {
    tokio::fs::metadata(guard.path())
        .await
        .and_then(|m| m.modified())
        .ok()
        .and_then(|modified| modified.elapsed().ok())
        .is_some_and(|age| age > RECLAIM_GUARD_TTL)
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if !self.released {
            let _ = std::fs::remove_file(self.file.path());
        }
    }
}
