//! Cooperative lock files.
//!
//! A lock is a file created with `O_EXCL` semantics that holds the owner's PID
//! and a random token. Contenders retry with bounded backoff; a lock file older
//! than the staleness threshold is treated as abandoned and reclaimed.
//!
//! Only writers that go through [`LockManager`] are serialized. Editors and
//! other tools that write the same files without taking the lock are not.

use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

/// Errors raised while acquiring a lock.
#[derive(Debug, Error)]
pub enum LockError {
    /// The lock stayed held for the whole retry budget.
    #[error("Lock {path:?} is held by another process (gave up after {attempts} attempts)")]
    Contended { path: PathBuf, attempts: u32 },

    /// The lock file could not be created or inspected.
    #[error("Failed to {action} lock file {path:?}: {source}")]
    Io {
        path: PathBuf,
        action: &'static str,
        #[source]
        source: io::Error,
    },
}

/// Retry and staleness settings for [`LockManager`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockPolicy {
    /// Retries after the first failed attempt.
    pub retries: u32,
    /// Delay before the first retry; doubles on each subsequent retry.
    pub initial_backoff: Duration,
    /// Upper bound for a single retry delay.
    pub max_backoff: Duration,
    /// Age after which a lock file is considered abandoned.
    pub stale_after: Duration,
}

impl Default for LockPolicy {
    fn default() -> Self {
        Self {
            retries: 5,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(1000),
            stale_after: Duration::from_secs(10),
        }
    }
}

impl LockPolicy {
    /// Delay before retry number `retry` (zero-based).
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 1u32.checked_shl(retry).unwrap_or(u32::MAX);
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

/// Runs operations while holding an exclusive lock file.
#[derive(Debug, Clone, Default)]
pub struct LockManager {
    policy: LockPolicy,
}

impl LockManager {
    pub fn new(policy: LockPolicy) -> Self {
        Self { policy }
    }

    /// Run `operation` while holding the lock at `lock_path`.
    ///
    /// The lock is released on every exit path, including errors, panics and
    /// cancellation of the returned future. A failed release is logged and
    /// never replaces the operation's own result.
    pub async fn with_lock<T, E, F, Fut>(&self, lock_path: &Path, operation: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<LockError>,
    {
        let guard = self.acquire(lock_path).await?;
        let result = operation().await;
        guard.release();
        result
    }

    async fn acquire(&self, lock_path: &Path) -> Result<LockGuard, LockError> {
        if let Some(parent) = lock_path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| LockError::Io {
                    path: lock_path.to_path_buf(),
                    action: "create parent directory of",
                    source,
                })?;
        }

        let token = Uuid::new_v4().to_string();
        let mut retry = 0;

        loop {
            match try_create(lock_path, &token).await {
                Ok(()) => {
                    debug!("Acquired lock {:?}", lock_path);
                    return Ok(LockGuard {
                        path: lock_path.to_path_buf(),
                        token,
                        released: false,
                    });
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    if self.reclaim_if_stale(lock_path).await? {
                        continue;
                    }
                    if retry >= self.policy.retries {
                        return Err(LockError::Contended {
                            path: lock_path.to_path_buf(),
                            attempts: retry + 1,
                        });
                    }
                    let delay = self.policy.backoff(retry);
                    debug!(
                        "Lock {:?} busy, retrying in {:?} ({}/{})",
                        lock_path,
                        delay,
                        retry + 1,
                        self.policy.retries
                    );
                    tokio::time::sleep(delay).await;
                    retry += 1;
                }
                Err(source) => {
                    return Err(LockError::Io {
                        path: lock_path.to_path_buf(),
                        action: "create",
                        source,
                    });
                }
            }
        }
    }

    /// Returns true when the caller should retry immediately: the lock was
    /// stale and has been moved aside, or it disappeared while we looked at it.
    async fn reclaim_if_stale(&self, lock_path: &Path) -> Result<bool, LockError> {
        let Some(observed) = LockSnapshot::read(lock_path).await? else {
            return Ok(true);
        };

        let age = SystemTime::now()
            .duration_since(observed.modified)
            .unwrap_or_default();
        if age <= self.policy.stale_after {
            return Ok(false);
        }

        warn!(
            "Reclaiming stale lock {:?} (held for {:?}, threshold {:?})",
            lock_path, age, self.policy.stale_after
        );
        reclaim(lock_path, &observed).await
    }
}

/// Contents and mtime of a lock file at one point in time.
#[derive(Debug, PartialEq, Eq)]
struct LockSnapshot {
    contents: Vec<u8>,
    modified: SystemTime,
}

impl LockSnapshot {
    async fn read(path: &Path) -> Result<Option<Self>, LockError> {
        let inspect_err = |source| LockError::Io {
            path: path.to_path_buf(),
            action: "inspect",
            source,
        };
        let modified = match tokio::fs::metadata(path).await {
            Ok(meta) => meta.modified().map_err(inspect_err)?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(inspect_err(e)),
        };
        match tokio::fs::read(path).await {
            Ok(contents) => Ok(Some(Self { contents, modified })),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(inspect_err(e)),
        }
    }
}

/// Move the lock judged stale out of the way.
///
/// Renaming is atomic, so only one contender can take a given file. The
/// moved file is compared with `observed`; if it differs, another contender
/// reclaimed first and we moved its live lock, which is linked back into
/// place. Returns false in that case so the caller keeps backing off.
async fn reclaim(lock_path: &Path, observed: &LockSnapshot) -> Result<bool, LockError> {
    let aside = aside_path(lock_path);
    match tokio::fs::rename(lock_path, &aside).await {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(true),
        Err(source) => {
            return Err(LockError::Io {
                path: lock_path.to_path_buf(),
                action: "reclaim",
                source,
            });
        }
    }

    let moved = LockSnapshot::read(&aside).await;
    let reclaimed = matches!(&moved, Ok(Some(snapshot)) if snapshot == observed);
    if !reclaimed {
        debug!("Lock {:?} changed hands during reclaim; restoring it", lock_path);
        match tokio::fs::hard_link(&aside, lock_path).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                warn!("Lock {:?} was taken again before it could be restored", lock_path)
            }
            Err(e) => warn!("Failed to restore lock {:?}: {}", lock_path, e),
        }
    }

    if let Err(e) = tokio::fs::remove_file(&aside).await
        && e.kind() != io::ErrorKind::NotFound
    {
        warn!("Failed to remove reclaimed lock {:?}: {}", aside, e);
    }
    moved?;
    Ok(reclaimed)
}

/// `<lock>.stale.<uuid>` next to the lock file.
fn aside_path(lock_path: &Path) -> PathBuf {
    let mut name = lock_path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "lock".into());
    name.push(format!(".stale.{}", Uuid::new_v4()));
    lock_path.with_file_name(name)
}

async fn try_create(lock_path: &Path, token: &str) -> io::Result<()> {
    let mut file = tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(lock_path)
        .await?;
    let contents = format!("{} {}\n", std::process::id(), token);
    if let Err(e) = file.write_all(contents.as_bytes()).await {
        drop(file);
        let _ = tokio::fs::remove_file(lock_path).await;
        return Err(e);
    }
    file.flush().await
}

/// Held lock. Removes the lock file on release or drop.
struct LockGuard {
    path: PathBuf,
    token: String,
    released: bool,
}

impl LockGuard {
    fn release(mut self) {
        self.released = true;
        release_lock_file(&self.path, &self.token);
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if !self.released {
            release_lock_file(&self.path, &self.token);
        }
    }
}

fn release_lock_file(path: &Path, token: &str) {
    match std::fs::read_to_string(path) {
        Ok(contents) => {
            if contents.split_whitespace().nth(1) != Some(token) {
                warn!(
                    "Lock {:?} was reclaimed by another holder; leaving it in place",
                    path
                );
                return;
            }
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            warn!("Lock {:?} vanished before release", path);
            return;
        }
        Err(e) => {
            warn!("Failed to read lock {:?} before release: {}", path, e);
            return;
        }
    }

    match std::fs::remove_file(path) {
        Ok(()) => debug!("Released lock {:?}", path),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to release lock {:?}: {}", path, e),
    }
}
