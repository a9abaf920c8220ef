//! File access port.
//!
//! The core never touches `std::fs` or `tokio::fs` directly; it goes through
//! [`FileAccess`] so install sequences can be exercised against injected
//! failures. [`LocalFs`] is the real implementation.

use std::future::Future;
use std::fs::Permissions;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

/// Minimal filesystem primitives the settings repository and installer need.
pub trait FileAccess: Send + Sync {
    /// Write `content` so that it appears whole or not at all.
    ///
    /// Parent directories are created as needed. When `mode` is given the
    /// POSIX permission bits are applied before the file becomes visible;
    /// otherwise an existing file keeps its permissions. A symlink at `path`
    /// is written through, not replaced.
    fn write_atomic(
        &self,
        path: &Path,
        content: &[u8],
        mode: Option<u32>,
    ) -> impl Future<Output = io::Result<()>> + Send;

    /// Delete `path`. A missing file is not an error.
    fn delete(&self, path: &Path) -> impl Future<Output = io::Result<()>> + Send;

    /// Read the file as UTF-8, or `None` if it does not exist.
    fn read_or_none(&self, path: &Path) -> impl Future<Output = io::Result<Option<String>>> + Send;

    /// Last modification time, or `None` if the file does not exist.
    fn mtime_or_none(
        &self,
        path: &Path,
    ) -> impl Future<Output = io::Result<Option<SystemTime>>> + Send;
}

/// [`FileAccess`] backed by the local filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFs;

impl FileAccess for LocalFs {
    async fn write_atomic(&self, path: &Path, content: &[u8], mode: Option<u32>) -> io::Result<()> {
        let target = resolve_symlink(path).await?;
        let parent = match target.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        tokio::fs::create_dir_all(&parent).await?;

        let permissions = match mode {
            Some(mode) => permissions_from_mode(mode),
            None => existing_permissions(&target).await?,
        };

        let file_name = target
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("file");
        let temp_path = parent.join(format!(".{}.{}.tmp", file_name, Uuid::new_v4()));

        let result = write_temp_then_rename(&temp_path, &target, content, permissions).await;
        if result.is_err()
            && let Err(e) = tokio::fs::remove_file(&temp_path).await
            && e.kind() != io::ErrorKind::NotFound
        {
            warn!("Failed to remove temp file {:?}: {}", temp_path, e);
        }
        result
    }

    async fn delete(&self, path: &Path) -> io::Result<()> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => {
                debug!("Deleted {:?}", path);
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn read_or_none(&self, path: &Path) -> io::Result<Option<String>> {
        match tokio::fs::read_to_string(path).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn mtime_or_none(&self, path: &Path) -> io::Result<Option<SystemTime>> {
        match tokio::fs::metadata(path).await {
            Ok(meta) => meta.modified().map(Some),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }
}

async fn write_temp_then_rename(
    temp_path: &Path,
    path: &Path,
    content: &[u8],
    permissions: Option<Permissions>,
) -> io::Result<()> {
    let mut file = tokio::fs::File::create(temp_path).await?;
    file.write_all(content).await?;
    file.sync_all().await?;
    drop(file);

    if let Some(permissions) = permissions {
        tokio::fs::set_permissions(temp_path, permissions).await?;
    }

    tokio::fs::rename(temp_path, path).await
}

/// The file a write to `path` should replace. A symlink is followed so the
/// link itself survives the rename.
async fn resolve_symlink(path: &Path) -> io::Result<PathBuf> {
    match tokio::fs::symlink_metadata(path).await {
        Ok(meta) if meta.file_type().is_symlink() => match tokio::fs::canonicalize(path).await {
            Ok(target) => Ok(target),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                // Dangling link: create the file it points at.
                let link = tokio::fs::read_link(path).await?;
                Ok(match path.parent() {
                    Some(parent) => parent.join(link),
                    None => link,
                })
            }
            Err(e) => Err(e),
        },
        Ok(_) => Ok(path.to_path_buf()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(path.to_path_buf()),
        Err(e) => Err(e),
    }
}

async fn existing_permissions(path: &Path) -> io::Result<Option<Permissions>> {
    match tokio::fs::metadata(path).await {
        Ok(meta) => Ok(Some(meta.permissions())),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

#[cfg(unix)]
fn permissions_from_mode(mode: u32) -> Option<Permissions> {
    use std::os::unix::fs::PermissionsExt;
    Some(Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn permissions_from_mode(_mode: u32) -> Option<Permissions> {
    None
}
