//! Read-validate-merge-write cycles over the shared settings document.
//!
//! The document is re-read at the start of every operation; nothing is cached
//! between calls because other tools write the same file. A document that
//! fails to parse or validate is never rewritten.

use super::catalog::{HookIdentity, SUPPORTED_HOOKS};
use super::schema::{HookCommand, HookGroup, HookTable};
use super::strict_json::parse_strict;
use crate::errors::SettingsError;
use crate::fs::FileAccess;
use crate::lock::LockManager;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Default `timeoutSeconds` written for chime's commands.
pub const DEFAULT_TIMEOUT_SECS: u32 = 10;

/// Owns the shape of the external settings document.
pub struct SettingsRepository<F> {
    fs: F,
    path: PathBuf,
    lock_path: PathBuf,
    identity: HookIdentity,
    timeout_seconds: u32,
    locks: LockManager,
}

impl<F: FileAccess> SettingsRepository<F> {
    /// Repository for the document at `path`; `identity` decides which
    /// entries belong to chime for status and uninstall.
    pub fn new(fs: F, path: impl Into<PathBuf>, identity: HookIdentity) -> Self {
        let path = path.into();
        let lock_path = document_lock_path(&path);
        Self {
            fs,
            path,
            lock_path,
            identity,
            timeout_seconds: DEFAULT_TIMEOUT_SECS,
            locks: LockManager::default(),
        }
    }

    pub fn with_timeout(mut self, timeout_seconds: u32) -> Self {
        self.timeout_seconds = timeout_seconds;
        self
    }

    pub fn with_lock_manager(mut self, locks: LockManager) -> Self {
        self.locks = locks;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// True if any known event type holds a command that belongs to chime.
    pub async fn is_installed(&self) -> Result<bool, SettingsError> {
        let (_, table) = self.load().await?;
        Ok(table
            .known()
            .any(|(_, groups)| groups.iter().any(|g| self.identity.owns_any(g))))
    }

    /// Make the catalog's groups, all pointing at `script_path`, the only
    /// chime-owned entries in the document.
    ///
    /// Returns `false` when the document already had exactly that content and
    /// was left untouched.
    pub async fn install(&self, script_path: &str) -> Result<bool, SettingsError> {
        let target = HookIdentity::new(script_path);
        self.locks
            .with_lock(&self.lock_path, move || async move {
                let (document, mut table) = self.load().await?;

                let stripped =
                    strip_owned(&mut table, |c| target.owns(c) || self.identity.owns(c));
                debug!("Removed {} existing chime command(s) before install", stripped);

                for spec in SUPPORTED_HOOKS {
                    let group = spec.group(script_path, self.timeout_seconds);
                    let groups = table.groups_mut(spec.event);
                    if !groups.iter().any(|g| g.same_shape(&group)) {
                        groups.push(group);
                    }
                }

                for (event, groups) in table.known_mut() {
                    let collapsed = dedup_groups(groups);
                    if collapsed > 0 {
                        debug!("Collapsed {} duplicate {} group(s)", collapsed, event);
                    }
                }
                table.prune();

                let written = self.store(&document, &table).await?;
                if written {
                    info!("Installed chime hooks into {:?}", self.path);
                } else {
                    debug!("Chime hooks already current in {:?}", self.path);
                }
                Ok::<_, SettingsError>(written)
            })
            .await
    }

    /// Remove every chime-owned command and prune what becomes empty.
    ///
    /// Returns `false` without writing if nothing belonged to chime.
    pub async fn uninstall(&self) -> Result<bool, SettingsError> {
        self.locks
            .with_lock(&self.lock_path, move || async move {
                let (document, mut table) = self.load().await?;

                let removed = strip_owned(&mut table, |c| self.identity.owns(c));
                if removed == 0 {
                    debug!("No chime hooks present in {:?}", self.path);
                    return Ok(false);
                }
                table.prune();

                self.store(&document, &table).await?;
                info!(
                    "Removed {} chime command(s) from {:?}",
                    removed, self.path
                );
                Ok::<_, SettingsError>(true)
            })
            .await
    }

    async fn load(&self) -> Result<(Value, HookTable), SettingsError> {
        let content = self
            .fs
            .read_or_none(&self.path)
            .await
            .map_err(|source| SettingsError::Io {
                path: self.path.clone(),
                action: "read",
                source,
            })?;

        let document = match content {
            Some(text) if !text.trim().is_empty() => {
                parse_strict(&text).map_err(|e| self.corrupted(e.to_string()))?
            }
            _ => Value::Object(serde_json::Map::new()),
        };
        let table = HookTable::from_document(&document).map_err(|e| self.corrupted(e))?;
        Ok((document, table))
    }

    /// Validate and write `table` merged into `original`. Skips the write if
    /// the result is unchanged.
    async fn store(&self, original: &Value, table: &HookTable) -> Result<bool, SettingsError> {
        let mut updated = original.clone();
        table.apply_to(&mut updated).map_err(|e| self.corrupted(e))?;
        HookTable::from_document(&updated)
            .map_err(|e| self.corrupted(format!("refusing to write invalid result: {}", e)))?;

        if &updated == original {
            return Ok(false);
        }

        let mut content = serde_json::to_string_pretty(&updated)
            .map_err(|e| self.corrupted(format!("failed to serialize: {}", e)))?;
        content.push('\n');

        self.fs
            .write_atomic(&self.path, content.as_bytes(), None)
            .await
            .map_err(|source| SettingsError::Io {
                path: self.path.clone(),
                action: "write",
                source,
            })?;
        Ok(true)
    }

    fn corrupted(&self, reason: String) -> SettingsError {
        warn!("Settings document {:?} rejected: {}", self.path, reason);
        SettingsError::Corrupted {
            path: self.path.clone(),
            reason,
        }
    }
}

/// `<settings>.lock` next to the document.
fn document_lock_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "settings".into());
    name.push(".lock");
    path.with_file_name(name)
}

/// Remove commands matching `owned` from every known group, dropping groups
/// left without commands. Returns the number of commands removed.
fn strip_owned(table: &mut HookTable, owned: impl Fn(&HookCommand) -> bool) -> usize {
    let mut removed = 0;
    for (_, groups) in table.known_mut() {
        for group in groups.iter_mut() {
            let before = group.commands.len();
            group.commands.retain(|c| !owned(c));
            removed += before - group.commands.len();
        }
        groups.retain(|g| !g.commands.is_empty());
    }
    removed
}

/// Keep the first of any structurally identical groups. Returns how many
/// were dropped.
fn dedup_groups(groups: &mut Vec<HookGroup>) -> usize {
    let before = groups.len();
    let mut kept: Vec<HookGroup> = Vec::with_capacity(before);
    for group in groups.drain(..) {
        if !kept.iter().any(|k| k.same_shape(&group)) {
            kept.push(group);
        }
    }
    *groups = kept;
    before - groups.len()
}
