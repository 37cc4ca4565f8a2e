// src/credentials.rs
//! Bearer API keys bound to chat-platform identities.
//!
//! Each key lives in its own file, `<key>.json`, directly inside the
//! credentials directory. Keys are never deleted, only revoked.

use crate::descriptor::write_atomic;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info, warn};

/// Decides whether an identity may be issued a key.
#[async_trait]
pub trait IdentityDirectory: Send + Sync {
    async fn is_recognized(&self, owner_id: &str) -> bool;
}

/// One persisted key record.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct CredentialEntry {
    #[serde(rename = "api_key")]
    pub key: String,
    pub issue_date: String,
    #[serde(default)]
    pub last_used: String,
    pub revoked: bool,
    #[serde(rename = "slack_id")]
    pub owner_id: String,
}

/// Result of looking a key up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyStatus {
    Valid { owner_id: String },
    Revoked,
    NotFound,
}

/// File-per-key credential store.
pub struct CredentialStore {
    dir: PathBuf,
    identities: Arc<dyn IdentityDirectory>,
    /// Serializes read-modify-write of a single key file.
    key_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl CredentialStore {
    pub fn new(dir: impl Into<PathBuf>, identities: Arc<dyn IdentityDirectory>) -> Self {
        CredentialStore {
            dir: dir.into(),
            identities,
            key_locks: Mutex::new(HashMap::new()),
        }
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }

    fn lock_for(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = match self.key_locks.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Issues a fresh key for `owner_id` if the identity directory recognizes it.
    ///
    /// Returns `None` when the identity is not recognized or the entry could
    /// not be persisted; no key is handed out that is not on disk.
    pub async fn issue(&self, owner_id: &str) -> Option<String> {
        let owner_id = owner_id.trim();
        if owner_id.is_empty() || !self.identities.is_recognized(owner_id).await {
            info!("Refusing to issue key: identity {:?} not recognized", owner_id);
            return None;
        }

        let entry = CredentialEntry {
            key: uuid::Uuid::new_v4().to_string(),
            issue_date: chrono::Utc::now().to_rfc3339(),
            last_used: String::new(),
            revoked: false,
            owner_id: owner_id.to_string(),
        };

        match self.save(&entry).await {
            Ok(()) => {
                info!("Issued API key for {}", owner_id);
                Some(entry.key)
            }
            Err(e) => {
                error!("Failed to persist new key for {}: {}", owner_id, e);
                None
            }
        }
    }

    /// Scans every entry for `key`.
    ///
    /// Fails closed: any match with `revoked = true` wins over a valid one,
    /// and a corrupt or unreadable `<key>.json` counts as revoked.
    pub async fn validate(&self, key: &str) -> KeyStatus {
        if key.is_empty() {
            return KeyStatus::NotFound;
        }

        let mut read_dir = match tokio::fs::read_dir(&self.dir).await {
            Ok(rd) => rd,
            Err(e) => {
                error!(
                    "Cannot scan credentials directory {}: {}",
                    self.dir.display(),
                    e
                );
                return KeyStatus::NotFound;
            }
        };

        let mut valid_owner = None;
        let mut revoked = false;

        loop {
            let dir_entry = match read_dir.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    error!("Error while scanning credentials: {}", e);
                    return KeyStatus::NotFound;
                }
            };
            let path = dir_entry.path();
            if !crate::classify::has_json_extension(&path) {
                continue;
            }
            let named_for_key = path.file_stem().and_then(|s| s.to_str()) == Some(key);

            match load_entry(&path).await {
                Ok(entry) if entry.key == key => {
                    debug!("Key match in {}", path.display());
                    if entry.revoked {
                        revoked = true;
                    } else if valid_owner.is_none() {
                        valid_owner = Some(entry.owner_id);
                    }
                }
                Ok(_) => {}
                Err(e) if named_for_key => {
                    warn!(
                        "Credential file {} is unreadable, treating key as revoked: {}",
                        path.display(),
                        e
                    );
                    revoked = true;
                }
                Err(e) => {
                    debug!("Skipping unreadable credential file {}: {}", path.display(), e);
                }
            }
        }

        match (revoked, valid_owner) {
            (true, _) => KeyStatus::Revoked,
            (false, Some(owner_id)) => KeyStatus::Valid { owner_id },
            (false, None) => KeyStatus::NotFound,
        }
    }

    /// Marks the entry stored as `<key>.json` revoked.
    ///
    /// Returns `false` if that file cannot be read or parsed. Revoking an
    /// already revoked key succeeds and leaves it revoked.
    pub async fn revoke(&self, key: &str) -> bool {
        if key.is_empty() || key.contains(['/', '\\']) || key.starts_with('.') {
            return false;
        }
        let lock = self.lock_for(key);
        let revoked = {
            let _guard = lock.lock().await;
            self.revoke_locked(key).await
        };
        self.release_lock(key, lock);
        revoked
    }

    /// Keys that currently have a revocation holding or waiting on their lock.
    pub fn locked_keys(&self) -> usize {
        match self.key_locks.lock() {
            Ok(locks) => locks.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    /// Drops the map entry for `key` once no other revocation holds a handle to it.
    fn release_lock(&self, key: &str, lock: Arc<tokio::sync::Mutex<()>>) {
        let mut locks = match self.key_locks.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        // One handle in the map, one here.
        let idle = Arc::strong_count(&lock) <= 2
            && locks.get(key).is_some_and(|held| Arc::ptr_eq(held, &lock));
        if idle {
            locks.remove(key);
        }
    }

    async fn revoke_locked(&self, key: &str) -> bool {
        let path = self.entry_path(key);
        let mut entry = match load_entry(&path).await {
            Ok(entry) => entry,
            Err(e) => {
                error!("Cannot revoke {}: {}", path.display(), e);
                return false;
            }
        };
        if entry.key != key {
            error!(
                "Credential file {} holds a different key; refusing to revoke",
                path.display()
            );
            return false;
        }

        entry.revoked = true;
        match self.save(&entry).await {
            Ok(()) => {
                info!("Revoked API key owned by {}", entry.owner_id);
                true
            }
            Err(e) => {
                error!("Failed to write revocation for {}: {}", path.display(), e);
                false
            }
        }
    }

    /// Loads the entry stored for `key`, if any.
    pub async fn load(&self, key: &str) -> Option<CredentialEntry> {
        load_entry(&self.entry_path(key)).await.ok()
    }

    async fn save(&self, entry: &CredentialEntry) -> std::io::Result<()> {
        let json = serde_json::to_vec(entry)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        tokio::fs::create_dir_all(&self.dir).await?;
        write_atomic(&self.entry_path(&entry.key), &json).await
    }
}

#[derive(Debug, thiserror::Error)]
enum LoadError {
    #[error("{0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Parse(#[from] serde_json::Error),
}

async fn load_entry(path: &Path) -> Result<CredentialEntry, LoadError> {
    let content = tokio::fs::read(path).await?;
    Ok(serde_json::from_slice(&content)?)
}
