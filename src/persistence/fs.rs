// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Native filesystem adapter.
//!
//! ## Security Note
//!
//! The data directory is expected to sit on an OS-protected volume (an
//! encrypted home directory or app sandbox container). Envelopes are already
//! ciphertext when they arrive here; the master key file is the one item
//! whose confidentiality rests on the volume, so secure items are written
//! with `0600` permissions on unix.
//!
//! Writes go to a uniquely named temp file first and are renamed into place,
//! so a crash never leaves a half-written envelope behind and concurrent
//! writers of one item end last-write-wins.

use std::io;
use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::fs;

use super::paths::ITEM_EXTENSION;
use super::{
    validate_key, ItemAccess, PersistenceError, PersistenceResult, PlainStorage, SecureItem,
    SecurePersistence, StoragePaths,
};

/// On-disk form of a secure item.
#[derive(Debug, Serialize, Deserialize)]
struct SecureRecord {
    value: String,
    #[serde(default)]
    require_auth: bool,
}

/// Filesystem-backed adapter implementing both capabilities.
pub struct FsBackend {
    paths: StoragePaths,
}

impl FsBackend {
    /// Create a backend rooted at `paths`. Call `initialize()` before use.
    pub fn new(paths: StoragePaths) -> Self {
        Self { paths }
    }

    pub fn paths(&self) -> &StoragePaths {
        &self.paths
    }

    /// Create the directory layout. Safe to call multiple times.
    pub async fn initialize(&self) -> PersistenceResult<()> {
        fs::create_dir_all(self.paths.secure_dir()).await?;
        fs::create_dir_all(self.paths.plain_dir()).await?;
        Ok(())
    }

    /// Write-read-delete probe verifying the volume is mounted and writable.
    pub async fn health_check(&self) -> PersistenceResult<()> {
        let probe = self.paths.health_probe();
        let data = b"health_check_data";

        fs::write(&probe, data).await?;
        let read_back = fs::read(&probe).await?;
        fs::remove_file(&probe).await?;

        if read_back != data {
            return Err(PersistenceError::Corrupt(
                "health check data mismatch".to_string(),
            ));
        }
        Ok(())
    }

    async fn write_atomic(path: &Path, contents: &[u8], private: bool) -> PersistenceResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let temp_path = path.with_extension(format!("{}.tmp", uuid::Uuid::new_v4().simple()));
        fs::write(&temp_path, contents).await?;

        if private {
            restrict_permissions(&temp_path).await?;
        }

        fs::rename(&temp_path, path).await?;
        Ok(())
    }

    async fn read_optional(path: &Path) -> PersistenceResult<Option<String>> {
        match fs::read_to_string(path).await {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn remove_optional(path: &Path) -> PersistenceResult<()> {
        match fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// List item keys (file stems) in a directory.
    async fn list_items(dir: &Path) -> PersistenceResult<Vec<String>> {
        let mut entries = match fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut keys = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(ITEM_EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) {
                keys.push(stem.to_string());
            }
        }
        keys.sort();
        Ok(keys)
    }
}

#[cfg(unix)]
async fn restrict_permissions(path: &Path) -> PersistenceResult<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).await?;
    Ok(())
}

#[cfg(not(unix))]
async fn restrict_permissions(_path: &Path) -> PersistenceResult<()> {
    Ok(())
}

#[async_trait]
impl SecurePersistence for FsBackend {
    async fn get(&self, key: &str) -> PersistenceResult<Option<SecureItem>> {
        validate_key(key)?;
        let Some(contents) = Self::read_optional(&self.paths.secure_item(key)).await? else {
            return Ok(None);
        };
        let record: SecureRecord = serde_json::from_str(&contents)
            .map_err(|e| PersistenceError::Corrupt(format!("secure item: {e}")))?;

        Ok(Some(SecureItem {
            value: record.value,
            access: ItemAccess {
                require_auth: record.require_auth,
            },
        }))
    }

    async fn set(&self, key: &str, value: &str, access: ItemAccess) -> PersistenceResult<()> {
        validate_key(key)?;
        let record = SecureRecord {
            value: value.to_string(),
            require_auth: access.require_auth,
        };
        let contents = serde_json::to_vec(&record)
            .map_err(|e| PersistenceError::Corrupt(format!("secure item: {e}")))?;
        Self::write_atomic(&self.paths.secure_item(key), &contents, true).await
    }

    async fn delete(&self, key: &str) -> PersistenceResult<()> {
        validate_key(key)?;
        Self::remove_optional(&self.paths.secure_item(key)).await
    }

    async fn keys(&self) -> PersistenceResult<Vec<String>> {
        Self::list_items(&self.paths.secure_dir()).await
    }
}

#[async_trait]
impl PlainStorage for FsBackend {
    async fn read(&self, key: &str) -> PersistenceResult<Option<String>> {
        validate_key(key)?;
        Self::read_optional(&self.paths.plain_item(key)).await
    }

    async fn write(&self, key: &str, value: &str) -> PersistenceResult<()> {
        validate_key(key)?;
        Self::write_atomic(&self.paths.plain_item(key), value.as_bytes(), false).await
    }

    async fn remove(&self, key: &str) -> PersistenceResult<()> {
        validate_key(key)?;
        Self::remove_optional(&self.paths.plain_item(key)).await
    }

    async fn list(&self) -> PersistenceResult<Vec<String>> {
        Self::list_items(&self.paths.plain_dir()).await
    }
}
