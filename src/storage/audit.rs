// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Audit logging for every secure-store access and lifecycle event.
//!
//! Entries record the *fact* of an access: action, a SHA-256 digest of the
//! key, the declared data category and the platform. Raw key names and
//! plaintext never reach the log.
//!
//! The log is one JSON array in plain storage, capped at a fixed number of
//! entries (oldest dropped first). Appends are best-effort from the point of
//! view of the operation they describe: [`AuditLog::log`] swallows and
//! reports failures so a broken audit trail never blocks a user's data.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;

use crate::config::Platform;
use crate::error::VaultResult;
use crate::persistence::{bounded, PlainStorage};

/// Plain-storage key of the audit log. `system_` keys survive erasure.
pub const AUDIT_LOG_KEY: &str = "system_audit_log";

/// Prefix under which an unparseable audit log is preserved before a new
/// one is started.
pub const CORRUPT_AUDIT_LOG_PREFIX: &str = "system_audit_log_corrupt_";

/// Default maximum number of retained entries.
pub const DEFAULT_AUDIT_CAPACITY: usize = 1000;

/// Types of auditable events.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    // Secure store access
    Store,
    Retrieve,
    Delete,
    ClearAll,

    // Consent events
    ConsentRecorded,
    ConsentUpdated,
    ConsentWithdrawn,

    // Lifecycle events
    DataExported,
    DataDeleted,
}

/// One-way digest of a key name, used to correlate repeated access.
pub fn hash_key(key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(b"wellbeing-vault/audit-key/");
    hasher.update(key.as_bytes());
    hex::encode(hasher.finalize())
}

/// An audit log entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditEntry {
    /// Unique entry ID.
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub action: AuditAction,
    /// Digest of the affected key; `None` for collection-wide events.
    pub hashed_key: Option<String>,
    pub data_category: String,
    pub platform: Platform,
    /// Category names and counts only, never contents.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl AuditEntry {
    pub fn new(action: AuditAction, data_category: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            action,
            hashed_key: None,
            data_category: data_category.into(),
            platform: Platform::default(),
            details: None,
        }
    }

    /// Attach a key; only its digest is kept.
    pub fn with_key(mut self, key: &str) -> Self {
        self.hashed_key = Some(hash_key(key));
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

/// Bounded, append-only audit log over plain storage.
pub struct AuditLog {
    storage: Arc<dyn PlainStorage>,
    platform: Platform,
    capacity: usize,
    timeout: Duration,
    // Serializes read-modify-write of the stored array.
    write_lock: Mutex<()>,
}

impl AuditLog {
    pub fn new(
        storage: Arc<dyn PlainStorage>,
        platform: Platform,
        capacity: usize,
        timeout: Duration,
    ) -> Self {
        Self {
            storage,
            platform,
            capacity: capacity.max(1),
            timeout,
            write_lock: Mutex::new(()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Record a keyed access. Best-effort.
    pub async fn record(&self, action: AuditAction, key: &str, data_category: &str) {
        self.log(AuditEntry::new(action, data_category).with_key(key))
            .await;
    }

    /// Append an entry, reporting but never propagating failure.
    pub async fn log(&self, entry: AuditEntry) {
        let action = entry.action;
        if let Err(e) = self.append(entry).await {
            tracing::warn!(action = ?action, error = %e, "Failed to write audit entry");
        }
    }

    /// Append an entry, evicting the oldest once over capacity.
    pub async fn append(&self, mut entry: AuditEntry) -> VaultResult<()> {
        entry.platform = self.platform;

        let _guard = self.write_lock.lock().await;
        let mut entries = match self.load_raw().await? {
            Some(raw) => match serde_json::from_str(&raw) {
                Ok(entries) => entries,
                Err(e) => {
                    self.preserve_corrupt(&raw).await?;
                    tracing::warn!(error = %e, "Audit log unreadable, moved aside and restarted");
                    VecDeque::new()
                }
            },
            None => VecDeque::new(),
        };

        entries.push_back(entry);
        while entries.len() > self.capacity {
            entries.pop_front();
        }

        let raw = serde_json::to_string(&entries)?;
        bounded(self.timeout, self.storage.write(AUDIT_LOG_KEY, &raw)).await?;
        Ok(())
    }

    /// All retained entries in insertion order.
    pub async fn get_all(&self) -> VaultResult<Vec<AuditEntry>> {
        Ok(self.load().await?.into_iter().collect())
    }

    /// Entries whose digest matches `key`.
    pub async fn entries_for_key(&self, key: &str) -> VaultResult<Vec<AuditEntry>> {
        let hashed = hash_key(key);
        Ok(self
            .get_all()
            .await?
            .into_iter()
            .filter(|entry| entry.hashed_key.as_deref() == Some(hashed.as_str()))
            .collect())
    }

    pub async fn len(&self) -> VaultResult<usize> {
        Ok(self.load().await?.len())
    }

    pub async fn is_empty(&self) -> VaultResult<bool> {
        Ok(self.len().await? == 0)
    }

    async fn load(&self) -> VaultResult<VecDeque<AuditEntry>> {
        match self.load_raw().await? {
            Some(raw) => Ok(serde_json::from_str(&raw)?),
            None => Ok(VecDeque::new()),
        }
    }

    async fn load_raw(&self) -> VaultResult<Option<String>> {
        Ok(bounded(self.timeout, self.storage.read(AUDIT_LOG_KEY)).await?)
    }

    /// Copy an unparseable log to a `system_` key, which survives erasure.
    async fn preserve_corrupt(&self, raw: &str) -> VaultResult<()> {
        let key = format!(
            "{CORRUPT_AUDIT_LOG_PREFIX}{}",
            Utc::now().format("%Y%m%dT%H%M%S%6f")
        );
        bounded(self.timeout, self.storage.write(&key, raw)).await?;
        Ok(())
    }
}
