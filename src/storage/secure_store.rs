// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Keyed persistence of encrypted envelopes.
//!
//! ## Storage Layout
//!
//! ```text
//! vault_master_key          # owned by KeyManager, never touched here
//! secure_{key}              # data envelopes (targeted by clear_all)
//! receipt_{kind}_{id}       # lifecycle receipts (survive clear_all)
//! ```
//!
//! ## Step-Up Authentication
//!
//! An entry is gated when it was stored with `require_auth` (recorded both on
//! the platform item and inside the authenticated envelope) or when the
//! caller asks for it. The prompt runs after the bounded platform read and
//! before decryption, under its own longer timeout. A declined or expired
//! prompt is `AuthenticationRequired`.
//!
//! ## Concurrency
//!
//! `store`/`get`/`remove` on the same key are not atomic against each other:
//! concurrent stores are last-write-wins. A `store` racing `clear_all` may
//! land after the clear and survive it. Each entry has a single logical
//! writer in practice.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};

use super::audit::{hash_key, AuditAction, AuditEntry, AuditLog};
use crate::config::DEFAULT_AUTH_TIMEOUT;
use crate::crypto::{EnvelopeCodec, KeyManager, SecureEnvelope};
use crate::error::{VaultError, VaultResult};
use crate::persistence::{
    bounded, validate_key, ItemAccess, SecurePersistence, StaticAuthenticator,
    StepUpAuthenticator,
};

/// Category assigned when the caller declares none.
pub const DEFAULT_DATA_CATEGORY: &str = "general";

/// Category of entries written by [`SecureStore::store_crisis`].
pub const CRISIS_DATA_CATEGORY: &str = "crisis_data";

/// Category of lifecycle receipts.
pub const RECEIPT_DATA_CATEGORY: &str = "compliance_receipt";

/// Reason shown by the step-up prompt.
pub const STEP_UP_REASON: &str = "Access protected health data";

/// Key namespaces within secure persistence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Namespace {
    /// User data envelopes.
    Data,
    /// Compliance receipts documenting lifecycle events.
    Receipt,
}

impl Namespace {
    pub fn prefix(&self) -> &'static str {
        match self {
            Namespace::Data => "secure_",
            Namespace::Receipt => "receipt_",
        }
    }

    pub fn qualify(&self, key: &str) -> String {
        format!("{}{key}", self.prefix())
    }
}

/// Options for [`SecureStore::store`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreOptions {
    pub data_category: String,
    pub require_auth: bool,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self::new(DEFAULT_DATA_CATEGORY)
    }
}

impl StoreOptions {
    pub fn new(data_category: impl Into<String>) -> Self {
        Self {
            data_category: data_category.into(),
            require_auth: false,
        }
    }

    /// Require step-up authentication on every read.
    pub fn require_auth(mut self) -> Self {
        self.require_auth = true;
        self
    }
}

/// Options for [`SecureStore::get`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GetOptions {
    /// Ask for step-up authentication even if the entry was stored without it.
    pub require_auth: bool,
}

/// A decrypted value with its envelope metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredEntry<T> {
    pub value: T,
    pub data_category: String,
    pub created_at: DateTime<Utc>,
    pub requires_auth: bool,
}

/// Encrypted key-value store with an audit entry per access.
pub struct SecureStore {
    persistence: Arc<dyn SecurePersistence>,
    keys: Arc<KeyManager>,
    codec: EnvelopeCodec,
    audit: Arc<AuditLog>,
    authenticator: Arc<dyn StepUpAuthenticator>,
    timeout: Duration,
    auth_timeout: Duration,
    /// Orders receipts written within the same microsecond.
    receipt_seq: AtomicU64,
}

impl SecureStore {
    /// Store whose step-up prompts are auto-confirmed. Use
    /// [`SecureStore::with_step_up`] to supply a real authenticator.
    pub fn new(
        persistence: Arc<dyn SecurePersistence>,
        keys: Arc<KeyManager>,
        audit: Arc<AuditLog>,
        timeout: Duration,
    ) -> Self {
        Self {
            persistence,
            keys,
            codec: EnvelopeCodec::new(),
            audit,
            authenticator: Arc::new(StaticAuthenticator(true)),
            timeout,
            auth_timeout: DEFAULT_AUTH_TIMEOUT,
            receipt_seq: AtomicU64::new(0),
        }
    }

    pub fn with_step_up(
        mut self,
        authenticator: Arc<dyn StepUpAuthenticator>,
        auth_timeout: Duration,
    ) -> Self {
        self.authenticator = authenticator;
        self.auth_timeout = auth_timeout;
        self
    }

    pub fn audit(&self) -> &Arc<AuditLog> {
        &self.audit
    }

    pub fn key_manager(&self) -> &Arc<KeyManager> {
        &self.keys
    }

    /// Audit entries touching the data entry `key`.
    pub async fn audit_trail(&self, key: &str) -> VaultResult<Vec<AuditEntry>> {
        self.audit.entries_for_key(&Namespace::Data.qualify(key)).await
    }

    // ========== Data Namespace ==========

    /// Encrypt and store `value` under `key`, replacing any existing entry.
    pub async fn store<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        options: &StoreOptions,
    ) -> VaultResult<()> {
        self.store_in(Namespace::Data, key, value, options).await
    }

    /// Fetch and decrypt the value under `key`. `Ok(None)` if absent.
    pub async fn get<T: DeserializeOwned>(
        &self,
        key: &str,
        options: GetOptions,
    ) -> VaultResult<Option<T>> {
        Ok(self
            .get_entry_in(Namespace::Data, key, options)
            .await?
            .map(|entry| entry.value))
    }

    /// Like [`SecureStore::get`], keeping the envelope metadata.
    pub async fn get_entry<T: DeserializeOwned>(
        &self,
        key: &str,
        options: GetOptions,
    ) -> VaultResult<Option<StoredEntry<T>>> {
        self.get_entry_in(Namespace::Data, key, options).await
    }

    /// Delete the entry under `key`. Missing keys are a no-op.
    pub async fn remove(&self, key: &str) -> VaultResult<()> {
        self.remove_in(Namespace::Data, key).await
    }

    /// Whether an entry exists under `key`. Does not decrypt or audit.
    pub async fn contains(&self, key: &str) -> VaultResult<bool> {
        Ok(self.keys_in(Namespace::Data).await?.iter().any(|k| k == key))
    }

    /// Keys of every data entry, without the namespace prefix.
    pub async fn data_keys(&self) -> VaultResult<Vec<String>> {
        self.keys_in(Namespace::Data).await
    }

    /// Store crisis data under a fresh unpredictable key, always behind
    /// step-up authentication. Returns the generated key.
    pub async fn store_crisis<T: Serialize + ?Sized>(&self, value: &T) -> VaultResult<String> {
        let key = format!("crisis_{}", uuid::Uuid::new_v4().simple());
        let options = StoreOptions::new(CRISIS_DATA_CATEGORY).require_auth();
        self.store(&key, value, &options).await?;
        Ok(key)
    }

    /// Delete every data envelope. Receipts and the master key are kept; the
    /// in-memory key state is reset. Returns the number of entries removed.
    pub async fn clear_all(&self) -> VaultResult<usize> {
        let keys = self.keys_in(Namespace::Data).await?;
        for key in &keys {
            bounded(
                self.timeout,
                self.persistence.delete(&Namespace::Data.qualify(key)),
            )
            .await?;
        }

        self.audit
            .log(
                AuditEntry::new(AuditAction::ClearAll, "all")
                    .with_details(serde_json::json!({ "entries_removed": keys.len() })),
            )
            .await;
        self.keys.reset().await;

        tracing::info!(entries_removed = keys.len(), "Cleared all secure data");
        Ok(keys.len())
    }

    // ========== Receipt Namespace ==========

    /// Persist a compliance receipt. Receipts are never overwritten.
    ///
    /// Keys are `{kind}_{utc microseconds}_{sequence}_{uuid}`, so lexical
    /// order is write order.
    pub async fn store_receipt<T: Serialize + ?Sized>(
        &self,
        kind: &str,
        receipt: &T,
    ) -> VaultResult<String> {
        let key = format!(
            "{kind}_{}_{:010}_{}",
            Utc::now().format("%Y%m%dT%H%M%S%6f"),
            self.receipt_seq.fetch_add(1, Ordering::Relaxed),
            uuid::Uuid::new_v4().simple()
        );
        let options = StoreOptions::new(RECEIPT_DATA_CATEGORY);
        self.store_in(Namespace::Receipt, &key, receipt, &options)
            .await?;
        Ok(key)
    }

    /// All receipts of a kind, oldest first.
    pub async fn receipts<T: DeserializeOwned>(&self, kind: &str) -> VaultResult<Vec<T>> {
        let prefix = format!("{kind}_");
        let mut keys: Vec<String> = self
            .keys_in(Namespace::Receipt)
            .await?
            .into_iter()
            .filter(|key| key.starts_with(&prefix))
            .collect();
        keys.sort();

        let mut receipts = Vec::new();
        for key in keys {
            if let Some(entry) = self
                .get_entry_in(Namespace::Receipt, &key, GetOptions::default())
                .await?
            {
                receipts.push(entry.value);
            }
        }
        Ok(receipts)
    }

    // ========== Internals ==========

    async fn store_in<T: Serialize + ?Sized>(
        &self,
        namespace: Namespace,
        key: &str,
        value: &T,
        options: &StoreOptions,
    ) -> VaultResult<()> {
        let storage_key = namespace.qualify(key);
        validate_key(&storage_key)?;

        let master = self.keys.get_or_create_key().await?;
        let envelope =
            self.codec
                .encrypt(value, &master, &options.data_category, options.require_auth)?;
        let raw = envelope.to_json()?;

        let access = ItemAccess {
            require_auth: options.require_auth,
        };
        bounded(self.timeout, self.persistence.set(&storage_key, &raw, access)).await?;

        self.audit
            .record(AuditAction::Store, &storage_key, &options.data_category)
            .await;
        tracing::debug!(
            hashed_key = %hash_key(&storage_key),
            data_category = %options.data_category,
            "Stored secure entry"
        );
        Ok(())
    }

    async fn get_entry_in<T: DeserializeOwned>(
        &self,
        namespace: Namespace,
        key: &str,
        options: GetOptions,
    ) -> VaultResult<Option<StoredEntry<T>>> {
        let storage_key = namespace.qualify(key);
        validate_key(&storage_key)?;

        let Some(item) = bounded(self.timeout, self.persistence.get(&storage_key)).await? else {
            return Ok(None);
        };

        let envelope = SecureEnvelope::from_json(&item.value)?;
        if options.require_auth || item.access.require_auth || envelope.requires_auth {
            self.step_up(&storage_key).await?;
        }

        let master = self.keys.get_or_create_key().await?;
        let value = self.codec.decrypt(&envelope, &master).inspect_err(|e| {
            tracing::error!(
                hashed_key = %hash_key(&storage_key),
                error = %e,
                "Secure entry failed to decrypt"
            );
        })?;

        self.audit
            .record(AuditAction::Retrieve, &storage_key, &envelope.data_category)
            .await;

        Ok(Some(StoredEntry {
            value,
            data_category: envelope.data_category,
            created_at: envelope.created_at,
            requires_auth: envelope.requires_auth,
        }))
    }

    async fn remove_in(&self, namespace: Namespace, key: &str) -> VaultResult<()> {
        let storage_key = namespace.qualify(key);
        validate_key(&storage_key)?;

        // The envelope's declared category keeps the DELETE entry consistent
        // with STORE/RETRIEVE for the same key.
        // An unreadable item is still deleted.
        let data_category = bounded(self.timeout, self.persistence.get(&storage_key))
            .await
            .ok()
            .flatten()
            .and_then(|item| SecureEnvelope::from_json(&item.value).ok())
            .map(|envelope| envelope.data_category)
            .unwrap_or_else(|| DEFAULT_DATA_CATEGORY.to_string());

        bounded(self.timeout, self.persistence.delete(&storage_key)).await?;
        self.audit
            .record(AuditAction::Delete, &storage_key, &data_category)
            .await;
        Ok(())
    }

    /// Run the step-up prompt. Declined and unanswered prompts both fail.
    async fn step_up(&self, storage_key: &str) -> VaultResult<()> {
        match tokio::time::timeout(
            self.auth_timeout,
            self.authenticator.authenticate(STEP_UP_REASON),
        )
        .await
        {
            Ok(true) => Ok(()),
            Ok(false) => {
                tracing::info!(hashed_key = %hash_key(storage_key), "Step-up authentication declined");
                Err(VaultError::AuthenticationRequired)
            }
            Err(_) => {
                tracing::warn!(
                    hashed_key = %hash_key(storage_key),
                    timeout_ms = self.auth_timeout.as_millis() as u64,
                    "Step-up authentication timed out"
                );
                Err(VaultError::AuthenticationRequired)
            }
        }
    }

    async fn keys_in(&self, namespace: Namespace) -> VaultResult<Vec<String>> {
        let prefix = namespace.prefix();
        Ok(bounded(self.timeout, self.persistence.keys())
            .await?
            .into_iter()
            .filter_map(|key| key.strip_prefix(prefix).map(str::to_string))
            .collect())
    }
}
