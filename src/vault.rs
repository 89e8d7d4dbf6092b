// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Vault
//!
//! Service wiring and the call surface other modules use.
//!
//! [`Vault`] owns one instance of each service, built explicitly and shared
//! through `Arc`. Several vaults can coexist in one process (one per test,
//! for example); nothing is global.
//!
//! ## Adapter Selection
//!
//! | `data_dir` | Secure persistence | Plain storage |
//! |------------|--------------------|---------------|
//! | set | [`FsBackend`] under `{dir}/secure` | [`FsBackend`] under `{dir}/plain` |
//! | unset | [`MemoryBackend`] | [`MemoryBackend`] |

use std::sync::Arc;

use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

use crate::compliance::{
    ConsentContext, ConsentEngine, ConsentRecord, ConsentStatus, DataLifecycle, DeletionOutcome,
    ExportBundle, RetentionMonitor, RetentionReport, WithdrawalReceipt,
};
use crate::config::VaultConfig;
use crate::crypto::KeyManager;
use crate::error::VaultResult;
use crate::persistence::{
    FsBackend, MemoryBackend, PlainStorage, SecurePersistence, StaticAuthenticator,
    StepUpAuthenticator, StoragePaths,
};
use crate::storage::{AuditLog, GetOptions, SecureStore, StoreOptions};

pub struct Vault {
    config: VaultConfig,
    store: Arc<SecureStore>,
    consent: Arc<ConsentEngine>,
    lifecycle: Arc<DataLifecycle>,
}

impl Vault {
    /// Build a vault on the adapters `config` selects. Step-up prompts are
    /// auto-confirmed; use [`Vault::init_with_authenticator`] to supply one.
    pub async fn init(config: VaultConfig) -> VaultResult<Self> {
        Self::init_with_authenticator(config, Arc::new(StaticAuthenticator(true))).await
    }

    /// Build a vault and load (or create) the master key up front, so an
    /// unreachable key store fails here rather than on the first write.
    pub async fn init_with_authenticator(
        config: VaultConfig,
        authenticator: Arc<dyn StepUpAuthenticator>,
    ) -> VaultResult<Self> {
        let vault = match config.data_dir.clone() {
            Some(dir) => {
                let backend = Arc::new(FsBackend::new(StoragePaths::new(&dir)));
                backend.initialize().await?;
                backend.health_check().await?;
                tracing::info!(data_dir = %dir.display(), "Using filesystem persistence");
                Self::with_backends(
                    config,
                    backend.clone(),
                    backend,
                    authenticator,
                    ConsentContext::default(),
                )
            }
            None => {
                let backend = Arc::new(MemoryBackend::new());
                tracing::info!("Using in-memory persistence");
                Self::with_backends(
                    config,
                    backend.clone(),
                    backend,
                    authenticator,
                    ConsentContext::default(),
                )
            }
        };

        vault.store.key_manager().get_or_create_key().await?;
        tracing::info!(platform = %vault.config.platform, "Vault initialized");
        Ok(vault)
    }

    /// Build a vault on caller-supplied adapters.
    pub fn with_backends(
        config: VaultConfig,
        secure: Arc<dyn SecurePersistence>,
        plain: Arc<dyn PlainStorage>,
        authenticator: Arc<dyn StepUpAuthenticator>,
        context: ConsentContext,
    ) -> Self {
        let timeout = config.platform_timeout;
        let keys = Arc::new(KeyManager::new(secure.clone(), timeout));
        let audit = Arc::new(AuditLog::new(
            plain.clone(),
            config.platform,
            config.audit_capacity,
            timeout,
        ));
        let store = Arc::new(
            SecureStore::new(secure, keys, audit, timeout)
                .with_step_up(authenticator, config.auth_timeout),
        );
        let consent = Arc::new(ConsentEngine::new(
            store.clone(),
            plain.clone(),
            context,
            timeout,
        ));
        let lifecycle = Arc::new(DataLifecycle::new(
            store.clone(),
            consent.clone(),
            plain,
            config.development,
            timeout,
        ));

        Self {
            config,
            store,
            consent,
            lifecycle,
        }
    }

    /// Drop the cached master key. Persisted data is untouched.
    pub async fn dispose(&self) {
        self.store.key_manager().reset().await;
        tracing::info!("Vault disposed");
    }

    pub fn config(&self) -> &VaultConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<SecureStore> {
        &self.store
    }

    pub fn audit(&self) -> &Arc<AuditLog> {
        self.store.audit()
    }

    pub fn consent(&self) -> &Arc<ConsentEngine> {
        &self.consent
    }

    pub fn lifecycle(&self) -> &Arc<DataLifecycle> {
        &self.lifecycle
    }

    /// Retention monitor over this vault, at the configured interval.
    pub fn retention_monitor(&self) -> RetentionMonitor {
        RetentionMonitor::new(self.lifecycle.clone())
            .with_interval(self.config.retention_sweep_interval)
    }

    // ========== Secure Data ==========

    pub async fn store_secure_data<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        data_type: &str,
    ) -> VaultResult<()> {
        self.store
            .store(key, value, &StoreOptions::new(data_type))
            .await
    }

    /// Like [`Vault::store_secure_data`], gating every future read behind
    /// step-up authentication.
    pub async fn store_protected_data<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        data_type: &str,
    ) -> VaultResult<()> {
        self.store
            .store(key, value, &StoreOptions::new(data_type).require_auth())
            .await
    }

    pub async fn get_secure_data<T: DeserializeOwned>(
        &self,
        key: &str,
        require_biometric: bool,
    ) -> VaultResult<Option<T>> {
        self.store
            .get(
                key,
                GetOptions {
                    require_auth: require_biometric,
                },
            )
            .await
    }

    pub async fn remove_secure_data(&self, key: &str) -> VaultResult<()> {
        self.store.remove(key).await
    }

    pub async fn store_crisis_data<T: Serialize + ?Sized>(&self, value: &T) -> VaultResult<String> {
        self.store.store_crisis(value).await
    }

    pub async fn clear_all_secure_data(&self) -> VaultResult<usize> {
        self.store.clear_all().await
    }

    // ========== Consent ==========

    pub async fn record_consent(&self, consents: &Value) -> VaultResult<ConsentRecord> {
        self.consent.record_consent(consents).await
    }

    pub async fn get_consent_status(&self) -> VaultResult<ConsentStatus> {
        self.consent.get_consent_status().await
    }

    pub async fn update_consent(&self, partial: &Value) -> VaultResult<ConsentRecord> {
        self.consent.update_consent(partial).await
    }

    pub async fn withdraw_consent(&self, reason: &str) -> VaultResult<WithdrawalReceipt> {
        self.consent.withdraw_consent(reason).await
    }

    pub async fn has_consent_for_action(&self, action: &str) -> bool {
        self.consent.has_consent_for_action(action).await
    }

    // ========== Lifecycle ==========

    pub async fn export_user_data(&self) -> VaultResult<ExportBundle> {
        self.lifecycle.export_user_data().await
    }

    pub async fn delete_user_data(
        &self,
        verification_code: Option<&str>,
    ) -> VaultResult<DeletionOutcome> {
        self.lifecycle.delete_user_data(verification_code).await
    }

    pub async fn check_data_retention(&self) -> VaultResult<RetentionReport> {
        self.lifecycle.check_data_retention().await
    }
}
