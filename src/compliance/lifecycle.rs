// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Data subject rights: portable export, verified erasure and retention
//! evaluation.
//!
//! Erasure writes its [`DeletionReceipt`] before anything is removed, so a
//! failure part-way leaves a provable record of the attempt. Receipts live in
//! their own namespace and survive the erasure they document.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::consent::ConsentEngine;
use crate::error::{VaultError, VaultResult};
use crate::persistence::{bounded, PlainStorage};
use crate::storage::{AuditAction, AuditEntry, GetOptions, SecureStore};

/// Secure-store key of the user profile.
pub const USER_PROFILE_KEY: &str = "user_profile";

pub const EXPORT_FORMAT: &str = "json";
pub const EXPORT_FORMAT_VERSION: &str = "1.0";

/// Keys always looked up by an export, present or not.
pub const KNOWN_EXPORT_KEYS: &[&str] = &[
    USER_PROFILE_KEY,
    "consent_record",
    "mood_entries",
    "chat_history",
    "journal_entries",
    "crisis_plan",
    "settings",
    "emergency_contacts",
];

/// Receipt kind of deletion receipts.
pub const DELETION_RECEIPT_KIND: &str = "deletion";

/// Plain-storage prefixes that survive erasure.
pub const PRESERVED_PLAIN_PREFIXES: &[&str] = &["system_", "config_"];

/// Health-record retention window.
pub const RETENTION_WINDOW_DAYS: i64 = 7 * 365;

/// How far ahead of expiry a notice is raised.
pub const EXPIRY_NOTICE_DAYS: i64 = 30;

const SECONDS_PER_DAY: i64 = 24 * 60 * 60;

/// User profile. Only `created_at` is interpreted here.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserProfile {
    pub created_at: DateTime<Utc>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl UserProfile {
    pub fn new(created_at: DateTime<Utc>) -> Self {
        Self {
            created_at,
            extra: serde_json::Map::new(),
        }
    }
}

/// One exported entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExportedEntry {
    pub data_category: String,
    pub created_at: DateTime<Utc>,
    pub value: Value,
}

/// Portable export of every readable entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExportBundle {
    pub format: String,
    pub format_version: String,
    pub exported_at: DateTime<Utc>,
    pub categories: Vec<String>,
    pub entries: BTreeMap<String, ExportedEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeletionReceipt {
    pub timestamp: DateTime<Utc>,
    pub reason: String,
    pub method: String,
    pub ip_address: String,
    /// Whether a verification code accompanied the request.
    pub verified: bool,
}

/// Result of [`DataLifecycle::delete_user_data`].
#[derive(Debug, Clone, PartialEq)]
pub struct DeletionOutcome {
    pub receipt: DeletionReceipt,
    pub secure_entries_removed: usize,
    pub plain_keys_removed: usize,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RetentionAction {
    None,
    NotifyUpcomingExpiry,
    DeleteExpiredData,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetentionReport {
    pub compliant: bool,
    pub action: RetentionAction,
    /// Whole days left, rounded up. `None` without a profile.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub days_until_expiry: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

/// Export, erasure and retention over the secure store.
pub struct DataLifecycle {
    store: Arc<SecureStore>,
    consent: Arc<ConsentEngine>,
    plain: Arc<dyn PlainStorage>,
    development: bool,
    timeout: Duration,
}

impl DataLifecycle {
    pub fn new(
        store: Arc<SecureStore>,
        consent: Arc<ConsentEngine>,
        plain: Arc<dyn PlainStorage>,
        development: bool,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            consent,
            plain,
            development,
            timeout,
        }
    }

    /// Collect every readable entry into a portable bundle.
    ///
    /// Entries behind step-up authentication prompt as usual; a declined
    /// prompt aborts the export.
    pub async fn export_user_data(&self) -> VaultResult<ExportBundle> {
        let mut keys: Vec<String> = KNOWN_EXPORT_KEYS.iter().map(|k| k.to_string()).collect();
        for key in self.store.data_keys().await? {
            if !keys.contains(&key) {
                keys.push(key);
            }
        }

        let mut entries = BTreeMap::new();
        let mut categories = BTreeSet::new();
        for key in keys {
            let Some(entry) = self
                .store
                .get_entry::<Value>(&key, GetOptions::default())
                .await?
            else {
                continue;
            };
            categories.insert(entry.data_category.clone());
            entries.insert(
                key,
                ExportedEntry {
                    data_category: entry.data_category,
                    created_at: entry.created_at,
                    value: entry.value,
                },
            );
        }

        let categories: Vec<String> = categories.into_iter().collect();
        self.store
            .audit()
            .log(
                AuditEntry::new(AuditAction::DataExported, "all").with_details(
                    serde_json::json!({
                        "entry_count": entries.len(),
                        "categories": categories,
                    }),
                ),
            )
            .await;
        tracing::info!(entry_count = entries.len(), "Exported user data");

        Ok(ExportBundle {
            format: EXPORT_FORMAT.to_string(),
            format_version: EXPORT_FORMAT_VERSION.to_string(),
            exported_at: Utc::now(),
            categories,
            entries,
        })
    }

    /// Erase all user data.
    ///
    /// Outside development mode a non-empty verification code is required.
    /// Audit log, receipts, `system_*`/`config_*` plain keys and the master
    /// key survive.
    pub async fn delete_user_data(
        &self,
        verification_code: Option<&str>,
    ) -> VaultResult<DeletionOutcome> {
        let verified = verification_code.is_some_and(|code| !code.trim().is_empty());
        if !verified && !self.development {
            return Err(VaultError::VerificationRequired);
        }

        let context = self.consent.context();
        let receipt = DeletionReceipt {
            timestamp: Utc::now(),
            reason: "user_request".to_string(),
            method: if verified {
                "verified_request".to_string()
            } else {
                "development_override".to_string()
            },
            ip_address: context.ip_address.clone(),
            verified,
        };
        self.store
            .store_receipt(DELETION_RECEIPT_KIND, &receipt)
            .await?;

        let secure_entries_removed = self.store.clear_all().await?;

        let mut plain_keys_removed = 0;
        for key in bounded(self.timeout, self.plain.list()).await? {
            if PRESERVED_PLAIN_PREFIXES
                .iter()
                .any(|prefix| key.starts_with(prefix))
            {
                continue;
            }
            bounded(self.timeout, self.plain.remove(&key)).await?;
            plain_keys_removed += 1;
        }

        self.store
            .audit()
            .log(
                AuditEntry::new(AuditAction::DataDeleted, "all").with_details(serde_json::json!({
                    "secure_entries_removed": secure_entries_removed,
                    "plain_keys_removed": plain_keys_removed,
                })),
            )
            .await;
        tracing::info!(
            secure_entries_removed,
            plain_keys_removed,
            "Erased user data"
        );

        Ok(DeletionOutcome {
            receipt,
            secure_entries_removed,
            plain_keys_removed,
        })
    }

    /// Every deletion receipt, oldest first.
    pub async fn deletion_receipts(&self) -> VaultResult<Vec<DeletionReceipt>> {
        self.store.receipts(DELETION_RECEIPT_KIND).await
    }

    pub async fn check_data_retention(&self) -> VaultResult<RetentionReport> {
        self.check_data_retention_at(Utc::now()).await
    }

    /// Evaluate the retention window as of `now`.
    pub async fn check_data_retention_at(&self, now: DateTime<Utc>) -> VaultResult<RetentionReport> {
        let profile: Option<UserProfile> = self
            .store
            .get(USER_PROFILE_KEY, GetOptions::default())
            .await?;
        let Some(profile) = profile else {
            return Ok(RetentionReport {
                compliant: true,
                action: RetentionAction::None,
                days_until_expiry: None,
                expires_at: None,
            });
        };

        Ok(evaluate_retention(profile.created_at, now))
    }
}

/// Retention decision for data created at `created_at`.
pub fn evaluate_retention(created_at: DateTime<Utc>, now: DateTime<Utc>) -> RetentionReport {
    // Beyond the representable range the window never closes.
    let Some(expires_at) = created_at.checked_add_signed(TimeDelta::days(RETENTION_WINDOW_DAYS))
    else {
        return RetentionReport {
            compliant: true,
            action: RetentionAction::None,
            days_until_expiry: None,
            expires_at: None,
        };
    };
    if now >= expires_at {
        return RetentionReport {
            compliant: false,
            action: RetentionAction::DeleteExpiredData,
            days_until_expiry: Some(0),
            expires_at: Some(expires_at),
        };
    }

    let remaining = (expires_at - now).num_seconds();
    let days = (remaining + SECONDS_PER_DAY - 1) / SECONDS_PER_DAY;
    let action = if days <= EXPIRY_NOTICE_DAYS {
        RetentionAction::NotifyUpcomingExpiry
    } else {
        RetentionAction::None
    };

    RetentionReport {
        compliant: true,
        action,
        days_until_expiry: Some(days),
        expires_at: Some(expires_at),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compliance::consent::{ConsentContext, CONSENT_SUMMARY_KEY};
    use crate::config::Platform;
    use crate::crypto::KeyManager;
    use crate::persistence::{MemoryBackend, StaticAuthenticator};
    use crate::storage::{AuditLog, StoreOptions, AUDIT_LOG_KEY};
    use serde_json::json;

    struct Fixture {
        plain: Arc<MemoryBackend>,
        store: Arc<SecureStore>,
        consent: Arc<ConsentEngine>,
    }

    impl Fixture {
        fn new() -> Self {
            Self::with_authenticator(true)
        }

        fn with_authenticator(answer: bool) -> Self {
            let timeout = Duration::from_secs(1);
            let secure = Arc::new(MemoryBackend::default());
            let plain = Arc::new(MemoryBackend::default());
            let keys = Arc::new(KeyManager::new(secure.clone(), timeout));
            let audit = Arc::new(AuditLog::new(plain.clone(), Platform::Native, 100, timeout));
            let store = Arc::new(
                SecureStore::new(secure, keys, audit, timeout)
                    .with_step_up(Arc::new(StaticAuthenticator(answer)), timeout),
            );
            let consent = Arc::new(ConsentEngine::new(
                store.clone(),
                plain.clone(),
                ConsentContext::default(),
                timeout,
            ));
            Self {
                plain,
                store,
                consent,
            }
        }

        fn lifecycle(&self, development: bool) -> DataLifecycle {
            DataLifecycle::new(
                self.store.clone(),
                self.consent.clone(),
                self.plain.clone(),
                development,
                Duration::from_secs(1),
            )
        }
    }

    #[tokio::test]
    async fn export_collects_known_and_extra_keys() {
        let f = Fixture::new();
        f.store
            .store("mood_entries", &json!([{"mood": "calm"}]), &StoreOptions::new("mental_health_data"))
            .await
            .unwrap();
        f.store
            .store("sleep_log", &json!({"hours": 7}), &StoreOptions::new("health_data"))
            .await
            .unwrap();

        let bundle = f.lifecycle(false).export_user_data().await.unwrap();
        assert_eq!(bundle.format, EXPORT_FORMAT);
        assert_eq!(bundle.entries.len(), 2);
        assert_eq!(bundle.entries["mood_entries"].value, json!([{"mood": "calm"}]));
        assert_eq!(bundle.entries["sleep_log"].data_category, "health_data");
        assert_eq!(bundle.categories, vec!["health_data", "mental_health_data"]);
    }

    #[tokio::test]
    async fn export_audit_lists_categories_not_contents() {
        let f = Fixture::new();
        f.store
            .store("journal_entries", &json!(["felt low today"]), &StoreOptions::new("journal"))
            .await
            .unwrap();
        f.lifecycle(false).export_user_data().await.unwrap();

        let entries = f.store.audit().get_all().await.unwrap();
        let export = entries
            .iter()
            .find(|e| e.action == AuditAction::DataExported)
            .unwrap();
        assert_eq!(export.details.as_ref().unwrap()["categories"], json!(["journal"]));

        let raw_log = f.plain.raw_plain(AUDIT_LOG_KEY).await.unwrap();
        assert!(!raw_log.contains("felt low"));
        assert!(!raw_log.contains("journal_entries"));
    }

    #[tokio::test]
    async fn export_aborts_when_step_up_is_declined() {
        let f = Fixture::with_authenticator(false);
        f.store.store_crisis(&json!({"plan": "call sister"})).await.unwrap();

        let result = f.lifecycle(false).export_user_data().await;
        assert!(matches!(result, Err(VaultError::AuthenticationRequired)));
    }

    #[tokio::test]
    async fn deletion_requires_verification_outside_dev_mode() {
        let f = Fixture::new();
        let lifecycle = f.lifecycle(false);
        f.store.store("settings", &json!({"theme": "dark"}), &StoreOptions::default()).await.unwrap();

        for code in [None, Some(""), Some("   ")] {
            assert!(matches!(
                lifecycle.delete_user_data(code).await,
                Err(VaultError::VerificationRequired)
            ));
        }
        assert!(f.store.contains("settings").await.unwrap());
        assert!(lifecycle.deletion_receipts().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn dev_mode_deletes_without_code() {
        let f = Fixture::new();
        f.store.store("settings", &json!({"theme": "dark"}), &StoreOptions::default()).await.unwrap();

        let outcome = f.lifecycle(true).delete_user_data(None).await.unwrap();
        assert!(!outcome.receipt.verified);
        assert_eq!(outcome.secure_entries_removed, 1);
    }

    #[tokio::test]
    async fn erasure_removes_user_data_and_keeps_receipts() {
        let f = Fixture::new();
        let lifecycle = f.lifecycle(false);
        f.consent
            .record_consent(&json!({"data_processing": true, "crisis_intervention": true}))
            .await
            .unwrap();
        f.store
            .store("mood_entries", &json!([1, 2, 3]), &StoreOptions::new("mental_health_data"))
            .await
            .unwrap();
        f.plain.write("config_theme", "dark").await.unwrap();
        f.plain.write("onboarding_seen", "true").await.unwrap();

        let outcome = lifecycle.delete_user_data(Some("123456")).await.unwrap();
        assert!(outcome.receipt.verified);
        assert_eq!(outcome.secure_entries_removed, 2);
        // consent_summary and onboarding_seen
        assert_eq!(outcome.plain_keys_removed, 2);

        let mood: Option<Value> = f.store.get("mood_entries", GetOptions::default()).await.unwrap();
        assert!(mood.is_none());
        assert!(!f.consent.has_consent_for_action("store_mood_entry").await);
        assert!(f.plain.raw_plain(CONSENT_SUMMARY_KEY).await.is_none());
        assert_eq!(f.plain.raw_plain("config_theme").await.as_deref(), Some("dark"));
        assert!(f.plain.raw_plain(AUDIT_LOG_KEY).await.is_some());

        // Snapshot before reading receipts back, which audits a RETRIEVE.
        let actions: Vec<_> = f
            .store
            .audit()
            .get_all()
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.action)
            .collect();
        let clear = actions.iter().position(|a| *a == AuditAction::ClearAll).unwrap();
        let deleted = actions.iter().position(|a| *a == AuditAction::DataDeleted).unwrap();
        assert!(clear < deleted);
        assert_eq!(actions.last(), Some(&AuditAction::DataDeleted));

        let receipts = lifecycle.deletion_receipts().await.unwrap();
        assert_eq!(receipts, vec![outcome.receipt]);
    }

    #[tokio::test]
    async fn retention_without_profile_is_compliant() {
        let f = Fixture::new();
        let report = f.lifecycle(false).check_data_retention().await.unwrap();
        assert!(report.compliant);
        assert_eq!(report.action, RetentionAction::None);
        assert_eq!(report.days_until_expiry, None);
    }

    #[tokio::test]
    async fn retention_at_window_boundary_is_expired() {
        let f = Fixture::new();
        let now = Utc::now();
        let created = now - TimeDelta::days(RETENTION_WINDOW_DAYS);
        f.store
            .store(USER_PROFILE_KEY, &UserProfile::new(created), &StoreOptions::new("profile"))
            .await
            .unwrap();

        let report = f.lifecycle(false).check_data_retention_at(now).await.unwrap();
        assert!(!report.compliant);
        assert_eq!(report.action, RetentionAction::DeleteExpiredData);
    }

    #[tokio::test]
    async fn retention_inside_notice_window_notifies() {
        let f = Fixture::new();
        let now = Utc::now();
        let created = now - TimeDelta::days(RETENTION_WINDOW_DAYS - 10);
        f.store
            .store(USER_PROFILE_KEY, &UserProfile::new(created), &StoreOptions::new("profile"))
            .await
            .unwrap();

        let report = f.lifecycle(false).check_data_retention_at(now).await.unwrap();
        assert!(report.compliant);
        assert_eq!(report.action, RetentionAction::NotifyUpcomingExpiry);
        assert_eq!(report.days_until_expiry, Some(10));
    }

    #[test]
    fn partial_days_round_up() {
        let now = Utc::now();
        let created = now - TimeDelta::days(RETENTION_WINDOW_DAYS - 10) - TimeDelta::hours(12);
        let report = evaluate_retention(created, now);
        assert_eq!(report.days_until_expiry, Some(10));

        let fresh = evaluate_retention(now, now);
        assert_eq!(fresh.action, RetentionAction::None);
        assert_eq!(fresh.days_until_expiry, Some(RETENTION_WINDOW_DAYS));
    }

    #[tokio::test]
    async fn far_future_profile_never_expires() {
        let f = Fixture::new();
        let created = DateTime::<Utc>::MAX_UTC - TimeDelta::days(100);
        f.store
            .store(USER_PROFILE_KEY, &UserProfile::new(created), &StoreOptions::new("profile"))
            .await
            .unwrap();

        let report = f.lifecycle(false).check_data_retention().await.unwrap();
        assert!(report.compliant);
        assert_eq!(report.action, RetentionAction::None);
        assert_eq!(report.days_until_expiry, None);
        assert_eq!(report.expires_at, None);
    }

    #[test]
    fn profile_keeps_unknown_fields() {
        let profile: UserProfile = serde_json::from_value(json!({
            "created_at": "2024-01-01T00:00:00Z",
            "display_name": "R"
        }))
        .unwrap();
        assert_eq!(profile.extra["display_name"], json!("R"));
    }
}
