// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Versioned consent records and consent gating.
//!
//! The authoritative [`ConsentRecord`] is encrypted in the secure store. A
//! non-sensitive [`ConsentSummary`] is mirrored to plain storage so the
//! status check can tell "no consent" from "outdated consent" cheaply.
//!
//! Consent is valid only while the recorded schema version equals the
//! engine's current version. A version bump forces re-consent for every
//! gated action.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use unicode_normalization::UnicodeNormalization;

use crate::error::{VaultError, VaultResult};
use crate::persistence::{bounded, PlainStorage};
use crate::storage::{AuditAction, AuditEntry, GetOptions, SecureStore, StoreOptions};

/// Current consent schema version.
pub const CONSENT_SCHEMA_VERSION: &str = "2.0";

/// Secure-store key of the authoritative record.
pub const CONSENT_RECORD_KEY: &str = "consent_record";

/// Plain-storage key of the summary cache. User-scoped: removed on erasure.
pub const CONSENT_SUMMARY_KEY: &str = "consent_summary";

/// Data category of the consent record envelope.
pub const CONSENT_DATA_CATEGORY: &str = "consent_data";

/// Receipt kind of withdrawal receipts.
pub const WITHDRAWAL_RECEIPT_KIND: &str = "withdrawal";

/// Maximum length of a category identifier after normalization.
pub const MAX_CATEGORY_ID_LEN: usize = 64;

/// A consent category known to the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsentCategory {
    pub id: &'static str,
    /// Required for the application to operate at all.
    pub required: bool,
    pub description: &'static str,
}

pub const CONSENT_CATEGORIES: &[ConsentCategory] = &[
    ConsentCategory {
        id: "data_processing",
        required: true,
        description: "Store and process wellbeing data on this device",
    },
    ConsentCategory {
        id: "crisis_intervention",
        required: true,
        description: "Surface crisis resources and emergency contacts",
    },
    ConsentCategory {
        id: "analytics",
        required: false,
        description: "Anonymous usage analytics",
    },
    ConsentCategory {
        id: "personalization",
        required: false,
        description: "Personalized content and suggestions",
    },
    ConsentCategory {
        id: "research",
        required: false,
        description: "Participation in anonymized research",
    },
    ConsentCategory {
        id: "third_party_sharing",
        required: false,
        description: "Sharing data with a chosen care provider",
    },
    ConsentCategory {
        id: "marketing",
        required: false,
        description: "Marketing notifications",
    },
];

/// Action name to the consent category that gates it.
pub const ACTION_CATEGORIES: &[(&str, &str)] = &[
    ("data_processing", "data_processing"),
    ("store_mood_entry", "data_processing"),
    ("ai_chat", "data_processing"),
    ("sync_profile", "data_processing"),
    ("crisis_intervention", "crisis_intervention"),
    ("crisis_alert", "crisis_intervention"),
    ("emergency_contact", "crisis_intervention"),
    ("analytics", "analytics"),
    ("usage_analytics", "analytics"),
    ("personalization", "personalization"),
    ("personalized_content", "personalization"),
    ("research", "research"),
    ("research_participation", "research"),
    ("third_party_sharing", "third_party_sharing"),
    ("share_with_provider", "third_party_sharing"),
    ("marketing", "marketing"),
    ("marketing_notifications", "marketing"),
];

/// Category gating `action`, if the action is known.
pub fn category_for_action(action: &str) -> Option<&'static str> {
    ACTION_CATEGORIES
        .iter()
        .find(|(name, _)| *name == action)
        .map(|(_, category)| *category)
}

/// Provenance attached to consent records and receipts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConsentContext {
    pub ip_address: String,
    pub user_agent: String,
    pub method: String,
}

impl Default for ConsentContext {
    fn default() -> Self {
        Self {
            ip_address: "local".to_string(),
            user_agent: concat!("wellbeing-vault/", env!("CARGO_PKG_VERSION")).to_string(),
            method: "explicit_opt_in".to_string(),
        }
    }
}

/// Authoritative consent record (encrypted at rest).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConsentRecord {
    pub consents: BTreeMap<String, bool>,
    pub version: String,
    /// When consent was first recorded.
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
    pub ip_address: String,
    pub user_agent: String,
    pub method: String,
}

impl ConsentRecord {
    /// Whether `category` is granted in this record.
    pub fn grants(&self, category: &str) -> bool {
        self.consents.get(category).copied().unwrap_or(false)
    }

    fn granted(&self) -> Vec<String> {
        self.consents
            .iter()
            .filter(|(_, granted)| **granted)
            .map(|(category, _)| category.clone())
            .collect()
    }
}

/// Plain summary mirrored next to the record. Holds no decisions beyond the
/// granted category names.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConsentSummary {
    pub has_consent: bool,
    pub version: String,
    pub timestamp: DateTime<Utc>,
    pub categories: Vec<String>,
}

/// Result of [`ConsentEngine::get_consent_status`].
#[derive(Debug, Clone, PartialEq)]
pub struct ConsentStatus {
    pub has_consent: bool,
    /// True when no valid record exists for the current schema version.
    pub needs_update: bool,
    pub record: Option<ConsentRecord>,
}

impl ConsentStatus {
    fn absent() -> Self {
        Self {
            has_consent: false,
            needs_update: true,
            record: None,
        }
    }
}

/// Receipt left behind by a withdrawal.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WithdrawalReceipt {
    pub timestamp: DateTime<Utc>,
    pub reason: String,
    pub method: String,
    pub ip_address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consent_version: Option<String>,
}

/// Normalize a category identifier: trim, NFKC, lowercase, cap at
/// [`MAX_CATEGORY_ID_LEN`] characters.
pub fn sanitize_category_id(raw: &str) -> VaultResult<String> {
    let normalized: String = raw
        .trim()
        .nfkc()
        .collect::<String>()
        .to_lowercase()
        .chars()
        .take(MAX_CATEGORY_ID_LEN)
        .collect();

    let valid = !normalized.is_empty()
        && normalized
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    if valid {
        Ok(normalized)
    } else {
        Err(VaultError::InvalidConsent(format!(
            "invalid consent category identifier: {raw:?}"
        )))
    }
}

/// Validate a consent map: a JSON object of category id to boolean.
pub fn sanitize_consents(consents: &Value) -> VaultResult<BTreeMap<String, bool>> {
    let object = consents.as_object().ok_or_else(|| {
        VaultError::InvalidConsent("consent map must be a JSON object".to_string())
    })?;

    let mut sanitized = BTreeMap::new();
    for (raw_id, decision) in object {
        let id = sanitize_category_id(raw_id)?;
        let granted = decision.as_bool().ok_or_else(|| {
            VaultError::InvalidConsent(format!("consent for {id} must be a boolean"))
        })?;
        sanitized.insert(id, granted);
    }
    Ok(sanitized)
}

/// Required categories not granted in `consents`.
pub fn missing_required(consents: &BTreeMap<String, bool>) -> Vec<&'static str> {
    CONSENT_CATEGORIES
        .iter()
        .filter(|category| category.required)
        .filter(|category| !consents.get(category.id).copied().unwrap_or(false))
        .map(|category| category.id)
        .collect()
}

/// Records, updates and withdraws consent, and answers gating queries.
pub struct ConsentEngine {
    store: Arc<SecureStore>,
    plain: Arc<dyn PlainStorage>,
    schema_version: String,
    context: ConsentContext,
    timeout: Duration,
}

impl ConsentEngine {
    pub fn new(
        store: Arc<SecureStore>,
        plain: Arc<dyn PlainStorage>,
        context: ConsentContext,
        timeout: Duration,
    ) -> Self {
        Self::with_schema_version(store, plain, context, timeout, CONSENT_SCHEMA_VERSION)
    }

    pub fn with_schema_version(
        store: Arc<SecureStore>,
        plain: Arc<dyn PlainStorage>,
        context: ConsentContext,
        timeout: Duration,
        schema_version: impl Into<String>,
    ) -> Self {
        Self {
            store,
            plain,
            schema_version: schema_version.into(),
            context,
            timeout,
        }
    }

    pub fn schema_version(&self) -> &str {
        &self.schema_version
    }

    pub fn context(&self) -> &ConsentContext {
        &self.context
    }

    /// Record a full consent map, replacing any previous record.
    pub async fn record_consent(&self, consents: &Value) -> VaultResult<ConsentRecord> {
        let consents = sanitize_consents(consents)?;
        let missing = missing_required(&consents);
        if !missing.is_empty() {
            tracing::info!(missing = ?missing, "Consent recorded without required categories");
        }

        let record = ConsentRecord {
            consents,
            version: self.schema_version.clone(),
            timestamp: Utc::now(),
            last_updated: None,
            ip_address: self.context.ip_address.clone(),
            user_agent: self.context.user_agent.clone(),
            method: self.context.method.clone(),
        };
        self.persist(&record).await?;

        self.store
            .audit()
            .log(
                AuditEntry::new(AuditAction::ConsentRecorded, CONSENT_DATA_CATEGORY).with_details(
                    serde_json::json!({
                        "version": record.version,
                        "granted": record.granted(),
                    }),
                ),
            )
            .await;
        tracing::info!(version = %record.version, "Consent recorded");
        Ok(record)
    }

    /// Current consent state. A record under an older schema version reports
    /// `needs_update`.
    pub async fn get_consent_status(&self) -> VaultResult<ConsentStatus> {
        let Some(summary) = self.read_summary().await? else {
            return Ok(ConsentStatus::absent());
        };
        if !summary.has_consent || summary.version != self.schema_version {
            return Ok(ConsentStatus::absent());
        }

        let record: Option<ConsentRecord> = self
            .store
            .get(CONSENT_RECORD_KEY, GetOptions::default())
            .await?;
        Ok(match record {
            Some(record) => ConsentStatus {
                has_consent: true,
                needs_update: record.version != self.schema_version,
                record: Some(record),
            },
            None => ConsentStatus::absent(),
        })
    }

    /// Merge a partial map into the existing record.
    ///
    /// A record under another schema version cannot be updated; it must be
    /// re-recorded in full.
    pub async fn update_consent(&self, partial: &Value) -> VaultResult<ConsentRecord> {
        let partial = sanitize_consents(partial)?;

        let mut record: ConsentRecord = self
            .store
            .get(CONSENT_RECORD_KEY, GetOptions::default())
            .await?
            .ok_or(VaultError::NoExistingConsent)?;
        if record.version != self.schema_version {
            tracing::info!(
                recorded = %record.version,
                current = %self.schema_version,
                "Consent update refused for outdated record"
            );
            return Err(VaultError::NoExistingConsent);
        }

        let changed: Vec<String> = partial.keys().cloned().collect();
        record.consents.extend(partial);
        record.last_updated = Some(Utc::now());
        self.persist(&record).await?;

        self.store
            .audit()
            .log(
                AuditEntry::new(AuditAction::ConsentUpdated, CONSENT_DATA_CATEGORY).with_details(
                    serde_json::json!({
                        "version": record.version,
                        "changed": changed,
                    }),
                ),
            )
            .await;
        Ok(record)
    }

    /// Withdraw all consent. A receipt is persisted before the record is
    /// removed, so the withdrawal stays provable.
    pub async fn withdraw_consent(&self, reason: &str) -> VaultResult<WithdrawalReceipt> {
        let consent_version = self
            .read_summary()
            .await
            .ok()
            .flatten()
            .map(|summary| summary.version);

        let receipt = WithdrawalReceipt {
            timestamp: Utc::now(),
            reason: reason.to_string(),
            method: self.context.method.clone(),
            ip_address: self.context.ip_address.clone(),
            consent_version,
        };
        self.store
            .store_receipt(WITHDRAWAL_RECEIPT_KIND, &receipt)
            .await?;

        self.store.remove(CONSENT_RECORD_KEY).await?;
        bounded(self.timeout, self.plain.remove(CONSENT_SUMMARY_KEY)).await?;

        self.store
            .audit()
            .log(AuditEntry::new(AuditAction::ConsentWithdrawn, CONSENT_DATA_CATEGORY))
            .await;
        tracing::info!("Consent withdrawn");
        Ok(receipt)
    }

    /// Whether `action` is currently permitted. Fails closed: unknown
    /// actions and any storage or decryption error yield `false`.
    pub async fn has_consent_for_action(&self, action: &str) -> bool {
        let Some(category) = category_for_action(action) else {
            tracing::debug!(action, "Unknown action, denying");
            return false;
        };

        match self.get_consent_status().await {
            Ok(ConsentStatus {
                has_consent: true,
                needs_update: false,
                record: Some(record),
            }) => record.grants(category),
            Ok(_) => false,
            Err(e) => {
                tracing::warn!(action, error = %e, "Consent check failed, denying");
                false
            }
        }
    }

    /// Every withdrawal receipt, oldest first.
    pub async fn withdrawal_receipts(&self) -> VaultResult<Vec<WithdrawalReceipt>> {
        self.store.receipts(WITHDRAWAL_RECEIPT_KIND).await
    }

    async fn persist(&self, record: &ConsentRecord) -> VaultResult<()> {
        self.store
            .store(
                CONSENT_RECORD_KEY,
                record,
                &StoreOptions::new(CONSENT_DATA_CATEGORY),
            )
            .await?;

        let summary = ConsentSummary {
            has_consent: true,
            version: record.version.clone(),
            timestamp: record.last_updated.unwrap_or(record.timestamp),
            categories: record.granted(),
        };
        let raw = serde_json::to_string(&summary)?;
        bounded(self.timeout, self.plain.write(CONSENT_SUMMARY_KEY, &raw)).await?;
        Ok(())
    }

    async fn read_summary(&self) -> VaultResult<Option<ConsentSummary>> {
        let Some(raw) = bounded(self.timeout, self.plain.read(CONSENT_SUMMARY_KEY)).await? else {
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(summary) => Ok(Some(summary)),
            Err(e) => {
                tracing::warn!(error = %e, "Consent summary unreadable, treating as absent");
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Platform;
    use crate::crypto::KeyManager;
    use crate::persistence::{MemoryBackend, SecurePersistence};
    use crate::storage::AuditLog;
    use serde_json::json;

    struct Fixture {
        secure: Arc<MemoryBackend>,
        plain: Arc<MemoryBackend>,
        store: Arc<SecureStore>,
    }

    impl Fixture {
        fn new() -> Self {
            let timeout = Duration::from_secs(1);
            let secure = Arc::new(MemoryBackend::default());
            let plain = Arc::new(MemoryBackend::default());
            let keys = Arc::new(KeyManager::new(secure.clone(), timeout));
            let audit = Arc::new(AuditLog::new(plain.clone(), Platform::Native, 100, timeout));
            let store = Arc::new(SecureStore::new(secure.clone(), keys, audit, timeout));
            Self {
                secure,
                plain,
                store,
            }
        }

        fn engine(&self, version: &str) -> ConsentEngine {
            ConsentEngine::with_schema_version(
                self.store.clone(),
                self.plain.clone(),
                ConsentContext::default(),
                Duration::from_secs(1),
                version,
            )
        }
    }

    fn required_only() -> Value {
        json!({"data_processing": true, "crisis_intervention": true})
    }

    #[test]
    fn category_ids_are_normalized() {
        assert_eq!(sanitize_category_id("  Analytics ").unwrap(), "analytics");
        // Fullwidth letters fold under NFKC.
        assert_eq!(sanitize_category_id("ｒｅｓｅａｒｃｈ").unwrap(), "research");
        assert_eq!(sanitize_category_id(&"a".repeat(100)).unwrap().len(), MAX_CATEGORY_ID_LEN);
    }

    #[test]
    fn bad_category_ids_are_rejected() {
        for bad in ["", "   ", "third-party", "a b", "<script>"] {
            assert!(
                matches!(sanitize_category_id(bad), Err(VaultError::InvalidConsent(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn non_boolean_decisions_are_rejected() {
        let result = sanitize_consents(&json!({"analytics": "yes"}));
        assert!(matches!(result, Err(VaultError::InvalidConsent(_))));

        let result = sanitize_consents(&json!(["analytics"]));
        assert!(matches!(result, Err(VaultError::InvalidConsent(_))));
    }

    #[test]
    fn missing_required_lists_ungranted_required_categories() {
        let consents = sanitize_consents(&json!({"data_processing": true, "analytics": true})).unwrap();
        assert_eq!(missing_required(&consents), vec!["crisis_intervention"]);

        let consents = sanitize_consents(&required_only()).unwrap();
        assert!(missing_required(&consents).is_empty());
    }

    #[test]
    fn every_action_maps_to_a_known_category() {
        for (action, category) in ACTION_CATEGORIES {
            assert!(
                CONSENT_CATEGORIES.iter().any(|c| c.id == *category),
                "{action} maps to unknown category {category}"
            );
        }
        assert_eq!(category_for_action("store_mood_entry"), Some("data_processing"));
        assert_eq!(category_for_action("launch_rockets"), None);
    }

    #[tokio::test]
    async fn gating_follows_record_and_withdrawal() {
        let f = Fixture::new();
        let engine = f.engine(CONSENT_SCHEMA_VERSION);

        assert!(!engine.has_consent_for_action("store_mood_entry").await);

        engine.record_consent(&required_only()).await.unwrap();
        assert!(engine.has_consent_for_action("store_mood_entry").await);
        assert!(engine.has_consent_for_action("crisis_alert").await);
        assert!(!engine.has_consent_for_action("marketing_notifications").await);

        let receipt = engine.withdraw_consent("user_request").await.unwrap();
        assert_eq!(receipt.consent_version.as_deref(), Some(CONSENT_SCHEMA_VERSION));
        assert!(!engine.has_consent_for_action("store_mood_entry").await);

        let receipts = engine.withdrawal_receipts().await.unwrap();
        assert_eq!(receipts, vec![receipt]);
    }

    #[tokio::test]
    async fn schema_upgrade_requires_reconsent() {
        let f = Fixture::new();
        f.engine("1.0")
            .record_consent(&json!({"data_processing": true, "analytics": true}))
            .await
            .unwrap();

        let upgraded = f.engine("2.0");
        let status = upgraded.get_consent_status().await.unwrap();
        assert!(!status.has_consent);
        assert!(status.needs_update);
        assert!(!upgraded.has_consent_for_action("store_mood_entry").await);

        upgraded.record_consent(&required_only()).await.unwrap();
        let status = upgraded.get_consent_status().await.unwrap();
        assert!(status.has_consent);
        assert!(!status.needs_update);
        assert_eq!(status.record.unwrap().version, "2.0");
    }

    #[tokio::test]
    async fn outdated_record_cannot_be_updated_into_current_schema() {
        let f = Fixture::new();
        f.engine("1.0")
            .record_consent(&required_only())
            .await
            .unwrap();

        let upgraded = f.engine("2.0");
        assert!(!upgraded.has_consent_for_action("data_processing").await);

        let result = upgraded.update_consent(&json!({"marketing": false})).await;
        assert!(matches!(result, Err(VaultError::NoExistingConsent)));
        assert!(!upgraded.has_consent_for_action("data_processing").await);
        assert!(upgraded.get_consent_status().await.unwrap().needs_update);
    }

    #[tokio::test]
    async fn record_without_summary_needs_update() {
        let f = Fixture::new();
        let engine = f.engine(CONSENT_SCHEMA_VERSION);
        engine.record_consent(&required_only()).await.unwrap();
        f.plain.remove(CONSENT_SUMMARY_KEY).await.unwrap();

        let status = engine.get_consent_status().await.unwrap();
        assert!(!status.has_consent);
        assert!(status.needs_update);
    }

    #[tokio::test]
    async fn update_merges_into_existing_record() {
        let f = Fixture::new();
        let engine = f.engine(CONSENT_SCHEMA_VERSION);
        let original = engine.record_consent(&required_only()).await.unwrap();

        let updated = engine
            .update_consent(&json!({"Analytics": true, "crisis_intervention": false}))
            .await
            .unwrap();
        assert!(updated.grants("data_processing"));
        assert!(updated.grants("analytics"));
        assert!(!updated.grants("crisis_intervention"));
        assert_eq!(updated.timestamp, original.timestamp);
        assert!(updated.last_updated.is_some());

        assert!(engine.has_consent_for_action("usage_analytics").await);
        assert!(!engine.has_consent_for_action("emergency_contact").await);
    }

    #[tokio::test]
    async fn update_without_record_fails() {
        let f = Fixture::new();
        let result = f
            .engine(CONSENT_SCHEMA_VERSION)
            .update_consent(&json!({"analytics": true}))
            .await;
        assert!(matches!(result, Err(VaultError::NoExistingConsent)));
    }

    #[tokio::test]
    async fn record_is_encrypted_and_summary_is_plain() {
        let f = Fixture::new();
        f.engine(CONSENT_SCHEMA_VERSION)
            .record_consent(&required_only())
            .await
            .unwrap();

        let raw_record = f.secure.raw("secure_consent_record").await.unwrap();
        assert!(!raw_record.contains("data_processing"));

        let summary: ConsentSummary =
            serde_json::from_str(&f.plain.raw_plain(CONSENT_SUMMARY_KEY).await.unwrap()).unwrap();
        assert!(summary.has_consent);
        assert_eq!(summary.version, CONSENT_SCHEMA_VERSION);
    }

    #[tokio::test]
    async fn storage_failure_denies_actions() {
        let f = Fixture::new();
        let engine = f.engine(CONSENT_SCHEMA_VERSION);
        engine.record_consent(&required_only()).await.unwrap();

        f.plain.set_available(false);
        assert!(!engine.has_consent_for_action("store_mood_entry").await);
        f.plain.set_available(true);

        f.secure
            .overwrite_raw("secure_consent_record", "{\"tampered\":true}")
            .await;
        assert!(!engine.has_consent_for_action("store_mood_entry").await);
    }

    #[tokio::test]
    async fn unknown_action_is_denied_even_with_full_consent() {
        let f = Fixture::new();
        let engine = f.engine(CONSENT_SCHEMA_VERSION);
        let everything: serde_json::Map<String, Value> = CONSENT_CATEGORIES
            .iter()
            .map(|c| (c.id.to_string(), Value::Bool(true)))
            .collect();
        engine.record_consent(&Value::Object(everything)).await.unwrap();

        assert!(!engine.has_consent_for_action("sell_data").await);
    }

    #[tokio::test]
    async fn consent_events_are_audited() {
        let f = Fixture::new();
        let engine = f.engine(CONSENT_SCHEMA_VERSION);
        engine.record_consent(&required_only()).await.unwrap();
        engine.update_consent(&json!({"research": true})).await.unwrap();
        engine.withdraw_consent("done").await.unwrap();

        let actions: Vec<_> = f
            .store
            .audit()
            .get_all()
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.action)
            .collect();
        assert!(actions.contains(&AuditAction::ConsentRecorded));
        assert!(actions.contains(&AuditAction::ConsentUpdated));
        assert!(actions.contains(&AuditAction::ConsentWithdrawn));

        // The secure record is gone, only the receipt remains.
        let keys = f.secure.keys().await.unwrap();
        assert!(!keys.iter().any(|k| k == "secure_consent_record"));
        assert!(keys.iter().any(|k| k.starts_with("receipt_withdrawal_")));
    }
}
