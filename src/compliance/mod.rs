// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Compliance Module
//!
//! Consent management and data subject rights on top of the secure store.
//!
//! - [`consent`] - versioned consent records and fail-closed gating
//! - [`lifecycle`] - export, verified erasure, retention evaluation
//! - [`retention_monitor`] - periodic retention reporting

pub mod consent;
pub mod lifecycle;
pub mod retention_monitor;

pub use consent::{
    category_for_action, missing_required, sanitize_category_id, sanitize_consents,
    ConsentCategory, ConsentContext, ConsentEngine, ConsentRecord, ConsentStatus, ConsentSummary,
    WithdrawalReceipt, ACTION_CATEGORIES, CONSENT_CATEGORIES, CONSENT_RECORD_KEY,
    CONSENT_SCHEMA_VERSION, CONSENT_SUMMARY_KEY,
};
pub use lifecycle::{
    evaluate_retention, DataLifecycle, DeletionOutcome, DeletionReceipt, ExportBundle,
    ExportedEntry, RetentionAction, RetentionReport, UserProfile, EXPIRY_NOTICE_DAYS,
    RETENTION_WINDOW_DAYS, USER_PROFILE_KEY,
};
pub use retention_monitor::RetentionMonitor;
