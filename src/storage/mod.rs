// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Encrypted Storage Module
//!
//! Sensitive values are sealed into envelopes by the crypto module and
//! written through [`SecurePersistence`](crate::persistence::SecurePersistence).
//! Every access appends an entry to the [`AuditLog`].
//!
//! ## Security Model
//!
//! - Plaintext never reaches persistence
//! - Envelopes are authenticated: tampering surfaces as `DecryptionFailed`
//! - Audit entries carry a digest of the key, never the key itself
//! - Audit failures are reported and skipped, data operations continue

pub mod audit;
pub mod secure_store;

pub use audit::{hash_key, AuditAction, AuditEntry, AuditLog, AUDIT_LOG_KEY, DEFAULT_AUDIT_CAPACITY};
pub use secure_store::{
    GetOptions, Namespace, SecureStore, StoreOptions, StoredEntry, CRISIS_DATA_CATEGORY,
    DEFAULT_DATA_CATEGORY, RECEIPT_DATA_CATEGORY,
};
