// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Platform Persistence Capabilities
//!
//! The vault never talks to a concrete platform API. It depends on two
//! capability traits, and the host picks an adapter at startup:
//!
//! | Trait | Holds | Adapters |
//! |-------|-------|----------|
//! | [`SecurePersistence`] | master key, encrypted envelopes, receipts | [`MemoryBackend`], [`FsBackend`] |
//! | [`PlainStorage`] | consent summary cache, audit log, user-scoped plain keys | [`MemoryBackend`], [`FsBackend`] |
//!
//! Secure items may be flagged `require_auth`. Adapters persist the flag and
//! hand it back with the item; the secure store runs the
//! [`StepUpAuthenticator`] before decrypting, outside the bounded platform
//! call, so a slow gesture is never mistaken for an unreachable store.
//!
//! The two traits use different method names so a single adapter can
//! implement both without ambiguous call sites.

pub mod fs;
pub mod memory;
pub mod paths;

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;

pub use fs::FsBackend;
pub use memory::MemoryBackend;
pub use paths::StoragePaths;

/// Maximum accepted length of a persisted key name.
pub const MAX_KEY_LEN: usize = 128;

/// Error type for platform persistence adapters.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Platform store unreachable (locked keychain, revoked session, ...).
    #[error("platform storage unavailable: {0}")]
    Unavailable(String),

    #[error("step-up authentication declined")]
    AuthenticationDeclined,

    #[error("invalid key name: {0}")]
    InvalidKey(String),

    /// A persisted record exists but cannot be parsed.
    #[error("corrupt record: {0}")]
    Corrupt(String),

    #[error("platform call timed out after {0} ms")]
    Timeout(u64),
}

pub type PersistenceResult<T> = Result<T, PersistenceError>;

/// Access requirements attached to a secure item.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ItemAccess {
    /// Require a step-up authentication gesture before the read.
    pub require_auth: bool,
}

impl ItemAccess {
    pub const OPEN: ItemAccess = ItemAccess { require_auth: false };
    pub const AUTHENTICATED: ItemAccess = ItemAccess { require_auth: true };
}

/// A secure item as persisted, with the access flag it was written under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecureItem {
    pub value: String,
    pub access: ItemAccess,
}

/// Keyed secure persistence (keychain / secure enclave / session storage).
#[async_trait]
pub trait SecurePersistence: Send + Sync {
    /// Read an item. `Ok(None)` when nothing is stored under `key`.
    async fn get(&self, key: &str) -> PersistenceResult<Option<SecureItem>>;

    /// Write an item, replacing any existing value.
    async fn set(&self, key: &str, value: &str, access: ItemAccess) -> PersistenceResult<()>;

    /// Delete an item. Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> PersistenceResult<()>;

    /// List every key this adapter holds.
    async fn keys(&self) -> PersistenceResult<Vec<String>>;
}

/// Plain key-value persistence for non-sensitive data.
#[async_trait]
pub trait PlainStorage: Send + Sync {
    async fn read(&self, key: &str) -> PersistenceResult<Option<String>>;

    async fn write(&self, key: &str, value: &str) -> PersistenceResult<()>;

    /// Remove a key. Removing a missing key is not an error.
    async fn remove(&self, key: &str) -> PersistenceResult<()>;

    async fn list(&self) -> PersistenceResult<Vec<String>>;
}

/// User-presence / biometric check performed before releasing a protected item.
#[async_trait]
pub trait StepUpAuthenticator: Send + Sync {
    /// Returns `true` when the user completed the gesture.
    async fn authenticate(&self, reason: &str) -> bool;
}

/// Authenticator with a fixed answer.
///
/// Hosts without a biometric prompt use `StaticAuthenticator(true)`;
/// `StaticAuthenticator(false)` models a user who always declines.
#[derive(Debug, Clone, Copy)]
pub struct StaticAuthenticator(pub bool);

#[async_trait]
impl StepUpAuthenticator for StaticAuthenticator {
    async fn authenticate(&self, _reason: &str) -> bool {
        self.0
    }
}

/// Check that a key name is safe to hand to any adapter.
///
/// Accepts ASCII alphanumerics, `_`, `-` and `.` (not leading).
pub fn validate_key(key: &str) -> PersistenceResult<()> {
    let valid = !key.is_empty()
        && key.len() <= MAX_KEY_LEN
        && !key.starts_with('.')
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
    if valid {
        Ok(())
    } else {
        Err(PersistenceError::InvalidKey(key.to_string()))
    }
}

/// Run a platform call under a bounded timeout.
pub async fn bounded<T, F>(timeout: Duration, call: F) -> PersistenceResult<T>
where
    F: Future<Output = PersistenceResult<T>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(PersistenceError::Timeout(timeout.as_millis() as u64)),
    }
}
