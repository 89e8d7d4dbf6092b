// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Error types shared by every vault service.
//!
//! Callers can tell "nothing stored" (`Ok(None)`) apart from
//! `DecryptionFailed`, which means corruption or tampering and needs a
//! different recovery path.

use crate::persistence::PersistenceError;

#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    /// Platform key storage unreachable, or the stored key is unusable.
    #[error("master key unavailable: {0}")]
    KeyUnavailable(String),

    #[error("encryption failed: {0}")]
    EncryptionFailed(String),

    /// Malformed or foreign envelope, wrong key, or tampered ciphertext.
    #[error("decryption failed: {0}")]
    DecryptionFailed(String),

    /// Step-up authentication was declined or failed.
    #[error("authentication required to access this entry")]
    AuthenticationRequired,

    #[error("no existing consent record")]
    NoExistingConsent,

    #[error("a verification code is required to delete user data")]
    VerificationRequired,

    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("invalid consent: {0}")]
    InvalidConsent(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

pub type VaultResult<T> = Result<T, VaultError>;

impl From<PersistenceError> for VaultError {
    fn from(e: PersistenceError) -> Self {
        match e {
            PersistenceError::AuthenticationDeclined => VaultError::AuthenticationRequired,
            PersistenceError::InvalidKey(key) => VaultError::InvalidKey(key),
            other => VaultError::StorageUnavailable(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for VaultError {
    fn from(e: serde_json::Error) -> Self {
        VaultError::Serialization(e.to_string())
    }
}
