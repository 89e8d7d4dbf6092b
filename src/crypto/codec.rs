// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Envelope encryption for structured values.
//!
//! ## Format
//!
//! ```text
//! ciphertext = base64( nonce[12] || AES-256-GCM(json(value)) || tag[16] )
//! aad        = "wellbeing-vault|v{version}|{algorithm}|{data_category}|{requires_auth}"
//! ```
//!
//! Every call draws a fresh random nonce, so encrypting the same value twice
//! yields different envelopes. The envelope metadata is bound as associated
//! data: editing the category, auth flag or version breaks the tag just like
//! editing the ciphertext does. Every failure on the way back out (bad base64,
//! truncation, wrong key, tampering, unexpected shape) is reported as
//! `VaultError::DecryptionFailed`; ring's error never escapes this module.

use chrono::{DateTime, Utc};
use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM};
use ring::rand::{SecureRandom, SystemRandom};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use zeroize::Zeroizing;

use base64ct::{Base64, Encoding};

use super::MasterKey;
use crate::error::{VaultError, VaultResult};

/// Current envelope format version.
pub const ENVELOPE_VERSION: u8 = 1;

/// AES-GCM nonce length in bytes.
pub const NONCE_LEN: usize = ring::aead::NONCE_LEN;

/// Cipher used to produce an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Algorithm {
    #[serde(rename = "AES-256-GCM")]
    Aes256Gcm,
}

impl Algorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::Aes256Gcm => "AES-256-GCM",
        }
    }
}

/// The persisted unit: ciphertext plus what is needed to decrypt and audit it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecureEnvelope {
    pub version: u8,
    pub ciphertext: String,
    pub algorithm: Algorithm,
    pub created_at: DateTime<Utc>,
    pub data_category: String,
    pub requires_auth: bool,
}

impl SecureEnvelope {
    /// Parse a stored envelope. Foreign or unknown-algorithm envelopes are
    /// `DecryptionFailed`.
    pub fn from_json(raw: &str) -> VaultResult<Self> {
        serde_json::from_str(raw)
            .map_err(|e| VaultError::DecryptionFailed(format!("malformed envelope: {e}")))
    }

    pub fn to_json(&self) -> VaultResult<String> {
        serde_json::to_string(self).map_err(|e| VaultError::EncryptionFailed(e.to_string()))
    }

    fn associated_data(&self) -> String {
        associated_data(
            self.version,
            self.algorithm,
            &self.data_category,
            self.requires_auth,
        )
    }
}

fn associated_data(
    version: u8,
    algorithm: Algorithm,
    data_category: &str,
    requires_auth: bool,
) -> String {
    format!(
        "wellbeing-vault|v{version}|{}|{data_category}|{requires_auth}",
        algorithm.as_str()
    )
}

fn aead_key(key: &MasterKey) -> VaultResult<LessSafeKey> {
    UnboundKey::new(&AES_256_GCM, key.as_bytes())
        .map(LessSafeKey::new)
        .map_err(|_| VaultError::KeyUnavailable("master key rejected by cipher".to_string()))
}

/// Stateless encrypt/decrypt of serializable values.
pub struct EnvelopeCodec {
    rng: SystemRandom,
}

impl Default for EnvelopeCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl EnvelopeCodec {
    pub fn new() -> Self {
        Self {
            rng: SystemRandom::new(),
        }
    }

    /// Serialize `value` and seal it under `key`.
    pub fn encrypt<T: Serialize + ?Sized>(
        &self,
        value: &T,
        key: &MasterKey,
        data_category: &str,
        requires_auth: bool,
    ) -> VaultResult<SecureEnvelope> {
        let algorithm = Algorithm::Aes256Gcm;
        let mut in_out = Zeroizing::new(
            serde_json::to_vec(value).map_err(|e| VaultError::EncryptionFailed(e.to_string()))?,
        );

        let mut nonce = [0u8; NONCE_LEN];
        self.rng.fill(&mut nonce).map_err(|_| {
            VaultError::EncryptionFailed("secure random source failed".to_string())
        })?;

        let aad = associated_data(ENVELOPE_VERSION, algorithm, data_category, requires_auth);
        aead_key(key)?
            .seal_in_place_append_tag(
                Nonce::assume_unique_for_key(nonce),
                Aad::from(aad.as_bytes()),
                &mut *in_out,
            )
            .map_err(|_| VaultError::EncryptionFailed("seal failed".to_string()))?;

        let mut payload = Vec::with_capacity(NONCE_LEN + in_out.len());
        payload.extend_from_slice(&nonce);
        payload.extend_from_slice(&in_out);

        Ok(SecureEnvelope {
            version: ENVELOPE_VERSION,
            ciphertext: Base64::encode_string(&payload),
            algorithm,
            created_at: Utc::now(),
            data_category: data_category.to_string(),
            requires_auth,
        })
    }

    /// Open `envelope` under `key` and deserialize the value.
    pub fn decrypt<T: DeserializeOwned>(
        &self,
        envelope: &SecureEnvelope,
        key: &MasterKey,
    ) -> VaultResult<T> {
        if envelope.version != ENVELOPE_VERSION {
            return Err(VaultError::DecryptionFailed(format!(
                "unsupported envelope version {}",
                envelope.version
            )));
        }

        let payload = Base64::decode_vec(&envelope.ciphertext).map_err(|_| {
            VaultError::DecryptionFailed("ciphertext is not valid base64".to_string())
        })?;
        if payload.len() < NONCE_LEN + AES_256_GCM.tag_len() {
            return Err(VaultError::DecryptionFailed(
                "ciphertext is truncated".to_string(),
            ));
        }

        let (nonce, sealed) = payload.split_at(NONCE_LEN);
        let nonce = Nonce::try_assume_unique_for_key(nonce)
            .map_err(|_| VaultError::DecryptionFailed("bad nonce".to_string()))?;

        let aad = envelope.associated_data();
        let mut in_out = Zeroizing::new(sealed.to_vec());
        let plaintext = aead_key(key)?
            .open_in_place(nonce, Aad::from(aad.as_bytes()), &mut in_out[..])
            .map_err(|_| {
                VaultError::DecryptionFailed(
                    "authentication failed (wrong key or tampered envelope)".to_string(),
                )
            })?;

        serde_json::from_slice(plaintext).map_err(|e| {
            VaultError::DecryptionFailed(format!("payload has unexpected shape: {e}"))
        })
    }
}
