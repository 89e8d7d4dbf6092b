// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Master key lifecycle.
//!
//! One 256-bit key per installation, generated from the system CSPRNG on
//! first use and persisted under [`MASTER_KEY_NAME`]. Concurrent first-time
//! callers are serialized by an async mutex, so at most one key is ever
//! created per `KeyManager`. If secure persistence is unreachable the call
//! fails with `KeyUnavailable`; there is no insecure fallback.
//!
//! Key rotation is not implemented. Envelopes carry a format version so a
//! future rotation can tell old-key envelopes apart.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use base64ct::{Base64, Encoding};
use ring::rand::{SecureRandom, SystemRandom};
use tokio::sync::Mutex;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::error::{VaultError, VaultResult};
use crate::persistence::{bounded, ItemAccess, PersistenceError, SecurePersistence};

/// Reserved persistence name of the master key. Lives outside every data
/// namespace so `clear_all` never touches it.
pub const MASTER_KEY_NAME: &str = "vault_master_key";

/// Master key length in bytes.
pub const KEY_LEN: usize = 32;

/// Symmetric master key. Zeroized on drop, redacted in `Debug`.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct MasterKey([u8; KEY_LEN]);

impl MasterKey {
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Draw a fresh key from `rng`.
    pub fn generate(rng: &dyn SecureRandom) -> VaultResult<Self> {
        let mut bytes = [0u8; KEY_LEN];
        rng.fill(&mut bytes)
            .map_err(|_| VaultError::KeyUnavailable("secure random source failed".to_string()))?;
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }

    fn encode(&self) -> Zeroizing<String> {
        Zeroizing::new(Base64::encode_string(&self.0))
    }

    fn decode(encoded: &str) -> VaultResult<Self> {
        let bytes = Zeroizing::new(Base64::decode_vec(encoded.trim()).map_err(|_| {
            VaultError::KeyUnavailable("stored master key is not valid base64".to_string())
        })?);
        let array: [u8; KEY_LEN] = bytes.as_slice().try_into().map_err(|_| {
            VaultError::KeyUnavailable(format!(
                "stored master key has {} bytes, expected {KEY_LEN}",
                bytes.len()
            ))
        })?;
        Ok(Self(array))
    }
}

impl PartialEq for MasterKey {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl Eq for MasterKey {}

impl fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("MasterKey(<redacted>)")
    }
}

/// Owns the installation's master key.
pub struct KeyManager {
    persistence: Arc<dyn SecurePersistence>,
    rng: SystemRandom,
    timeout: Duration,
    current: Mutex<Option<Arc<MasterKey>>>,
}

impl KeyManager {
    pub fn new(persistence: Arc<dyn SecurePersistence>, timeout: Duration) -> Self {
        Self {
            persistence,
            rng: SystemRandom::new(),
            timeout,
            current: Mutex::new(None),
        }
    }

    /// Return the master key, loading or creating it on first use.
    pub async fn get_or_create_key(&self) -> VaultResult<Arc<MasterKey>> {
        // Held across the load/create so concurrent first calls converge.
        let mut current = self.current.lock().await;
        if let Some(key) = current.as_ref() {
            return Ok(Arc::clone(key));
        }

        let stored = bounded(self.timeout, self.persistence.get(MASTER_KEY_NAME))
            .await
            .map_err(key_unavailable)?;

        let key = match stored {
            Some(item) => MasterKey::decode(&Zeroizing::new(item.value))?,
            None => {
                let key = MasterKey::generate(&self.rng)?;
                bounded(
                    self.timeout,
                    self.persistence
                        .set(MASTER_KEY_NAME, &key.encode(), ItemAccess::OPEN),
                )
                .await
                .map_err(key_unavailable)?;
                tracing::info!("Generated and persisted new master key");
                key
            }
        };

        let key = Arc::new(key);
        *current = Some(Arc::clone(&key));
        Ok(key)
    }

    /// Whether a key is cached in memory.
    pub async fn is_initialized(&self) -> bool {
        self.current.lock().await.is_some()
    }

    /// Drop the cached key. The next call reloads it from persistence.
    pub async fn reset(&self) {
        self.current.lock().await.take();
    }
}

fn key_unavailable(e: PersistenceError) -> VaultError {
    VaultError::KeyUnavailable(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::MemoryBackend;

    fn manager(backend: &Arc<MemoryBackend>) -> KeyManager {
        KeyManager::new(backend.clone(), Duration::from_secs(1))
    }

    #[tokio::test]
    async fn repeated_calls_return_same_key() {
        let backend = Arc::new(MemoryBackend::default());
        let keys = manager(&backend);

        let first = keys.get_or_create_key().await.unwrap();
        for _ in 0..10 {
            assert_eq!(*keys.get_or_create_key().await.unwrap(), *first);
        }
        assert!(backend.raw(MASTER_KEY_NAME).await.is_some());
    }

    #[tokio::test]
    async fn concurrent_first_calls_converge_on_one_key() {
        let backend = Arc::new(MemoryBackend::default());
        let keys = Arc::new(manager(&backend));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let keys = Arc::clone(&keys);
                tokio::spawn(async move { keys.get_or_create_key().await.unwrap() })
            })
            .collect();

        let mut results = Vec::new();
        for handle in handles {
            results.push(handle.await.unwrap());
        }
        assert!(results.iter().all(|key| **key == *results[0]));

        let persisted = backend.raw(MASTER_KEY_NAME).await.unwrap();
        assert_eq!(MasterKey::decode(&persisted).unwrap(), *results[0]);
    }

    #[tokio::test]
    async fn reset_reloads_the_persisted_key() {
        let backend = Arc::new(MemoryBackend::default());
        let keys = manager(&backend);

        let before = keys.get_or_create_key().await.unwrap();
        keys.reset().await;
        assert!(!keys.is_initialized().await);

        let after = keys.get_or_create_key().await.unwrap();
        assert_eq!(*before, *after);
    }

    #[tokio::test]
    async fn separate_managers_share_the_persisted_key() {
        let backend = Arc::new(MemoryBackend::default());
        let a = manager(&backend).get_or_create_key().await.unwrap();
        let b = manager(&backend).get_or_create_key().await.unwrap();
        assert_eq!(*a, *b);
    }

    #[tokio::test]
    async fn unavailable_persistence_fails_loudly() {
        let backend = Arc::new(MemoryBackend::default());
        backend.set_available(false);

        let result = manager(&backend).get_or_create_key().await;
        assert!(matches!(result, Err(VaultError::KeyUnavailable(_))));
    }

    #[tokio::test]
    async fn malformed_stored_key_is_not_replaced() {
        let backend = Arc::new(MemoryBackend::default());
        backend
            .set(MASTER_KEY_NAME, "c2hvcnQ=", ItemAccess::OPEN)
            .await
            .unwrap();

        let result = manager(&backend).get_or_create_key().await;
        assert!(matches!(result, Err(VaultError::KeyUnavailable(_))));
        assert_eq!(backend.raw(MASTER_KEY_NAME).await.as_deref(), Some("c2hvcnQ="));
    }

    #[test]
    fn debug_output_is_redacted() {
        let key = MasterKey::from_bytes([7u8; KEY_LEN]);
        assert_eq!(format!("{key:?}"), "MasterKey(<redacted>)");
    }
}
