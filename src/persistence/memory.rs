// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! In-memory adapter.
//!
//! Plays the role of web session storage: contents last as long as the
//! process. Also the default backend for tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{
    validate_key, ItemAccess, PersistenceError, PersistenceResult, PlainStorage, SecureItem,
    SecurePersistence,
};

/// Process-lifetime key-value backend implementing both capabilities.
///
/// Secure items and plain items live in separate maps, so one instance can
/// serve both roles without the plain listing exposing secure keys.
pub struct MemoryBackend {
    secure: RwLock<HashMap<String, SecureItem>>,
    plain: RwLock<HashMap<String, String>>,
    available: AtomicBool,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            secure: RwLock::new(HashMap::new()),
            plain: RwLock::new(HashMap::new()),
            available: AtomicBool::new(true),
        }
    }

    /// Toggle availability. While unavailable every call fails with
    /// `PersistenceError::Unavailable`, the way a locked keychain would.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Number of stored items across both namespaces.
    pub async fn len(&self) -> usize {
        self.secure.read().await.len() + self.plain.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Raw secure value. Lets tests inspect what actually reached the
    /// platform.
    pub async fn raw(&self, key: &str) -> Option<String> {
        self.secure.read().await.get(key).map(|item| item.value.clone())
    }

    /// Raw plain value.
    pub async fn raw_plain(&self, key: &str) -> Option<String> {
        self.plain.read().await.get(key).cloned()
    }

    /// Overwrite a secure value in place, keeping its access flag.
    pub async fn overwrite_raw(&self, key: &str, value: impl Into<String>) {
        if let Some(item) = self.secure.write().await.get_mut(key) {
            item.value = value.into();
        }
    }

    fn ensure_available(&self) -> PersistenceResult<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(PersistenceError::Unavailable("memory backend offline".to_string()))
        }
    }
}

fn sorted_keys<V>(map: &HashMap<String, V>) -> Vec<String> {
    let mut keys: Vec<String> = map.keys().cloned().collect();
    keys.sort();
    keys
}

#[async_trait]
impl SecurePersistence for MemoryBackend {
    async fn get(&self, key: &str) -> PersistenceResult<Option<SecureItem>> {
        self.ensure_available()?;
        Ok(self.secure.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str, access: ItemAccess) -> PersistenceResult<()> {
        self.ensure_available()?;
        validate_key(key)?;
        self.secure.write().await.insert(
            key.to_string(),
            SecureItem {
                value: value.to_string(),
                access,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> PersistenceResult<()> {
        self.ensure_available()?;
        self.secure.write().await.remove(key);
        Ok(())
    }

    async fn keys(&self) -> PersistenceResult<Vec<String>> {
        self.ensure_available()?;
        Ok(sorted_keys(&*self.secure.read().await))
    }
}

#[async_trait]
impl PlainStorage for MemoryBackend {
    async fn read(&self, key: &str) -> PersistenceResult<Option<String>> {
        self.ensure_available()?;
        Ok(self.plain.read().await.get(key).cloned())
    }

    async fn write(&self, key: &str, value: &str) -> PersistenceResult<()> {
        self.ensure_available()?;
        validate_key(key)?;
        self.plain
            .write()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> PersistenceResult<()> {
        self.ensure_available()?;
        self.plain.write().await.remove(key);
        Ok(())
    }

    async fn list(&self) -> PersistenceResult<Vec<String>> {
        self.ensure_available()?;
        Ok(sorted_keys(&*self.plain.read().await))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_get_delete_roundtrip() {
        let backend = MemoryBackend::default();
        backend.set("secure_a", "v1", ItemAccess::OPEN).await.unwrap();
        let item = backend.get("secure_a").await.unwrap().unwrap();
        assert_eq!(item.value, "v1");
        assert_eq!(item.access, ItemAccess::OPEN);

        backend.delete("secure_a").await.unwrap();
        assert!(backend.get("secure_a").await.unwrap().is_none());

        // Deleting again is a no-op.
        backend.delete("secure_a").await.unwrap();
    }

    #[tokio::test]
    async fn access_flag_is_returned_with_the_item() {
        let backend = MemoryBackend::default();
        backend.set("locked", "y", ItemAccess::AUTHENTICATED).await.unwrap();
        let item = backend.get("locked").await.unwrap().unwrap();
        assert!(item.access.require_auth);

        // Overwriting replaces the flag too.
        backend.set("locked", "z", ItemAccess::OPEN).await.unwrap();
        assert!(!backend.get("locked").await.unwrap().unwrap().access.require_auth);
    }

    #[tokio::test]
    async fn unavailable_backend_fails_every_call() {
        let backend = MemoryBackend::default();
        backend.set_available(false);

        assert!(matches!(
            backend.set("k", "v", ItemAccess::OPEN).await,
            Err(PersistenceError::Unavailable(_))
        ));
        assert!(backend.read("k").await.is_err());
        assert!(backend.list().await.is_err());

        backend.set_available(true);
        assert!(backend.write("k", "v").await.is_ok());
    }

    #[tokio::test]
    async fn keys_are_sorted() {
        let backend = MemoryBackend::default();
        for key in ["b", "c", "a"] {
            backend.write(key, "1").await.unwrap();
        }
        assert_eq!(backend.list().await.unwrap(), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn secure_and_plain_namespaces_are_separate() {
        let backend = MemoryBackend::default();
        backend.set("shared", "secure", ItemAccess::OPEN).await.unwrap();
        backend.write("shared", "plain").await.unwrap();
        backend.write("only_plain", "p").await.unwrap();

        assert_eq!(backend.raw("shared").await.as_deref(), Some("secure"));
        assert_eq!(backend.raw_plain("shared").await.as_deref(), Some("plain"));
        assert_eq!(backend.keys().await.unwrap(), vec!["shared"]);
        assert_eq!(backend.list().await.unwrap(), vec!["only_plain", "shared"]);

        backend.remove("shared").await.unwrap();
        assert!(backend.raw("shared").await.is_some());
        assert_eq!(backend.len().await, 2);
    }
}
