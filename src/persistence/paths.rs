// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Path layout for the native filesystem adapter.
//!
//! ```text
//! {root}/
//!   secure/{key}.json   # secure items (envelopes, receipts, master key)
//!   plain/{key}.json    # plain items (consent summary, audit log, ...)
//! ```

use std::path::{Path, PathBuf};

/// Default data directory when none is configured.
pub const DATA_ROOT: &str = "/var/lib/wellbeing-vault";

/// File extension of every stored item.
pub const ITEM_EXTENSION: &str = "json";

#[derive(Debug, Clone)]
pub struct StoragePaths {
    root: PathBuf,
}

impl Default for StoragePaths {
    fn default() -> Self {
        Self::new(DATA_ROOT)
    }
}

impl StoragePaths {
    /// Create a new StoragePaths with a custom root (useful for testing).
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding secure items.
    pub fn secure_dir(&self) -> PathBuf {
        self.root.join("secure")
    }

    pub fn secure_item(&self, key: &str) -> PathBuf {
        self.secure_dir().join(format!("{key}.{ITEM_EXTENSION}"))
    }

    /// Directory holding plain items.
    pub fn plain_dir(&self) -> PathBuf {
        self.root.join("plain")
    }

    pub fn plain_item(&self, key: &str) -> PathBuf {
        self.plain_dir().join(format!("{key}.{ITEM_EXTENSION}"))
    }

    /// Probe file used by the health check.
    pub fn health_probe(&self) -> PathBuf {
        self.root.join(".health_check")
    }
}
