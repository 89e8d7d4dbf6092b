// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Runtime Configuration
//!
//! Environment variable names, defaults and the [`VaultConfig`] assembled
//! from them at startup. Unparseable values fall back to the default with a
//! warning rather than aborting startup.
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `VAULT_DATA_DIR` | Root directory for the filesystem adapter | unset (in-memory) |
//! | `VAULT_PLATFORM` | `native` or `web` | `native` with a data dir, else `web` |
//! | `VAULT_AUDIT_CAPACITY` | Maximum retained audit entries | `1000` |
//! | `VAULT_PLATFORM_TIMEOUT_MS` | Bound on every platform call | `5000` |
//! | `VAULT_AUTH_TIMEOUT_MS` | Bound on a step-up authentication prompt | `60000` |
//! | `VAULT_RETENTION_SWEEP_SECS` | Interval between retention checks | `86400` |
//! | `VAULT_DEV_MODE` | Skip deletion verification (`1`/`true`) | `false` |
//! | `LOG_FORMAT` | Logging format (`json` or `pretty`) | `pretty` |
//! | `RUST_LOG` | Log level filter | `info` |

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::storage::DEFAULT_AUDIT_CAPACITY;

/// Environment variable name for the filesystem adapter root.
///
/// When unset the vault runs on in-memory adapters and nothing survives the
/// process.
pub const DATA_DIR_ENV: &str = "VAULT_DATA_DIR";

/// Environment variable name for the platform tag recorded in audit entries.
pub const PLATFORM_ENV: &str = "VAULT_PLATFORM";

/// Environment variable name for the audit log capacity.
pub const AUDIT_CAPACITY_ENV: &str = "VAULT_AUDIT_CAPACITY";

/// Environment variable name for the platform call timeout, in milliseconds.
pub const PLATFORM_TIMEOUT_ENV: &str = "VAULT_PLATFORM_TIMEOUT_MS";

/// Environment variable name for the step-up prompt timeout, in milliseconds.
pub const AUTH_TIMEOUT_ENV: &str = "VAULT_AUTH_TIMEOUT_MS";

/// Environment variable name for the retention sweep interval, in seconds.
pub const RETENTION_SWEEP_ENV: &str = "VAULT_RETENTION_SWEEP_SECS";

/// Environment variable name for development mode.
///
/// # Security
/// Development mode lets `delete_user_data` run without a verification code.
/// Never enable it in a shipped build.
pub const DEV_MODE_ENV: &str = "VAULT_DEV_MODE";

/// Environment variable name for the log output format.
pub const LOG_FORMAT_ENV: &str = "LOG_FORMAT";

pub const DEFAULT_PLATFORM_TIMEOUT: Duration = Duration::from_millis(5000);

/// A user gesture takes far longer than a storage call.
pub const DEFAULT_AUTH_TIMEOUT: Duration = Duration::from_secs(60);

pub const DEFAULT_RETENTION_SWEEP_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Host platform family, recorded in every audit entry.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    /// Keychain/keystore-backed host.
    #[default]
    Native,
    /// Browser host with session storage.
    Web,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Native => "native",
            Platform::Web => "web",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "native" | "ios" | "android" => Ok(Platform::Native),
            "web" => Ok(Platform::Web),
            other => Err(format!("unknown platform: {other}")),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl LogFormat {
    pub fn from_env() -> Self {
        match env_optional(LOG_FORMAT_ENV).as_deref() {
            Some(v) if v.eq_ignore_ascii_case("json") => LogFormat::Json,
            _ => LogFormat::Pretty,
        }
    }
}

/// Vault runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VaultConfig {
    /// Filesystem adapter root; `None` selects the in-memory adapters.
    pub data_dir: Option<PathBuf>,
    pub platform: Platform,
    pub audit_capacity: usize,
    pub platform_timeout: Duration,
    /// Expiry of an unanswered step-up prompt counts as declined.
    pub auth_timeout: Duration,
    pub retention_sweep_interval: Duration,
    /// Allows erasure without a verification code.
    pub development: bool,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            platform: Platform::default(),
            audit_capacity: DEFAULT_AUDIT_CAPACITY,
            platform_timeout: DEFAULT_PLATFORM_TIMEOUT,
            auth_timeout: DEFAULT_AUTH_TIMEOUT,
            retention_sweep_interval: DEFAULT_RETENTION_SWEEP_INTERVAL,
            development: cfg!(feature = "dev"),
        }
    }
}

impl VaultConfig {
    /// Load configuration from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(env_optional)
    }

    /// Build configuration from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let data_dir = lookup(DATA_DIR_ENV).map(PathBuf::from);

        let platform = match lookup(PLATFORM_ENV) {
            Some(raw) => parse_or(PLATFORM_ENV, &raw, Platform::default()),
            None if data_dir.is_some() => Platform::Native,
            None => Platform::Web,
        };

        let audit_capacity = lookup(AUDIT_CAPACITY_ENV)
            .map(|raw| parse_or(AUDIT_CAPACITY_ENV, &raw, defaults.audit_capacity))
            .filter(|capacity| *capacity > 0)
            .unwrap_or(defaults.audit_capacity);

        let platform_timeout = lookup(PLATFORM_TIMEOUT_ENV)
            .map(|raw| parse_or(PLATFORM_TIMEOUT_ENV, &raw, 0u64))
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
            .unwrap_or(defaults.platform_timeout);

        let auth_timeout = lookup(AUTH_TIMEOUT_ENV)
            .map(|raw| parse_or(AUTH_TIMEOUT_ENV, &raw, 0u64))
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
            .unwrap_or(defaults.auth_timeout);

        let retention_sweep_interval = lookup(RETENTION_SWEEP_ENV)
            .map(|raw| parse_or(RETENTION_SWEEP_ENV, &raw, 0u64))
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
            .unwrap_or(defaults.retention_sweep_interval);

        let development = match lookup(DEV_MODE_ENV) {
            Some(raw) => parse_flag(&raw) || defaults.development,
            None => defaults.development,
        };

        Self {
            data_dir,
            platform,
            audit_capacity,
            platform_timeout,
            auth_timeout,
            retention_sweep_interval,
            development,
        }
    }
}

fn env_optional(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_or<T: FromStr>(name: &str, raw: &str, default: T) -> T {
    match raw.trim().parse() {
        Ok(value) => value,
        Err(_) => {
            tracing::warn!(variable = name, value = raw, "Ignoring invalid configuration value");
            default
        }
    }
}

fn parse_flag(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
