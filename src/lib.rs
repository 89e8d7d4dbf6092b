// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Wellbeing Vault - Secure Local Data & Consent Subsystem
//!
//! Encrypted on-device storage for sensitive wellbeing data, an audit trail
//! bound to every access, and a consent engine covering export, erasure and
//! retention obligations.
//!
//! ## Modules
//!
//! - `persistence` - Platform capability traits and adapters
//! - `crypto` - Master key lifecycle and AES-256-GCM envelopes
//! - `storage` - Secure store and audit log
//! - `compliance` - Consent, data lifecycle and retention monitoring
//! - `vault` - Service wiring

pub mod compliance;
pub mod config;
pub mod crypto;
pub mod error;
pub mod logging;
pub mod persistence;
pub mod storage;
pub mod vault;

pub use error::{VaultError, VaultResult};
pub use vault::Vault;
