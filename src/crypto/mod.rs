// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Master key management and envelope encryption.

pub mod codec;
pub mod keys;

pub use codec::{Algorithm, EnvelopeCodec, SecureEnvelope, ENVELOPE_VERSION, NONCE_LEN};
pub use keys::{KeyManager, MasterKey, KEY_LEN, MASTER_KEY_NAME};
