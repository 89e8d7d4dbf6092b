// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::process::ExitCode;

use tokio_util::sync::CancellationToken;

use wellbeing_vault::config::{LogFormat, VaultConfig};
use wellbeing_vault::logging::init_tracing;
use wellbeing_vault::Vault;

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing(LogFormat::from_env());

    let config = VaultConfig::from_env();
    if config.development {
        tracing::warn!("Development mode enabled: erasure does not require verification");
    }

    let vault = match Vault::init(config).await {
        Ok(vault) => vault,
        Err(e) => {
            tracing::error!(error = %e, "Failed to initialize vault");
            return ExitCode::FAILURE;
        }
    };

    let shutdown = CancellationToken::new();
    let monitor = tokio::spawn(vault.retention_monitor().run(shutdown.clone()));

    tracing::info!("wellbeing-vaultd running, press Ctrl-C to stop");
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }

    shutdown.cancel();
    if let Err(e) = monitor.await {
        tracing::warn!(error = %e, "Retention monitor task ended abnormally");
    }
    vault.dispose().await;

    ExitCode::SUCCESS
}
