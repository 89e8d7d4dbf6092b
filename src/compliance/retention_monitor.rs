// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Retention Monitor
//!
//! Background task that periodically evaluates the retention window and
//! reports the outcome. It never deletes anything on its own: acting on the
//! report is the host application's call.
//!
//! ## Shutdown
//!
//! Uses `tokio_util::sync::CancellationToken` for graceful shutdown.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::lifecycle::{DataLifecycle, RetentionAction, RetentionReport};
use crate::config::DEFAULT_RETENTION_SWEEP_INTERVAL;

pub struct RetentionMonitor {
    lifecycle: Arc<DataLifecycle>,
    interval: Duration,
}

impl RetentionMonitor {
    pub fn new(lifecycle: Arc<DataLifecycle>) -> Self {
        Self {
            lifecycle,
            interval: DEFAULT_RETENTION_SWEEP_INTERVAL,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Run sweeps until the cancellation token is triggered.
    ///
    /// ```rust,ignore
    /// tokio::spawn(monitor.run(shutdown.clone()));
    /// ```
    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            interval_secs = self.interval.as_secs(),
            "Retention monitor starting"
        );

        loop {
            if shutdown.is_cancelled() {
                info!("Retention monitor shutting down");
                return;
            }

            self.sweep().await;

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {},
                _ = shutdown.cancelled() => {
                    info!("Retention monitor shutting down");
                    return;
                }
            }
        }
    }

    /// One evaluation. `None` when the check itself failed.
    pub async fn sweep(&self) -> Option<RetentionReport> {
        match self.lifecycle.check_data_retention().await {
            Ok(report) => {
                match report.action {
                    RetentionAction::None => debug!("Retention check: compliant"),
                    RetentionAction::NotifyUpcomingExpiry => info!(
                        days_until_expiry = ?report.days_until_expiry,
                        "Retention check: data approaching retention limit"
                    ),
                    RetentionAction::DeleteExpiredData => warn!(
                        expires_at = ?report.expires_at,
                        "Retention check: data past retention limit"
                    ),
                }
                Some(report)
            }
            Err(e) => {
                warn!(error = %e, "Retention check failed");
                None
            }
        }
    }
}
