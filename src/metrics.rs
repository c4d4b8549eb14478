// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Prometheus gauges describing the mention backlog.

use crate::db::{MentionStore, StorageError};
use crate::models::MentionStatus;
use prometheus::{Encoder, IntGauge, IntGaugeVec, Opts, Registry, TextEncoder};
use tracing::warn;

/// Mention counts per status, exported in the Prometheus text format.
#[derive(Clone)]
pub struct MentionMetrics {
    registry: Registry,
    total: IntGauge,
    by_status: IntGaugeVec,
}

impl MentionMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();
        let total = IntGauge::new("webmention_mentions_total", "Number of stored mentions")?;
        let by_status = IntGaugeVec::new(
            Opts::new("webmention_mentions", "Number of stored mentions by status"),
            &["status"],
        )?;
        registry.register(Box::new(total.clone()))?;
        registry.register(Box::new(by_status.clone()))?;
        Ok(Self {
            registry,
            total,
            by_status,
        })
    }

    /// Recount from storage.
    pub async fn refresh(&self, store: &dyn MentionStore) -> Result<(), StorageError> {
        let counts = store.count_by_status().await?;
        let mut total = 0;
        for status in MentionStatus::ALL {
            let count = counts.get(&status).copied().unwrap_or(0) as i64;
            self.by_status.with_label_values(&[status.as_str()]).set(count);
            total += count;
        }
        self.total.set(total);
        Ok(())
    }

    /// [`refresh`](Self::refresh), logging instead of returning failures.
    pub async fn refresh_logged(&self, store: &dyn MentionStore) {
        if let Err(e) = self.refresh(store).await {
            warn!(error = %e, "Failed to refresh mention metrics");
        }
    }

    pub fn total(&self) -> i64 {
        self.total.get()
    }

    pub fn count(&self, status: MentionStatus) -> i64 {
        self.by_status.with_label_values(&[status.as_str()]).get()
    }

    /// Text exposition of all gauges.
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let mut buf = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buf)?;
        String::from_utf8(buf).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}
