// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Sending mentions for everything a source page links to.

use crate::discovery::EndpointDiscoverer;
use crate::document::{Document, DocumentError, DEFAULT_MAX_BODY_BYTES};
use crate::models::Webmention;
use crate::sender::Sender;
use reqwest::Client;
use serde::Serialize;
use tracing::{info, warn};

/// Outcome for one target of a send run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TargetStatus {
    pub url: String,
    /// Endpoint the mention went to; `None` when the target advertises none.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SendReport {
    pub source: String,
    pub targets: Vec<TargetStatus>,
}

impl SendReport {
    /// True if discovery or delivery failed for any target.
    pub fn failed(&self) -> bool {
        self.targets.iter().any(|t| t.error.is_some())
    }
}

/// Discovers endpoints for a source's links and delivers mentions to them.
#[derive(Debug, Clone)]
pub struct Outbox {
    client: Client,
    discoverer: EndpointDiscoverer,
    sender: Sender,
    max_body_bytes: usize,
}

impl Outbox {
    pub fn new(client: Client) -> Self {
        Self {
            discoverer: EndpointDiscoverer::new(client.clone()),
            sender: Sender::new(client.clone()),
            client,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }

    /// Cap on the source page and on each target page read for discovery.
    pub fn with_max_body_bytes(mut self, limit: usize) -> Self {
        self.discoverer = self.discoverer.with_max_body_bytes(limit);
        self.max_body_bytes = limit;
        self
    }

    /// Send mentions from `source`.
    ///
    /// With an explicit `target` only that page is notified, otherwise every
    /// external link of the source is. A fixed `endpoint` skips discovery.
    pub async fn send_from_source(
        &self,
        source: &str,
        target: Option<&str>,
        endpoint: Option<&str>,
    ) -> Result<SendReport, DocumentError> {
        let targets = match target {
            Some(target) => vec![target.to_string()],
            None => Document::from_url(&self.client, source, self.max_body_bytes)
                .await?
                .external_links(),
        };

        let mut report = SendReport {
            source: source.to_string(),
            targets: Vec::with_capacity(targets.len()),
        };
        for target in targets {
            let status = self.send_one(source, &target, endpoint).await;
            report.targets.push(status);
        }
        Ok(report)
    }

    async fn send_one(&self, source: &str, target: &str, endpoint: Option<&str>) -> TargetStatus {
        let mut status = TargetStatus {
            url: target.to_string(),
            endpoint: None,
            error: None,
        };

        let endpoint = match endpoint {
            Some(ep) => ep.to_string(),
            None => match self.discoverer.discover_endpoint(target).await {
                Ok(Some(ep)) => ep,
                Ok(None) => {
                    info!(target = %target, "No webmention endpoint advertised");
                    return status;
                }
                Err(e) => {
                    warn!(target = %target, error = %e, "Endpoint discovery failed");
                    status.error = Some(e.to_string());
                    return status;
                }
            },
        };

        let mention = Webmention {
            source: source.to_string(),
            target: target.to_string(),
        };
        if let Err(e) = self.sender.send(&endpoint, &mention).await {
            warn!(target = %target, endpoint = %endpoint, error = %e, "Failed to send webmention");
            status.error = Some(e.to_string());
        } else {
            info!(target = %target, endpoint = %endpoint, "Webmention sent");
        }
        status.endpoint = Some(endpoint);
        status
    }
}
