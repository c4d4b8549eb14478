// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Outbound webmention delivery.

use crate::models::Webmention;
use reqwest::{Client, StatusCode};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum SendError {
    #[error("Webmention request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Unexpected status code returned: {0}")]
    UnexpectedStatus(u16),
}

/// Posts `source`/`target` pairs to webmention endpoints.
#[derive(Debug, Clone)]
pub struct Sender {
    client: Client,
}

impl Sender {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Deliver `mention` to `endpoint`. Only `201 Created` and `202 Accepted`
    /// count as success.
    pub async fn send(&self, endpoint: &str, mention: &Webmention) -> Result<(), SendError> {
        debug!(endpoint = %endpoint, source = %mention.source, target = %mention.target, "Sending mention");
        let response = self
            .client
            .post(endpoint)
            .form(&[
                ("source", mention.source.as_str()),
                ("target", mention.target.as_str()),
            ])
            .send()
            .await?;

        match response.status() {
            StatusCode::CREATED | StatusCode::ACCEPTED => Ok(()),
            other => Err(SendError::UnexpectedStatus(other.as_u16())),
        }
    }
}
