// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Webmention endpoint discovery.

use crate::document::{find_webmention_link, read_body, BodyError, DEFAULT_MAX_BODY_BYTES};
use regex::Regex;
use reqwest::{header::LINK, Client};
use std::sync::LazyLock;
use thiserror::Error;
use tracing::debug;
use url::Url;

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Discovery request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Target page exceeds {0} bytes")]
    BodyTooLarge(usize),
}

impl From<BodyError> for DiscoveryError {
    fn from(e: BodyError) -> Self {
        match e {
            BodyError::Read(e) => Self::Request(e),
            BodyError::TooLarge(limit) => Self::BodyTooLarge(limit),
        }
    }
}

static LINK_HEADER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<([^>]+)>;\s*rel="?webmention"?"#).expect("link header pattern is valid")
});

/// Finds the webmention endpoint advertised by a page.
#[derive(Debug, Clone)]
pub struct EndpointDiscoverer {
    client: Client,
    max_body_bytes: usize,
}

impl EndpointDiscoverer {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }

    /// Largest target page read while looking for `<link>`/`<a>` endpoints.
    pub fn with_max_body_bytes(mut self, limit: usize) -> Self {
        self.max_body_bytes = limit;
        self
    }

    /// Look up the endpoint for `url`.
    ///
    /// `Link` headers take precedence over `<link>`/`<a>` elements. An empty
    /// `href` names the page itself. `Ok(None)` means the page advertises no
    /// endpoint.
    pub async fn discover_endpoint(&self, url: &str) -> Result<Option<String>, DiscoveryError> {
        let request_url = Url::parse(url)?;
        let response = self.client.get(request_url.clone()).send().await?;

        let from_header = response
            .headers()
            .get_all(LINK)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .find_map(|v| LINK_HEADER_RE.captures(v))
            .map(|c| c[1].to_string());

        let candidate = match from_header {
            Some(href) => {
                debug!(url = %url, href = %href, "Endpoint found in Link header");
                Some(href)
            }
            None => {
                let body = read_body(response, self.max_body_bytes).await?;
                let href = find_webmention_link(&body);
                debug!(url = %url, href = ?href, "Checked document for endpoint");
                href
            }
        };

        Ok(candidate.map(|href| resolve_endpoint(&request_url, url, &href)))
    }
}

fn resolve_endpoint(request_url: &Url, raw: &str, href: &str) -> String {
    if href.is_empty() {
        return raw.to_string();
    }
    match Url::parse(href) {
        Ok(_) => href.to_string(),
        Err(_) => request_url
            .join(href)
            .map(String::from)
            .unwrap_or_else(|_| href.to_string()),
    }
}
