// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Resolution of shortened links (t.co and friends) back to their destination.

use async_trait::async_trait;
use reqwest::{header::LOCATION, redirect, Client};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Prefix handled by the built-in Twitter resolver.
pub const TWITTER_PREFIX: &str = "https://t.co/";

#[derive(Debug, Error)]
pub enum ShortenerError {
    #[error("No link provided")]
    EmptyLink,

    #[error("Shortener request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Shortener returned unexpected status {0}")]
    UnexpectedStatus(u16),
}

/// Expands one shortened link.
#[async_trait]
pub trait Resolver: Send + Sync {
    async fn resolve(&self, link: &str) -> Result<String, ShortenerError>;
}

/// Issues a `HEAD` request without following redirects and reports the
/// `Location` header.
///
/// Only statuses above 400 are errors. A bare 400 is read like any other
/// response and yields whatever `Location` it carries, usually none.
pub struct HeadRedirectResolver {
    client: Client,
}

impl HeadRedirectResolver {
    pub fn new(timeout: Duration) -> Result<Self, ShortenerError> {
        // t.co misbehaves over HTTP/2
        let client = Client::builder()
            .redirect(redirect::Policy::none())
            .http1_only()
            .timeout(timeout)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Resolver for HeadRedirectResolver {
    async fn resolve(&self, link: &str) -> Result<String, ShortenerError> {
        let response = self.client.head(link).send().await?;
        let status = response.status().as_u16();
        if status > 400 {
            return Err(ShortenerError::UnexpectedStatus(status));
        }
        let location = response
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        debug!(link = %link, location = %location, "Resolved shortened link");
        Ok(location)
    }
}

/// Ordered prefix → resolver table. The first matching prefix wins.
#[derive(Clone, Default)]
pub struct ShortenerRegistry {
    resolvers: Vec<(String, Arc<dyn Resolver>)>,
}

impl ShortenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the t.co resolver installed.
    pub fn with_defaults(timeout: Duration) -> Result<Self, ShortenerError> {
        let mut registry = Self::new();
        registry.register(TWITTER_PREFIX, Arc::new(HeadRedirectResolver::new(timeout)?));
        Ok(registry)
    }

    pub fn register(&mut self, prefix: impl Into<String>, resolver: Arc<dyn Resolver>) {
        self.resolvers.push((prefix.into(), resolver));
    }

    pub fn is_empty(&self) -> bool {
        self.resolvers.is_empty()
    }

    /// Expand `link` if a registered prefix matches it.
    ///
    /// `Ok(None)` means no resolver is responsible for the link.
    pub async fn resolve(&self, link: &str) -> Result<Option<String>, ShortenerError> {
        if link.is_empty() {
            return Err(ShortenerError::EmptyLink);
        }
        match self
            .resolvers
            .iter()
            .find(|(prefix, _)| link.starts_with(prefix.as_str()))
        {
            Some((_, resolver)) => resolver.resolve(link).await.map(Some),
            None => Ok(None),
        }
    }
}

impl std::fmt::Debug for ShortenerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.resolvers.iter().map(|(prefix, _)| prefix))
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashMap;

    /// Resolver backed by a fixed table.
    pub(crate) struct StaticResolver(pub HashMap<String, String>);

    #[async_trait]
    impl Resolver for StaticResolver {
        async fn resolve(&self, link: &str) -> Result<String, ShortenerError> {
            Ok(self.0.get(link).cloned().unwrap_or_default())
        }
    }

    pub(crate) fn static_registry(prefix: &str, pairs: &[(&str, &str)]) -> ShortenerRegistry {
        let table = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let mut registry = ShortenerRegistry::new();
        registry.register(prefix, Arc::new(StaticResolver(table)));
        registry
    }

    #[tokio::test]
    async fn test_empty_link_is_an_error() {
        let registry = ShortenerRegistry::new();
        assert!(matches!(
            registry.resolve("").await,
            Err(ShortenerError::EmptyLink)
        ));
    }

    #[tokio::test]
    async fn test_unmatched_prefix_resolves_to_none() {
        let registry = static_registry("https://t.co/", &[]);
        assert_eq!(registry.resolve("https://example.com/x").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_first_matching_prefix_wins() {
        let mut registry =
            static_registry("https://s.example/", &[("https://s.example/a", "https://first/")]);
        registry.register(
            "https://s.example/a",
            Arc::new(StaticResolver(
                [("https://s.example/a".to_string(), "https://second/".to_string())].into(),
            )),
        );
        assert_eq!(
            registry.resolve("https://s.example/a").await.unwrap().as_deref(),
            Some("https://first/")
        );
    }
}
