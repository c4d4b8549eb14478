// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! URL policies deciding whether a verified mention is approved automatically.
//!
//! Policies are regular expressions matched against a mention's source. They
//! are ordered by ascending weight and the first match wins; if nothing
//! matches, the registry's default policy applies.

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Action applied to a URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Policy {
    Approve,
    Reject,
    Default,
}

impl Policy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Policy::Approve => "approve",
            Policy::Reject => "reject",
            Policy::Default => "default",
        }
    }
}

impl fmt::Display for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Policy {
    type Err = PolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "approve" => Ok(Policy::Approve),
            "reject" => Ok(Policy::Reject),
            "default" => Ok(Policy::Default),
            other => Err(PolicyError::UnknownPolicy(other.to_string())),
        }
    }
}

#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("Invalid URL pattern {pattern:?}: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("Unknown policy: {0}")]
    UnknownPolicy(String),

    #[error("Failed to load policies: {0}")]
    Load(String),
}

/// A compiled policy rule.
#[derive(Debug, Clone)]
pub struct UrlPolicy {
    pub id: String,
    pub pattern: Regex,
    pub policy: Policy,
    pub weight: i32,
}

/// Serializable form of a [`UrlPolicy`], as stored and exposed over HTTP.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyRecord {
    pub id: String,
    pub url_pattern: String,
    pub policy: Policy,
    pub weight: i32,
}

impl UrlPolicy {
    pub fn new(
        id: impl Into<String>,
        pattern: &str,
        policy: Policy,
        weight: i32,
    ) -> Result<Self, PolicyError> {
        let pattern = Regex::new(pattern).map_err(|source| PolicyError::InvalidPattern {
            pattern: pattern.to_string(),
            source,
        })?;
        Ok(Self {
            id: id.into(),
            pattern,
            policy,
            weight,
        })
    }

    pub fn record(&self) -> PolicyRecord {
        PolicyRecord {
            id: self.id.clone(),
            url_pattern: self.pattern.as_str().to_string(),
            policy: self.policy,
            weight: self.weight,
        }
    }
}

impl TryFrom<PolicyRecord> for UrlPolicy {
    type Error = PolicyError;

    fn try_from(record: PolicyRecord) -> Result<Self, Self::Error> {
        UrlPolicy::new(record.id, &record.url_pattern, record.policy, record.weight)
    }
}

/// Source of policies for [`PolicyRegistry::load`].
#[async_trait]
pub trait PolicyLoader: Send + Sync {
    async fn load(&self) -> Result<Vec<UrlPolicy>, PolicyError>;
}

/// Loader returning a fixed set of policies.
#[derive(Debug, Clone, Default)]
pub struct StaticLoader(pub Vec<UrlPolicy>);

#[async_trait]
impl PolicyLoader for StaticLoader {
    async fn load(&self) -> Result<Vec<UrlPolicy>, PolicyError> {
        Ok(self.0.clone())
    }
}

/// Weight-ordered policy set with a fallback.
#[derive(Debug)]
pub struct PolicyRegistry {
    default_policy: Policy,
    policies: RwLock<Vec<UrlPolicy>>,
}

impl PolicyRegistry {
    pub fn new(default_policy: Policy) -> Self {
        Self {
            default_policy,
            policies: RwLock::new(Vec::new()),
        }
    }

    pub fn default_policy(&self) -> Policy {
        self.default_policy
    }

    /// Compile and insert a policy, returning its generated id.
    pub async fn add_policy(
        &self,
        pattern: &str,
        policy: Policy,
        weight: i32,
    ) -> Result<String, PolicyError> {
        let rule = UrlPolicy::new(Uuid::new_v4().to_string(), pattern, policy, weight)?;
        let id = rule.id.clone();
        let mut policies = self.policies.write().await;
        policies.push(rule);
        policies.sort_by_key(|p| p.weight);
        Ok(id)
    }

    /// Replace the current policies with what `loader` returns.
    ///
    /// An empty result leaves the registry untouched. On error the previous
    /// policies stay in place and the error is returned.
    pub async fn load(&self, loader: &dyn PolicyLoader) -> Result<usize, PolicyError> {
        let mut loaded = loader.load().await?;
        if loaded.is_empty() {
            debug!("No policies returned, registry not updated");
            return Ok(0);
        }
        loaded.sort_by_key(|p| p.weight);
        let count = loaded.len();
        *self.policies.write().await = loaded;
        debug!(count, "Policies loaded");
        Ok(count)
    }

    /// The policy of the lowest-weight rule matching `url`, or the default.
    pub async fn determine_for_url(&self, url: &str) -> Policy {
        self.policies
            .read()
            .await
            .iter()
            .find(|p| p.pattern.is_match(url))
            .map(|p| p.policy)
            .unwrap_or(self.default_policy)
    }

    /// Snapshot of the current rules in evaluation order.
    pub async fn policies(&self) -> Vec<UrlPolicy> {
        self.policies.read().await.clone()
    }

    pub async fn remove_policy(&self, id: &str) -> bool {
        let mut policies = self.policies.write().await;
        let before = policies.len();
        policies.retain(|p| p.id != id);
        policies.len() != before
    }

    /// Reload from `loader` every `interval` until `shutdown` fires.
    ///
    /// Failed reloads are logged and the last good policies remain active.
    pub fn spawn_reloader(
        self: Arc<Self>,
        loader: Arc<dyn PolicyLoader>,
        interval: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        info!("Policy reloader stopped");
                        return;
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = self.load(loader.as_ref()).await {
                            warn!(error = %e, "Failed to reload policies");
                        }
                    }
                }
            }
        })
    }
}
