// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Configuration for the Webmention moderation service.
//!
//! Values come from an optional TOML file overlaid with `WEBMENTION_*`
//! environment variables. Nested keys use `__`, lists are comma separated:
//!
//! - `WEBMENTION_BIND_ADDR=0.0.0.0:8080`
//! - `WEBMENTION_VERIFICATION__INTERVAL_SECS=10`
//! - `WEBMENTION_RECEIVER__ALLOWED_TARGET_HOSTS=example.org,blog.example.org`
//! - `WEBMENTION_MANAGE__ACCESS_KEYS=secret-one,secret-two`

use crate::policy::Policy;
use crate::verifier::VerifyOptions;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use url::Url;

const LIST_KEYS: [&str; 4] = [
    "receiver.require_content_type",
    "receiver.allowed_target_hosts",
    "notifications.admin_emails",
    "manage.access_keys",
];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Configuration for the Webmention moderation service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server bind address (default: 0.0.0.0:8080)
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Public base URL, used in notification links (default: http://localhost:8080)
    #[serde(default = "default_public_url")]
    pub public_url: String,

    /// `memory` or a RocksDB directory (default: memory)
    #[serde(default = "default_database")]
    pub database: String,

    #[serde(default)]
    pub receiver: ReceiverConfig,

    #[serde(default)]
    pub verification: VerificationConfig,

    #[serde(default)]
    pub policies: PolicyConfig,

    #[serde(default)]
    pub notifications: NotificationConfig,

    #[serde(default)]
    pub metrics: MetricsConfig,

    #[serde(default)]
    pub manage: ManageConfig,
}

/// Validation of incoming submissions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceiverConfig {
    /// Accepted content types (default: application/x-www-form-urlencoded)
    #[serde(default = "default_content_types")]
    pub require_content_type: Vec<String>,

    /// Hosts mentions may target. Empty accepts any host.
    #[serde(default)]
    pub allowed_target_hosts: Vec<String>,
}

/// Background verification settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationConfig {
    /// Seconds between queue ticks (default: 10)
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    /// Minimum seconds between two attempts on the same mention (default: 30)
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default)]
    pub fetch: VerifyOptions,
}

/// URL policy settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Applied when no pattern matches (default: default)
    #[serde(default = "default_policy")]
    pub default_policy: Policy,

    /// Seconds between reloads from storage (default: 20)
    #[serde(default = "default_reload_interval_secs")]
    pub reload_interval_secs: u64,
}

/// Mail sent after each verification.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotificationConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub mail_from: String,

    #[serde(default)]
    pub admin_emails: Vec<String>,

    #[serde(default)]
    pub smtp: SmtpConfig,
}

/// SMTP relay configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmtpConfig {
    #[serde(default = "default_smtp_host")]
    pub host: String,

    #[serde(default = "default_smtp_port")]
    pub port: u16,

    #[serde(default = "default_true")]
    pub use_tls: bool,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable Prometheus metrics endpoint (default: true)
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics endpoint path (default: /metrics)
    #[serde(default = "default_metrics_path")]
    pub path: String,
}

/// Moderation API access.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ManageConfig {
    /// Bearer tokens accepted on `/manage`. The API is disabled when empty.
    #[serde(default)]
    pub access_keys: Vec<String>,
}

fn default_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_public_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_database() -> String {
    "memory".to_string()
}

fn default_content_types() -> Vec<String> {
    vec!["application/x-www-form-urlencoded".to_string()]
}

fn default_interval_secs() -> u64 {
    10
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_policy() -> Policy {
    Policy::Default
}

fn default_reload_interval_secs() -> u64 {
    20
}

fn default_smtp_host() -> String {
    "localhost".to_string()
}

fn default_smtp_port() -> u16 {
    587
}

fn default_true() -> bool {
    true
}

fn default_metrics_path() -> String {
    "/metrics".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            public_url: default_public_url(),
            database: default_database(),
            receiver: ReceiverConfig::default(),
            verification: VerificationConfig::default(),
            policies: PolicyConfig::default(),
            notifications: NotificationConfig::default(),
            metrics: MetricsConfig::default(),
            manage: ManageConfig::default(),
        }
    }
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            require_content_type: default_content_types(),
            allowed_target_hosts: Vec::new(),
        }
    }
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            timeout_secs: default_timeout_secs(),
            fetch: VerifyOptions::default(),
        }
    }
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            default_policy: default_policy(),
            reload_interval_secs: default_reload_interval_secs(),
        }
    }
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            host: default_smtp_host(),
            port: default_smtp_port(),
            use_tls: default_true(),
            username: None,
            password: None,
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            path: default_metrics_path(),
        }
    }
}

impl VerificationConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl PolicyConfig {
    pub fn reload_interval(&self) -> Duration {
        Duration::from_secs(self.reload_interval_secs)
    }
}

impl Config {
    /// Load from an optional file and the environment, then validate.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }
        let mut env = config::Environment::with_prefix("WEBMENTION")
            .prefix_separator("_")
            .separator("__")
            .list_separator(",")
            .try_parsing(true);
        for key in LIST_KEYS {
            env = env.with_list_parse_key(key);
        }
        let cfg: Config = builder.add_source(env).build()?.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Parse a TOML document, without consulting the environment.
    pub fn from_toml(source: &str) -> Result<Self, ConfigError> {
        let cfg: Config = config::Config::builder()
            .add_source(config::File::from_str(source, config::FileFormat::Toml))
            .build()?
            .try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| -> Result<(), ConfigError> {
            Err(ConfigError::Invalid(msg.to_string()))
        };

        if Url::parse(&self.public_url).is_err() {
            return invalid("public_url must be an absolute URL");
        }
        if self.verification.interval_secs == 0 {
            return invalid("verification.interval_secs must be positive");
        }
        if self.policies.reload_interval_secs == 0 {
            return invalid("policies.reload_interval_secs must be positive");
        }
        if self.verification.fetch.max_redirects < -1 {
            return invalid("verification.fetch.max_redirects must be -1 or greater");
        }
        if !self.metrics.path.starts_with('/') {
            return invalid("metrics.path must start with '/'");
        }
        if self.metrics.enabled && is_reserved_path(&self.metrics.path) {
            return invalid("metrics.path collides with a built-in route");
        }
        if self.notifications.enabled {
            if self.notifications.mail_from.is_empty() {
                return invalid("notifications.mail_from is required when notifications are enabled");
            }
            if self.notifications.admin_emails.is_empty() {
                return invalid("notifications.admin_emails is required when notifications are enabled");
            }
            if self.notifications.smtp.host.is_empty() {
                return invalid("notifications.smtp.host is required when notifications are enabled");
            }
        }
        Ok(())
    }
}

/// Paths served by the router itself.
const RESERVED_PATHS: &[&str] = &["/health", "/healthz", "/receive", "/get"];

fn is_reserved_path(path: &str) -> bool {
    RESERVED_PATHS.contains(&path) || path == "/manage" || path.starts_with("/manage/")
}
