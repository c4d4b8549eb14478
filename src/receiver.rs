// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Webmention receiving.
//!
//! Submissions are validated and stored with status `new`; verification
//! happens later on the queue. Validation covers:
//! - Content-Type
//! - presence and shape of `source` and `target`
//! - `source` and `target` differing
//! - the target policy (which hosts may be mentioned)

use crate::config::ReceiverConfig;
use crate::db::{MentionStore, ReceiveOutcome, StorageError};
use crate::metrics::MentionMetrics;
use crate::models::{Mention, Webmention};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

/// Validation error types.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Invalid Content-Type: expected one of {expected:?}, got {actual:?}")]
    InvalidContentType {
        expected: Vec<String>,
        actual: Option<String>,
    },

    #[error("Missing required parameter: {0}")]
    MissingParameter(&'static str),

    #[error("Invalid URL format for {param}: {url}")]
    InvalidUrl { param: &'static str, url: String },

    #[error("Source and target must differ")]
    SameUrl,

    #[error("Target not accepted: {0}")]
    TargetNotAllowed(String),
}

#[derive(Debug, Error)]
pub enum ReceiveError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Decides whether this receiver accepts mentions of a target.
pub trait TargetPolicy: Send + Sync {
    fn allows(&self, target: &Url) -> bool;
}

impl<F> TargetPolicy for F
where
    F: Fn(&Url) -> bool + Send + Sync,
{
    fn allows(&self, target: &Url) -> bool {
        self(target)
    }
}

/// Accepts targets on a fixed set of hosts. An empty set accepts everything.
///
/// Entries are `host` or `host:port`; default ports never appear in a parsed
/// URL, so `example.org` also covers `https://example.org:443/`.
#[derive(Debug, Clone, Default)]
pub struct AllowHosts {
    hosts: Vec<String>,
}

impl AllowHosts {
    pub fn new<I, S>(hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            hosts: hosts
                .into_iter()
                .map(|h| h.as_ref().trim().to_lowercase())
                .filter(|h| !h.is_empty())
                .collect(),
        }
    }

    pub fn is_unrestricted(&self) -> bool {
        self.hosts.is_empty()
    }
}

impl TargetPolicy for AllowHosts {
    fn allows(&self, target: &Url) -> bool {
        if self.hosts.is_empty() {
            return true;
        }
        let Some(host) = target.host_str() else {
            return false;
        };
        let key = match target.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        };
        self.hosts.iter().any(|h| *h == key)
    }
}

/// Acknowledgement returned for an accepted submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Receipt {
    pub id: String,
    pub status: &'static str,
    /// True when an existing mention of the same pair was requeued.
    pub requeued: bool,
}

/// Validates submissions and queues them for verification.
#[derive(Clone)]
pub struct Receiver {
    store: Arc<dyn MentionStore>,
    metrics: MentionMetrics,
    targets: Arc<dyn TargetPolicy>,
    content_types: Vec<String>,
}

impl Receiver {
    pub fn new(
        store: Arc<dyn MentionStore>,
        metrics: MentionMetrics,
        targets: Arc<dyn TargetPolicy>,
        config: &ReceiverConfig,
    ) -> Self {
        Self {
            store,
            metrics,
            targets,
            content_types: config
                .require_content_type
                .iter()
                .map(|s| s.to_lowercase())
                .collect(),
        }
    }

    /// Validate the Content-Type header, ignoring parameters such as charset.
    pub fn validate_content_type(&self, content_type: Option<&str>) -> Result<(), ValidationError> {
        let ct = content_type.map(|s| {
            s.split(';').next().unwrap_or(s).trim().to_lowercase()
        });
        match &ct {
            Some(actual) if self.content_types.contains(actual) => Ok(()),
            _ => {
                debug!(content_type = ?ct, "Content-Type invalid");
                Err(ValidationError::InvalidContentType {
                    expected: self.content_types.clone(),
                    actual: ct,
                })
            }
        }
    }

    /// Validate source and target parameters.
    pub fn validate_submission(
        &self,
        source: Option<&str>,
        target: Option<&str>,
    ) -> Result<Webmention, ValidationError> {
        let source = required("source", source)?;
        let target = required("target", target)?;
        absolute_url("source", source)?;
        let target_url = absolute_url("target", target)?;

        if source == target {
            debug!(source = %source, "Source equals target");
            return Err(ValidationError::SameUrl);
        }
        if !self.targets.allows(&target_url) {
            debug!(target = %target, "Target rejected by policy");
            return Err(ValidationError::TargetNotAllowed(target.to_string()));
        }

        Ok(Webmention {
            source: source.to_string(),
            target: target.to_string(),
        })
    }

    /// Validate a raw submission and queue it.
    pub async fn receive(
        &self,
        content_type: Option<&str>,
        body: &[u8],
    ) -> Result<Receipt, ReceiveError> {
        self.validate_content_type(content_type)?;
        let (source, target) = parse_form(body);
        let webmention = self.validate_submission(source.as_deref(), target.as_deref())?;

        let mention = Mention::new(webmention.source, webmention.target);
        let outcome = self.store.insert_or_reset(&mention).await?;
        info!(
            id = %outcome.id(),
            source = %mention.source,
            target = %mention.target,
            requeued = matches!(outcome, ReceiveOutcome::Reset(_)),
            "Mention queued"
        );
        self.metrics.refresh_logged(self.store.as_ref()).await;

        Ok(Receipt {
            id: outcome.id().to_string(),
            status: "queued",
            requeued: matches!(outcome, ReceiveOutcome::Reset(_)),
        })
    }
}

/// First `source` and `target` values of a form-encoded body.
pub fn parse_form(body: &[u8]) -> (Option<String>, Option<String>) {
    let mut source = None;
    let mut target = None;
    for (key, value) in url::form_urlencoded::parse(body) {
        match key.as_ref() {
            "source" if source.is_none() => source = Some(value.into_owned()),
            "target" if target.is_none() => target = Some(value.into_owned()),
            _ => {}
        }
    }
    (source, target)
}

fn required<'a>(param: &'static str, value: Option<&'a str>) -> Result<&'a str, ValidationError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => {
            debug!(param, "Missing parameter");
            Err(ValidationError::MissingParameter(param))
        }
    }
}

fn absolute_url(param: &'static str, value: &str) -> Result<Url, ValidationError> {
    let invalid = || ValidationError::InvalidUrl {
        param,
        url: value.to_string(),
    };
    let url = Url::parse(value).map_err(|_| invalid())?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().map_or(true, str::is_empty) {
        debug!(param, url = %value, "Invalid URL (bad scheme or no host)");
        return Err(invalid());
    }
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::models::MentionStatus;

    const FORM: &str = "application/x-www-form-urlencoded";

    async fn receiver_with(targets: Arc<dyn TargetPolicy>) -> (Receiver, Arc<Database>) {
        let db = Arc::new(Database::connect("memory").await.unwrap());
        let receiver = Receiver::new(
            db.clone(),
            MentionMetrics::new().unwrap(),
            targets,
            &ReceiverConfig::default(),
        );
        (receiver, db)
    }

    async fn receiver() -> (Receiver, Arc<Database>) {
        receiver_with(Arc::new(AllowHosts::default())).await
    }

    #[tokio::test]
    async fn test_content_type() {
        let (r, _) = receiver().await;
        assert!(r.validate_content_type(Some(FORM)).is_ok());
        assert!(r
            .validate_content_type(Some("Application/X-WWW-Form-Urlencoded; charset=utf-8"))
            .is_ok());
        assert!(r.validate_content_type(Some("application/json")).is_err());
        assert!(r.validate_content_type(None).is_err());
    }

    #[tokio::test]
    async fn test_missing_and_malformed_parameters() {
        let (r, _) = receiver().await;
        assert_eq!(
            r.validate_submission(None, Some("https://t.example/")),
            Err(ValidationError::MissingParameter("source"))
        );
        assert_eq!(
            r.validate_submission(Some("https://s.example/"), Some("  ")),
            Err(ValidationError::MissingParameter("target"))
        );
        for bad in ["ftp://example.com/file", "https://", "javascript:alert(1)", "/relative"] {
            assert!(
                matches!(
                    r.validate_submission(Some(bad), Some("https://t.example/")),
                    Err(ValidationError::InvalidUrl { param: "source", .. })
                ),
                "{bad} should be rejected"
            );
        }
    }

    #[tokio::test]
    async fn test_same_url_rejected() {
        let (r, _) = receiver().await;
        assert_eq!(
            r.validate_submission(Some("https://a.example/"), Some("https://a.example/")),
            Err(ValidationError::SameUrl)
        );
    }

    #[tokio::test]
    async fn test_allow_hosts() {
        let hosts = AllowHosts::new(["Example.org", "localhost:8080"]);
        assert!(hosts.allows(&Url::parse("https://example.org/post").unwrap()));
        assert!(hosts.allows(&Url::parse("https://example.org:443/post").unwrap()));
        assert!(hosts.allows(&Url::parse("http://localhost:8080/").unwrap()));
        assert!(!hosts.allows(&Url::parse("http://localhost/").unwrap()));
        assert!(!hosts.allows(&Url::parse("https://evil.example/").unwrap()));
        assert!(AllowHosts::default().allows(&Url::parse("https://any.example/").unwrap()));
    }

    #[tokio::test]
    async fn test_target_policy_closure() {
        let (r, _) =
            receiver_with(Arc::new(|u: &Url| u.path().starts_with("/notes/"))).await;
        assert!(r
            .validate_submission(Some("https://s.example/"), Some("https://t.example/notes/1"))
            .is_ok());
        assert!(matches!(
            r.validate_submission(Some("https://s.example/"), Some("https://t.example/about")),
            Err(ValidationError::TargetNotAllowed(_))
        ));
    }

    #[tokio::test]
    async fn test_receive_persists_new_mention() {
        let (r, db) = receiver().await;
        let body = b"source=https%3A%2F%2Fs.example%2Fpost&target=https%3A%2F%2Ft.example%2F";
        let receipt = r.receive(Some(FORM), body).await.unwrap();
        assert!(!receipt.requeued);

        let (items, total) = db.list(None, 10, 0).await.unwrap();
        assert_eq!(total, 1);
        assert_eq!(items[0].id, receipt.id);
        assert_eq!(items[0].source, "https://s.example/post");
        assert_eq!(items[0].status, MentionStatus::New);

        let again = r.receive(Some(FORM), body).await.unwrap();
        assert!(again.requeued);
        assert_eq!(again.id, receipt.id);
    }

    #[tokio::test]
    async fn test_invalid_submission_has_no_side_effect() {
        let (r, db) = receiver().await;
        let err = r
            .receive(Some(FORM), b"source=https%3A%2F%2Fs.example%2F")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ReceiveError::Validation(ValidationError::MissingParameter("target"))
        ));
        assert_eq!(db.list(None, 10, 0).await.unwrap().1, 0);
    }

    #[test]
    fn test_parse_form_takes_first_value() {
        let (s, t) = parse_form(b"source=a&source=b&target=c&other=d");
        assert_eq!(s.as_deref(), Some("a"));
        assert_eq!(t.as_deref(), Some("c"));
    }
}
