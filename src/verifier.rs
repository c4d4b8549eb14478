// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Source verification.
//!
//! A mention is valid when its source page, fetched over HTTP, links to the
//! target. The verifier also pulls a title, content, author and mention type
//! out of the page so the moderation UI has something to show.

use crate::document::{read_body, resolve_url, scan_references, BodyError, DEFAULT_MAX_BODY_BYTES};
use crate::microformats::{self, Item, PropertyValue};
use crate::models::{truncate_content, Mention, MentionType};
use crate::shorteners::ShortenerRegistry;
use async_trait::async_trait;
use reqwest::{redirect, Client};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;
use url::Url;

/// Redirect budget used when nothing else is configured.
pub const DEFAULT_MAX_REDIRECTS: i32 = 10;

/// Bounds for a single verification fetch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyOptions {
    /// `-1` follows any number of redirects, `0` none, `N` fails after N.
    #[serde(default = "default_max_redirects")]
    pub max_redirects: i32,

    /// Deadline for the whole fetch in seconds (default: 30)
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,

    /// Largest accepted response body (default: 5 MiB)
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

fn default_max_redirects() -> i32 {
    DEFAULT_MAX_REDIRECTS
}

fn default_fetch_timeout_secs() -> u64 {
    30
}

fn default_max_body_bytes() -> usize {
    DEFAULT_MAX_BODY_BYTES
}

impl Default for VerifyOptions {
    fn default() -> Self {
        Self {
            max_redirects: default_max_redirects(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

impl VerifyOptions {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    fn redirect_policy(&self) -> redirect::Policy {
        let max = self.max_redirects;
        redirect::Policy::custom(move |attempt| {
            if max > -1 && attempt.previous().len() > max as usize {
                attempt.error("too many redirects")
            } else {
                attempt.follow()
            }
        })
    }
}

#[derive(Debug, Error)]
pub enum VerificationError {
    #[error("Invalid source URL: {0}")]
    InvalidSource(#[from] url::ParseError),

    #[error("Too many redirects")]
    TooManyRedirects,

    #[error("Failed to fetch source: {0}")]
    Fetch(#[from] reqwest::Error),

    #[error("Source returned status {0}")]
    Status(u16),

    #[error("Source body exceeds {0} bytes")]
    BodyTooLarge(usize),

    #[error("Target not found in content")]
    TargetNotFound,
}

impl From<BodyError> for VerificationError {
    fn from(e: BodyError) -> Self {
        match e {
            BodyError::Read(e) => Self::Fetch(e),
            BodyError::TooLarge(limit) => Self::BodyTooLarge(limit),
        }
    }
}

/// Checks that a mention's source links to its target.
#[async_trait]
pub trait Verifier: Send + Sync {
    /// Fetch and inspect `mention.source`, filling in the mention's metadata
    /// on success.
    async fn verify(
        &self,
        mention: &mut Mention,
        options: &VerifyOptions,
    ) -> Result<(), VerificationError>;
}

/// Verifier for HTML sources, optionally marked up with microformats.
#[derive(Debug, Clone, Default)]
pub struct HtmlVerifier {
    shorteners: ShortenerRegistry,
}

impl HtmlVerifier {
    pub fn new(shorteners: ShortenerRegistry) -> Self {
        Self { shorteners }
    }

    /// Verify an already fetched body. `base` is the URL the body was
    /// finally served from and anchors relative links.
    pub async fn verify_document(
        &self,
        base: Option<&Url>,
        body: &str,
        mention: &mut Mention,
    ) -> Result<(), VerificationError> {
        let refs = scan_references(body);
        let candidates: Vec<String> = refs
            .links
            .iter()
            .filter_map(|link| resolve_url(base, link))
            .collect();

        if !self.links_to_target(&candidates, &mention.target).await {
            return Err(VerificationError::TargetNotFound);
        }

        mention.reset_metadata();
        mention.title = match refs.title.filter(|t| !t.is_empty()) {
            Some(title) => title,
            None => Url::parse(&mention.source)
                .ok()
                .and_then(|u| u.host_str().map(str::to_string))
                .unwrap_or_default(),
        };

        for item in microformats::parse(body, base) {
            if let Some(entry) = item.find("h-entry") {
                fill_from_entry(mention, entry);
            }
        }
        if mention.rsvp.is_some() {
            mention.mention_type = MentionType::Rsvp;
        }
        mention.content = truncate_content(&mention.content);
        Ok(())
    }

    async fn links_to_target(&self, candidates: &[String], target: &str) -> bool {
        if candidates.iter().any(|c| c == target) {
            return true;
        }
        for candidate in candidates {
            match self.shorteners.resolve(candidate).await {
                Ok(Some(resolved)) if resolved == target => return true,
                Ok(_) => {}
                Err(e) => debug!(link = %candidate, error = %e, "Shortener lookup failed"),
            }
        }
        false
    }
}

#[async_trait]
impl Verifier for HtmlVerifier {
    async fn verify(
        &self,
        mention: &mut Mention,
        options: &VerifyOptions,
    ) -> Result<(), VerificationError> {
        let source = Url::parse(&mention.source)?;
        let timeout = options.fetch_timeout();
        let client = Client::builder()
            .redirect(options.redirect_policy())
            .timeout(timeout)
            .connect_timeout(timeout.min(Duration::from_secs(10)))
            .build()?;

        let response = client.get(source).send().await.map_err(|e| {
            if e.is_redirect() {
                VerificationError::TooManyRedirects
            } else {
                VerificationError::Fetch(e)
            }
        })?;
        if !response.status().is_success() {
            return Err(VerificationError::Status(response.status().as_u16()));
        }

        let final_url = response.url().clone();
        let body = read_body(response, options.max_body_bytes).await?;

        debug!(source = %mention.source, final_url = %final_url, bytes = body.len(), "Fetched source");
        self.verify_document(Some(&final_url), &body, mention).await
    }
}

fn fill_from_entry(mention: &mut Mention, entry: &Item) {
    if let Some(name) = entry.first_text("name").filter(|n| !n.is_empty()) {
        mention.title = name.to_string();
    }
    if entry.first_text("in-reply-to") == Some(mention.target.as_str()) {
        mention.mention_type = MentionType::Comment;
    }
    if entry.first_text("like-of") == Some(mention.target.as_str()) {
        mention.mention_type = MentionType::Like;
    }
    if let Some(rsvp) = entry.first_text("rsvp") {
        mention.rsvp = Some(rsvp.to_string());
    }
    if let Some(content) = entry.first_text("content") {
        mention.content = content.to_string();
    }
    let author = entry
        .first("author")
        .and_then(PropertyValue::as_item)
        .filter(|a| a.has_type("h-card"))
        .and_then(|a| a.first_text("name"));
    if let Some(author) = author {
        mention.author_name = author.to_string();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shorteners::tests::static_registry;

    fn mention(source: &str, target: &str) -> Mention {
        Mention::new(source, target)
    }

    async fn check(body: &str, mention: &mut Mention) -> Result<(), VerificationError> {
        let base = Url::parse(&mention.source).ok();
        HtmlVerifier::default()
            .verify_document(base.as_ref(), body, mention)
            .await
    }

    #[tokio::test]
    async fn test_link_exists() {
        let mut m = mention("https://source.com/", "https://target.com");
        let body = "<html><body><a href=\"https://something-else.com\">link</a>\
                    <a href=\"https://target.com\">link</a></body></html>";
        tokio_test::assert_ok!(check(body, &mut m).await);
    }

    #[tokio::test]
    async fn test_relative_link_resolves_against_source() {
        let mut m = mention("https://source.com/", "https://source.com/target");
        let body = "<html><body><a href=\"/target\">link</a></body></html>";
        tokio_test::assert_ok!(check(body, &mut m).await);
    }

    #[tokio::test]
    async fn test_link_only_in_text_fails() {
        let mut m = mention("https://source.com/", "https://target.com");
        let body = "<html><body>https://something-else.com https://target.com</body></html>";
        assert!(matches!(
            check(body, &mut m).await,
            Err(VerificationError::TargetNotFound)
        ));
    }

    #[tokio::test]
    async fn test_link_only_in_comment_fails() {
        let mut m = mention("https://source.com/", "https://target.com");
        let body = "<html><body><!-- <a href=\"https://target.com\">x</a> --></body></html>";
        tokio_test::assert_err!(check(body, &mut m).await);
    }

    #[tokio::test]
    async fn test_video_source_counts() {
        let mut m = mention("https://source.com/", "https://target.com/clip.mp4");
        let body = "<html><body><video><source src=\"https://target.com/clip.mp4\"></video></body></html>";
        tokio_test::assert_ok!(check(body, &mut m).await);
    }

    #[tokio::test]
    async fn test_image_without_title_uses_hostname() {
        let mut m = mention("https://a.example/post", "https://b.example/");
        let body = "<html><body><img src=\"https://b.example/\"></body></html>";
        tokio_test::assert_ok!(check(body, &mut m).await);
        assert_eq!(m.title, "a.example");
    }

    #[tokio::test]
    async fn test_title_present() {
        let mut m = mention("https://source.com/", "https://target.com");
        let body = "<html><head><title>Sample title</title></head>\
                    <body><a href=\"https://target.com\">link</a></body></html>";
        tokio_test::assert_ok!(check(body, &mut m).await);
        assert_eq!(m.title, "Sample title");
    }

    #[tokio::test]
    async fn test_h_entry_extraction() {
        let mut m = mention("https://source.com/", "https://target.com");
        let body = "<html><head><title>Sample title</title></head><body>\
            <div class=\"h-entry\"><h1 class=\"p-name\">Actual title</h1>\
            <a href=\"/\" class=\"u-author h-card\">Author</a>\
            <div class=\"e-content\"><p>content</p> <p>next</p></div>\
            <a href=\"https://something-else.com\">link</a>\
            <a class=\"u-in-reply-to\" href=\"https://target.com\">link</a></div></body></html>";
        tokio_test::assert_ok!(check(body, &mut m).await);
        assert_eq!(m.title, "Actual title");
        assert_eq!(m.content, "content next");
        assert_eq!(m.author_name, "Author");
        assert_eq!(m.mention_type, MentionType::Comment);
    }

    #[tokio::test]
    async fn test_rsvp_from_text_and_data() {
        for rsvp in [
            "<span class=\"p-rsvp\">yes</span>",
            "<data class=\"p-rsvp\" value=\"yes\">I'll be there!</data>",
        ] {
            let mut m = mention("https://source.com/", "https://target.com");
            let body = format!(
                "<html><body><div class=\"h-entry\"><h1 class=\"p-name\">Title</h1>{rsvp}\
                 <a class=\"u-in-reply-to\" href=\"https://something-else.com\">link</a>\
                 <a href=\"https://target.com\">link</a></div></body></html>"
            );
            tokio_test::assert_ok!(check(&body, &mut m).await);
            assert_eq!(m.mention_type, MentionType::Rsvp);
            assert_eq!(m.rsvp.as_deref(), Some("yes"));
        }
    }

    #[tokio::test]
    async fn test_like_of_target() {
        let mut m = mention("https://source.com/", "https://target.com");
        let body = "<html><body class=\"h-entry\"><a href=\"https://something-else.com\">link</a>\
                    <a href=\"https://target.com\" class=\"u-like-of\">link</a></body></html>";
        tokio_test::assert_ok!(check(body, &mut m).await);
        assert_eq!(m.mention_type, MentionType::Like);
    }

    #[tokio::test]
    async fn test_like_of_something_else() {
        let mut m = mention("https://source.com/", "https://target.com");
        let body = "<html><body class=\"h-entry\">\
                    <a href=\"https://something-else.com\" class=\"u-like-of\">link</a>\
                    <a href=\"https://target.com\">link</a></body></html>";
        tokio_test::assert_ok!(check(body, &mut m).await);
        assert_eq!(m.mention_type, MentionType::None);
    }

    #[tokio::test]
    async fn test_long_content_is_truncated() {
        let mut m = mention("https://source.com/", "https://target.com");
        let body = format!(
            "<html><body><div class=\"h-entry\"><p class=\"p-name\">T</p>\
             <div class=\"e-content\">{}</div><a href=\"https://target.com\">x</a></div></body></html>",
            "x".repeat(600)
        );
        tokio_test::assert_ok!(check(&body, &mut m).await);
        assert_eq!(m.content.chars().count(), 498);
        assert!(m.content.ends_with('…'));
    }

    #[tokio::test]
    async fn test_shortened_link_resolves_to_target() {
        let verifier = HtmlVerifier::new(static_registry(
            "https://t.co/",
            &[("https://t.co/mEnq1oJX3Q?amp=1", "https://resource-types.example.org/")],
        ));
        let mut m = mention("https://source.com/", "https://resource-types.example.org/");
        let body = "<html><body><a href=\"https://t.co/mEnq1oJX3Q?amp=1\">link</a></body></html>";
        tokio_test::assert_ok!(verifier.verify_document(None, body, &mut m).await);
    }

    #[test]
    fn test_default_options() {
        let options = VerifyOptions::default();
        assert_eq!(options.max_redirects, DEFAULT_MAX_REDIRECTS);
        assert_eq!(options.fetch_timeout(), Duration::from_secs(30));
    }
}
