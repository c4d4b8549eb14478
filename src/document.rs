// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! HTML primitives shared by verification, endpoint discovery and sending.
//!
//! Everything here parses into a [`scraper::Html`] tree and hands back owned
//! data. The tree itself never leaves these functions, so callers can hold
//! the results across `.await` points.

use scraper::{node::Element, ElementRef, Html};
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

/// Cap applied to fetched pages unless configured otherwise (5 MiB).
pub const DEFAULT_MAX_BODY_BYTES: usize = 5 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum BodyError {
    #[error("Failed to read body: {0}")]
    Read(#[from] reqwest::Error),

    #[error("Body exceeds {0} bytes")]
    TooLarge(usize),
}

/// Read `response` as text, giving up once more than `limit` bytes arrive.
///
/// A declared `Content-Length` above the limit fails before any data is read.
/// Invalid UTF-8 is replaced rather than rejected.
pub async fn read_body(mut response: reqwest::Response, limit: usize) -> Result<String, BodyError> {
    if response.content_length().is_some_and(|len| len > limit as u64) {
        warn!(url = %response.url(), limit, "Declared body too large");
        return Err(BodyError::TooLarge(limit));
    }
    let mut buf = Vec::new();
    while let Some(chunk) = response.chunk().await? {
        if buf.len() + chunk.len() > limit {
            warn!(url = %response.url(), limit, "Body too large");
            return Err(BodyError::TooLarge(limit));
        }
        buf.extend_from_slice(&chunk);
    }
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// Errors raised while fetching a document.
#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("Invalid document URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Failed to fetch document: {0}")]
    Fetch(#[from] reqwest::Error),

    #[error("Unexpected status {0} while fetching document")]
    Status(u16),

    #[error("Document body exceeds {0} bytes")]
    BodyTooLarge(usize),
}

impl From<BodyError> for DocumentError {
    fn from(e: BodyError) -> Self {
        match e {
            BodyError::Read(e) => Self::Fetch(e),
            BodyError::TooLarge(limit) => Self::BodyTooLarge(limit),
        }
    }
}

/// Resolve `href` against `base`.
///
/// Absolute http(s) links are returned untouched. Without a base the raw
/// value is returned. `None` means the link could not be resolved at all.
pub fn resolve_url(base: Option<&Url>, href: &str) -> Option<String> {
    if href.starts_with("https://") || href.starts_with("http://") {
        return Some(href.to_string());
    }
    match base {
        None => Some(href.to_string()),
        Some(base) => base.join(href).ok().map(String::from),
    }
}

/// True when the whitespace separated `rel` attribute carries `token`.
pub fn rel_contains(rel: &str, token: &str) -> bool {
    rel.split_ascii_whitespace().any(|r| r == token)
}

/// Links and title found in a page, in document order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct References {
    pub title: Option<String>,
    pub links: Vec<String>,
}

/// Collect every `<a href>`, `<img src>` and `<source src>` nested in
/// `<audio>`/`<video>`, plus the first document `<title>`.
///
/// Markup inside comments never becomes an element, so it is skipped.
pub fn scan_references(body: &str) -> References {
    let html = Html::parse_document(body);
    let mut refs = References::default();

    for node in html.root_element().descendants() {
        let Some(el) = ElementRef::wrap(node) else {
            continue;
        };
        let attr = match el.value().name() {
            "title" => {
                if refs.title.is_none() && !has_ancestor(el, &["svg"]) {
                    refs.title = Some(el.text().collect::<String>().trim().to_string());
                }
                None
            }
            "a" => el.value().attr("href"),
            "img" => el.value().attr("src"),
            "source" if has_ancestor(el, &["audio", "video"]) => el.value().attr("src"),
            _ => None,
        };
        if let Some(value) = attr {
            refs.links.push(value.to_string());
        }
    }

    refs
}

/// First `<link>` or `<a>` whose `rel` includes `webmention` and that has an
/// `href` attribute. The attribute may be empty.
pub fn find_webmention_link(body: &str) -> Option<String> {
    let html = Html::parse_document(body);
    let found = html
        .root_element()
        .descendants()
        .filter_map(ElementRef::wrap)
        .map(|el| el.value())
        .filter(|el| matches!(el.name(), "link" | "a"))
        .find_map(webmention_href);
    found
}

fn webmention_href(el: &Element) -> Option<String> {
    let rel = el.attr("rel")?;
    if !rel_contains(rel, "webmention") {
        return None;
    }
    el.attr("href").map(str::to_string)
}

fn has_ancestor(el: ElementRef<'_>, names: &[&str]) -> bool {
    el.ancestors()
        .filter_map(|n| n.value().as_element())
        .any(|a| names.contains(&a.name()))
}

/// A fetched page reduced to its title and outgoing anchors.
#[derive(Debug, Clone)]
pub struct Document {
    url: Url,
    title: Option<String>,
    links: Vec<String>,
}

impl Document {
    /// Build a document from an already retrieved body.
    pub fn parse(url: Url, body: &str) -> Self {
        let html = Html::parse_document(body);
        let mut title = None;
        let mut links = Vec::new();
        for el in html.root_element().descendants().filter_map(ElementRef::wrap) {
            match el.value().name() {
                "title" if title.is_none() => {
                    title = Some(el.text().collect::<String>().trim().to_string());
                }
                "a" => {
                    if let Some(href) = el.value().attr("href").filter(|h| !h.is_empty()) {
                        links.push(href.to_string());
                    }
                }
                _ => {}
            }
        }
        Self { url, title, links }
    }

    /// GET `url` and parse the response body, reading at most
    /// `max_body_bytes` of it.
    pub async fn from_url(
        client: &reqwest::Client,
        url: &str,
        max_body_bytes: usize,
    ) -> Result<Self, DocumentError> {
        let parsed = Url::parse(url)?;
        let response = client.get(parsed.clone()).send().await?;
        if !response.status().is_success() {
            return Err(DocumentError::Status(response.status().as_u16()));
        }
        let body = read_body(response, max_body_bytes).await?;
        let doc = Self::parse(parsed, &body);
        debug!(url = %url, links = doc.links.len(), "Document fetched");
        Ok(doc)
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    pub fn links(&self) -> &[String] {
        &self.links
    }

    /// Absolute http(s) links pointing to a different host than the document.
    pub fn external_links(&self) -> Vec<String> {
        self.links
            .iter()
            .filter(|link| match Url::parse(link) {
                Ok(u) => {
                    matches!(u.scheme(), "http" | "https")
                        && (u.host_str() != self.url.host_str() || u.port() != self.url.port())
                }
                Err(_) => false,
            })
            .cloned()
            .collect()
    }
}
