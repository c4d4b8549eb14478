// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Mention records and the values that travel with them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Maximum number of characters kept in [`Mention::content`].
pub const MAX_CONTENT_CHARS: usize = 500;

/// Lifecycle state of a mention.
///
/// `New` is the only state the receiver writes. The verification queue moves
/// a mention to `Verified` or `Invalid`, and to `Approved` when a policy
/// allows it. Moderators may set `Approved` or `Rejected` at any time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MentionStatus {
    New,
    Verified,
    Invalid,
    Approved,
    Rejected,
}

impl MentionStatus {
    pub const ALL: [MentionStatus; 5] = [
        MentionStatus::New,
        MentionStatus::Verified,
        MentionStatus::Invalid,
        MentionStatus::Approved,
        MentionStatus::Rejected,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MentionStatus::New => "new",
            MentionStatus::Verified => "verified",
            MentionStatus::Invalid => "invalid",
            MentionStatus::Approved => "approved",
            MentionStatus::Rejected => "rejected",
        }
    }
}

impl fmt::Display for MentionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MentionStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MentionStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| UnknownVariant(s.to_string()))
    }
}

/// Semantic classification derived from the source's microformats.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MentionType {
    #[default]
    None,
    Comment,
    Like,
    Rsvp,
}

impl MentionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MentionType::None => "none",
            MentionType::Comment => "comment",
            MentionType::Like => "like",
            MentionType::Rsvp => "rsvp",
        }
    }
}

impl FromStr for MentionType {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" | "none" => Ok(MentionType::None),
            "comment" => Ok(MentionType::Comment),
            "like" => Ok(MentionType::Like),
            "rsvp" => Ok(MentionType::Rsvp),
            other => Err(UnknownVariant(other.to_string())),
        }
    }
}

/// Returned when a stored status or type string is not recognised.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown variant: {0}")]
pub struct UnknownVariant(pub String);

/// The `source`/`target` pair exchanged over the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Webmention {
    pub source: String,
    pub target: String,
}

/// A received webmention together with everything verification learned about it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mention {
    pub id: String,
    pub source: String,
    pub target: String,
    pub status: MentionStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verified_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub author_name: String,
    #[serde(rename = "type", default)]
    pub mention_type: MentionType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rsvp: Option<String>,
}

impl Mention {
    /// A fresh, unverified mention with a newly generated id.
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            source: source.into(),
            target: target.into(),
            status: MentionStatus::New,
            created_at: Utc::now(),
            verified_at: None,
            title: String::new(),
            content: String::new(),
            author_name: String::new(),
            mention_type: MentionType::None,
            rsvp: None,
        }
    }

    /// Clear everything a previous verification attempt filled in.
    pub fn reset_metadata(&mut self) {
        self.title.clear();
        self.content.clear();
        self.author_name.clear();
        self.mention_type = MentionType::None;
        self.rsvp = None;
    }
}

/// One page of a moderation listing.
#[derive(Debug, Clone, Serialize)]
pub struct MentionPage {
    pub items: Vec<Mention>,
    pub total: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next: Option<String>,
}

/// Cap `content` at [`MAX_CONTENT_CHARS`] characters, ending in an ellipsis when cut.
pub fn truncate_content(content: &str) -> String {
    if content.chars().count() <= MAX_CONTENT_CHARS {
        return content.to_string();
    }
    let mut truncated: String = content.chars().take(MAX_CONTENT_CHARS - 3).collect();
    truncated.push('…');
    truncated
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_long_content() {
        let content = "a".repeat(600);
        let truncated = truncate_content(&content);
        assert_eq!(truncated.chars().count(), 498);
        assert!(truncated.starts_with(&"a".repeat(497)));
        assert!(truncated.ends_with('…'));
    }

    #[test]
    fn test_truncate_keeps_short_content() {
        assert_eq!(truncate_content("hello"), "hello");
        let exact = "b".repeat(500);
        assert_eq!(truncate_content(&exact), exact);
    }

    #[test]
    fn test_truncate_counts_characters_not_bytes() {
        let content = "ä".repeat(501);
        let truncated = truncate_content(&content);
        assert_eq!(truncated.chars().count(), 498);
    }

    #[test]
    fn test_status_round_trip_through_str() {
        for status in MentionStatus::ALL {
            assert_eq!(status.as_str().parse::<MentionStatus>(), Ok(status));
        }
        assert!("pending".parse::<MentionStatus>().is_err());
    }

    #[test]
    fn test_mention_json_shape() {
        let mut mention = Mention::new("https://a.example/post", "https://b.example/");
        mention.mention_type = MentionType::Rsvp;
        mention.rsvp = Some("yes".into());
        let json = serde_json::to_value(&mention).unwrap();
        assert_eq!(json["type"], "rsvp");
        assert_eq!(json["status"], "new");
        assert_eq!(json["rsvp"], "yes");
        assert!(json.get("author_name").is_none());
        assert!(json.get("verified_at").is_none());
    }
}
