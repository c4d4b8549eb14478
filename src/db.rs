// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! SurrealDB storage for mentions and URL policies.
//!
//! Timestamps are stored as Unix milliseconds. A `verified_at` of `0` marks a
//! mention that has never been through verification, which keeps the
//! staleness check a plain integer comparison.

use crate::models::{Mention, MentionStatus, MentionType};
use crate::policy::{PolicyError, PolicyLoader, PolicyRecord, UrlPolicy};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use surrealdb::{
    engine::local::{Db, Mem},
    Surreal,
};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] surrealdb::Error),

    #[error("Corrupt row {id}: {reason}")]
    Corrupt { id: String, reason: String },

    #[error("Unsupported database location: {0}")]
    Unsupported(String),
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// What happened to a received `(source, target)` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiveOutcome {
    /// A new mention row was created.
    Created(String),
    /// An existing row for the pair was set back to `new`.
    Reset(String),
}

impl ReceiveOutcome {
    pub fn id(&self) -> &str {
        match self {
            ReceiveOutcome::Created(id) | ReceiveOutcome::Reset(id) => id,
        }
    }
}

/// Persistence needed by the receiver, the verification queue and moderation.
#[async_trait]
pub trait MentionStore: Send + Sync {
    /// Insert `mention` with status `new`, or reset the existing row for the
    /// same source and target to `new`.
    async fn insert_or_reset(&self, mention: &Mention) -> Result<ReceiveOutcome>;

    /// Oldest `new` mention whose last verification attempt happened before
    /// `stale_before`. Never-verified mentions always qualify.
    async fn next_pending(&self, stale_before: DateTime<Utc>) -> Result<Option<Mention>>;

    /// Write status, `verified_at` and all extracted metadata in one update,
    /// provided the row is still `new`. Returns `false` when the row was
    /// moderated or deleted in the meantime and nothing was written.
    async fn save_verification(&self, mention: &Mention) -> Result<bool>;

    /// Newest first, optionally filtered by status, with the unpaged total.
    async fn list(
        &self,
        status: Option<MentionStatus>,
        limit: u32,
        offset: u32,
    ) -> Result<(Vec<Mention>, u64)>;

    /// Approved mentions of `target`, oldest first.
    async fn approved_for_target(&self, target: &str) -> Result<Vec<Mention>>;

    async fn update_status(&self, id: &str, status: MentionStatus) -> Result<bool>;

    async fn delete(&self, id: &str) -> Result<bool>;

    async fn count_by_status(&self) -> Result<HashMap<MentionStatus, u64>>;
}

/// Persistence for moderator-managed URL policies.
#[async_trait]
pub trait PolicyStore: Send + Sync {
    /// All policies ordered by ascending weight.
    async fn list_policies(&self) -> Result<Vec<PolicyRecord>>;
    async fn insert_policy(&self, policy: &PolicyRecord) -> Result<()>;
    async fn delete_policy(&self, id: &str) -> Result<bool>;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
struct MentionRow {
    mention_id: String,
    source: String,
    target: String,
    status: String,
    created_at: i64,
    verified_at: i64,
    title: String,
    content: String,
    author_name: String,
    mention_type: String,
    rsvp: String,
}

impl From<&Mention> for MentionRow {
    fn from(m: &Mention) -> Self {
        Self {
            mention_id: m.id.clone(),
            source: m.source.clone(),
            target: m.target.clone(),
            status: m.status.as_str().to_string(),
            created_at: m.created_at.timestamp_millis(),
            verified_at: m.verified_at.map(|t| t.timestamp_millis()).unwrap_or(0),
            title: m.title.clone(),
            content: m.content.clone(),
            author_name: m.author_name.clone(),
            mention_type: m.mention_type.as_str().to_string(),
            rsvp: m.rsvp.clone().unwrap_or_default(),
        }
    }
}

impl TryFrom<MentionRow> for Mention {
    type Error = StorageError;

    fn try_from(row: MentionRow) -> Result<Self> {
        let corrupt = |reason: String| StorageError::Corrupt {
            id: row.mention_id.clone(),
            reason,
        };
        let status = row
            .status
            .parse::<MentionStatus>()
            .map_err(|e| corrupt(e.to_string()))?;
        let mention_type = row
            .mention_type
            .parse::<MentionType>()
            .map_err(|e| corrupt(e.to_string()))?;
        let created_at = Utc
            .timestamp_millis_opt(row.created_at)
            .single()
            .ok_or_else(|| corrupt(format!("bad created_at {}", row.created_at)))?;
        let verified_at = match row.verified_at {
            0 => None,
            ms => Some(
                Utc.timestamp_millis_opt(ms)
                    .single()
                    .ok_or_else(|| corrupt(format!("bad verified_at {ms}")))?,
            ),
        };
        Ok(Mention {
            id: row.mention_id,
            source: row.source,
            target: row.target,
            status,
            created_at,
            verified_at,
            title: row.title,
            content: row.content,
            author_name: row.author_name,
            mention_type,
            rsvp: Some(row.rsvp).filter(|r| !r.is_empty()),
        })
    }
}

#[derive(Debug, Deserialize)]
struct StatusCount {
    status: String,
    total: i64,
}

#[derive(Debug, Serialize, Deserialize)]
struct PolicyRow {
    policy_id: String,
    url_pattern: String,
    policy: crate::policy::Policy,
    weight: i32,
}

fn into_mentions(rows: Vec<MentionRow>) -> Result<Vec<Mention>> {
    rows.into_iter().map(Mention::try_from).collect()
}

/// Database connection wrapper
#[derive(Clone)]
pub struct Database {
    db: Surreal<Db>,
}

impl Database {
    /// Connect to SurrealDB. `"memory"` selects the in-memory engine, any
    /// other value is a RocksDB path and needs the `rocksdb` feature.
    pub async fn connect(path: &str) -> Result<Self> {
        let db = if path == "memory" {
            Surreal::new::<Mem>(()).await?
        } else {
            Self::open_file(path).await?
        };

        db.use_ns("indieweb2").use_db("webmentions").await?;
        Self::init_schema(&db).await?;
        info!(path = %path, "Database ready");

        Ok(Self { db })
    }

    #[cfg(feature = "rocksdb")]
    async fn open_file(path: &str) -> Result<Surreal<Db>> {
        Ok(Surreal::new::<surrealdb::engine::local::RocksDb>(path).await?)
    }

    #[cfg(not(feature = "rocksdb"))]
    async fn open_file(path: &str) -> Result<Surreal<Db>> {
        Err(StorageError::Unsupported(format!(
            "{path} (built without the rocksdb feature)"
        )))
    }

    async fn init_schema(db: &Surreal<Db>) -> Result<()> {
        db.query(
            r#"
            DEFINE TABLE webmentions SCHEMALESS;
            DEFINE INDEX pair_idx ON webmentions COLUMNS source, target UNIQUE;
            DEFINE INDEX mention_id_idx ON webmentions COLUMNS mention_id UNIQUE;
            DEFINE INDEX status_idx ON webmentions COLUMNS status;

            DEFINE TABLE url_policies SCHEMALESS;
            DEFINE INDEX policy_id_idx ON url_policies COLUMNS policy_id UNIQUE;
        "#,
        )
        .await?
        .check()?;
        Ok(())
    }

    async fn reset_pair(&self, source: &str, target: &str) -> Result<Option<String>> {
        let mut result = self
            .db
            .query(
                "UPDATE webmentions SET status = 'new' \
                 WHERE source = $source AND target = $target RETURN AFTER",
            )
            .bind(("source", source.to_string()))
            .bind(("target", target.to_string()))
            .await?;
        let rows: Vec<MentionRow> = result.take(0)?;
        Ok(rows.into_iter().next().map(|r| r.mention_id))
    }

    async fn count(&self, status: Option<MentionStatus>) -> Result<u64> {
        let mut result = match status {
            Some(status) => {
                self.db
                    .query("SELECT count() AS total FROM webmentions WHERE status = $status GROUP ALL")
                    .bind(("status", status.as_str()))
                    .await?
            }
            None => {
                self.db
                    .query("SELECT count() AS total FROM webmentions GROUP ALL")
                    .await?
            }
        };
        let total: Option<i64> = result.take("total")?;
        Ok(total.unwrap_or(0).max(0) as u64)
    }
}

#[async_trait]
impl MentionStore for Database {
    async fn insert_or_reset(&self, mention: &Mention) -> Result<ReceiveOutcome> {
        if let Some(id) = self.reset_pair(&mention.source, &mention.target).await? {
            debug!(id = %id, "Existing mention reset to new");
            return Ok(ReceiveOutcome::Reset(id));
        }

        let mut row = MentionRow::from(mention);
        row.status = MentionStatus::New.as_str().to_string();
        let mut result = self
            .db
            .query("CREATE webmentions CONTENT $row")
            .bind(("row", row))
            .await?;
        let created: std::result::Result<Vec<MentionRow>, surrealdb::Error> = result.take(0);
        match created {
            Ok(_) => Ok(ReceiveOutcome::Created(mention.id.clone())),
            // Lost a race against a concurrent insert of the same pair.
            Err(e) => match self.reset_pair(&mention.source, &mention.target).await? {
                Some(id) => Ok(ReceiveOutcome::Reset(id)),
                None => Err(e.into()),
            },
        }
    }

    async fn next_pending(&self, stale_before: DateTime<Utc>) -> Result<Option<Mention>> {
        let mut result = self
            .db
            .query(
                "SELECT * FROM webmentions \
                 WHERE status = 'new' AND verified_at < $cutoff \
                 ORDER BY created_at ASC LIMIT 1",
            )
            .bind(("cutoff", stale_before.timestamp_millis()))
            .await?;
        let rows: Vec<MentionRow> = result.take(0)?;
        rows.into_iter().next().map(Mention::try_from).transpose()
    }

    async fn save_verification(&self, mention: &Mention) -> Result<bool> {
        let row = MentionRow::from(mention);
        let mut result = self
            .db
            .query(
                "UPDATE webmentions SET status = $status, verified_at = $verified_at, \
                 title = $title, content = $content, author_name = $author_name, \
                 mention_type = $mention_type, rsvp = $rsvp \
                 WHERE mention_id = $id AND status = 'new' RETURN AFTER",
            )
            .bind(("status", row.status))
            .bind(("verified_at", row.verified_at))
            .bind(("title", row.title))
            .bind(("content", row.content))
            .bind(("author_name", row.author_name))
            .bind(("mention_type", row.mention_type))
            .bind(("rsvp", row.rsvp))
            .bind(("id", row.mention_id))
            .await?;
        let rows: Vec<MentionRow> = result.take(0)?;
        Ok(!rows.is_empty())
    }

    async fn list(
        &self,
        status: Option<MentionStatus>,
        limit: u32,
        offset: u32,
    ) -> Result<(Vec<Mention>, u64)> {
        let filter = if status.is_some() {
            " WHERE status = $status"
        } else {
            ""
        };
        let query = format!(
            "SELECT * FROM webmentions{filter} ORDER BY created_at DESC LIMIT {limit} START {offset}"
        );
        let mut request = self.db.query(query);
        if let Some(status) = status {
            request = request.bind(("status", status.as_str()));
        }
        let rows: Vec<MentionRow> = request.await?.take(0)?;
        let total = self.count(status).await?;
        Ok((into_mentions(rows)?, total))
    }

    async fn approved_for_target(&self, target: &str) -> Result<Vec<Mention>> {
        let mut result = self
            .db
            .query(
                "SELECT * FROM webmentions WHERE target = $target AND status = 'approved' \
                 ORDER BY created_at ASC",
            )
            .bind(("target", target.to_string()))
            .await?;
        into_mentions(result.take(0)?)
    }

    async fn update_status(&self, id: &str, status: MentionStatus) -> Result<bool> {
        let mut result = self
            .db
            .query("UPDATE webmentions SET status = $status WHERE mention_id = $id RETURN AFTER")
            .bind(("status", status.as_str()))
            .bind(("id", id.to_string()))
            .await?;
        let rows: Vec<MentionRow> = result.take(0)?;
        Ok(!rows.is_empty())
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let mut result = self
            .db
            .query("DELETE webmentions WHERE mention_id = $id RETURN BEFORE")
            .bind(("id", id.to_string()))
            .await?;
        let rows: Vec<MentionRow> = result.take(0)?;
        Ok(!rows.is_empty())
    }

    async fn count_by_status(&self) -> Result<HashMap<MentionStatus, u64>> {
        let mut result = self
            .db
            .query("SELECT status, count() AS total FROM webmentions GROUP BY status")
            .await?;
        let rows: Vec<StatusCount> = result.take(0)?;
        let mut counts: HashMap<MentionStatus, u64> =
            MentionStatus::ALL.into_iter().map(|s| (s, 0)).collect();
        for row in rows {
            let status = row.status.parse().map_err(|_| StorageError::Corrupt {
                id: "webmentions".into(),
                reason: format!("unknown status {}", row.status),
            })?;
            counts.insert(status, row.total.max(0) as u64);
        }
        Ok(counts)
    }
}

#[async_trait]
impl PolicyStore for Database {
    async fn list_policies(&self) -> Result<Vec<PolicyRecord>> {
        let mut result = self
            .db
            .query("SELECT * FROM url_policies ORDER BY weight ASC")
            .await?;
        let rows: Vec<PolicyRow> = result.take(0)?;
        Ok(rows
            .into_iter()
            .map(|row| PolicyRecord {
                id: row.policy_id,
                url_pattern: row.url_pattern,
                policy: row.policy,
                weight: row.weight,
            })
            .collect())
    }

    async fn insert_policy(&self, policy: &PolicyRecord) -> Result<()> {
        let row = PolicyRow {
            policy_id: policy.id.clone(),
            url_pattern: policy.url_pattern.clone(),
            policy: policy.policy,
            weight: policy.weight,
        };
        let mut result = self
            .db
            .query("CREATE url_policies CONTENT $row")
            .bind(("row", row))
            .await?;
        let _: Vec<PolicyRow> = result.take(0)?;
        Ok(())
    }

    async fn delete_policy(&self, id: &str) -> Result<bool> {
        let mut result = self
            .db
            .query("DELETE url_policies WHERE policy_id = $id RETURN BEFORE")
            .bind(("id", id.to_string()))
            .await?;
        let rows: Vec<PolicyRow> = result.take(0)?;
        Ok(!rows.is_empty())
    }
}

#[async_trait]
impl PolicyLoader for Database {
    async fn load(&self) -> std::result::Result<Vec<UrlPolicy>, PolicyError> {
        let records = self
            .list_policies()
            .await
            .map_err(|e| PolicyError::Load(e.to_string()))?;
        records.into_iter().map(UrlPolicy::try_from).collect()
    }
}
