// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Background verification of queued mentions.
//!
//! One mention is verified per tick, and never two at once: a tick that
//! finds the previous one still running is skipped.

use crate::config::VerificationConfig;
use crate::db::{MentionStore, StorageError};
use crate::mailer::Notifier;
use crate::metrics::MentionMetrics;
use crate::models::MentionStatus;
use crate::policy::{Policy, PolicyRegistry};
use crate::verifier::Verifier;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// What a single tick did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// Nothing eligible for verification.
    Idle,
    /// A verification was already in flight.
    Busy,
    Processed { id: String, status: MentionStatus },
    /// The mention was moderated or deleted while it was being verified;
    /// the result was dropped.
    Superseded { id: String },
}

#[derive(Clone)]
pub struct VerificationQueue {
    store: Arc<dyn MentionStore>,
    verifier: Arc<dyn Verifier>,
    policies: Arc<PolicyRegistry>,
    metrics: MentionMetrics,
    notifier: Option<Notifier>,
    config: VerificationConfig,
    in_flight: Arc<Mutex<()>>,
}

impl VerificationQueue {
    pub fn new(
        store: Arc<dyn MentionStore>,
        verifier: Arc<dyn Verifier>,
        policies: Arc<PolicyRegistry>,
        metrics: MentionMetrics,
        config: VerificationConfig,
    ) -> Self {
        Self {
            store,
            verifier,
            policies,
            metrics,
            notifier: None,
            config,
            in_flight: Arc::new(Mutex::new(())),
        }
    }

    pub fn with_notifier(mut self, notifier: Notifier) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Verify the oldest eligible mention, if any.
    ///
    /// Verification failures become the `invalid` status. Only storage
    /// failures are returned.
    pub async fn verify_next_mention(&self) -> Result<TickOutcome, StorageError> {
        let Ok(_guard) = self.in_flight.try_lock() else {
            debug!("Verification already in flight, skipping tick");
            return Ok(TickOutcome::Busy);
        };

        let stale_before = Utc::now()
            - chrono::Duration::from_std(self.config.timeout()).unwrap_or(chrono::Duration::zero());
        let Some(mut mention) = self.store.next_pending(stale_before).await? else {
            return Ok(TickOutcome::Idle);
        };

        debug!(id = %mention.id, source = %mention.source, "Verifying mention");
        let status = match self.verifier.verify(&mut mention, &self.config.fetch).await {
            Ok(()) => {
                if self.policies.determine_for_url(&mention.source).await == Policy::Approve {
                    info!(id = %mention.id, source = %mention.source, "Source auto-approved by policy");
                    MentionStatus::Approved
                } else {
                    MentionStatus::Verified
                }
            }
            Err(e) => {
                info!(id = %mention.id, source = %mention.source, error = %e, "Mention invalid");
                MentionStatus::Invalid
            }
        };
        mention.status = status;
        mention.verified_at = Some(Utc::now());
        if !self.store.save_verification(&mention).await? {
            debug!(id = %mention.id, "Mention changed during verification, result discarded");
            return Ok(TickOutcome::Superseded { id: mention.id });
        }

        info!(
            id = %mention.id,
            source = %mention.source,
            target = %mention.target,
            status = %status,
            "Mention verified"
        );
        self.metrics.refresh_logged(self.store.as_ref()).await;

        if let Some(notifier) = &self.notifier {
            if let Err(e) = notifier.mention_verified(&mention, status).await {
                warn!(id = %mention.id, error = %e, "Failed to send notification");
            }
        }

        Ok(TickOutcome::Processed {
            id: mention.id,
            status,
        })
    }

    /// Tick every `interval_secs` until `shutdown` fires.
    pub async fn run(&self, shutdown: CancellationToken) {
        let period = self.config.interval();
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        info!(interval = ?period, "Verification queue started");
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Verification queue stopped");
                    return;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.verify_next_mention().await {
                        error!(error = %e, "Verification tick failed");
                    }
                }
            }
        }
    }

    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(shutdown).await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::mailer::RecordingMailer;
    use crate::config::NotificationConfig;
    use crate::models::{Mention, MentionType};
    use crate::verifier::{VerificationError, VerifyOptions};
    use async_trait::async_trait;

    /// Accepts sources containing "good", filling in a title.
    struct FakeVerifier;

    #[async_trait]
    impl Verifier for FakeVerifier {
        async fn verify(
            &self,
            mention: &mut Mention,
            _options: &VerifyOptions,
        ) -> Result<(), VerificationError> {
            if mention.source.contains("good") {
                mention.title = "A reply".into();
                mention.mention_type = MentionType::Comment;
                Ok(())
            } else {
                Err(VerificationError::TargetNotFound)
            }
        }
    }

    /// Lets a moderator act on the mention while it is being fetched.
    struct ModeratingVerifier {
        db: Arc<Database>,
        delete: bool,
    }

    #[async_trait]
    impl Verifier for ModeratingVerifier {
        async fn verify(
            &self,
            mention: &mut Mention,
            _options: &VerifyOptions,
        ) -> Result<(), VerificationError> {
            if self.delete {
                self.db.delete(&mention.id).await.unwrap();
            } else {
                self.db
                    .update_status(&mention.id, MentionStatus::Rejected)
                    .await
                    .unwrap();
            }
            Ok(())
        }
    }

    async fn queue(policies: PolicyRegistry) -> (VerificationQueue, Arc<Database>, MentionMetrics) {
        let db = Arc::new(Database::connect("memory").await.unwrap());
        let metrics = MentionMetrics::new().unwrap();
        let queue = VerificationQueue::new(
            db.clone(),
            Arc::new(FakeVerifier),
            Arc::new(policies),
            metrics.clone(),
            VerificationConfig::default(),
        );
        (queue, db, metrics)
    }

    async fn stored(db: &Database, id: &str) -> Mention {
        let (items, _) = db.list(None, 100, 0).await.unwrap();
        items.into_iter().find(|m| m.id == id).unwrap()
    }

    #[tokio::test]
    async fn test_idle_when_empty() {
        let (q, _, _) = queue(PolicyRegistry::new(Policy::Default)).await;
        assert_eq!(q.verify_next_mention().await.unwrap(), TickOutcome::Idle);
    }

    #[tokio::test]
    async fn test_success_marks_verified_and_stores_metadata() {
        let (q, db, metrics) = queue(PolicyRegistry::new(Policy::Default)).await;
        let m = Mention::new("https://good.example/reply", "https://t.example/");
        db.insert_or_reset(&m).await.unwrap();

        let outcome = q.verify_next_mention().await.unwrap();
        assert_eq!(
            outcome,
            TickOutcome::Processed {
                id: m.id.clone(),
                status: MentionStatus::Verified
            }
        );
        let saved = stored(&db, &m.id).await;
        assert_eq!(saved.status, MentionStatus::Verified);
        assert_eq!(saved.title, "A reply");
        assert_eq!(saved.mention_type, MentionType::Comment);
        assert!(saved.verified_at.is_some());
        assert_eq!(metrics.count(MentionStatus::Verified), 1);

        assert_eq!(q.verify_next_mention().await.unwrap(), TickOutcome::Idle);
    }

    #[tokio::test]
    async fn test_failure_marks_invalid() {
        let (q, db, _) = queue(PolicyRegistry::new(Policy::Approve)).await;
        let m = Mention::new("https://bad.example/post", "https://t.example/");
        db.insert_or_reset(&m).await.unwrap();

        q.verify_next_mention().await.unwrap();
        assert_eq!(stored(&db, &m.id).await.status, MentionStatus::Invalid);
    }

    #[tokio::test]
    async fn test_approve_policy_upgrades_status() {
        let registry = PolicyRegistry::new(Policy::Default);
        registry
            .add_policy(r"^https://good\.example/", Policy::Approve, 0)
            .await
            .unwrap();
        let (q, db, _) = queue(registry).await;
        let m = Mention::new("https://good.example/reply", "https://t.example/");
        db.insert_or_reset(&m).await.unwrap();

        q.verify_next_mention().await.unwrap();
        assert_eq!(stored(&db, &m.id).await.status, MentionStatus::Approved);
    }

    #[tokio::test]
    async fn test_reject_policy_leaves_verified() {
        let registry = PolicyRegistry::new(Policy::Reject);
        let (q, db, _) = queue(registry).await;
        let m = Mention::new("https://good.example/reply", "https://t.example/");
        db.insert_or_reset(&m).await.unwrap();

        q.verify_next_mention().await.unwrap();
        assert_eq!(stored(&db, &m.id).await.status, MentionStatus::Verified);
    }

    #[tokio::test]
    async fn test_oldest_first() {
        let (q, db, _) = queue(PolicyRegistry::new(Policy::Default)).await;
        let mut older = Mention::new("https://good.example/1", "https://t.example/");
        older.created_at = Utc::now() - chrono::Duration::minutes(5);
        let newer = Mention::new("https://good.example/2", "https://t.example/");
        db.insert_or_reset(&newer).await.unwrap();
        db.insert_or_reset(&older).await.unwrap();

        match q.verify_next_mention().await.unwrap() {
            TickOutcome::Processed { id, .. } => assert_eq!(id, older.id),
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_busy_when_in_flight() {
        let (q, _, _) = queue(PolicyRegistry::new(Policy::Default)).await;
        let _held = q.in_flight.lock().await;
        assert_eq!(q.verify_next_mention().await.unwrap(), TickOutcome::Busy);
    }

    #[tokio::test]
    async fn test_notification_after_verification() {
        let (q, db, _) = queue(PolicyRegistry::new(Policy::Default)).await;
        let mailer = RecordingMailer::new();
        let config = NotificationConfig {
            enabled: true,
            mail_from: "noreply@example.org".into(),
            admin_emails: vec!["admin@example.org".into()],
            ..NotificationConfig::default()
        };
        let q = q.with_notifier(Notifier::new(
            Arc::new(mailer.clone()),
            &config,
            "https://example.org",
        ));
        db.insert_or_reset(&Mention::new("https://bad.example/", "https://t.example/"))
            .await
            .unwrap();

        q.verify_next_mention().await.unwrap();
        let sent = mailer.sent();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].body.contains("New status: invalid"));
    }

    #[tokio::test]
    async fn test_moderation_during_verification_wins() {
        let db = Arc::new(Database::connect("memory").await.unwrap());
        let registry = PolicyRegistry::new(Policy::Default);
        registry.add_policy(".*", Policy::Approve, 0).await.unwrap();
        let mailer = RecordingMailer::new();
        let config = NotificationConfig {
            enabled: true,
            mail_from: "noreply@example.org".into(),
            admin_emails: vec!["admin@example.org".into()],
            ..NotificationConfig::default()
        };
        let q = VerificationQueue::new(
            db.clone(),
            Arc::new(ModeratingVerifier {
                db: db.clone(),
                delete: false,
            }),
            Arc::new(registry),
            MentionMetrics::new().unwrap(),
            VerificationConfig::default(),
        )
        .with_notifier(Notifier::new(
            Arc::new(mailer.clone()),
            &config,
            "https://example.org",
        ));
        let m = Mention::new("https://good.example/reply", "https://t.example/");
        db.insert_or_reset(&m).await.unwrap();

        assert_eq!(
            q.verify_next_mention().await.unwrap(),
            TickOutcome::Superseded { id: m.id.clone() }
        );
        let saved = stored(&db, &m.id).await;
        assert_eq!(saved.status, MentionStatus::Rejected);
        assert!(saved.verified_at.is_none());
        assert!(mailer.sent().is_empty());
        assert_eq!(q.verify_next_mention().await.unwrap(), TickOutcome::Idle);
    }

    #[tokio::test]
    async fn test_deleted_during_verification_is_not_recreated() {
        let db = Arc::new(Database::connect("memory").await.unwrap());
        let q = VerificationQueue::new(
            db.clone(),
            Arc::new(ModeratingVerifier {
                db: db.clone(),
                delete: true,
            }),
            Arc::new(PolicyRegistry::new(Policy::Default)),
            MentionMetrics::new().unwrap(),
            VerificationConfig::default(),
        );
        let m = Mention::new("https://good.example/reply", "https://t.example/");
        db.insert_or_reset(&m).await.unwrap();

        assert_eq!(
            q.verify_next_mention().await.unwrap(),
            TickOutcome::Superseded { id: m.id.clone() }
        );
        let (items, total) = db.list(None, 10, 0).await.unwrap();
        assert!(items.is_empty());
        assert_eq!(total, 0);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let (q, _, _) = queue(PolicyRegistry::new(Policy::Default)).await;
        let shutdown = CancellationToken::new();
        let handle = q.spawn(shutdown.clone());
        shutdown.cancel();
        tokio::time::timeout(std::time::Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
