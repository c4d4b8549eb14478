// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Webmention Moderator
//!
//! Receives Webmentions, verifies them in the background and applies URL
//! policies to decide which ones are published:
//!
//! - Submission validation and queueing (`receiver`)
//! - Source fetching, link containment and microformats extraction (`verifier`)
//! - Regex URL policies with periodic reload (`policy`)
//! - One-at-a-time background verification (`queue`)
//! - Outbound endpoint discovery and sending (`discovery`, `sender`, `outbox`)
//! - Moderation API, metrics and notification mail

pub mod config;
pub mod db;
pub mod discovery;
pub mod document;
pub mod error;
pub mod handlers;
pub mod mailer;
pub mod metrics;
pub mod microformats;
pub mod models;
pub mod outbox;
pub mod policy;
pub mod queue;
pub mod receiver;
pub mod sender;
pub mod shorteners;
pub mod verifier;

pub use config::Config;
pub use db::{Database, MentionStore, PolicyStore};
pub use models::{Mention, MentionStatus, MentionType, Webmention};
pub use policy::{Policy, PolicyRegistry};
pub use queue::VerificationQueue;
pub use receiver::{Receiver, ValidationError};
pub use verifier::{HtmlVerifier, Verifier, VerifyOptions};
