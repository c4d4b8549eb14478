// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: Apache-2.0

//! Shared fixtures for integration tests.
//!
//! Remote sites are axum routers served on an ephemeral local port, and the
//! service itself is built on the in-memory database.

#![allow(dead_code)]

use axum::Router;
use std::sync::Arc;
use tokio::net::TcpListener;
use webmention_moderator::{
    config::Config,
    db::Database,
    handlers::AppState,
    metrics::MentionMetrics,
    outbox::Outbox,
    policy::PolicyRegistry,
};

pub const FORM: &str = "application/x-www-form-urlencoded";
pub const ACCESS_KEY: &str = "test-key";

/// A fixture site listening on `127.0.0.1`.
pub struct Site {
    pub base: String,
}

impl Site {
    /// Absolute URL for `path` on this site.
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }
}

/// Serve `app` on an ephemeral port for the rest of the test.
pub async fn serve(app: Router) -> Site {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    Site {
        base: format!("http://{addr}"),
    }
}

/// Wrap `body` in a minimal HTML page.
pub fn page(title: &str, body: &str) -> String {
    format!("<!doctype html><html><head><title>{title}</title></head><body>{body}</body></html>")
}

/// Configuration with the moderation API enabled.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.manage.access_keys = vec![ACCESS_KEY.to_string()];
    config
}

pub struct TestApp {
    pub state: Arc<AppState>,
    pub db: Arc<Database>,
    pub policies: Arc<PolicyRegistry>,
    pub metrics: MentionMetrics,
}

pub async fn test_app(config: Config) -> TestApp {
    let db = Arc::new(Database::connect("memory").await.unwrap());
    let policies = Arc::new(PolicyRegistry::new(config.policies.default_policy));
    let metrics = MentionMetrics::new().unwrap();
    let state = Arc::new(AppState::new(
        db.clone(),
        policies.clone(),
        metrics.clone(),
        Outbox::new(reqwest::Client::new()),
        config,
    ));
    TestApp {
        state,
        db,
        policies,
        metrics,
    }
}
