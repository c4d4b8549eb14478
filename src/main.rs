// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Webmention Moderator Service
//!
//! ## Usage
//!
//! - `webmention-moderator serve`: run the receiver, the verification queue,
//!   the policy reloader and the moderation API.
//! - `webmention-moderator verify SOURCE TARGET`: verify a single mention and
//!   print what was extracted.
//! - `webmention-moderator send SOURCE [TARGET]`: send mentions for the links
//!   of a page.
//!
//! ## Configuration
//!
//! An optional TOML file (`--config`) overlaid with `WEBMENTION_*`
//! environment variables. A `.env` file is read first if present.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use webmention_moderator::{
    config::Config,
    db::Database,
    handlers::{router, AppState},
    mailer::{Notifier, SmtpMailer},
    metrics::MentionMetrics,
    models::Mention,
    outbox::Outbox,
    policy::PolicyRegistry,
    queue::VerificationQueue,
    shorteners::ShortenerRegistry,
    verifier::{HtmlVerifier, Verifier},
};

#[derive(Parser)]
#[command(name = "webmention-moderator", version, about = "Webmention verification and moderation")]
struct Cli {
    /// Configuration file (TOML)
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP service and background workers
    Serve,

    /// Verify that SOURCE links to TARGET
    Verify { source: String, target: String },

    /// Send Webmentions for the links of SOURCE
    Send {
        source: String,

        /// Only notify this target
        target: Option<String>,

        /// Skip discovery and use this endpoint
        #[arg(long)]
        endpoint: Option<String>,

        /// Exit with an error if any target failed
        #[arg(long)]
        fail: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer().json().with_writer(std::io::stderr))
        .with(
            EnvFilter::builder()
                .with_default_directive(Level::INFO.into())
                .from_env_lossy(),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref()).context("loading configuration")?;

    match cli.command {
        Command::Serve => serve(config).await,
        Command::Verify { source, target } => verify(config, source, target).await,
        Command::Send {
            source,
            target,
            endpoint,
            fail,
        } => send(config, source, target, endpoint, fail).await,
    }
}

async fn serve(config: Config) -> anyhow::Result<()> {
    info!(
        bind_addr = %config.bind_addr,
        database = %config.database,
        interval_secs = config.verification.interval_secs,
        default_policy = %config.policies.default_policy,
        "Starting Webmention moderator"
    );

    let db = Arc::new(Database::connect(&config.database).await?);
    let metrics = MentionMetrics::new()?;
    metrics.refresh_logged(db.as_ref()).await;

    let policies = Arc::new(PolicyRegistry::new(config.policies.default_policy));
    match policies.load(db.as_ref()).await {
        Ok(count) => info!(count, "Policies loaded"),
        Err(e) => warn!(error = %e, "Initial policy load failed"),
    }

    let shutdown = CancellationToken::new();
    let reloader = policies.clone().spawn_reloader(
        db.clone(),
        config.policies.reload_interval(),
        shutdown.clone(),
    );

    let shorteners = ShortenerRegistry::with_defaults(config.verification.fetch.fetch_timeout())?;
    let mut queue = VerificationQueue::new(
        db.clone(),
        Arc::new(HtmlVerifier::new(shorteners)),
        policies.clone(),
        metrics.clone(),
        config.verification.clone(),
    );
    if config.notifications.enabled {
        let mailer = SmtpMailer::new(&config.notifications.smtp)?;
        queue = queue.with_notifier(Notifier::new(
            Arc::new(mailer),
            &config.notifications,
            config.public_url.clone(),
        ));
    }
    let worker = queue.spawn(shutdown.clone());

    let outbox = Outbox::new(http_client(&config)?)
        .with_max_body_bytes(config.verification.fetch.max_body_bytes);
    let state = Arc::new(AppState::new(
        db,
        policies,
        metrics,
        outbox,
        config.clone(),
    ));
    let app = router(state);

    let addr: SocketAddr = config.bind_addr.parse()?;
    let listener = TcpListener::bind(addr).await?;
    info!(addr = %addr, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    shutdown.cancel();
    for handle in [worker, reloader] {
        if let Err(e) = handle.await {
            error!(error = %e, "Background task failed");
        }
    }
    info!("Shutdown complete");
    Ok(())
}

async fn verify(config: Config, source: String, target: String) -> anyhow::Result<()> {
    let options = &config.verification.fetch;
    let verifier = HtmlVerifier::new(ShortenerRegistry::with_defaults(options.fetch_timeout())?);
    let mut mention = Mention::new(source, target);
    verifier.verify(&mut mention, options).await?;
    println!("{}", serde_json::to_string_pretty(&mention)?);
    Ok(())
}

async fn send(
    config: Config,
    source: String,
    target: Option<String>,
    endpoint: Option<String>,
    fail: bool,
) -> anyhow::Result<()> {
    let outbox = Outbox::new(http_client(&config)?)
        .with_max_body_bytes(config.verification.fetch.max_body_bytes);
    let report = outbox
        .send_from_source(&source, target.as_deref(), endpoint.as_deref())
        .await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    if fail && report.failed() {
        anyhow::bail!("sending failed for at least one target");
    }
    Ok(())
}

fn http_client(config: &Config) -> anyhow::Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(config.verification.fetch.fetch_timeout())
        .user_agent(concat!("webmention-moderator/", env!("CARGO_PKG_VERSION")))
        .build()?)
}

/// Resolves on SIGINT, or SIGTERM on Unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received SIGINT, shutting down"),
        () = terminate => info!("Received SIGTERM, shutting down"),
    }
}
