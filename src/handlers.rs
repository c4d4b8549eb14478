// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! HTTP handlers for the Webmention moderation service.
//!
//! Public routes accept submissions and serve approved mentions. The
//! `/manage` routes are for moderators and require a bearer access key.

use crate::config::Config;
use crate::db::{MentionStore, PolicyStore};
use crate::error::{AppError, Result};
use crate::metrics::MentionMetrics;
use crate::models::{Mention, MentionPage, MentionStatus};
use crate::outbox::{Outbox, SendReport};
use crate::policy::{Policy, PolicyLoader, PolicyRecord, PolicyRegistry, UrlPolicy};
use crate::receiver::{AllowHosts, Receipt, Receiver, ValidationError};
use axum::{
    body::Bytes,
    extract::{Path, Query, Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};
use uuid::Uuid;

const DEFAULT_PAGE_SIZE: u32 = 50;
const MAX_PAGE_SIZE: u32 = 500;

/// Shared application state.
pub struct AppState {
    pub mentions: Arc<dyn MentionStore>,
    pub policy_store: Arc<dyn PolicyStore>,
    pub policy_loader: Arc<dyn PolicyLoader>,
    pub policies: Arc<PolicyRegistry>,
    pub receiver: Receiver,
    pub metrics: MentionMetrics,
    pub outbox: Outbox,
    pub config: Config,
}

impl AppState {
    /// Wire state around a single backend serving mentions and policies.
    pub fn new<S>(
        store: Arc<S>,
        policies: Arc<PolicyRegistry>,
        metrics: MentionMetrics,
        outbox: Outbox,
        config: Config,
    ) -> Self
    where
        S: MentionStore + PolicyStore + PolicyLoader + 'static,
    {
        let targets = AllowHosts::new(&config.receiver.allowed_target_hosts);
        if targets.is_unrestricted() {
            warn!("No allowed target hosts configured, accepting mentions of any host");
        }
        let receiver = Receiver::new(
            store.clone(),
            metrics.clone(),
            Arc::new(targets),
            &config.receiver,
        );
        Self {
            mentions: store.clone(),
            policy_store: store.clone(),
            policy_loader: store,
            policies,
            receiver,
            metrics,
            outbox,
            config,
        }
    }
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub version: &'static str,
}

#[derive(Debug, Deserialize)]
pub struct TargetQuery {
    #[serde(default)]
    pub target: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub limit: Option<u32>,
    #[serde(default)]
    pub offset: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct NewPolicy {
    pub url_pattern: String,
    pub policy: Policy,
    #[serde(default)]
    pub weight: i32,
}

#[derive(Debug, Deserialize)]
pub struct SendRequest {
    pub source: String,
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub endpoint: Option<String>,
}

/// Build the application router.
pub fn router(state: Arc<AppState>) -> Router {
    let mut app = Router::new()
        .route("/health", get(health))
        .route("/healthz", get(health))
        .route("/receive", post(receive))
        .route("/get", get(approved_for_target));

    if state.config.metrics.enabled {
        app = app.route(&state.config.metrics.path, get(metrics));
    }
    if state.config.manage.access_keys.is_empty() {
        info!("No access keys configured, moderation API disabled");
    } else {
        app = app.nest("/manage", manage_router(state.clone()));
    }

    app.layer(TraceLayer::new_for_http()).with_state(state)
}

fn manage_router(state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route("/mentions", get(list_mentions))
        .route("/mentions/{id}", delete(delete_mention))
        .route("/mentions/{id}/approve", post(approve_mention))
        .route("/mentions/{id}/reject", post(reject_mention))
        .route("/policies", get(list_policies).post(create_policy))
        .route("/policies/{id}", delete(delete_policy))
        .route("/send", post(send))
        .route_layer(middleware::from_fn_with_state(state, require_access_key))
}

/// Health check endpoint.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        service: "webmention-moderator",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Accept a form-encoded Webmention and queue it for verification.
pub async fn receive(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<Receipt>)> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok());
    let receipt = state.receiver.receive(content_type, &body).await?;
    Ok((StatusCode::ACCEPTED, Json(receipt)))
}

/// Approved mentions of a target, oldest first.
pub async fn approved_for_target(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TargetQuery>,
) -> Result<Json<Vec<Mention>>> {
    let target = query
        .target
        .filter(|t| !t.trim().is_empty())
        .ok_or(ValidationError::MissingParameter("target"))?;
    let mentions = state.mentions.approved_for_target(&target).await?;
    debug!(target = %target, count = mentions.len(), "Serving approved mentions");
    Ok(Json(mentions))
}

pub async fn metrics(State(state): State<Arc<AppState>>) -> Result<Response> {
    let body = state
        .metrics
        .render()
        .map_err(|e| AppError::Internal(e.to_string()))?;
    Ok((
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    )
        .into_response())
}

async fn require_access_key(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response> {
    let presented = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim);
    match presented {
        Some(key) if state.config.manage.access_keys.iter().any(|k| k == key) => {
            Ok(next.run(request).await)
        }
        _ => {
            debug!(path = %request.uri().path(), "Rejected moderation request");
            Err(AppError::Unauthorized)
        }
    }
}

pub async fn list_mentions(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<MentionPage>> {
    let status = match query.status.as_deref().filter(|s| !s.is_empty()) {
        Some(s) => Some(
            s.parse::<MentionStatus>()
                .map_err(|e| AppError::BadRequest(e.to_string()))?,
        ),
        None => None,
    };
    let limit = match query.limit {
        None | Some(0) => DEFAULT_PAGE_SIZE,
        Some(n) => n.min(MAX_PAGE_SIZE),
    };
    let offset = query.offset.unwrap_or(0);

    let (items, total) = state.mentions.list(status, limit, offset).await?;
    let seen = u64::from(offset) + items.len() as u64;
    let next = (seen < total).then(|| {
        let mut params = url::form_urlencoded::Serializer::new(String::new());
        if let Some(status) = status {
            params.append_pair("status", status.as_str());
        }
        params.append_pair("limit", &limit.to_string());
        params.append_pair("offset", &seen.to_string());
        format!("/manage/mentions?{}", params.finish())
    });

    Ok(Json(MentionPage { items, total, next }))
}

pub async fn approve_mention(
    state: State<Arc<AppState>>,
    id: Path<String>,
) -> Result<StatusCode> {
    moderate(state, id, MentionStatus::Approved).await
}

pub async fn reject_mention(
    state: State<Arc<AppState>>,
    id: Path<String>,
) -> Result<StatusCode> {
    moderate(state, id, MentionStatus::Rejected).await
}

async fn moderate(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    status: MentionStatus,
) -> Result<StatusCode> {
    if !state.mentions.update_status(&id, status).await? {
        return Err(AppError::NotFound(format!("mention {id}")));
    }
    info!(id = %id, status = %status, "Mention moderated");
    state.metrics.refresh_logged(state.mentions.as_ref()).await;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn delete_mention(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    if !state.mentions.delete(&id).await? {
        return Err(AppError::NotFound(format!("mention {id}")));
    }
    info!(id = %id, "Mention deleted");
    state.metrics.refresh_logged(state.mentions.as_ref()).await;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_policies(State(state): State<Arc<AppState>>) -> Result<Json<Vec<PolicyRecord>>> {
    Ok(Json(state.policy_store.list_policies().await?))
}

pub async fn create_policy(
    State(state): State<Arc<AppState>>,
    Json(req): Json<NewPolicy>,
) -> Result<(StatusCode, Json<PolicyRecord>)> {
    if req.policy == Policy::Default {
        return Err(AppError::BadRequest(
            "policy must be approve or reject".to_string(),
        ));
    }
    let rule = UrlPolicy::new(
        Uuid::new_v4().to_string(),
        &req.url_pattern,
        req.policy,
        req.weight,
    )?;
    let record = rule.record();
    state.policy_store.insert_policy(&record).await?;
    info!(id = %record.id, pattern = %record.url_pattern, policy = %record.policy, "Policy created");
    reload_policies(&state).await;
    Ok((StatusCode::CREATED, Json(record)))
}

pub async fn delete_policy(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    if !state.policy_store.delete_policy(&id).await? {
        return Err(AppError::NotFound(format!("policy {id}")));
    }
    state.policies.remove_policy(&id).await;
    info!(id = %id, "Policy deleted");
    reload_policies(&state).await;
    Ok(StatusCode::NO_CONTENT)
}

async fn reload_policies(state: &AppState) {
    if let Err(e) = state.policies.load(state.policy_loader.as_ref()).await {
        warn!(error = %e, "Failed to reload policies after change");
    }
}

pub async fn send(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SendRequest>,
) -> Result<(StatusCode, Json<SendReport>)> {
    let report = state
        .outbox
        .send_from_source(&req.source, req.target.as_deref(), req.endpoint.as_deref())
        .await?;
    let status = if report.failed() {
        StatusCode::INTERNAL_SERVER_ERROR
    } else {
        StatusCode::OK
    };
    Ok((status, Json(report)))
}
