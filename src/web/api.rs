use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Form, Json, Router,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode, header},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
};
use questforge_common::Adventure;
use serde::Deserialize;
use tracing::{info, warn};
use uuid::Uuid;

use super::history::render_html;
use super::limit::{ClientKey, RequestLimiter};
use super::registry::SessionRegistry;
use super::runner;
use super::ws::{SESSION_COOKIE, SESSION_HEADER, session_id_from_headers};
use crate::client::TextGenerator;
use crate::config::{GenerationConfig, ServerSettings};
use crate::errors::SessionError;

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub registry: Arc<SessionRegistry>,
    pub limiter: RequestLimiter,
    pub generator: Arc<dyn TextGenerator>,
    pub generation: GenerationConfig,
    pub outputs_dir: PathBuf,
    pub linger: Duration,
}

impl AppState {
    pub fn new(
        settings: &ServerSettings,
        generation: GenerationConfig,
        generator: Arc<dyn TextGenerator>,
    ) -> Self {
        Self {
            registry: Arc::new(SessionRegistry::from_settings(settings)),
            limiter: RequestLimiter::from_config(&settings.rate_limit),
            generator,
            generation,
            outputs_dir: settings.outputs_dir.clone(),
            linger: settings.linger(),
        }
    }
}

pub type SharedState = Arc<AppState>;

// ── Request payload types ─────────────────────────────────────────────

#[derive(Deserialize)]
pub struct GenerateForm {
    #[serde(default)]
    pub prompt: String,
    pub setting: Option<String>,
    pub style: Option<String>,
}

#[derive(Deserialize)]
pub struct MessagesQuery {
    pub format: Option<String>,
}

// ── Error handling ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    TooManyRequests(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::TooManyRequests(msg) => (StatusCode::TOO_MANY_REQUESTS, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(serde_json::json!({"error": message}))).into_response()
    }
}

impl From<SessionError> for ApiError {
    fn from(e: SessionError) -> Self {
        match e {
            SessionError::InvalidId(_) => ApiError::BadRequest(e.to_string()),
            SessionError::NotFound(_) => ApiError::NotFound(e.to_string()),
            SessionError::AlreadyActive(_) => ApiError::Internal(e.to_string()),
        }
    }
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/generate", post(generate))
        .route("/api/messages/{session_id}", get(messages))
        .route("/api/session", get(current_session))
        .route("/api/sessions/{session_id}", get(session_status))
        .route("/health", get(health))
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn generate(
    State(state): State<SharedState>,
    ClientKey(client): ClientKey,
    Form(form): Form<GenerateForm>,
) -> Result<Response, ApiError> {
    let prompt = form.prompt.trim();
    if prompt.is_empty() {
        return Err(ApiError::BadRequest("prompt is required".into()));
    }
    if !state.limiter.check(&client) {
        warn!(client = %client, "generation request rejected by rate limit");
        return Err(ApiError::TooManyRequests(
            "too many generation requests, try again later".into(),
        ));
    }

    let session_id = Uuid::new_v4().to_string();
    let progress = state.registry.create(&session_id)?;
    let adventure = Adventure::new(prompt)
        .with_setting(form.setting)
        .with_style(form.style);
    info!(session_id = %session_id, client = %client, "generation requested");
    runner::spawn_session(state.clone(), progress, adventure);

    let cookie = format!(
        "{SESSION_COOKIE}={session_id}; Path=/; Max-Age={}; HttpOnly; SameSite=Lax",
        state.registry.cache_ttl().as_secs()
    );
    Ok((
        StatusCode::ACCEPTED,
        [(SESSION_HEADER, session_id.clone()), (header::SET_COOKIE.as_str(), cookie)],
        Json(serde_json::json!({"session_id": session_id})),
    )
        .into_response())
}

fn wants_html(query: &MessagesQuery, headers: &HeaderMap) -> bool {
    if let Some(format) = &query.format {
        return format.eq_ignore_ascii_case("html");
    }
    headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|accept| accept.contains("text/html"))
}

async fn messages(
    State(state): State<SharedState>,
    Path(session_id): Path<String>,
    Query(query): Query<MessagesQuery>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let messages = state.registry.messages(&session_id)?;
    if wants_html(&query, &headers) {
        Ok(Html(render_html(&messages)).into_response())
    } else {
        Ok(Json(messages).into_response())
    }
}

async fn session_status(
    State(state): State<SharedState>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let progress = state.registry.get(&session_id)?;
    Ok(Json(progress.snapshot()))
}

/// Status of the session named by the `X-Session-Id` header or cookie, so a
/// reloaded page can rejoin it.
async fn current_session(
    State(state): State<SharedState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let session_id =
        session_id_from_headers(&headers).ok_or_else(|| ApiError::NotFound("no session".into()))?;
    let progress = state.registry.get(&session_id)?;
    Ok(Json(progress.snapshot()))
}

async fn health() -> &'static str {
    "ok"
}
