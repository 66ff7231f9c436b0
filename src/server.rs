//! HTTP API.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/repos` | Ingest a repository by clone URL |
//! | `GET`  | `/repos` | List ingested repositories |
//! | `GET`  | `/repos/{id}` | Repository detail with file count |
//! | `DELETE` | `/repos/{id}` | Delete a repository (cascading) |
//! | `POST` | `/repos/{id}/chat` | Ask a question — SSE stream of agent events |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "not_found", "message": "repo not found" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `conflict` (409),
//! `internal` (500).
//!
//! # Chat stream
//!
//! Each SSE `data:` payload is one agent event:
//! `text_delta`, `tool_start`, `tool_result`, `done`, `error`. The stream
//! ends after the terminal `done`/`error` event.

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tower_http::cors::{Any, CorsLayer};

use crate::agent::{self, HistoryMessage};
use crate::config::Config;
use crate::error::IngestError;
use crate::ingest;
use crate::models::{Repo, RepoStatus};
use crate::provider::ChatProvider;
use crate::repos;
use crate::tools::{ToolContext, ToolRegistry};

/// Shared application state, cheap to clone into handlers.
#[derive(Clone)]
struct AppState {
    pool: SqlitePool,
    config: Arc<Config>,
    provider: Arc<dyn ChatProvider>,
    tools: Arc<ToolRegistry>,
}

/// Start the HTTP server. Runs until the process is terminated.
pub async fn run_server(
    config: &Config,
    pool: SqlitePool,
    provider: Arc<dyn ChatProvider>,
) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();

    let state = AppState {
        pool,
        config: Arc::new(config.clone()),
        provider,
        tools: Arc::new(ToolRegistry::with_builtins()),
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/repos", post(handle_ingest).get(handle_list_repos))
        .route("/repos/{id}", get(handle_get_repo).delete(handle_delete_repo))
        .route("/repos/{id}/chat", post(handle_chat))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state);

    println!("repo-lens listening on http://{}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found".to_string(),
        message: message.into(),
    }
}

fn conflict(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::CONFLICT,
        code: "conflict".to_string(),
        message: message.into(),
    }
}

fn internal(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: message.into(),
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ POST /repos ============

#[derive(Deserialize)]
struct IngestRequest {
    url: String,
}

#[derive(Serialize)]
struct IngestResponse {
    repo_id: String,
    status: String,
    file_count: usize,
}

async fn handle_ingest(
    State(state): State<AppState>,
    Json(body): Json<IngestRequest>,
) -> Result<(StatusCode, Json<IngestResponse>), AppError> {
    if body.url.trim().is_empty() {
        return Err(bad_request("url must not be empty"));
    }

    let report = ingest::ingest_repo(&state.pool, &state.config.ingest, &body.url)
        .await
        .map_err(|e| match e {
            IngestError::CloneFailed(_) | IngestError::EmptyTree => bad_request(e.to_string()),
            other => internal(other.to_string()),
        })?;

    Ok((
        StatusCode::CREATED,
        Json(IngestResponse {
            repo_id: report.repo_id,
            status: report.status,
            file_count: report.file_count,
        }),
    ))
}

// ============ GET /repos ============

async fn handle_list_repos(State(state): State<AppState>) -> Result<Json<Vec<Repo>>, AppError> {
    let repos = repos::list_repos(&state.pool)
        .await
        .map_err(|e| internal(e.to_string()))?;
    Ok(Json(repos))
}

// ============ GET /repos/{id} ============

#[derive(Serialize)]
struct RepoDetail {
    #[serde(flatten)]
    repo: Repo,
    file_count: i64,
}

async fn handle_get_repo(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<RepoDetail>, AppError> {
    let repo = repos::get_repo(&state.pool, &id)
        .await
        .map_err(|e| internal(e.to_string()))?
        .ok_or_else(|| not_found("repo not found"))?;

    let file_count = repos::repo_file_count(&state.pool, &id)
        .await
        .map_err(|e| internal(e.to_string()))?;

    Ok(Json(RepoDetail { repo, file_count }))
}

// ============ DELETE /repos/{id} ============

async fn handle_delete_repo(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    let deleted = repos::delete_repo(&state.pool, &id)
        .await
        .map_err(|e| internal(e.to_string()))?;
    if !deleted {
        return Err(not_found("repo not found"));
    }
    Ok(StatusCode::NO_CONTENT)
}

// ============ POST /repos/{id}/chat ============

#[derive(Deserialize)]
struct ChatRequest {
    question: String,
    #[serde(default)]
    history: Vec<HistoryMessage>,
}

async fn handle_chat(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<ChatRequest>,
) -> Result<impl IntoResponse, AppError> {
    if body.question.trim().is_empty() {
        return Err(bad_request("question must not be empty"));
    }

    let repo = repos::get_repo(&state.pool, &id)
        .await
        .map_err(|e| internal(e.to_string()))?
        .ok_or_else(|| not_found("repo not found"))?;

    if RepoStatus::parse(&repo.status) != RepoStatus::Ready {
        return Err(conflict(format!(
            "repo is not ready (status: {}). Wait for ingestion to complete.",
            repo.status
        )));
    }

    let ctx = ToolContext::new(state.pool.clone(), id);
    let rx = agent::spawn_session(
        state.provider.clone(),
        state.tools.clone(),
        ctx,
        body.question,
        body.history,
        state.config.agent.max_tool_rounds,
    );

    // Drain the session's events into SSE frames; the channel closing ends
    // the stream.
    let stream = futures::stream::unfold(rx, |mut rx| async move {
        let event = rx.recv().await?;
        let frame = Event::default()
            .json_data(&event)
            .unwrap_or_else(|_| Event::default().data("{\"type\":\"error\",\"message\":\"serialization failed\"}"));
        Some((Ok::<Event, Infallible>(frame), rx))
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}
