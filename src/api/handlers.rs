//! HTTP handlers: thin JSON marshaling onto pool and session-manager
//! calls, plus the glue that pairs manager state transitions with pool
//! acquire/release.

use std::collections::HashMap;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use log::warn;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::sandbox::{ExecRequest, ExecResult, FileEntry, Sandbox};
use crate::session::{CreateSessionRequest, Session};

use super::error::{ApiError, ApiResult};
use super::state::AppState;

#[derive(Debug, Serialize)]
pub struct AcquireResponse {
    pub sandbox_id: String,
    pub container_id: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
}

impl From<Sandbox> for AcquireResponse {
    fn from(sandbox: Sandbox) -> Self {
        Self {
            sandbox_id: sandbox.id,
            container_id: sandbox.container_id,
            status: sandbox.status.to_string(),
            ip: (!sandbox.ip.is_empty()).then_some(sandbox.ip),
        }
    }
}

/// GET /health
pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok", "version": env!("CARGO_PKG_VERSION") }))
}

/// POST /sandbox/acquire
pub async fn acquire_sandbox(State(state): State<AppState>) -> ApiResult<Json<AcquireResponse>> {
    let sandbox = state.pool.acquire().await?;
    Ok(Json(sandbox.into()))
}

#[derive(Debug, Deserialize)]
pub struct ReleaseRequest {
    pub sandbox_id: String,
}

/// POST /sandbox/release
pub async fn release_sandbox(
    State(state): State<AppState>,
    Json(req): Json<ReleaseRequest>,
) -> ApiResult<Json<Value>> {
    state.pool.release(&req.sandbox_id).await?;
    Ok(Json(json!({ "success": true })))
}

/// GET /sandbox/stats
pub async fn sandbox_stats(State(state): State<AppState>) -> Json<Value> {
    let stats = state.pool.stats();
    let total = stats.idle + stats.active + stats.creating;
    Json(json!({
        "idle": stats.idle,
        "active": stats.active,
        "creating": stats.creating,
        "max": stats.max,
        "total": total,
        "available": stats.max.saturating_sub(stats.active + stats.creating),
    }))
}

#[derive(Debug, Deserialize)]
pub struct ExecuteRequest {
    pub sandbox_id: String,
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub language: String,
    #[serde(default)]
    pub command: Vec<String>,
    #[serde(default)]
    pub work_dir: String,
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Per-call timeout in seconds.
    #[serde(default)]
    pub timeout: Option<u64>,
}

/// POST /execute
///
/// A deadline that fires mid-run is a normal 200 with `timed_out: true`.
pub async fn execute(
    State(state): State<AppState>,
    Json(req): Json<ExecuteRequest>,
) -> ApiResult<Json<ExecResult>> {
    if req.code.is_empty() && req.command.is_empty() {
        return Err(ApiError::bad_request("either code or command is required"));
    }

    // Only active (checked-out) sandboxes are executable.
    let sandbox = state.pool.get(&req.sandbox_id)?;

    let result = state
        .runtime
        .exec(
            &sandbox.id,
            ExecRequest {
                code: req.code,
                language: req.language,
                command: req.command,
                work_dir: req.work_dir,
                env: req.env,
                timeout: req.timeout.map(Duration::from_secs),
                stdin: None,
            },
        )
        .await?;

    state.pool.touch(&sandbox.id);
    Ok(Json(result))
}

#[derive(Debug, Deserialize)]
pub struct FileQuery {
    pub sandbox_id: String,
    pub path: String,
}

#[derive(Debug, Serialize)]
pub struct FilesResponse {
    pub files: Vec<FileEntry>,
}

/// GET /files
pub async fn list_files(
    State(state): State<AppState>,
    Query(query): Query<FileQuery>,
) -> ApiResult<Json<FilesResponse>> {
    let sandbox = state.pool.get(&query.sandbox_id)?;
    let files = state.runtime.list_files(&sandbox.id, &query.path).await?;
    state.pool.touch(&sandbox.id);
    Ok(Json(FilesResponse { files }))
}

#[derive(Debug, Deserialize)]
pub struct WriteFileRequest {
    pub sandbox_id: String,
    pub path: String,
    pub content: String,
}

/// PUT /files
pub async fn write_file(
    State(state): State<AppState>,
    Json(req): Json<WriteFileRequest>,
) -> ApiResult<Json<Value>> {
    let sandbox = state.pool.get(&req.sandbox_id)?;
    state
        .runtime
        .write_file(&sandbox.id, &req.path, req.content.as_bytes())
        .await?;
    state.pool.touch(&sandbox.id);
    Ok(Json(json!({ "success": true })))
}

/// DELETE /files
pub async fn delete_file(
    State(state): State<AppState>,
    Query(query): Query<FileQuery>,
) -> ApiResult<Json<Value>> {
    let sandbox = state.pool.get(&query.sandbox_id)?;
    state.runtime.delete_file(&sandbox.id, &query.path).await?;
    state.pool.touch(&sandbox.id);
    Ok(Json(json!({ "success": true })))
}

/// POST /sessions
pub async fn create_session(
    State(state): State<AppState>,
    Json(req): Json<CreateSessionRequest>,
) -> ApiResult<(StatusCode, Json<Session>)> {
    let session = state.sessions.create(req).await?;
    Ok((StatusCode::CREATED, Json(session)))
}

#[derive(Debug, Deserialize)]
pub struct SessionsQuery {
    pub user_id: String,
}

/// GET /sessions
pub async fn list_sessions(
    State(state): State<AppState>,
    Query(query): Query<SessionsQuery>,
) -> ApiResult<Json<Value>> {
    let sessions = state.sessions.get_by_user(&query.user_id).await?;
    Ok(Json(json!({ "sessions": sessions })))
}

/// GET /sessions/{id}
pub async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Session>> {
    Ok(Json(state.sessions.get(&id).await?))
}

/// DELETE /sessions/{id}
pub async fn delete_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    // Free the bound sandbox first, if any.
    if let Ok(session) = state.sessions.get(&id).await {
        if let Some(sandbox_id) = session.sandbox_id {
            if let Err(err) = state.pool.release(&sandbox_id).await {
                warn!("releasing sandbox {sandbox_id} for deleted session {id}: {err}");
            }
        }
    }

    state.sessions.delete(&id).await?;
    Ok(Json(json!({ "success": true })))
}

/// POST /sessions/{id}/pause
///
/// Manager persists the paused state; the sandbox that was bound goes
/// back to the pool afterwards.
pub async fn pause_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Session>> {
    let before = state.sessions.get(&id).await?;
    let session = state.sessions.pause(&id).await?;

    if let Some(sandbox_id) = before.sandbox_id {
        if let Err(err) = state.pool.release(&sandbox_id).await {
            warn!("releasing sandbox {sandbox_id} after pausing session {id}: {err}");
        }
    }

    Ok(Json(session))
}

/// POST /sessions/{id}/resume
///
/// Manager transition first, then a sandbox is acquired, bound, and the
/// archived workspace restored onto it.
pub async fn resume_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Session>> {
    state.sessions.resume(&id).await?;

    let sandbox = state.pool.acquire().await?;
    let session = match state.sessions.bind_sandbox(&id, &sandbox.id).await {
        Ok(session) => session,
        Err(err) => {
            if let Err(release_err) = state.pool.release(&sandbox.id).await {
                warn!("releasing sandbox {} after failed bind: {release_err}", sandbox.id);
            }
            return Err(err.into());
        }
    };

    state.sessions.restore_workspace(&id, &sandbox.id).await?;
    Ok(Json(session))
}

/// POST /sessions/{id}/touch
pub async fn touch_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    state.sessions.touch(&id).await?;
    Ok(Json(json!({ "success": true })))
}

#[derive(Debug, Deserialize)]
pub struct BindRequest {
    pub sandbox_id: String,
}

/// POST /sessions/{id}/bind
pub async fn bind_sandbox(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<BindRequest>,
) -> ApiResult<Json<Value>> {
    // The sandbox must be checked out of the pool before it can be bound.
    state.pool.get(&req.sandbox_id)?;
    state.sessions.bind_sandbox(&id, &req.sandbox_id).await?;
    Ok(Json(json!({ "success": true })))
}

/// DELETE /sessions/{id}/bind
pub async fn unbind_sandbox(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    state.sessions.unbind_sandbox(&id).await?;
    Ok(Json(json!({ "success": true })))
}
