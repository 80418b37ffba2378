use std::convert::Infallible;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use trellis_agent::WorkflowRequest;
use trellis_core::types::{ExecutionId, ProgressEvent};
use trellis_memory::SqliteLogStore;

use crate::state::AppState;

type ApiError = (StatusCode, Json<serde_json::Value>);

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (status, Json(serde_json::json!({ "error": message.into() })))
}

// GET /api/health
pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

// GET /api/agents
pub async fn list_agents(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let agents: Vec<serde_json::Value> = state
        .registry
        .list()
        .iter()
        .map(|a| {
            serde_json::json!({
                "name": a.name,
                "description": a.description,
                "model": a.model,
                "tools": a.tools,
                "defaultTask": a.default_task,
            })
        })
        .collect();
    Json(serde_json::json!({ "agents": agents }))
}

#[derive(Deserialize)]
pub struct ExecuteQuery {
    #[serde(default)]
    pub format: Option<String>,
}

enum StreamFormat {
    Sse,
    Ndjson,
}

// POST /api/workflows/execute?format=sse|ndjson
pub async fn execute_workflow(
    State(state): State<Arc<AppState>>,
    Query(q): Query<ExecuteQuery>,
    Json(request): Json<WorkflowRequest>,
) -> Result<Response, ApiError> {
    if request.goal.trim().is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "goal must not be empty"));
    }
    let format = match q.format.as_deref() {
        None | Some("sse") => StreamFormat::Sse,
        Some("ndjson") => StreamFormat::Ndjson,
        Some(other) => {
            return Err(api_error(
                StatusCode::BAD_REQUEST,
                format!("unknown format '{}'", other),
            ))
        }
    };

    let execution_id = ExecutionId::new();
    let cancel = CancellationToken::new();
    state.running.insert(execution_id.clone(), cancel.clone());
    info!(
        execution_id = %execution_id,
        nodes = request.nodes.len(),
        edges = request.edges.len(),
        "Workflow execution requested"
    );

    let (handle, receiver) = state
        .engine
        .spawn(request, execution_id.clone(), cancel.clone());

    let running = state.running.clone();
    let finished_id = execution_id.clone();
    tokio::spawn(async move {
        match handle.await {
            Ok(Ok(_)) => debug!(execution_id = %finished_id, "Execution finished"),
            Ok(Err(e)) => debug!(execution_id = %finished_id, error = %e, "Execution failed"),
            Err(e) => error!(execution_id = %finished_id, error = %e, "Execution task panicked"),
        }
        running.remove(&finished_id);
    });

    // Dropping the response stream (client gone) cancels the run.
    let guard = cancel.drop_guard();
    let events = receiver.into_stream().map(move |event| {
        let _ = &guard;
        event
    });

    let mut response = match format {
        StreamFormat::Ndjson => {
            let lines = events.map(|event| Ok::<_, Infallible>(event.to_ndjson_line()));
            let mut response = Body::from_stream(lines).into_response();
            response.headers_mut().insert(
                header::CONTENT_TYPE,
                HeaderValue::from_static("application/x-ndjson"),
            );
            response
        }
        StreamFormat::Sse => {
            let frames = events.map(|event| Ok::<_, Infallible>(sse_event(&event)));
            Sse::new(frames)
                .keep_alive(KeepAlive::default())
                .into_response()
        }
    };

    if let Ok(value) = HeaderValue::from_str(execution_id.as_str()) {
        response.headers_mut().insert("x-execution-id", value);
    }
    Ok(response)
}

fn sse_event(event: &ProgressEvent) -> Event {
    let line = event.to_ndjson_line();
    Event::default().data(line.trim_end())
}

// DELETE /api/executions/{id}
pub async fn cancel_execution(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let execution_id = ExecutionId::from_string(&id);
    if state.running.cancel(&execution_id) {
        info!(execution_id = %execution_id, "Execution cancelled by request");
        Ok(Json(serde_json::json!({ "cancelled": id })))
    } else {
        Err(api_error(StatusCode::NOT_FOUND, format!("no running execution '{}'", id)))
    }
}

// GET /api/executions
pub async fn list_executions(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let sessions = match &state.sessions {
        Some(manager) => manager.active().await,
        None => vec![],
    };
    Json(serde_json::json!({
        "running": state.running.ids(),
        "sessions": sessions,
    }))
}

fn log_store(state: &AppState) -> Result<&SqliteLogStore, ApiError> {
    state
        .log_store
        .as_deref()
        .ok_or_else(|| api_error(StatusCode::SERVICE_UNAVAILABLE, "telemetry is disabled"))
}

fn storage_error(e: impl std::fmt::Display) -> ApiError {
    api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}

// GET /api/executions/{id}/logs
pub async fn execution_logs(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let entries = log_store(&state)?
        .for_execution(&ExecutionId::from_string(&id))
        .map_err(storage_error)?;
    Ok(Json(serde_json::json!({ "executionId": id, "logs": entries })))
}

#[derive(Deserialize)]
pub struct LogsQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    50
}

// GET /api/logs?limit=50
pub async fn recent_logs(
    State(state): State<Arc<AppState>>,
    Query(q): Query<LogsQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let entries = log_store(&state)?.recent(q.limit).map_err(storage_error)?;
    Ok(Json(serde_json::json!({ "logs": entries })))
}

// GET /api/logs/stats
pub async fn log_stats(
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let stats = log_store(&state)?.agent_stats().map_err(storage_error)?;
    Ok(Json(serde_json::json!({ "agents": stats })))
}
