//! JSON API over the hub context.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post, put};
use axum::Router;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::PumpSpec;
use crate::monitor::{Liveness, Switched};
use crate::overrides::OverrideMode;
use crate::state::{HubError, ModeOutcome, PumpView, SharedHub};
use crate::valves::{ValveBoard, ValveSource, MAX_VALVES};

#[derive(Clone)]
pub struct AppState {
    pub hub: SharedHub,
    pub valves: Arc<ValveBoard>,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

impl IntoResponse for HubError {
    fn into_response(self) -> Response {
        let status = match &self {
            HubError::IndexOutOfRange(_) => StatusCode::NOT_FOUND,
            HubError::Validation(_) => StatusCode::BAD_REQUEST,
            HubError::Persist(e) => {
                error!("failed to persist pump config: {e:#}");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

fn bad_request(message: String) -> Response {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": message }))).into_response()
}

// ---------------------------------------------------------------------------
// Routes
// ---------------------------------------------------------------------------

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/status", get(api_status))
        .route("/api/pumps", get(list_pumps).post(add_pump))
        .route("/api/pumps/{id}", put(update_pump).delete(delete_pump))
        .route("/api/pumps/{id}/online", get(pump_online))
        .route("/api/pumps/{id}/switch", get(pump_switch))
        .route("/api/pumps/{id}/mode", post(set_mode))
        .route("/api/settings/dblog", put(set_db_log))
        .route("/api/valves", get(get_valves).put(put_valves))
        .with_state(state)
}

#[derive(Serialize)]
struct StatusResponse {
    db_log: bool,
    valves: Vec<bool>,
    pumps: Vec<PumpView>,
}

async fn api_status(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        db_log: state.hub.db_log().await,
        valves: state.valves.snapshot(),
        pumps: state.hub.pump_views().await,
    })
}

async fn list_pumps(State(state): State<AppState>) -> Json<Vec<PumpView>> {
    Json(state.hub.pump_views().await)
}

async fn add_pump(
    State(state): State<AppState>,
    Json(spec): Json<PumpSpec>,
) -> Result<impl IntoResponse, HubError> {
    let id = state.hub.add_pump(spec).await?;
    Ok((StatusCode::CREATED, Json(json!({ "id": id }))))
}

async fn update_pump(
    State(state): State<AppState>,
    Path(id): Path<usize>,
    Json(spec): Json<PumpSpec>,
) -> Result<StatusCode, HubError> {
    state.hub.update_pump(id, spec).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn delete_pump(
    State(state): State<AppState>,
    Path(id): Path<usize>,
) -> Result<StatusCode, HubError> {
    state.hub.delete_pump(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// Plain-text status lines polled by the UI. Any id that does not name a pump,
// including one that is not a number, reports "unknown".

async fn pump_online(State(state): State<AppState>, Path(id): Path<String>) -> String {
    let liveness = match id.parse::<usize>() {
        Ok(i) => state.hub.liveness(i).await,
        Err(_) => Liveness::Unknown,
    };
    liveness.to_string()
}

async fn pump_switch(State(state): State<AppState>, Path(id): Path<String>) -> String {
    let switched = match id.parse::<usize>() {
        Ok(i) => state.hub.switched(i).await,
        Err(_) => Switched::Unknown,
    };
    switched.to_string()
}

#[derive(Deserialize)]
struct ModeRequest {
    mode: String,
}

async fn set_mode(
    State(state): State<AppState>,
    Path(id): Path<usize>,
    Json(req): Json<ModeRequest>,
) -> Result<Json<ModeOutcome>, Response> {
    let mode: OverrideMode = req.mode.parse().map_err(bad_request)?;
    let outcome = state
        .hub
        .set_mode(id, mode)
        .await
        .map_err(IntoResponse::into_response)?;
    Ok(Json(outcome))
}

#[derive(Deserialize)]
struct DbLogRequest {
    enabled: bool,
}

async fn set_db_log(
    State(state): State<AppState>,
    Json(req): Json<DbLogRequest>,
) -> Result<StatusCode, HubError> {
    state.hub.set_db_log(req.enabled).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn get_valves(State(state): State<AppState>) -> Json<Vec<bool>> {
    Json(state.valves.snapshot())
}

async fn put_valves(
    State(state): State<AppState>,
    Json(active): Json<Vec<bool>>,
) -> Result<StatusCode, Response> {
    let len = active.len();
    if !state.valves.replace(active) {
        return Err(bad_request(format!(
            "{len} valves given, at most {MAX_VALVES} supported"
        )));
    }
    state.hub.recompute_desired().await;
    Ok(StatusCode::NO_CONTENT)
}

// ---------------------------------------------------------------------------
// Server entry-point
// ---------------------------------------------------------------------------

pub async fn serve(state: AppState, port: u16, cancel: CancellationToken) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind web port {port}"))?;

    info!("api listening on http://{addr}");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
        .context("web server error")
}

// ===========================================================================
// Tests
// ===========================================================================
