use crate::engine::MachineHandle;
use crate::state::{AppState, Published};
use axum::{
    extract::{Path, State},
    http::{HeaderValue, Method, StatusCode},
    response::{
        sse::{Event, Sse},
        Json,
    },
    routing::{get, post, put},
    Router,
};
use filler_core::{DashboardStats, MachineView, SettingsUpdate};
use serde::Deserialize;
use std::convert::Infallible;
use std::time::Duration;
use tokio::sync::broadcast;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

type ApiError = (StatusCode, Json<serde_json::Value>);
type ApiResult<T> = Result<Json<T>, ApiError>;

#[cfg(test)]
pub fn make_router(state: AppState) -> Router {
    make_router_with_cors(state, HeaderValue::from_static("http://localhost:5173"))
}

pub fn make_router_with_cors(state: AppState, cors_origin: HeaderValue) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(cors_origin)
        .allow_methods([Method::GET, Method::POST, Method::PUT])
        .allow_headers(Any);

    Router::new()
        .route("/api/v1/meta", get(meta_handler))
        .route("/api/v1/dashboard", get(dashboard_handler))
        .route("/api/v1/machines", get(list_handler))
        .route("/api/v1/machines/:id", get(machine_handler))
        .route("/api/v1/machines/:id/start", post(start_handler))
        .route("/api/v1/machines/:id/pause", post(pause_handler))
        .route("/api/v1/machines/:id/reset", post(reset_handler))
        .route("/api/v1/machines/:id/settings", put(settings_handler))
        .route("/api/v1/machines/:id/items", put(items_handler))
        .route("/api/v1/stream", get(stream_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn lookup<'a>(app_state: &'a AppState, id: &str) -> Result<&'a MachineHandle, ApiError> {
    app_state.machine(id).ok_or_else(|| {
        (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({"error": format!("unknown machine: {id}")})),
        )
    })
}

fn dashboard(app_state: &AppState) -> DashboardStats {
    let snapshots: Vec<_> = app_state.machines.iter().map(MachineHandle::snapshot).collect();
    filler_core::dashboard_stats(&snapshots)
}

pub async fn meta_handler(State(app_state): State<AppState>) -> Json<serde_json::Value> {
    let ids: Vec<String> = app_state.machines.iter().map(|m| m.id().0.clone()).collect();
    Json(serde_json::json!({
        "machines": ids,
        "event_level": app_state.event_level,
    }))
}

pub async fn dashboard_handler(State(app_state): State<AppState>) -> Json<DashboardStats> {
    Json(dashboard(&app_state))
}

pub async fn list_handler(State(app_state): State<AppState>) -> Json<Vec<MachineView>> {
    Json(app_state.machines.iter().map(MachineHandle::view).collect())
}

pub async fn machine_handler(
    State(app_state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<MachineView> {
    Ok(Json(lookup(&app_state, &id)?.view()))
}

pub async fn start_handler(
    State(app_state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<MachineView> {
    Ok(Json(lookup(&app_state, &id)?.start()))
}

pub async fn pause_handler(
    State(app_state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<MachineView> {
    Ok(Json(lookup(&app_state, &id)?.pause()))
}

pub async fn reset_handler(
    State(app_state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<MachineView> {
    Ok(Json(lookup(&app_state, &id)?.reset()))
}

pub async fn settings_handler(
    State(app_state): State<AppState>,
    Path(id): Path<String>,
    Json(update): Json<SettingsUpdate>,
) -> ApiResult<MachineView> {
    Ok(Json(lookup(&app_state, &id)?.update_settings(&update)))
}

#[derive(Deserialize)]
pub struct ItemsBody {
    value: i64,
}

pub async fn items_handler(
    State(app_state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<ItemsBody>,
) -> ApiResult<MachineView> {
    Ok(Json(lookup(&app_state, &id)?.set_items_in_box(body.value)))
}

pub async fn stream_handler(
    State(app_state): State<AppState>,
) -> Sse<impl futures_core::Stream<Item = Result<Event, Infallible>>> {
    let mut rx = app_state.event_tx.subscribe();

    let stream = async_stream::stream! {
        let mut heartbeat = tokio::time::interval(Duration::from_secs(1));
        heartbeat.tick().await; // discard the immediate first tick
        let mut flush = tokio::time::interval(Duration::from_millis(50));
        flush.tick().await; // discard the immediate first tick
        let mut pending: Vec<Published> = Vec::new();
        loop {
            tokio::select! {
                result = rx.recv() => {
                    match result {
                        Ok(items) => pending.extend(items),
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::warn!(skipped, "event stream subscriber lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
                _ = flush.tick() => {
                    if !pending.is_empty() {
                        match serde_json::to_string(&pending) {
                            Ok(data) => {
                                yield Ok(Event::default().data(data));
                            }
                            Err(err) => {
                                tracing::error!("event serialization failed: {err}");
                            }
                        }
                        pending.clear();
                    }
                }
                _ = heartbeat.tick() => {
                    let stats = dashboard(&app_state);
                    let hb = serde_json::json!({"heartbeat": true, "dashboard": stats});
                    yield Ok(Event::default().data(hb.to_string()));
                }
            }
        }
    };

    Sse::new(stream).keep_alive(
        axum::response::sse::KeepAlive::new()
            .interval(Duration::from_secs(30))
            .text("ping"),
    )
}
