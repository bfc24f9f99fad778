//! API handlers for the HTTP REST API

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;
use tracing::{error, info};

use crate::alerting::{AlertDispatcher, CycleReport, Engine};
use crate::db::Database;
use crate::error::Error;
use crate::models::{MetricSummary, PersistedSample};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Metric, event and subscription stores
    pub db: Database,
    /// Cycle engine for manual runs; `None` disables `POST /api/v1/cycles`
    pub engine: Option<Arc<Engine>>,
    /// Delivers alerts from manual runs
    pub dispatcher: Option<Arc<AlertDispatcher>>,
}

type ApiResult<T> = Result<T, (StatusCode, String)>;

/// Map a library error onto an HTTP status
fn api_error(e: Error) -> (StatusCode, String) {
    let status = match &e {
        Error::NotFound { .. } => StatusCode::NOT_FOUND,
        Error::Validation(_) => StatusCode::BAD_REQUEST,
        Error::CycleInFlight => StatusCode::CONFLICT,
        _ => {
            error!(error = %e, "Request failed");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (status, e.to_string())
}

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    /// Always `ok` while the server answers
    pub status: String,
    /// Crate version
    pub version: String,
}

/// Health check endpoint
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// List user-facing metrics
pub async fn list_metrics(State(state): State<AppState>) -> ApiResult<Json<Vec<MetricSummary>>> {
    let metrics = state.db.visible_metrics().await.map_err(api_error)?;
    Ok(Json(metrics))
}

/// Latest sample of one metric
pub async fn get_metric(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> ApiResult<Json<PersistedSample>> {
    let sample = state
        .db
        .metrics
        .get_sample(&key)
        .await
        .map_err(api_error)?
        .ok_or_else(|| api_error(Error::not_found("Metric", &key)))?;

    Ok(Json(sample))
}

/// A user's subscriptions
#[derive(Serialize)]
pub struct SubscriptionsResponse {
    /// User the subscriptions belong to
    pub user_id: String,
    /// Subscribed metric keys, sorted
    pub metric_keys: Vec<String>,
}

/// List a user's subscriptions
pub async fn list_subscriptions(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> ApiResult<Json<SubscriptionsResponse>> {
    let metric_keys = state
        .db
        .subscriptions
        .list_for_user(&user_id)
        .await
        .map_err(api_error)?;

    Ok(Json(SubscriptionsResponse { user_id, metric_keys }))
}

/// Outcome of a subscribe request
#[derive(Serialize)]
pub struct SubscribeResponse {
    /// False when the subscription already existed
    pub created: bool,
}

/// Subscribe a user to a metric. 201 when new, 200 when it already existed.
pub async fn subscribe(
    State(state): State<AppState>,
    Path((user_id, key)): Path<(String, String)>,
) -> ApiResult<(StatusCode, Json<SubscribeResponse>)> {
    let created = state.db.subscribe(&user_id, &key).await.map_err(api_error)?;

    if created {
        info!(user_id = %user_id, metric_key = %key, "Subscription added");
    }

    let status = if created { StatusCode::CREATED } else { StatusCode::OK };
    Ok((status, Json(SubscribeResponse { created })))
}

/// Remove a subscription
pub async fn unsubscribe(
    State(state): State<AppState>,
    Path((user_id, key)): Path<(String, String)>,
) -> ApiResult<StatusCode> {
    let removed = state
        .db
        .subscriptions
        .remove(&user_id, &key)
        .await
        .map_err(api_error)?;

    if !removed {
        return Err(api_error(Error::not_found("Subscription", format!("{user_id}/{key}"))));
    }

    Ok(StatusCode::NO_CONTENT)
}

/// Run a cycle now and dispatch its alerts. 409 while another cycle runs.
pub async fn run_cycle(State(state): State<AppState>) -> ApiResult<Json<CycleReport>> {
    let engine = state.engine.as_ref().ok_or((
        StatusCode::SERVICE_UNAVAILABLE,
        "Evaluation engine is not running".to_string(),
    ))?;

    let report = engine.try_run_cycle().await.map_err(api_error)?;

    if let Some(dispatcher) = &state.dispatcher {
        dispatcher.dispatch(&report.alerts).await;
    }

    Ok(Json(report))
}
