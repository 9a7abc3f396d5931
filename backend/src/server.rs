//! HTTP surface: health, the WebSocket submission endpoint, and read-only
//! order/queue views.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use common::time::now_ms;
use corelib::error::EngineError;

use crate::app::App;
use crate::ws;

pub fn router(app: Arc<App>) -> axum::Router {
    axum::Router::new()
        .route("/health", get(health))
        .route("/orders/submit", get(ws::submit_handler))
        .route("/orders/recent", get(recent_orders))
        .route("/orders/{id}", get(order_by_id))
        .route("/orders/{id}/history", get(order_history))
        .route("/queue/metrics", get(queue_metrics))
        .with_state(app)
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok", "timestamp": now_ms() }))
}

#[derive(Deserialize)]
struct RecentQuery {
    limit: Option<u32>,
}

async fn recent_orders(
    State(app): State<Arc<App>>,
    Query(query): Query<RecentQuery>,
) -> Response {
    let limit = query.limit.unwrap_or(20).min(200);
    match app.store.find_recent(limit).await {
        Ok(orders) => Json(orders).into_response(),
        Err(err) => internal_error(err),
    }
}

async fn order_by_id(State(app): State<Arc<App>>, Path(id): Path<Uuid>) -> Response {
    // The cache is advisory; the store answers.
    match app.store.find_by_id(&id).await {
        Ok(Some(order)) => Json(order).into_response(),
        Ok(None) => not_found(&id),
        Err(err) => internal_error(err),
    }
}

async fn order_history(State(app): State<Arc<App>>, Path(id): Path<Uuid>) -> Response {
    match app.store.status_history(&id).await {
        Ok(entries) if entries.is_empty() => not_found(&id),
        Ok(entries) => Json(entries).into_response(),
        Err(err) => internal_error(err),
    }
}

async fn queue_metrics(State(app): State<Arc<App>>) -> impl IntoResponse {
    Json(app.queue.metrics())
}

fn not_found(id: &Uuid) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "error": format!("order not found: {id}") })),
    )
        .into_response()
}

fn internal_error(err: EngineError) -> Response {
    tracing::error!(error = %err, "request failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": err.message })),
    )
        .into_response()
}
