//! Thin JSON API over the intent pipeline.
//!
//! Intent acquisition surface for operators and the dashboard; persistence,
//! authentication and rate limiting live in outer collaborators, not here.

use crate::dispatcher::PolicyDispatcher;
use crate::intents::{IntentLog, IntentRecord};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use imperium_device::DeviceEnforcer;
use imperium_intent::{IntentParser, PolicyEngine};
use imperium_network::NetworkEnforcer;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::info;

#[derive(Clone)]
pub struct AppState {
    pub parser: Arc<IntentParser>,
    pub engine: Arc<PolicyEngine>,
    pub dispatcher: Arc<PolicyDispatcher>,
    pub intents: Arc<IntentLog>,
    pub network: Arc<NetworkEnforcer>,
    pub device: Arc<DeviceEnforcer>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/intents", post(submit_intent).get(list_intents))
        .route("/api/v1/intents/:id", get(get_intent))
        .route("/api/v1/policies", get(list_policies))
        .route("/api/v1/devices/status", get(device_status))
        .route("/api/v1/network/status", get(network_status))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "healthy", "service": "imperium-controller" }))
}

#[derive(Debug, Deserialize)]
struct SubmitIntent {
    description: String,
}

async fn submit_intent(
    State(state): State<AppState>,
    Json(body): Json<SubmitIntent>,
) -> Response {
    let parsed = state.parser.parse(&body.description);

    if let Err(e) = state.parser.validate(&parsed) {
        let record = IntentRecord {
            id: state.intents.next_id(),
            timestamp: Utc::now(),
            description: body.description.clone(),
            parsed,
            policies: Vec::new(),
            results: Vec::new(),
            status: "invalid".to_string(),
        };
        let payload = json!({ "success": false, "intent": &record, "error": e.to_string() });
        state.intents.push(record);
        return (StatusCode::BAD_REQUEST, Json(payload)).into_response();
    }

    let policies = state.engine.generate_policies(&parsed);
    let results = state
        .dispatcher
        .dispatch(parsed.intent_type.as_str(), &policies)
        .await;

    let record = IntentRecord {
        id: state.intents.next_id(),
        timestamp: Utc::now(),
        description: body.description,
        parsed,
        policies,
        results,
        status: "active".to_string(),
    };
    info!(intent = %record.id, policies = record.policies.len(), "intent created");
    let payload = json!({ "success": true, "intent": &record });
    state.intents.push(record);

    (StatusCode::CREATED, Json(payload)).into_response()
}

async fn list_intents(State(state): State<AppState>) -> impl IntoResponse {
    let intents = state.intents.list();
    Json(json!({ "count": intents.len(), "intents": intents }))
}

async fn get_intent(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Response {
    match state.intents.get(&id) {
        Some(intent) => Json(json!({ "intent": intent })).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "Intent not found" })),
        )
            .into_response(),
    }
}

async fn list_policies(State(state): State<AppState>) -> impl IntoResponse {
    let policies = state.intents.policies();
    Json(json!({ "count": policies.len(), "policies": policies }))
}

async fn device_status(State(state): State<AppState>) -> impl IntoResponse {
    let devices = state.device.all_devices().await;
    Json(json!({ "count": devices.len(), "devices": devices }))
}

async fn network_status(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::to_value(state.network.get_status().await).unwrap_or_default())
}
