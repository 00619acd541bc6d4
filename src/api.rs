//! HTTP API server: operator endpoints and the bridge's inbound webhook.
//!
//! Spawned as a background task in the gateway, same as the dispatch loop.

use crate::gateway::Gateway;
use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::Json,
    routing::{delete, get, post},
    Router,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use concierge_channels::bridge::PushOutcome;
use concierge_core::{
    message::{IncomingMessage, MessageKind},
    phone::ConversationKey,
    traits::BlockList,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{error, info, warn};

type ApiError = (StatusCode, Json<Value>);

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    gateway: Arc<Gateway>,
    api_key: Option<String>,
}

/// Event posted by the transport bridge.
#[derive(Debug, Deserialize)]
struct InboundRequest {
    sender_id: String,
    #[serde(default)]
    text: String,
    #[serde(default)]
    sender_name: Option<String>,
    #[serde(default)]
    reply_target: Option<String>,
    #[serde(default)]
    is_group: bool,
    /// Voice note payload.
    #[serde(default)]
    audio_base64: Option<String>,
    #[serde(default)]
    raw: Value,
}

#[derive(Debug, Deserialize)]
struct BlockRequest {
    phone: String,
    #[serde(default)]
    reason: String,
}

/// Constant-time string comparison to prevent timing attacks on API token validation.
fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.bytes()
        .zip(b.bytes())
        .fold(0u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}

/// Check bearer token auth. Returns `Err` with the rejection when unauthorized.
fn check_auth(headers: &HeaderMap, api_key: &Option<String>) -> Result<(), ApiError> {
    let Some(key) = api_key else {
        return Ok(());
    };

    let value = headers
        .get("authorization")
        .ok_or_else(|| reject(StatusCode::UNAUTHORIZED, "missing Authorization header"))?
        .to_str()
        .map_err(|_| reject(StatusCode::UNAUTHORIZED, "invalid Authorization header"))?;

    match value.strip_prefix("Bearer ") {
        Some(token) if constant_time_eq(token, key) => Ok(()),
        _ => Err(reject(StatusCode::UNAUTHORIZED, "invalid token")),
    }
}

fn reject(status: StatusCode, message: &str) -> ApiError {
    (status, Json(json!({"error": message})))
}

fn path_key(state: &ApiState, raw: &str) -> Result<ConversationKey, ApiError> {
    let phone = &state.gateway.phone;
    let key = ConversationKey::normalize(raw, &phone.default_country_code, phone.local_length);
    if key.is_empty() {
        return Err(reject(StatusCode::BAD_REQUEST, "phone must contain digits"));
    }
    Ok(key)
}

/// `GET /api/health`: uptime and live conversation counters.
async fn health(
    headers: HeaderMap,
    State(state): State<ApiState>,
) -> Result<Json<Value>, ApiError> {
    check_auth(&headers, &state.api_key)?;
    let gw = &state.gateway;

    Ok(Json(json!({
        "status": "ok",
        "uptime_secs": gw.uptime.elapsed().as_secs(),
        "pending_turns": gw.debouncer.pending_keys(),
        "active_pauses": gw.handoff.list_active().len(),
        "active_surveys": gw.surveys.active_count(),
        "dispatch": gw.dispatch.as_ref().map(|d| json!({"sent_today": d.daily_sent()})),
    })))
}

/// `GET /api/pauses`: conversations currently handed to a human.
async fn list_pauses(
    headers: HeaderMap,
    State(state): State<ApiState>,
) -> Result<Json<Value>, ApiError> {
    check_auth(&headers, &state.api_key)?;
    Ok(Json(json!({ "pauses": state.gateway.handoff.list_active() })))
}

/// `POST /api/pauses/{key}/resume`: hand the conversation back to automation.
async fn resume_pause(
    headers: HeaderMap,
    State(state): State<ApiState>,
    Path(raw): Path<String>,
) -> Result<Json<Value>, ApiError> {
    check_auth(&headers, &state.api_key)?;
    let key = path_key(&state, &raw)?;
    let resumed = state.gateway.handoff.resume(&key);
    Ok(Json(json!({ "key": key, "resumed": resumed })))
}

/// `POST /api/surveys/{key}/cancel`: drop an open survey session.
async fn cancel_survey(
    headers: HeaderMap,
    State(state): State<ApiState>,
    Path(raw): Path<String>,
) -> Result<Json<Value>, ApiError> {
    check_auth(&headers, &state.api_key)?;
    let key = path_key(&state, &raw)?;
    let cancelled = state.gateway.surveys.cancel(&key);
    Ok(Json(json!({ "key": key, "cancelled": cancelled })))
}

/// `POST /api/config/invalidate`: reload handoff/survey settings on the next turn.
async fn invalidate_config(
    headers: HeaderMap,
    State(state): State<ApiState>,
) -> Result<Json<Value>, ApiError> {
    check_auth(&headers, &state.api_key)?;
    state.gateway.settings.invalidate().await;
    Ok(Json(json!({ "status": "invalidated" })))
}

/// `POST /api/block`: add a sender to the block list.
async fn block(
    headers: HeaderMap,
    State(state): State<ApiState>,
    body: Result<Json<BlockRequest>, axum::extract::rejection::JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    check_auth(&headers, &state.api_key)?;
    let Json(request) = body
        .map_err(|e| reject(StatusCode::BAD_REQUEST, &format!("invalid request: {e}")))?;
    let key = path_key(&state, &request.phone)?;

    state
        .gateway
        .block_list
        .add(&key, request.reason.trim())
        .await
        .map_err(|e| {
            error!("[{key}] block failed: {e}");
            reject(StatusCode::INTERNAL_SERVER_ERROR, &format!("block failed: {e}"))
        })?;
    info!("[{key}] blocked via API");
    Ok(Json(json!({ "key": key, "blocked": true })))
}

/// `DELETE /api/block/{key}`: remove a sender from the block list.
async fn unblock(
    headers: HeaderMap,
    State(state): State<ApiState>,
    Path(raw): Path<String>,
) -> Result<Json<Value>, ApiError> {
    check_auth(&headers, &state.api_key)?;
    let key = path_key(&state, &raw)?;
    let removed = state.gateway.block_list.remove(&key).await.map_err(|e| {
        error!("[{key}] unblock failed: {e}");
        reject(StatusCode::INTERNAL_SERVER_ERROR, &format!("unblock failed: {e}"))
    })?;
    Ok(Json(json!({ "key": key, "removed": removed })))
}

/// `POST /api/inbound`: one event from the transport bridge.
async fn inbound(
    headers: HeaderMap,
    State(state): State<ApiState>,
    body: Result<Json<InboundRequest>, axum::extract::rejection::JsonRejection>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    check_auth(&headers, &state.api_key)?;
    let Json(request) = body
        .map_err(|e| reject(StatusCode::BAD_REQUEST, &format!("invalid request: {e}")))?;

    if request.sender_id.trim().is_empty() {
        return Err(reject(StatusCode::BAD_REQUEST, "sender_id must not be empty"));
    }

    let bridge = state
        .gateway
        .bridge
        .as_ref()
        .ok_or_else(|| reject(StatusCode::SERVICE_UNAVAILABLE, "bridge channel not enabled"))?;

    let audio = match request.audio_base64.as_deref() {
        Some(encoded) => Some(BASE64.decode(encoded.trim()).map_err(|e| {
            reject(StatusCode::BAD_REQUEST, &format!("audio_base64 is not valid base64: {e}"))
        })?),
        None => None,
    };

    let mut incoming = IncomingMessage::text("bridge", &request.sender_id, &request.text);
    incoming.sender_name = request.sender_name;
    incoming.is_group = request.is_group;
    incoming.raw = request.raw;
    if request.reply_target.is_some() {
        incoming.reply_target = request.reply_target;
    }
    if audio.is_some() {
        incoming.kind = MessageKind::Voice;
        incoming.audio = audio;
    }
    let id = incoming.id;

    match bridge.push(incoming).await {
        Ok(PushOutcome::Accepted) => Ok((
            StatusCode::ACCEPTED,
            Json(json!({ "status": "queued", "id": id.to_string() })),
        )),
        Ok(PushOutcome::Ignored) => Ok((StatusCode::OK, Json(json!({ "status": "ignored" })))),
        Err(e) => {
            warn!("inbound event rejected: {e}");
            Err(reject(StatusCode::SERVICE_UNAVAILABLE, "gateway unavailable"))
        }
    }
}

/// Build the axum router with shared state.
fn build_router(state: ApiState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/pauses", get(list_pauses))
        .route("/api/pauses/{key}/resume", post(resume_pause))
        .route("/api/surveys/{key}/cancel", post(cancel_survey))
        .route("/api/config/invalidate", post(invalidate_config))
        .route("/api/inbound", post(inbound))
        .route("/api/block", post(block))
        .route("/api/block/{key}", delete(unblock))
        .layer(axum::extract::DefaultBodyLimit::max(16 * 1024 * 1024)) // voice notes
        .with_state(state)
}

/// Start the API server. Called from `Gateway::run()`.
pub async fn serve(gateway: Arc<Gateway>) {
    let config = gateway.api_config.clone();
    let api_key = if config.api_key.is_empty() {
        None
    } else {
        Some(config.api_key.clone())
    };

    let app = build_router(ApiState { gateway, api_key });
    let addr = format!("{}:{}", config.host, config.port);

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            error!("API server failed to bind to {addr}: {e}");
            return;
        }
    };

    info!("API server listening on {addr}");

    if let Err(e) = axum::serve(listener, app).await {
        error!("API server error: {e}");
    }
}
