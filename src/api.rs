//! HTTP API for event intake and dashboard projections.
//!
//! Inbound messages, lead/stage events and bookings come in here; the
//! dashboard reads its projections from here. Spawned as a background task
//! by `Engine::run`, next to the dispatch loop.

use crate::engine::Engine;
use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::Json,
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use leadflow_core::{
    config::ApiConfig,
    error::LeadflowError,
    message::{BookingRequest, InboundMessage},
    model::{LeadFilter, Transition},
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info};

type ApiError = (StatusCode, Json<Value>);

/// Delivery attempts shown in a lead's detail view.
const RECENT_DELIVERIES: i64 = 20;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    engine: Arc<Engine>,
    api_key: Option<String>,
    uptime: Instant,
}

#[derive(Debug, Deserialize)]
struct RegisterRequest {
    phone: String,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RescheduleRequest {
    appointment_date: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct DashboardQuery {
    #[serde(default = "default_recent")]
    recent: i64,
}

fn default_recent() -> i64 {
    10
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

/// Check bearer token auth. Returns `None` if authorized, `Some(response)` if rejected.
fn check_auth(headers: &HeaderMap, api_key: &Option<String>) -> Option<ApiError> {
    let key = match api_key {
        Some(k) => k,
        None => return None, // No auth configured, allow all.
    };

    let header = match headers.get("authorization") {
        Some(h) => h,
        None => {
            return Some((
                StatusCode::UNAUTHORIZED,
                Json(json!({"error": "missing Authorization header"})),
            ));
        }
    };

    let value = match header.to_str() {
        Ok(v) => v,
        Err(_) => {
            return Some((
                StatusCode::UNAUTHORIZED,
                Json(json!({"error": "invalid Authorization header"})),
            ));
        }
    };

    match value.strip_prefix("Bearer ") {
        Some(token) if constant_time_eq(token, key) => None,
        _ => Some((
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": "invalid token"})),
        )),
    }
}

/// Map an engine error onto a status code.
fn engine_error(e: LeadflowError) -> ApiError {
    let status = match &e {
        LeadflowError::NotFound(_) => StatusCode::NOT_FOUND,
        LeadflowError::InvalidTransition(_) => StatusCode::CONFLICT,
        LeadflowError::InvalidInput(_) | LeadflowError::UnknownStage(_) => {
            StatusCode::BAD_REQUEST
        }
        _ => {
            error!("api: {e}");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (status, Json(json!({"error": e.to_string()})))
}

fn parse_body<T>(body: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    body.map(|Json(v)| v).map_err(|e| {
        (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": format!("invalid request: {e}")})),
        )
    })
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<Json<Value>, ApiError> {
    serde_json::to_value(value)
        .map(Json)
        .map_err(|e| engine_error(LeadflowError::Serialization(e)))
}

/// `GET /api/health`
async fn health(
    headers: HeaderMap,
    State(state): State<ApiState>,
) -> Result<Json<Value>, ApiError> {
    if let Some(err) = check_auth(&headers, &state.api_key) {
        return Err(err);
    }

    Ok(Json(json!({
        "status": "ok",
        "uptime_secs": state.uptime.elapsed().as_secs(),
        "transport": state.engine.transport_name(),
    })))
}

/// `POST /api/inbound`: one classified customer message.
async fn inbound(
    headers: HeaderMap,
    State(state): State<ApiState>,
    body: Result<Json<InboundMessage>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    if let Some(err) = check_auth(&headers, &state.api_key) {
        return Err(err);
    }
    let msg = parse_body(body)?;
    let outcome = state
        .engine
        .handle_inbound(&msg, Utc::now())
        .await
        .map_err(engine_error)?;
    to_json(&outcome)
}

/// `POST /api/leads`: register a lead. 201 when new, 200 when already known.
async fn register_lead(
    headers: HeaderMap,
    State(state): State<ApiState>,
    body: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    if let Some(err) = check_auth(&headers, &state.api_key) {
        return Err(err);
    }
    let req = parse_body(body)?;
    let (lead, schedule) = state
        .engine
        .register_lead(&req.phone, req.name.as_deref(), Utc::now())
        .await
        .map_err(engine_error)?;
    let status = if schedule.is_some() {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(json!({"lead": lead, "schedule": schedule}))))
}

/// `POST /api/leads/{phone}/stage`: body is a transition, e.g. `{"kind":"next"}`.
async fn change_stage(
    headers: HeaderMap,
    State(state): State<ApiState>,
    Path(phone): Path<String>,
    body: Result<Json<Transition>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    if let Some(err) = check_auth(&headers, &state.api_key) {
        return Err(err);
    }
    let transition = parse_body(body)?;
    let change = state
        .engine
        .advance_stage(&phone, &transition, Utc::now())
        .await
        .map_err(engine_error)?;
    to_json(&change)
}

/// `POST /api/leads/{phone}/stop`
async fn stop_follow_ups(
    headers: HeaderMap,
    State(state): State<ApiState>,
    Path(phone): Path<String>,
) -> Result<Json<Value>, ApiError> {
    if let Some(err) = check_auth(&headers, &state.api_key) {
        return Err(err);
    }
    let deactivated = state
        .engine
        .stop_follow_ups(&phone, Utc::now())
        .await
        .map_err(engine_error)?;
    Ok(Json(json!({"status": "stopped", "deactivated": deactivated})))
}

/// `POST /api/leads/{phone}/resume`
async fn resume_follow_ups(
    headers: HeaderMap,
    State(state): State<ApiState>,
    Path(phone): Path<String>,
) -> Result<Json<Value>, ApiError> {
    if let Some(err) = check_auth(&headers, &state.api_key) {
        return Err(err);
    }
    state
        .engine
        .resume_follow_ups(&phone, Utc::now())
        .await
        .map_err(engine_error)?;
    Ok(Json(json!({"status": "resumed"})))
}

/// `POST /api/appointments`
async fn book_appointment(
    headers: HeaderMap,
    State(state): State<ApiState>,
    body: Result<Json<BookingRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    if let Some(err) = check_auth(&headers, &state.api_key) {
        return Err(err);
    }
    let req = parse_body(body)?;
    let outcome = state
        .engine
        .book_appointment(&req, Utc::now())
        .await
        .map_err(engine_error)?;
    Ok((StatusCode::CREATED, to_json(&outcome)?))
}

/// `POST /api/appointments/{id}/cancel`
async fn cancel_appointment(
    headers: HeaderMap,
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    if let Some(err) = check_auth(&headers, &state.api_key) {
        return Err(err);
    }
    let deactivated = state
        .engine
        .cancel_appointment(&id, Utc::now())
        .await
        .map_err(engine_error)?;
    Ok(Json(json!({"status": "cancelled", "deactivated_reminders": deactivated})))
}

/// `POST /api/appointments/{id}/reschedule`
async fn reschedule_appointment(
    headers: HeaderMap,
    State(state): State<ApiState>,
    Path(id): Path<String>,
    body: Result<Json<RescheduleRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    if let Some(err) = check_auth(&headers, &state.api_key) {
        return Err(err);
    }
    let req = parse_body(body)?;
    let outcome = state
        .engine
        .reschedule_appointment(&id, req.appointment_date, Utc::now())
        .await
        .map_err(engine_error)?;
    to_json(&outcome)
}

/// `GET /api/dashboard?recent=N`
async fn dashboard(
    headers: HeaderMap,
    State(state): State<ApiState>,
    Query(query): Query<DashboardQuery>,
) -> Result<Json<Value>, ApiError> {
    if let Some(err) = check_auth(&headers, &state.api_key) {
        return Err(err);
    }
    let store = state.engine.store();
    let snapshot = store.dashboard(query.recent).await.map_err(engine_error)?;
    let upcoming = store.upcoming_follow_ups(query.recent).await.map_err(engine_error)?;
    let analytics = store.follow_up_analytics().await.map_err(engine_error)?;
    Ok(Json(json!({
        "snapshot": snapshot,
        "upcoming_follow_ups": upcoming,
        "follow_up_analytics": analytics,
    })))
}

/// `GET /api/leads?stage=..&qualified=..&appointment_booked=..&order=..&limit=..`
async fn list_leads(
    headers: HeaderMap,
    State(state): State<ApiState>,
    Query(filter): Query<LeadFilter>,
) -> Result<Json<Value>, ApiError> {
    if let Some(err) = check_auth(&headers, &state.api_key) {
        return Err(err);
    }
    let leads = state
        .engine
        .store()
        .list_leads(&filter)
        .await
        .map_err(engine_error)?;
    Ok(Json(json!({"leads": leads})))
}

/// `GET /api/leads/{phone}`: lead, ledger, follow-ups, responses,
/// appointments and recent delivery attempts.
async fn lead_detail(
    headers: HeaderMap,
    State(state): State<ApiState>,
    Path(phone): Path<String>,
) -> Result<Json<Value>, ApiError> {
    if let Some(err) = check_auth(&headers, &state.api_key) {
        return Err(err);
    }
    let store = state.engine.store();
    let detail = store
        .lead_detail(&phone)
        .await
        .map_err(engine_error)?
        .ok_or_else(|| engine_error(LeadflowError::NotFound(format!("lead {phone}"))))?;
    let responses = store.responses_for_lead(&phone).await.map_err(engine_error)?;
    let appointments = store
        .appointments_for_lead(&phone)
        .await
        .map_err(engine_error)?;
    let deliveries = state
        .engine
        .delivery_log()
        .attempts_for_lead(&phone, RECENT_DELIVERIES)
        .await
        .map_err(engine_error)?;
    Ok(Json(json!({
        "lead": detail.lead,
        "history": detail.history,
        "follow_ups": detail.follow_ups,
        "responses": responses,
        "appointments": appointments,
        "deliveries": deliveries,
    })))
}

/// Build the axum router with shared state.
fn build_router(state: ApiState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/inbound", post(inbound))
        .route("/api/leads", get(list_leads).post(register_lead))
        .route("/api/leads/{phone}", get(lead_detail))
        .route("/api/leads/{phone}/stage", post(change_stage))
        .route("/api/leads/{phone}/stop", post(stop_follow_ups))
        .route("/api/leads/{phone}/resume", post(resume_follow_ups))
        .route("/api/appointments", post(book_appointment))
        .route("/api/appointments/{id}/cancel", post(cancel_appointment))
        .route(
            "/api/appointments/{id}/reschedule",
            post(reschedule_appointment),
        )
        .route("/api/dashboard", get(dashboard))
        .layer(axum::extract::DefaultBodyLimit::max(1024 * 1024)) // 1 MB max request body
        .with_state(state)
}

/// Start the API server. Called from `Engine::run()`.
pub async fn serve(config: ApiConfig, engine: Arc<Engine>) {
    let api_key = if config.api_key.is_empty() {
        None
    } else {
        Some(config.api_key.clone())
    };

    let state = ApiState {
        engine,
        api_key,
        uptime: Instant::now(),
    };

    let app = build_router(state);
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
