use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Path, Query, State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tokio::sync::broadcast::error::RecvError;
use tracing::debug;
use ulid::Ulid;

use crate::auth::Caller;
use crate::engine::{Engine, EngineError, Scope};
use crate::model::{DaySlots, Reservation, ResourceInfo, ResourceKind};
use crate::observability;
use crate::slot::SlotCode;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route(
            "/reservations",
            post(create_reservation)
                .get(list_reservations)
                .put(update_reservation),
        )
        .route("/reservations/{id}/cancel", post(cancel_reservation))
        .route("/reservations/{id}/delete", post(delete_reservation))
        .route("/availability", get(availability))
        .route("/resources", post(register_resource).get(list_resources))
        .route("/resources/{id}", delete(remove_resource))
        .route("/resources/{id}/slots", get(resource_slots))
        .route("/events", get(events_ws))
        .with_state(state)
}

// ── Errors ──────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("missing x-user-id header")]
    Unauthorized,
    #[error("admin role required")]
    AdminOnly,
    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl ApiError {
    /// Stable machine-readable label. `slot_taken` is contention, not a
    /// server fault; `store_unavailable` means the durability layer is
    /// unhealthy.
    fn label(&self) -> &'static str {
        match self {
            ApiError::Unauthorized => "unauthorized",
            ApiError::AdminOnly => "forbidden",
            ApiError::Engine(e) => match e {
                EngineError::InvalidSlot(_) => "invalid_slot",
                EngineError::ResourceNotFound(_) => "resource_not_found",
                EngineError::SlotTaken { .. } => "slot_taken",
                EngineError::NotFound(_) => "not_found",
                EngineError::Forbidden(_) => "forbidden",
                EngineError::AlreadyExists(_) => "already_exists",
                EngineError::HasActiveReservations(_) => "resource_in_use",
                EngineError::InvalidUpdate(_) => "invalid_update",
                EngineError::LimitExceeded(_) => "limit_exceeded",
                EngineError::Wal(_) => "store_unavailable",
            },
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::AdminOnly => StatusCode::FORBIDDEN,
            ApiError::Engine(e) => match e {
                EngineError::InvalidSlot(_) | EngineError::InvalidUpdate(_) => {
                    StatusCode::BAD_REQUEST
                }
                EngineError::ResourceNotFound(_) | EngineError::NotFound(_) => {
                    StatusCode::NOT_FOUND
                }
                EngineError::SlotTaken { .. }
                | EngineError::AlreadyExists(_)
                | EngineError::HasActiveReservations(_) => StatusCode::CONFLICT,
                EngineError::Forbidden(_) => StatusCode::FORBIDDEN,
                EngineError::LimitExceeded(_) => StatusCode::UNPROCESSABLE_ENTITY,
                EngineError::Wal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({ "error": self.label(), "detail": self.to_string() });
        (self.status(), Json(body)).into_response()
    }
}

fn require_admin(caller: &Caller) -> Result<(), ApiError> {
    if caller.is_admin {
        Ok(())
    } else {
        Err(ApiError::AdminOnly)
    }
}

fn rfc3339(ms: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true))
        .unwrap_or_default()
}

// ── Reservations ────────────────────────────────────────────────

#[derive(Deserialize)]
struct CreateReservationRequest {
    resource_id: Ulid,
    date: String,
    slot: SlotCode,
}

#[derive(Serialize)]
struct CreateReservationResponse {
    reservation_id: Ulid,
    start_utc: String,
    end_utc: String,
    reservation: Reservation,
}

async fn create_reservation(
    State(state): State<AppState>,
    caller: Caller,
    Json(req): Json<CreateReservationRequest>,
) -> Result<(StatusCode, Json<CreateReservationResponse>), ApiError> {
    let reservation = state
        .engine
        .create(&caller.user_id, req.resource_id, &req.date, req.slot)
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(CreateReservationResponse {
            reservation_id: reservation.id,
            start_utc: rfc3339(reservation.span.start),
            end_utc: rfc3339(reservation.span.end),
            reservation,
        }),
    ))
}

#[derive(Deserialize)]
struct ListQuery {
    #[serde(default)]
    scope: Option<String>,
    #[serde(default)]
    include_inactive: bool,
}

async fn list_reservations(
    State(state): State<AppState>,
    caller: Caller,
    Query(q): Query<ListQuery>,
) -> Result<Json<Vec<Reservation>>, ApiError> {
    let scope = match q.scope.as_deref() {
        Some("mine") => Scope::Mine(caller.user_id),
        _ => Scope::All,
    };
    Ok(Json(
        state.engine.list_reservations(scope, q.include_inactive).await,
    ))
}

async fn cancel_reservation(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Ulid>,
) -> Result<Json<Reservation>, ApiError> {
    let cancelled = state
        .engine
        .cancel(&caller.user_id, caller.is_admin, id)
        .await?;
    Ok(Json(cancelled))
}

async fn delete_reservation(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Ulid>,
) -> Result<Json<Reservation>, ApiError> {
    require_admin(&caller)?;
    Ok(Json(state.engine.hard_delete(id).await?))
}

async fn update_reservation(
    State(state): State<AppState>,
    caller: Caller,
    Json(reservation): Json<Reservation>,
) -> Result<Json<Reservation>, ApiError> {
    require_admin(&caller)?;
    Ok(Json(state.engine.update(reservation).await?))
}

// ── Availability ────────────────────────────────────────────────

#[derive(Deserialize)]
struct AvailabilityQuery {
    resource_id: Ulid,
    date: String,
    slot: SlotCode,
}

async fn availability(
    State(state): State<AppState>,
    _caller: Caller,
    Query(q): Query<AvailabilityQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let available = state
        .engine
        .availability(q.resource_id, &q.date, q.slot)
        .await?;
    Ok(Json(json!({ "available": available })))
}

#[derive(Deserialize)]
struct SlotsQuery {
    date: String,
}

async fn resource_slots(
    State(state): State<AppState>,
    _caller: Caller,
    Path(id): Path<Ulid>,
    Query(q): Query<SlotsQuery>,
) -> Result<Json<DaySlots>, ApiError> {
    Ok(Json(state.engine.resource_day_slots(id, &q.date).await?))
}

// ── Resources ───────────────────────────────────────────────────

#[derive(Deserialize)]
struct RegisterResourceRequest {
    name: String,
    kind: ResourceKind,
    #[serde(default)]
    capacity_hint: u32,
}

async fn register_resource(
    State(state): State<AppState>,
    caller: Caller,
    Json(req): Json<RegisterResourceRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    require_admin(&caller)?;
    let id = Ulid::new();
    state
        .engine
        .register_resource(id, req.name, req.kind, req.capacity_hint)
        .await?;
    Ok((StatusCode::CREATED, Json(json!({ "resource_id": id }))))
}

async fn list_resources(
    State(state): State<AppState>,
    _caller: Caller,
) -> Json<Vec<ResourceInfo>> {
    Json(state.engine.list_resources().await)
}

async fn remove_resource(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Ulid>,
) -> Result<StatusCode, ApiError> {
    require_admin(&caller)?;
    state.engine.remove_resource(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ── Push events ─────────────────────────────────────────────────

async fn health() -> &'static str {
    "OK"
}

async fn events_ws(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| push_session(state.engine, socket))
}

/// Forward every committed change to the client as a JSON text frame.
/// The envelope carries the full reservation row, so clients can filter
/// by resource locally; a lagged client skips ahead rather than
/// stalling the hub.
async fn push_session(engine: Arc<Engine>, mut socket: WebSocket) {
    let mut rx = engine.notify.subscribe();
    metrics::gauge!(observability::WS_CLIENTS_ACTIVE).increment(1.0);
    loop {
        tokio::select! {
            event = rx.recv() => match event {
                Ok(change) => {
                    let Ok(text) = serde_json::to_string(&change) else {
                        continue;
                    };
                    if socket.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    debug!("push client lagged, skipped {skipped} events");
                }
                Err(RecvError::Closed) => break,
            },
            msg = socket.recv() => match msg {
                None | Some(Ok(Message::Close(_))) | Some(Err(_)) => break,
                Some(Ok(_)) => {}
            },
        }
    }
    metrics::gauge!(observability::WS_CLIENTS_ACTIVE).decrement(1.0);
}
