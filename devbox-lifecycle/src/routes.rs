use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use serde::Serialize;
use tracing::Instrument;
use uuid::Uuid;

use crate::reply::{Reply, StopResponse};
use crate::start::StartHandler;
use crate::stop::{StopEvent, StopHandler};

pub struct AppState {
    pub start: StartHandler,
    pub stop: Arc<StopHandler>,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/start", get(start_instance).post(start_instance))
        .route("/stop", post(stop_instance))
        .with_state(state)
}

fn respond<T: Serialize>(reply: Reply<T>) -> Response {
    let status = StatusCode::from_u16(reply.status_code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(reply.body)).into_response()
}

async fn health() -> &'static str {
    "ok"
}

async fn start_instance(State(state): State<Arc<AppState>>) -> Response {
    let span = tracing::info_span!("invocation", id = %Uuid::new_v4(), route = "start");
    respond(state.start.handle().instrument(span).await)
}

async fn stop_instance(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let span = tracing::info_span!("invocation", id = %Uuid::new_v4(), route = "stop");
    let event = if body.iter().all(u8::is_ascii_whitespace) {
        StopEvent::default()
    } else {
        match serde_json::from_slice::<StopEvent>(&body) {
            Ok(event) => event,
            Err(e) => {
                return respond(Reply::with_status(
                    400,
                    StopResponse::error(format!("invalid event: {}", e)),
                ))
            }
        }
    };
    respond(state.stop.handle(event).instrument(span).await)
}
