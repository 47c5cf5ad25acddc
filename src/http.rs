//! HTTP endpoints used by the client apps to register their push tokens.

use std::{future::Future, net::SocketAddr, sync::Arc};
use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

use crate::compartments::{CompartmentId, Volume};
use crate::notifier::{NotificationOutcome, Notifier};
use crate::recipients::{is_valid_address, Recipient, RecipientDirectory};
use crate::time::{LastSeenDuration, Timestamp};

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({ "success": false, "error": self.to_string() }))).into_response()
    }
}

#[derive(Clone)]
pub struct AppState {
    pub directory: Arc<dyn RecipientDirectory>,
    pub notifier: Arc<Notifier>,
}

pub fn router(state: AppState, enable_trigger_endpoint: bool) -> Router {
    let router = Router::new()
        .route("/register-token", post(register_token))
        .route("/check-tokens", get(check_tokens))
        .route("/compartments", get(compartments));

    let router = if enable_trigger_endpoint {
        router.route("/trigger-check", post(trigger_check))
    } else {
        router
    };

    router.with_state(state)
}

pub async fn serve<F>(router: Router, port: u16, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let address = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(address).await?;
    log::info!("HTTP server listening on {}", address);
    axum::serve(listener, router).with_graceful_shutdown(shutdown).await
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct RegisterTokenRequest {
    token: Option<String>,
    user_id: Option<String>,
}

async fn register_token(
    State(state): State<AppState>,
    payload: Result<Json<RegisterTokenRequest>, JsonRejection>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let Json(request) = payload.map_err(|rejection| ApiError::BadRequest(rejection.body_text()))?;

    let non_blank = |field: Option<String>| field.map(|value| value.trim().to_owned()).filter(|value| !value.is_empty());
    let (token, user_id) = match (non_blank(request.token), non_blank(request.user_id)) {
        (Some(token), Some(user_id)) => (token, user_id),
        _ => return Err(ApiError::BadRequest("Token dan userId wajib diisi".to_owned())),
    };

    if !is_valid_address(&token) {
        return Err(ApiError::BadRequest(format!("Token tidak valid: {:?}", token)));
    }

    state.directory.register(Recipient::new(user_id, token)).await.map_err(|error| {
        log::error!("{}", error);
        ApiError::Internal("Gagal menyimpan token".to_owned())
    })?;

    Ok(Json(json!({ "success": true })))
}

async fn check_tokens(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    let recipients = state.directory.recipients().await.map_err(|error| {
        log::error!("{}", error);
        ApiError::Internal("Gagal membaca token".to_owned())
    })?;

    if recipients.is_empty() {
        return Err(ApiError::NotFound("Tidak ada token tersimpan".to_owned()));
    }

    Ok(Json(json!({ "success": true, "tokens": recipients })))
}

async fn trigger_check(State(state): State<AppState>) -> Json<serde_json::Value> {
    let reports = state.notifier.run_now().await;
    let delivered = reports.iter().filter(|report| matches!(
        &report.outcome,
        NotificationOutcome::Dispatched { outcome, .. } if outcome.is_delivered()
    )).count();
    Json(json!({ "success": true, "notified": reports.len(), "delivered": delivered }))
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct CompartmentStatus {
    id: CompartmentId,
    display_name: String,
    last_volume: Option<Volume>,
    last_notified_at: Option<Timestamp>,
    last_notified_ago: Option<String>,
}

async fn compartments(State(state): State<AppState>) -> Json<serde_json::Value> {
    let now = Timestamp::now();
    let statuses: Vec<CompartmentStatus> = state.notifier.states().await.into_iter()
        .map(|(id, compartment_state)| CompartmentStatus {
            display_name: id.display_name(),
            id,
            last_volume: compartment_state.last_volume,
            last_notified_ago: compartment_state.last_notified_at
                .map(|notified_at| LastSeenDuration::between(&notified_at, &now).to_string()),
            last_notified_at: compartment_state.last_notified_at,
        })
        .collect();

    Json(json!({
        "success": true,
        "threshold": state.notifier.evaluator().threshold(),
        "compartments": statuses,
    }))
}
