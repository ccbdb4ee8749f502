use crate::model::{AggregateStatistics, HistoryResponse, VerifierStatus};
use crate::orchestrator::RelayHandle;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use tracing::error;

#[derive(Debug, Clone)]
struct AppState {
    relay: RelayHandle,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    limit: Option<usize>,
}

pub fn create_router(relay: RelayHandle) -> Router {
    let state = AppState { relay };

    Router::new()
        .route("/api/v1/telemetry", get(get_history))
        .route("/api/v1/telemetry/latest", get(get_latest))
        .route("/api/v1/telemetry/stats", get(get_statistics))
        .route("/api/v1/verifier", get(get_verifier))
        .with_state(state)
}

async fn get_history(
    State(state): State<AppState>,
    Query(params): Query<HistoryQuery>,
) -> Result<Json<HistoryResponse>, AppError> {
    Ok(Json(state.relay.history(params.limit).await?))
}

async fn get_latest(State(state): State<AppState>) -> Result<Response, AppError> {
    Ok(match state.relay.latest().await? {
        Some(record) => Json(record).into_response(),
        None => (StatusCode::NOT_FOUND, "No telemetry received yet").into_response(),
    })
}

async fn get_statistics(State(state): State<AppState>) -> Result<Json<AggregateStatistics>, AppError> {
    Ok(Json(state.relay.statistics().await?))
}

async fn get_verifier(State(state): State<AppState>) -> Result<Json<VerifierStatus>, AppError> {
    let connected = state.relay.verifier_connected().await?;
    Ok(Json(VerifierStatus { connected }))
}

struct AppError(anyhow::Error);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        error!("API error: {}", self.0);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Internal server error: {}", self.0),
        )
            .into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}
