use crate::http::AppState;
use crate::supervisor::Command;
use axum::{Extension, http::StatusCode, response::IntoResponse};
use tracing::instrument;

/// `POST /check`: enqueues a priority tick and returns immediately.
#[instrument(skip(state), fields(http.route = "/check"))]
pub async fn check(Extension(state): Extension<AppState>) -> impl IntoResponse {
    if let Err(error) = state.command_tx.send(Command::PriorityTick).await {
        tracing::error!(%error, "failed to enqueue priority tick");
    }
    StatusCode::NO_CONTENT
}
