use crate::http::AppState;
use axum::{Extension, Json, response::IntoResponse};
use tracing::instrument;

/// `GET /state.json`: the per-member state map, as consumed by an
/// Observer Prober on a peer daemon.
#[instrument(skip(state), fields(http.route = "/state.json"))]
pub async fn state_json(Extension(state): Extension<AppState>) -> impl IntoResponse {
    let snapshot = state.shared_state.read().await;
    Json(snapshot.cluster_state.clone())
}
