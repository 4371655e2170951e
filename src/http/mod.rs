//! Status server (§6): `GET /state.json` for the Observer Prober, `POST
//! /check` to force an immediate tick. Anything else falls through to
//! axum's default 404.

use crate::config::Config;
use crate::monitor::PublishedState;
use crate::supervisor::Command;
use anyhow::{Context, Result};
use axum::{
    Extension, Router,
    body::Body,
    http::{HeaderName, HeaderValue, Request},
    routing::{get, post},
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{RwLock, mpsc};
use tokio::task::JoinHandle;
use tower::ServiceBuilder;
use tower_http::{request_id::PropagateRequestIdLayer, set_header::SetRequestHeaderLayer, trace::TraceLayer};
use tracing::{Span, debug_span, info};
use ulid::Ulid;

mod handlers;

#[derive(Clone)]
pub struct AppState {
    pub shared_state: Arc<RwLock<PublishedState>>,
    pub command_tx: mpsc::Sender<Command>,
}

/// Binds the status server and returns a handle to the background task.
///
/// # Errors
///
/// Returns an error if the configured address cannot be bound.
pub async fn spawn(config: Arc<RwLock<Config>>, shared_state: Arc<RwLock<PublishedState>>, command_tx: mpsc::Sender<Command>) -> Result<JoinHandle<()>> {
    let (bind_address, port) = {
        let cfg = config.read().await;
        (cfg.http_address.clone().unwrap_or_else(|| "::0".to_string()), cfg.http_port)
    };

    let state = AppState { shared_state, command_tx };

    let app = Router::new()
        .route("/state.json", get(handlers::state_json))
        .route("/check", post(handlers::check))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestHeaderLayer::if_not_present(
                    HeaderName::from_static("x-request-id"),
                    |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
                ))
                .layer(PropagateRequestIdLayer::new(HeaderName::from_static("x-request-id")))
                .layer(TraceLayer::new_for_http().make_span_with(make_span))
                .layer(Extension(state)),
        );

    let listener = TcpListener::bind(format!("{bind_address}:{port}"))
        .await
        .with_context(|| format!("binding status server to {bind_address}:{port}"))?;

    info!(bind_address, port, "status server listening");

    Ok(tokio::spawn(async move {
        if let Err(error) = axum::serve(listener, app.into_make_service()).await {
            tracing::error!(%error, "status server stopped unexpectedly");
        }
    }))
}

fn make_span(request: &Request<Body>) -> Span {
    let headers = request.headers();
    let path = request.uri().path();
    let request_id = headers.get("x-request-id").and_then(|val| val.to_str().ok()).unwrap_or("none");

    debug_span!("http-request", path, ?headers, request_id)
}
