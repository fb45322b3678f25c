//! HTTP surface of the gateway.
//!
//! - `GET /recommend/{userId}` → `200 {"recommendations": [...]}`
//! - `GET /health` → `200 {"status": "ok"}`
//!
//! Each recommendation runs on its own task, so a request that has reached
//! the model completes (and is recorded) even if the client goes away.

use std::future::Future;
use std::net::SocketAddr;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use data_loader::UserId;

use crate::gateway::{GatewayError, RecommendationGateway, RecommendationResponse};

/// Errors returned to HTTP clients
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("User id must be a positive integer, got {0:?}")]
    InvalidUserId(String),

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error("Request task failed: {0}")]
    Internal(String),
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::InvalidUserId(_) => StatusCode::BAD_REQUEST,
            ApiError::Gateway(GatewayError::ModelUnavailable { .. }) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Gateway(GatewayError::Registry(_)) | ApiError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, Json(ErrorBody { error: self.to_string() })).into_response()
    }
}

/// Parse a path segment as a positive user id
pub fn parse_user_id(raw: &str) -> Result<UserId, ApiError> {
    match raw.parse::<UserId>() {
        Ok(id) if id > 0 => Ok(id),
        _ => Err(ApiError::InvalidUserId(raw.to_string())),
    }
}

pub fn router(gateway: RecommendationGateway) -> Router {
    Router::new()
        .route("/recommend/:user_id", get(recommend))
        .route("/health", get(health))
        .with_state(gateway)
}

async fn recommend(
    State(gateway): State<RecommendationGateway>,
    Path(raw_user_id): Path<String>,
) -> Result<Json<RecommendationResponse>, ApiError> {
    let user_id = parse_user_id(&raw_user_id)?;

    let served = tokio::spawn(async move { gateway.recommend(user_id).await })
        .await
        .map_err(|e| {
            error!("Recommendation task for user {} failed: {}", user_id, e);
            ApiError::Internal(e.to_string())
        })??;

    Ok(Json(served.response()))
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

/// Serve `gateway` on `addr` until `shutdown` resolves, then drain the
/// recorders.
pub async fn serve(
    gateway: RecommendationGateway,
    addr: SocketAddr,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    serve_on(gateway, listener, shutdown).await
}

/// Like [`serve`] on an already bound listener
pub async fn serve_on(
    gateway: RecommendationGateway,
    listener: TcpListener,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    info!("Gateway listening on {}", listener.local_addr()?);

    let app = router(gateway.clone());
    let result = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await;
    if let Err(e) = &result {
        warn!("HTTP server stopped with error: {}", e);
    }

    let stats = gateway.shutdown().await;
    info!(
        "Gateway stopped: {} provenance records written, {} dropped",
        stats.provenance.written, stats.provenance.dropped
    );
    result
}
