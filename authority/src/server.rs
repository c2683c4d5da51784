//! REST surface through which nodes discover and fund themselves.
//!
//! | Route | Request | Response |
//! |---|---|---|
//! | `GET /` | | `{message}` |
//! | `GET /status` | | [Status] |
//! | `POST /faucet` | [FaucetRequest] | [FaucetResponse] |
//! | `GET /contract` | | [anchor_ledger::artifact::DeployedContract] |
//! | `GET /balance` | [BalanceRequest] | [BalanceResponse] |
//!
//! Every failure is answered with a 500 and an [ErrorResponse].

use crate::{Authority, Error};
use anchor_ledger::{
    artifact::DeployedContract,
    gateway::Rpc,
    signal::Signal,
    wire::{BalanceRequest, BalanceResponse, ErrorResponse, FaucetRequest, FaucetResponse, Status},
};
use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    serve, Extension, Json, Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};

/// Failure of a request, always answered with a 500.
struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self(Error::InvalidRequest(rejection.body_text()))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        warn!(error = %self.0, "request failed");
        let body = ErrorResponse {
            error: self.0.to_string(),
        };
        (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
    }
}

async fn root() -> Json<Value> {
    Json(json!({ "message": "authority up and running" }))
}

async fn status<R: Rpc>(Extension(authority): Extension<Arc<Authority<R>>>) -> Json<Status> {
    Json(authority.status())
}

async fn faucet<R: Rpc>(
    Extension(authority): Extension<Arc<Authority<R>>>,
    request: Result<Json<FaucetRequest>, JsonRejection>,
) -> Result<Json<FaucetResponse>, ApiError> {
    let Json(request) = request?;
    Ok(Json(authority.fund(request.address).await?))
}

async fn contract<R: Rpc>(
    Extension(authority): Extension<Arc<Authority<R>>>,
) -> Result<Json<DeployedContract>, ApiError> {
    Ok(Json(authority.contract()?))
}

async fn balance<R: Rpc>(
    Extension(authority): Extension<Arc<Authority<R>>>,
    request: Result<Json<BalanceRequest>, JsonRejection>,
) -> Result<Json<BalanceResponse>, ApiError> {
    let Json(request) = request?;
    Ok(Json(authority.balance(request.address).await?))
}

/// Build the router for `authority`.
pub fn router<R: Rpc>(authority: Arc<Authority<R>>) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/status", get(status::<R>))
        .route("/faucet", post(faucet::<R>))
        .route("/contract", get(contract::<R>))
        .route("/balance", get(balance::<R>))
        .layer(Extension(authority))
}

/// Serve `authority` on `listener` until `stopped` resolves.
pub async fn serve_until<R: Rpc>(
    authority: Arc<Authority<R>>,
    listener: TcpListener,
    stopped: Signal,
) -> Result<(), Error> {
    let address = listener.local_addr()?;
    info!(%address, "serving");
    serve(listener, router(authority).into_make_service())
        .with_graceful_shutdown(stopped)
        .await?;
    info!("server stopped");
    Ok(())
}
