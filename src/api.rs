//! # Bridge HTTP API
//!
//! Operator-facing warp routes: transfer intake, the override endpoint, and
//! the read-only views (single transaction, stuck list, recovery dashboard,
//! health). Only the override endpoint requires a bearer token; the token's
//! authority level decides which actions it may perform.

use std::convert::Infallible;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use warp::http::StatusCode;
use warp::{Filter, Rejection, Reply};

use crate::engine::BridgeEngine;
use crate::error::BridgeError;
use crate::gateway::{Authority, OverrideRequest};
use crate::types::BridgeDirection;

/// Body of a transfer intake request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferRequest {
    /// Transfer direction
    pub direction: BridgeDirection,
    /// Amount in smallest units
    pub amount: u128,
    /// Sender address on the originating chain
    pub sender: String,
    /// Recipient address on the settling chain
    pub recipient: String,
}

/// Error body returned for every failed request
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Human-readable error description
    pub error: String,
}

/// Build the full route tree for an engine
pub fn routes(
    engine: Arc<BridgeEngine>,
) -> impl Filter<Extract = (impl Reply,), Error = Infallible> + Clone {
    initiate_transfer(engine.clone())
        .or(execute_override(engine.clone()))
        .or(get_transaction(engine.clone()))
        .or(get_stuck(engine.clone()))
        .or(get_dashboard(engine.clone()))
        .or(get_health(engine))
        .recover(handle_rejection)
}

fn with_engine(
    engine: Arc<BridgeEngine>,
) -> impl Filter<Extract = (Arc<BridgeEngine>,), Error = Infallible> + Clone {
    warp::any().map(move || engine.clone())
}

/// Rejection for requests without a valid bearer token
#[derive(Debug)]
struct Unauthorized;

impl warp::reject::Reject for Unauthorized {}

/// Bearer-token authentication for the override endpoint
fn with_authority(
    engine: Arc<BridgeEngine>,
) -> impl Filter<Extract = (Authority,), Error = Rejection> + Clone {
    warp::header::optional::<String>("authorization").and_then(move |header: Option<String>| {
        let engine = engine.clone();
        async move {
            let token = header
                .as_deref()
                .and_then(|h| h.strip_prefix("Bearer "))
                .ok_or_else(|| warp::reject::custom(Unauthorized))?;
            engine
                .authority_for_token(token)
                .ok_or_else(|| warp::reject::custom(Unauthorized))
        }
    })
}

/// POST /bridge/transfers
fn initiate_transfer(
    engine: Arc<BridgeEngine>,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    warp::path!("bridge" / "transfers")
        .and(warp::post())
        .and(warp::body::json())
        .and(with_engine(engine))
        .and_then(
            |request: TransferRequest, engine: Arc<BridgeEngine>| async move {
                let tx = engine
                    .initiate_transfer(
                        request.direction,
                        request.amount,
                        request.sender,
                        request.recipient,
                    )
                    .await
                    .map_err(warp::reject::custom)?;
                Ok::<_, Rejection>(warp::reply::with_status(
                    warp::reply::json(&tx),
                    StatusCode::CREATED,
                ))
            },
        )
}

/// POST /bridge/override
fn execute_override(
    engine: Arc<BridgeEngine>,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    warp::path!("bridge" / "override")
        .and(warp::post())
        .and(with_authority(engine.clone()))
        .and(warp::body::json())
        .and(with_engine(engine))
        .and_then(
            |authority: Authority, request: OverrideRequest, engine: Arc<BridgeEngine>| async move {
                let outcome = engine
                    .execute_override(request, authority)
                    .await
                    .map_err(warp::reject::custom)?;
                Ok::<_, Rejection>(warp::reply::json(&outcome))
            },
        )
}

/// GET /bridge/transactions/:id
fn get_transaction(
    engine: Arc<BridgeEngine>,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    warp::path!("bridge" / "transactions" / String)
        .and(warp::get())
        .and(with_engine(engine))
        .and_then(|id: String, engine: Arc<BridgeEngine>| async move {
            let tx = engine.transaction(&id).await.map_err(warp::reject::custom)?;
            Ok::<_, Rejection>(warp::reply::json(&tx))
        })
}

/// GET /bridge/stuck
fn get_stuck(
    engine: Arc<BridgeEngine>,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    warp::path!("bridge" / "stuck")
        .and(warp::get())
        .and(with_engine(engine))
        .and_then(|engine: Arc<BridgeEngine>| async move {
            let stuck = engine.stuck_transactions().await;
            Ok::<_, Rejection>(warp::reply::json(&stuck))
        })
}

/// GET /bridge/dashboard
fn get_dashboard(
    engine: Arc<BridgeEngine>,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    warp::path!("bridge" / "dashboard")
        .and(warp::get())
        .and(with_engine(engine))
        .and_then(|engine: Arc<BridgeEngine>| async move {
            let dashboard = engine.dashboard().await;
            Ok::<_, Rejection>(warp::reply::json(&dashboard))
        })
}

/// GET /bridge/health
fn get_health(
    engine: Arc<BridgeEngine>,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    warp::path!("bridge" / "health")
        .and(warp::get())
        .and(with_engine(engine))
        .and_then(|engine: Arc<BridgeEngine>| async move {
            let report = engine.health_report().await;
            let status = if report.healthy {
                StatusCode::OK
            } else {
                StatusCode::SERVICE_UNAVAILABLE
            };
            Ok::<_, Rejection>(warp::reply::with_status(
                warp::reply::json(&report),
                status,
            ))
        })
}

/// Map rejections to JSON error bodies
async fn handle_rejection(err: Rejection) -> std::result::Result<impl Reply, Infallible> {
    let (status, message) = if let Some(e) = err.find::<BridgeError>() {
        (
            StatusCode::from_u16(e.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            e.to_string(),
        )
    } else if err.find::<Unauthorized>().is_some() {
        (
            StatusCode::UNAUTHORIZED,
            "missing or unrecognized bearer token".to_string(),
        )
    } else if err.is_not_found() {
        (StatusCode::NOT_FOUND, "route not found".to_string())
    } else if err.find::<warp::filters::body::BodyDeserializeError>().is_some() {
        (StatusCode::BAD_REQUEST, "malformed request body".to_string())
    } else {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            "internal error".to_string(),
        )
    };

    Ok(warp::reply::with_status(
        warp::reply::json(&ErrorResponse { error: message }),
        status,
    ))
}
