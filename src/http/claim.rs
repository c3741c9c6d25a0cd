//! `POST /claim` and `GET /claim/status`.

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::claim::ClaimError;
use crate::drip::{DripError, DripReceipt};
use crate::identity::{AuthError, Identity};
use crate::state::AppState;

use super::HttpError;

const INVALID_ADDRESS: &str = "Invalid address.";
const UNAVAILABLE: &str = "Service temporarily unavailable.";

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/claim", post(claim))
        .route("/claim/status", get(status))
}

#[derive(Debug, Deserialize)]
struct ClaimRequest {
    address: Option<String>,
    /// Sent by the web client when claiming for someone else. Not used.
    #[serde(default)]
    #[allow(dead_code)]
    others: bool,
}

#[derive(Debug, Serialize)]
struct ClaimResponse {
    claimed: String,
    tx: DripReceipt,
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    claimed: bool,
}

async fn claim(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<ClaimRequest>, JsonRejection>,
) -> Result<Json<ClaimResponse>, HttpError> {
    let identity = authenticate(&state, &headers).await?;

    let address = match body {
        Ok(Json(request)) => request.address.unwrap_or_default(),
        Err(rejection) => {
            debug!("Rejected claim body: {rejection}");
            String::new()
        }
    };
    if address.trim().is_empty() {
        return Err(HttpError::new(
            StatusCode::BAD_REQUEST,
            INVALID_ADDRESS.to_string(),
        ));
    }

    let receipt = state.claims.claim(&identity, &address).await?;
    Ok(Json(ClaimResponse {
        claimed: address,
        tx: receipt,
    }))
}

async fn status(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<StatusResponse>, HttpError> {
    let identity = authenticate(&state, &headers).await?;
    let claimed = state.claims.status(&identity).await?;
    Ok(Json(StatusResponse { claimed }))
}

async fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<Identity, HttpError> {
    Ok(state.identities.resolve(headers).await?)
}

impl From<AuthError> for HttpError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::Unauthenticated => {
                HttpError::new(StatusCode::UNAUTHORIZED, err.to_string())
            }
            AuthError::Provider(reason) => {
                warn!("Session provider unavailable: {reason}");
                HttpError::new(StatusCode::SERVICE_UNAVAILABLE, UNAVAILABLE.to_string())
            }
        }
    }
}

impl From<ClaimError> for HttpError {
    fn from(err: ClaimError) -> Self {
        match err {
            ClaimError::InvalidAddress(_) | ClaimError::Drip(DripError::UnresolvedName(_)) => {
                HttpError::new(StatusCode::BAD_REQUEST, INVALID_ADDRESS.to_string())
            }
            ClaimError::AlreadyClaimed => HttpError::new(StatusCode::BAD_REQUEST, err.to_string()),
            ClaimError::Drip(DripError::Submission { .. }) => {
                HttpError::new(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
            }
            ClaimError::Drip(DripError::Unavailable(_)) | ClaimError::Store(_) => {
                warn!("Claim dependency unavailable: {err}");
                HttpError::new(StatusCode::SERVICE_UNAVAILABLE, UNAVAILABLE.to_string())
            }
        }
    }
}
