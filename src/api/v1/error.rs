use crate::api::v1::handler::ApiResponse;
use crate::application_port::*;
use serde::Serialize;
use std::convert::Infallible;
use thiserror::Error;
use tracing::{debug, error, warn};
use warp::http::StatusCode;
use warp::{Rejection, reject};

pub async fn recover_error(err: Rejection) -> Result<impl warp::Reply, Infallible> {
    let (code, message) = if let Some(code) = err.find::<ApiErrorCode>() {
        (code.clone(), code.to_string())
    } else if err.is_not_found() {
        (ApiErrorCode::NotFound, ApiErrorCode::NotFound.to_string())
    } else if let Some(e) = err.find::<warp::body::BodyDeserializeError>() {
        debug!("rejected request body: {}", e);
        (ApiErrorCode::BadRequest, ApiErrorCode::BadRequest.to_string())
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        (ApiErrorCode::NotFound, ApiErrorCode::NotFound.to_string())
    } else {
        error!("Unhandled rejection: {:?}", err);
        (
            ApiErrorCode::InternalError,
            ApiErrorCode::InternalError.to_string(),
        )
    };

    let json = warp::reply::json(&ApiResponse::<()>::err(code.clone(), message));
    Ok(warp::reply::with_status(json, code.status()))
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub code: ApiErrorCode,
    pub message: String,
}

#[derive(Debug, Clone, Error, Serialize)]
pub enum ApiErrorCode {
    #[error("Authentication failed")]
    Unauthorized,
    #[error("Malformed request")]
    BadRequest,
    #[error("Request body too large")]
    PayloadTooLarge,
    #[error("Not found")]
    NotFound,
    #[error("Service temporarily unavailable")]
    StorageUnavailable,
    #[error("Internal error")]
    InternalError,
}

impl ApiErrorCode {
    pub fn internal<E: std::fmt::Display>(error: E) -> ApiErrorCode {
        warn!("Internal error: {}", error);
        ApiErrorCode::InternalError
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiErrorCode::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiErrorCode::BadRequest => StatusCode::BAD_REQUEST,
            ApiErrorCode::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ApiErrorCode::NotFound => StatusCode::NOT_FOUND,
            ApiErrorCode::StorageUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ApiErrorCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl reject::Reject for ApiErrorCode {}

impl From<AuthError> for ApiErrorCode {
    fn from(error: AuthError) -> Self {
        match error {
            // the client never learns which check failed
            e if e.is_credential_failure() => {
                debug!("credential rejected: {}", e);
                ApiErrorCode::Unauthorized
            }
            AuthError::StorageUnavailable(e) => {
                warn!("storage unavailable: {}", e);
                ApiErrorCode::StorageUnavailable
            }
            e => ApiErrorCode::internal(e),
        }
    }
}
