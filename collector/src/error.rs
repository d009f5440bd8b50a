use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

/// Failures of the in-memory latest-result index.
#[derive(Debug, Error)]
pub enum CacheError {
    /// A batch referenced a host the collector does not know. Nothing was
    /// stored.
    #[error("unknown host id {0}")]
    UnknownHost(i64),

    /// A result's rtt is too large to be stored. Nothing was stored.
    #[error("rtt out of range for host id {0}")]
    RttOutOfRange(i64),

    #[error("store failure: {0:#}")]
    Store(anyhow::Error),

    #[error("cache index is not initialized")]
    Uninitialized,
}

/// Errors surfaced to HTTP clients. The body is deliberately generic; the
/// detail goes to the log.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("bad request")]
    BadRequest,

    #[error("internal error")]
    Internal,
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest => StatusCode::BAD_REQUEST,
            ApiError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<CacheError> for ApiError {
    fn from(err: CacheError) -> Self {
        match err {
            CacheError::UnknownHost(_) | CacheError::RttOutOfRange(_) => {
                tracing::warn!("Rejected batch: {}", err);
                ApiError::BadRequest
            }
            CacheError::Store(_) | CacheError::Uninitialized => {
                tracing::error!("{}", err);
                ApiError::Internal
            }
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        tracing::error!("{:#}", err);
        ApiError::Internal
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), self.to_string()).into_response()
    }
}
