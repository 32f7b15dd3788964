use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde::Serialize;
use thiserror::Error;

use crate::service::proxy_vote_service::ProxyVoteError;
use crate::service::{JobError, LedgerError, ReconcileError, SourceError, StorageError};

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Internal server error")]
    InternalServerError,

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found")]
    NotFound,

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Too many requests, retry after {retry_after}s")]
    TooManyRequests { retry_after: i64 },

    #[error("Storage error: {0}")]
    StorageError(#[from] StorageError),

    #[error("Upstream error: {0}")]
    UpstreamError(#[from] SourceError),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        ApiError::BadRequest(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        ApiError::Conflict(message.into())
    }
}

impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::Storage(e) => ApiError::StorageError(e),
            LedgerError::UnknownVoteOption(_) => ApiError::BadRequest(err.to_string()),
            LedgerError::ThreadArchived(_) => ApiError::Conflict(err.to_string()),
            LedgerError::InvariantViolation(_) => ApiError::InternalServerError,
        }
    }
}

impl From<ReconcileError> for ApiError {
    fn from(err: ReconcileError) -> Self {
        match err {
            ReconcileError::Source(e) => e.into(),
            ReconcileError::Storage(e) => e.into(),
            ReconcileError::Ledger(e) => e.into(),
            ReconcileError::Cancelled => ApiError::conflict("Reconciliation cancelled"),
        }
    }
}

impl From<ProxyVoteError> for ApiError {
    fn from(err: ProxyVoteError) -> Self {
        match err {
            ProxyVoteError::Source(e) => e.into(),
            ProxyVoteError::Storage(e) => e.into(),
            ProxyVoteError::Ledger(e) => e.into(),
            ProxyVoteError::Cancelled => ApiError::conflict("Proxy voting cancelled"),
        }
    }
}

impl From<JobError> for ApiError {
    fn from(err: JobError) -> Self {
        match err {
            JobError::Busy(_) => ApiError::Conflict(err.to_string()),
            JobError::Disabled(_) => ApiError::BadRequest(err.to_string()),
            JobError::Reconcile(e) => e.into(),
            JobError::Ledger(e) => e.into(),
            JobError::Storage(e) => e.into(),
            JobError::ProxyVote(e) => e.into(),
        }
    }
}

impl From<validator::ValidationErrors> for ApiError {
    fn from(err: validator::ValidationErrors) -> Self {
        ApiError::ValidationError(err.to_string())
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    code: u16,
    details: Option<String>,
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::InternalServerError | ApiError::StorageError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::BadRequest(_) | ApiError::ValidationError(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::TooManyRequests { .. } => StatusCode::TOO_MANY_REQUESTS,
            ApiError::UpstreamError(_) => StatusCode::BAD_GATEWAY,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        let message = match self {
            ApiError::StorageError(StorageError::Database(_)) => "Database error".to_string(),
            ApiError::StorageError(_) => "Storage error".to_string(),
            ApiError::UpstreamError(_) => "Upstream service error".to_string(),
            _ => self.to_string(),
        };

        let error_response = ErrorResponse {
            error: message,
            code: status.as_u16(),
            details: Some(self.to_string()),
        };

        let mut response = HttpResponse::build(status);
        if let ApiError::TooManyRequests { retry_after } = self {
            response.insert_header(("Retry-After", retry_after.to_string()));
        }
        response.json(error_response)
    }
}
