//! The error surface of the host and the uniform response envelope.

use axum::{http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;

use gitstat_core::{CacheError, GitError};
use gitstat_lib::{ConstraintError, StoreError};
use gitstat_worker::QueueError;

pub const CODE_OK: i32 = 0;
pub const CODE_BAD_REQUEST: i32 = 40001;
pub const CODE_NOT_FOUND: i32 = 40400;
pub const CODE_INTERNAL: i32 = 50000;

/// Every endpoint answers `{code, message, data}`; `code = 0` is success.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub code: i32,
    pub message: String,
    pub data: Option<T>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Json<Self> {
        Self::with_message("success", data)
    }

    pub fn with_message(message: &str, data: T) -> Json<Self> {
        Json(Self {
            code: CODE_OK,
            message: message.to_string(),
            data: Some(data),
        })
    }
}

impl ApiResponse<()> {
    pub fn empty(message: &str) -> Json<Self> {
        Json(Self {
            code: CODE_OK,
            message: message.to_string(),
            data: None,
        })
    }
}

/// The standardized error returned by the host.
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    /// Bad input: malformed URL, missing branch, invalid constraint.
    #[error("{0}")]
    Validation(String),

    /// The addressed record does not exist.
    #[error("{0}")]
    NotFound(String),

    /// The repository is not in the state the operation requires.
    #[error("{0}")]
    Precondition(String),

    #[error(transparent)]
    Constraint(#[from] ConstraintError),

    #[error(transparent)]
    Store(StoreError),

    #[error(transparent)]
    Git(#[from] GitError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error("there was an unexpected error: {0}")]
    Anyhow(#[from] anyhow::Error),
}

impl From<StoreError> for HostError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => HostError::NotFound("record not found".to_string()),
            other => HostError::Store(other),
        }
    }
}

impl HostError {
    fn status_and_code(&self) -> (StatusCode, i32) {
        match self {
            HostError::Validation(_) | HostError::Constraint(_) => {
                (StatusCode::BAD_REQUEST, CODE_BAD_REQUEST)
            }
            HostError::NotFound(_) => (StatusCode::NOT_FOUND, CODE_NOT_FOUND),
            // Surfaced as 500 on the current API surface.
            HostError::Precondition(_)
            | HostError::Store(_)
            | HostError::Git(_)
            | HostError::Cache(_)
            | HostError::Queue(_)
            | HostError::Anyhow(_) => (StatusCode::INTERNAL_SERVER_ERROR, CODE_INTERNAL),
        }
    }
}

impl IntoResponse for HostError {
    fn into_response(self) -> axum::response::Response {
        let (status, code) = self.status_and_code();
        let body = Json(ApiResponse::<()> {
            code,
            message: self.to_string(),
            data: None,
        });
        (status, body).into_response()
    }
}

pub type HostResult<T> = Result<T, HostError>;
