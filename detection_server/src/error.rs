use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use inference_common::error::{PipelineError, RecordError};
use serde::Serialize;
use thiserror::Error;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    UnprocessableMedia(String),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::UnprocessableMedia(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::UnreadableMedia { .. } => Self::UnprocessableMedia(err.to_string()),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<RecordError> for ApiError {
    fn from(err: RecordError) -> Self {
        Self::Internal(err.to_string())
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!("{self}");
        }
        (status, Json(ErrorResponse { error: self.to_string() })).into_response()
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;

    #[test]
    fn test_status_mapping() {
        let unreadable: ApiError = PipelineError::unreadable(Path::new("a.mp4"), "garbage").into();
        assert_eq!(unreadable.status_code(), StatusCode::UNPROCESSABLE_ENTITY);

        let encode: ApiError = PipelineError::encode("disk full").into();
        assert_eq!(encode.status_code(), StatusCode::INTERNAL_SERVER_ERROR);

        assert_eq!(
            ApiError::bad_request("No selected file").status_code(),
            StatusCode::BAD_REQUEST
        );
    }
}
