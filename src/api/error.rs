use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use thiserror::Error;
use tracing::error;
use uuid::Uuid;

use super::models::ErrorResponse;
use crate::engine::EngineError;
use crate::links::LinkError;
use crate::requests::RequestError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("payload invalid: {0}")]
    InvalidPayload(String),
    #[error("payload too large: {0} bytes")]
    PayloadTooLarge(usize),
    #[error("resource not found: {0}")]
    NotFound(String),
    #[error("download {0} has not finished")]
    NotReady(Uuid),
    #[error("download {0} is already queued")]
    AlreadyQueued(Uuid),
    #[error("download queue is full, retry later")]
    QueueFull,
    #[error("service is shutting down")]
    ShuttingDown,
    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::InvalidPayload(_) => StatusCode::BAD_REQUEST,
            ApiError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::NotReady(_) => StatusCode::NO_CONTENT,
            ApiError::AlreadyQueued(_) => StatusCode::CONFLICT,
            ApiError::QueueFull => StatusCode::TOO_MANY_REQUESTS,
            ApiError::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::InvalidPayload(_) => "INVALID_PAYLOAD",
            ApiError::PayloadTooLarge(_) => "PAYLOAD_TOO_LARGE",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::NotReady(_) => "NOT_READY",
            ApiError::AlreadyQueued(_) => "ALREADY_QUEUED",
            ApiError::QueueFull => "QUEUE_FULL",
            ApiError::ShuttingDown => "SHUTTING_DOWN",
            ApiError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Client-facing message. Internal details stay in the log.
    fn public_message(&self) -> String {
        match self {
            ApiError::Internal(_) => "internal server error".to_string(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // 204 carries no body
        if status == StatusCode::NO_CONTENT {
            return status.into_response();
        }
        if let ApiError::Internal(detail) = &self {
            error!(error = %detail, "Request failed");
        }

        let body = ErrorResponse {
            code: self.code(),
            message: self.public_message(),
            time: Utc::now(),
        };

        (status, Json(body)).into_response()
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(value: serde_json::Error) -> Self {
        ApiError::InvalidPayload(value.to_string())
    }
}

impl From<EngineError> for ApiError {
    fn from(value: EngineError) -> Self {
        match value {
            EngineError::QueueFull => ApiError::QueueFull,
            EngineError::AlreadyQueued(id) => ApiError::AlreadyQueued(id),
            EngineError::NotFound(id) => ApiError::NotFound(format!("download {id}")),
            EngineError::NotReady(id) => ApiError::NotReady(id),
            EngineError::ShuttingDown => ApiError::ShuttingDown,
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<LinkError> for ApiError {
    fn from(value: LinkError) -> Self {
        ApiError::Internal(format!("link resolution failed: {value}"))
    }
}

impl From<RequestError> for ApiError {
    fn from(value: RequestError) -> Self {
        match value {
            RequestError::InvalidRequest(e) => ApiError::InvalidPayload(e.to_string()),
            RequestError::NotFound(id) => ApiError::NotFound(format!("request {id}")),
            RequestError::Engine(e) => e.into(),
            RequestError::Store(e) => ApiError::Internal(e.to_string()),
        }
    }
}
