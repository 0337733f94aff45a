use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use roomcast_core::SchedulerError;
use serde::Serialize;

#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Forbidden(String),
    Conflict(String),
    Internal(String),
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_type, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, "forbidden", msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "conflict", msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "internal", msg),
        };

        let body = ErrorResponse {
            error: error_type.to_string(),
            message,
        };

        (status, Json(body)).into_response()
    }
}

impl From<SchedulerError> for ApiError {
    fn from(err: SchedulerError) -> Self {
        match err {
            SchedulerError::PeerNotExists(_) | SchedulerError::RoomNotFound(_) => {
                ApiError::NotFound(err.to_string())
            }
            SchedulerError::AlreadyJoined { .. } | SchedulerError::AlreadyInRoom(_) => {
                ApiError::Conflict(err.to_string())
            }
            SchedulerError::NotHost(_) | SchedulerError::CannotKickSelf => {
                ApiError::Forbidden(err.to_string())
            }
            SchedulerError::Disconnected(_) | SchedulerError::RoomClosed(_) => {
                ApiError::BadRequest(err.to_string())
            }
            SchedulerError::MediaBackendFailure(_) => ApiError::Internal(err.to_string()),
        }
    }
}
