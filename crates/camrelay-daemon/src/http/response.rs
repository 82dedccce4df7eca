//! JSON response envelope shared by every route.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::service::RelayError;

/// `{ "code": .., "data": .., "msg": .. }`, with `code` mirroring the HTTP status.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub code: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    pub msg: String,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T, msg: impl Into<String>) -> Self {
        Self::with_status(StatusCode::OK, Some(data), msg)
    }

    pub fn with_status(status: StatusCode, data: Option<T>, msg: impl Into<String>) -> Self {
        Self {
            code: status.as_u16(),
            data,
            msg: msg.into(),
        }
    }
}

impl ApiResponse<()> {
    pub fn error(status: StatusCode, msg: impl Into<String>) -> Self {
        Self::with_status(status, None, msg)
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self)).into_response()
    }
}

impl From<RelayError> for ApiResponse<()> {
    fn from(err: RelayError) -> Self {
        let status = match err {
            RelayError::InvalidAddress(_) | RelayError::Launch(_) => StatusCode::BAD_REQUEST,
            RelayError::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
        };
        Self::error(status, err.to_string())
    }
}
