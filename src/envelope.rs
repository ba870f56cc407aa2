use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Envelope
///
/// The uniform wrapper around every JSON body this API returns, success or failure.
/// `statusCode` always mirrors the HTTP status of the response carrying it.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Envelope<T> {
    pub success: bool,
    pub message: String,
    pub data: Option<T>,
    #[serde(rename = "statusCode")]
    pub status_code: u16,
}

impl<T> Envelope<T> {
    pub fn ok(data: T, message: impl Into<String>) -> Self {
        Self::with_status(StatusCode::OK, Some(data), message)
    }

    pub fn created(data: T, message: impl Into<String>) -> Self {
        Self::with_status(StatusCode::CREATED, Some(data), message)
    }

    pub fn with_status(status: StatusCode, data: Option<T>, message: impl Into<String>) -> Self {
        Self {
            success: status.is_success(),
            message: message.into(),
            data,
            status_code: status.as_u16(),
        }
    }
}

impl Envelope<()> {
    /// A successful envelope with `data: null`.
    pub fn message(message: impl Into<String>) -> Self {
        Self::with_status(StatusCode::OK, None, message)
    }

    /// A failure envelope with `data: null`.
    pub fn failure(status: StatusCode, message: impl Into<String>) -> Self {
        Self::with_status(status, None, message)
    }
}

impl<T: Serialize> IntoResponse for Envelope<T> {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status_code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self)).into_response()
    }
}
