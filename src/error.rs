use axum::{
    Json,
    extract::{
        Request, State,
        rejection::{JsonRejection, PathRejection, QueryRejection},
    },
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde::Serialize;

use crate::{
    config::{AppConfig, Env},
    repository::RepositoryError,
    storage::StorageError,
};

/// ApiError
///
/// Every way a request can fail. Rendered as an envelope with `data: null`.
/// Internal errors keep their underlying cause out of the body; it is only
/// surfaced by `attach_error_details` when running locally.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    TooManyRequests(String),

    #[error("{message}: {detail}")]
    Internal { message: String, detail: String },
}

pub type ApiResult<T> = Result<T, ApiError>;

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized(message.into())
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn too_many_requests(message: impl Into<String>) -> Self {
        Self::TooManyRequests(message.into())
    }

    /// A 500 with a client-facing `message` and a logged `detail`.
    pub fn internal(message: impl Into<String>, detail: impl std::fmt::Display) -> Self {
        Self::Internal {
            message: message.into(),
            detail: detail.to_string(),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::TooManyRequests(_) => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<RepositoryError> for ApiError {
    fn from(err: RepositoryError) -> Self {
        ApiError::internal("Server error", err)
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        ApiError::internal("Error uploading file to storage", err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(format!("Invalid request body: {}", rejection.body_text()))
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::BadRequest(format!("Invalid query string: {}", rejection.body_text()))
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        ApiError::BadRequest(format!("Invalid path parameter: {}", rejection.body_text()))
    }
}

/// ErrorDetail
///
/// Carried in the extensions of a 500 response so the outer middleware can
/// decide whether the caller may see it.
#[derive(Debug, Clone)]
pub struct ErrorDetail {
    pub message: String,
    pub detail: String,
}

#[derive(Serialize)]
struct DetailedErrorBody {
    success: bool,
    message: String,
    data: Option<()>,
    #[serde(rename = "statusCode")]
    status_code: u16,
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        match self {
            ApiError::Internal { message, detail } => {
                tracing::error!(%detail, "{message}");
                let mut response = crate::envelope::Envelope::failure(status, &message).into_response();
                response
                    .extensions_mut()
                    .insert(ErrorDetail { message, detail });
                response
            }
            ApiError::BadRequest(message)
            | ApiError::Unauthorized(message)
            | ApiError::Forbidden(message)
            | ApiError::NotFound(message)
            | ApiError::TooManyRequests(message) => {
                tracing::debug!(status = status.as_u16(), "{message}");
                crate::envelope::Envelope::failure(status, message).into_response()
            }
        }
    }
}

/// attach_error_details
///
/// Outer middleware: in `Env::Local`, re-renders 500 envelopes with the
/// underlying cause in an extra `error` field. Production bodies stay generic.
pub async fn attach_error_details(
    State(config): State<AppConfig>,
    request: Request,
    next: Next,
) -> Response {
    let response = next.run(request).await;
    if config.env != Env::Local {
        return response;
    }
    let Some(report) = response.extensions().get::<ErrorDetail>().cloned() else {
        return response;
    };

    let status = response.status();
    let body = DetailedErrorBody {
        success: false,
        message: report.message,
        data: None,
        status_code: status.as_u16(),
        error: report.detail,
    };
    (status, Json(body)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response_status(err: ApiError) -> StatusCode {
        err.into_response().status()
    }

    #[test]
    fn maps_variants_to_statuses() {
        assert_eq!(response_status(ApiError::bad_request("x")), StatusCode::BAD_REQUEST);
        assert_eq!(response_status(ApiError::unauthorized("x")), StatusCode::UNAUTHORIZED);
        assert_eq!(response_status(ApiError::forbidden("x")), StatusCode::FORBIDDEN);
        assert_eq!(response_status(ApiError::not_found("x")), StatusCode::NOT_FOUND);
        assert_eq!(
            response_status(ApiError::too_many_requests("x")),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            response_status(ApiError::internal("x", "boom")),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn internal_errors_carry_detail_in_extensions() {
        let response = ApiError::internal("Error fetching posts", "connection reset").into_response();
        let detail = response.extensions().get::<ErrorDetail>().unwrap();
        assert_eq!(detail.message, "Error fetching posts");
        assert_eq!(detail.detail, "connection reset");
    }

    #[test]
    fn client_errors_carry_no_detail() {
        let response = ApiError::not_found("Post not found").into_response();
        assert!(response.extensions().get::<ErrorDetail>().is_none());
    }
}
