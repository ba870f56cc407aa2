use axum::extract::{FromRequest, FromRequestParts};

use crate::error::ApiError;

pub mod auth;
pub mod categories;
pub mod posts;

/// ApiJson
///
/// `axum::Json` whose rejection is a 400 envelope instead of axum's plain-text body.
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(ApiError))]
pub struct ApiJson<T>(pub T);

/// ApiPath
///
/// `axum::extract::Path` with an envelope rejection (e.g. a malformed uuid).
#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Path), rejection(ApiError))]
pub struct ApiPath<T>(pub T);

/// ApiQuery
#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Query), rejection(ApiError))]
pub struct ApiQuery<T>(pub T);

/// Trims a text field, treating blank as absent.
pub(crate) fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
