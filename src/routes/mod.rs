/// Router Module Index
///
/// One module per resource, each nested under `/api`. Access control is
/// applied per method: protected methods carry the `auth_middleware` route
/// layer, admin-only handlers additionally extract `AdminUser`.
use axum::Router;

use crate::AppState;

/// `/api/auth`: registration, login, profile and user administration.
pub mod auth;

/// `/api/categories`: public reads, admin writes.
pub mod categories;

/// `/api/posts`: public reads, owner-or-admin writes, image uploads.
pub mod posts;

/// Body limit of the JSON-only route groups.
pub const JSON_BODY_LIMIT: usize = 10 * 1024;

/// api_routes
///
/// Everything served under `/api`.
pub fn api_routes(state: &AppState) -> Router<AppState> {
    Router::new()
        .nest("/auth", auth::auth_routes(state))
        .nest("/categories", categories::category_routes(state))
        .nest("/posts", posts::post_routes(state))
}
