use axum::{
    Router,
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post, put},
};

use super::JSON_BODY_LIMIT;
use crate::{AppState, auth::auth_middleware, handlers::categories};

/// Category Router Module
///
/// Reads are public. Writes pass the auth layer here and the admin check in
/// the handler (`AdminUser`).
pub fn category_routes(state: &AppState) -> Router<AppState> {
    let guard = || middleware::from_fn_with_state(state.clone(), auth_middleware);

    Router::<AppState>::new()
        .route(
            "/",
            get(categories::list_categories)
                .merge(post(categories::create_category).route_layer(guard())),
        )
        .route(
            "/{id}",
            get(categories::get_category).merge(
                put(categories::update_category)
                    .delete(categories::delete_category)
                    .route_layer(guard()),
            ),
        )
        .layer(DefaultBodyLimit::max(JSON_BODY_LIMIT))
}
