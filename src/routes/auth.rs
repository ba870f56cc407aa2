use axum::{
    Router,
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post, put},
};

use super::JSON_BODY_LIMIT;
use crate::{
    AppState,
    auth::auth_middleware,
    handlers::auth,
    rate_limit::{RateLimit, rate_limit},
};

/// Auth Router Module
///
/// `register` and `login` are public. Every other route requires a session;
/// the `/users` routes also require the admin role, checked by the
/// `AdminRole` extractor in the handler.
pub fn auth_routes(state: &AppState) -> Router<AppState> {
    let guard = || middleware::from_fn_with_state(state.clone(), auth_middleware);

    Router::<AppState>::new()
        // POST /register
        // New accounts start as `user` / `pending` and receive no token.
        .route("/register", post(auth::register))
        // POST /login
        // Issues the session token (body + HTTP-only cookie). Attempts are
        // limited per client IP on top of the `/api` budget.
        .route(
            "/login",
            post(auth::login)
                .route_layer(middleware::from_fn_with_state(RateLimit::login(), rate_limit)),
        )
        // GET/PUT /profile
        .route(
            "/profile",
            get(auth::get_profile)
                .put(auth::update_profile)
                .route_layer(guard()),
        )
        // POST /logout
        // Expires the session cookie.
        .route("/logout", post(auth::logout).route_layer(guard()))
        // --- Admin: user management ---
        .route("/users", get(auth::list_users).route_layer(guard()))
        .route(
            "/users/{id}/status",
            put(auth::update_user_status).route_layer(guard()),
        )
        .route(
            "/users/{id}/role",
            put(auth::update_user_role).route_layer(guard()),
        )
        .layer(DefaultBodyLimit::max(JSON_BODY_LIMIT))
}
