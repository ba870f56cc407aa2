use axum::{
    Router,
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post, put},
};

use crate::{
    AppState,
    auth::auth_middleware,
    config::Env,
    handlers::posts,
    upload::MAX_IMAGE_BYTES,
};

/// Multipart framing and text fields on top of the image itself.
const FORM_OVERHEAD: usize = 1024 * 1024;

/// Post Router Module
///
/// Reads are public. Create, update and delete require a session; ownership
/// (or the admin role) is checked in the handler against the stored post.
///
/// `POST /test-upload` exists only in `Env::Local`, to exercise the storage
/// wiring without creating a post.
pub fn post_routes(state: &AppState) -> Router<AppState> {
    let guard = || middleware::from_fn_with_state(state.clone(), auth_middleware);

    let mut router = Router::<AppState>::new()
        .route(
            "/",
            get(posts::list_posts).merge(post(posts::create_post).route_layer(guard())),
        )
        .route(
            "/{id}",
            get(posts::get_post).merge(
                put(posts::update_post)
                    .delete(posts::delete_post)
                    .route_layer(guard()),
            ),
        );

    if state.config.env == Env::Local {
        router = router.route("/test-upload", post(posts::test_upload));
    }

    router.layer(DefaultBodyLimit::max(MAX_IMAGE_BYTES + FORM_OVERHEAD))
}
