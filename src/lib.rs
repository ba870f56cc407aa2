use std::time::Duration;

use axum::{
    Router,
    extract::FromRef,
    handler::HandlerWithoutStateExt,
    http::{HeaderName, HeaderValue, Method, header},
    middleware,
    routing::get,
};
use serde_json::json;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    services::ServeDir,
    set_header::SetResponseHeaderLayer,
    trace::{DefaultOnResponse, TraceLayer},
};
use tracing::{Level, Span};

// --- Module Structure ---

pub mod auth;
pub mod config;
pub mod envelope;
pub mod error;
pub mod handlers;
pub mod models;
pub mod rate_limit;
pub mod repository;
pub mod seed;
pub mod storage;
pub mod upload;

// One router module per resource, nested under `/api`.
pub mod routes;

// --- Public Re-exports ---

pub use config::{AppConfig, Env};
pub use envelope::Envelope;
pub use error::{ApiError, ApiResult};
pub use repository::{MemoryRepository, PostgresRepository, RepositoryState};
pub use storage::{LocalDiskStorage, MockStorageService, S3StorageClient, StorageState};

use handlers::{auth as auth_handlers, categories as category_handlers, posts as post_handlers};

/// ApiDoc
///
/// The OpenAPI document, served at `/api-docs/openapi.json` and browsable
/// through Swagger UI at `/swagger-ui`.
#[derive(OpenApi)]
#[openapi(
    paths(
        auth_handlers::register, auth_handlers::login, auth_handlers::get_profile,
        auth_handlers::update_profile, auth_handlers::logout, auth_handlers::list_users,
        auth_handlers::update_user_status, auth_handlers::update_user_role,
        category_handlers::list_categories, category_handlers::get_category,
        category_handlers::create_category, category_handlers::update_category,
        category_handlers::delete_category,
        post_handlers::list_posts, post_handlers::get_post, post_handlers::create_post,
        post_handlers::update_post, post_handlers::delete_post, post_handlers::test_upload,
    ),
    components(
        schemas(
            models::Role, models::Status, models::UserProfile, models::Category,
            models::CategorySummary, models::AuthorSummary, models::Post, models::Pagination,
            models::RegisterRequest, models::LoginRequest, models::UpdateProfileRequest,
            models::UpdateStatusRequest, models::UpdateRoleRequest, models::CategoryRequest,
            models::PostRequest, models::AuthData, models::UserData, models::UsersData,
            models::CategoryData, models::CategoriesData, models::PostData, models::PostsData,
            models::ImageUploadData,
        )
    ),
    tags(
        (name = "auth", description = "Registration, sessions and user administration"),
        (name = "categories", description = "Post categories"),
        (name = "posts", description = "Blog posts and their images")
    )
)]
struct ApiDoc;

/// AppState
///
/// The single, cloneable container of everything a handler needs. Shared
/// across all requests; each field is cheap to clone.
#[derive(Clone)]
pub struct AppState {
    /// Persistence: Postgres in production, `MemoryRepository` in tests.
    pub repo: RepositoryState,
    /// Object storage: S3-compatible, local disk, or the test mock.
    pub storage: StorageState,
    /// The loaded, immutable configuration.
    pub config: AppConfig,
}

// --- Axum FromRef Extractor Implementations ---

// Let extractors (e.g. `AuthUser`) pull single components out of the state.

impl FromRef<AppState> for RepositoryState {
    fn from_ref(app_state: &AppState) -> RepositoryState {
        app_state.repo.clone()
    }
}

impl FromRef<AppState> for StorageState {
    fn from_ref(app_state: &AppState) -> StorageState {
        app_state.storage.clone()
    }
}

impl FromRef<AppState> for AppConfig {
    fn from_ref(app_state: &AppState) -> AppConfig {
        app_state.config.clone()
    }
}

/// welcome
///
/// `GET /`: a pointer to the resource groups.
async fn welcome() -> Envelope<serde_json::Value> {
    Envelope::ok(
        json!({
            "auth": "/api/auth",
            "categories": "/api/categories",
            "posts": "/api/posts",
            "docs": "/swagger-ui",
        }),
        "Welcome to the Blog API",
    )
}

async fn health() -> Envelope<serde_json::Value> {
    Envelope::ok(json!({ "status": "ok" }), "ok")
}

async fn route_not_found() -> ApiError {
    ApiError::not_found("Route not found")
}

/// cors_layer
///
/// Local: anything goes. Production: only `FRONTEND_URL`, with credentials so
/// the session cookie is sent.
fn cors_layer(config: &AppConfig) -> CorsLayer {
    match config.env {
        Env::Local => CorsLayer::new()
            .allow_methods(Any)
            .allow_origin(Any)
            .allow_headers(Any),
        Env::Production => {
            let origins: Vec<HeaderValue> = config
                .frontend_url
                .iter()
                .filter_map(|url| match HeaderValue::from_str(url.trim_end_matches('/')) {
                    Ok(value) => Some(value),
                    Err(_) => {
                        tracing::warn!(%url, "FRONTEND_URL is not a valid origin; CORS will reject all origins");
                        None
                    }
                })
                .collect();

            CorsLayer::new()
                .allow_origin(AllowOrigin::list(origins))
                .allow_credentials(true)
                .allow_methods([
                    Method::GET,
                    Method::HEAD,
                    Method::PUT,
                    Method::PATCH,
                    Method::POST,
                    Method::DELETE,
                ])
                .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE, header::ACCEPT])
                .max_age(Duration::from_secs(24 * 60 * 60))
        }
    }
}

/// create_router
///
/// Assembles the routes, applies the scoped and global middleware and
/// registers the application state.
pub fn create_router(state: AppState) -> Router {
    let config = state.config.clone();
    let x_request_id = HeaderName::from_static("x-request-id");
    let uploads = storage::upload_url_prefix(&config.upload_dir);

    // 1. Routes
    let base_router = Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .route("/", get(welcome))
        .route("/health", get(health))
        .nest(
            "/api",
            routes::api_routes(&state).layer(middleware::from_fn_with_state(
                rate_limit::RateLimit::api(),
                rate_limit::rate_limit,
            )),
        )
        // Images written by the local-disk storage backend.
        .nest_service(
            &uploads,
            ServeDir::new(&config.upload_dir).fallback(route_not_found.into_service()),
        )
        .fallback(route_not_found)
        .method_not_allowed_fallback(route_not_found)
        .with_state(state);

    // 2. Error details (Local only), then security headers on every response.
    let router = base_router
        .layer(middleware::from_fn_with_state(
            config.clone(),
            error::attach_error_details,
        ))
        .layer(
            ServiceBuilder::new()
                .layer(SetResponseHeaderLayer::overriding(
                    header::X_CONTENT_TYPE_OPTIONS,
                    HeaderValue::from_static("nosniff"),
                ))
                .layer(SetResponseHeaderLayer::overriding(
                    header::X_FRAME_OPTIONS,
                    HeaderValue::from_static("DENY"),
                ))
                .layer(SetResponseHeaderLayer::overriding(
                    header::REFERRER_POLICY,
                    HeaderValue::from_static("no-referrer"),
                )),
        );

    // 3. Observability and correlation (outermost)
    router
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::new(x_request_id.clone(), MakeRequestUuid))
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(trace_span_logger)
                        .on_response(
                            DefaultOnResponse::new()
                                .level(Level::INFO)
                                .latency_unit(tower_http::LatencyUnit::Millis),
                        ),
                )
                .layer(PropagateRequestIdLayer::new(x_request_id)),
        )
        .layer(cors_layer(&config))
}

/// trace_span_logger
///
/// Span for `TraceLayer`: method, URI and the `x-request-id` set above, so
/// every log line of one request can be correlated.
fn trace_span_logger(request: &axum::http::Request<axum::body::Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("unknown");

    tracing::info_span!(
        "http_request",
        method = ?request.method(),
        uri = ?request.uri(),
        req_id = %request_id,
    )
}
