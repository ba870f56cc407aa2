use blog_api::{
    AppState,
    config::{AppConfig, Env, StorageBackend},
    create_router,
    repository::{PostgresRepository, RepositoryState},
    seed::seed_defaults,
    storage::{LocalDiskStorage, S3StorageClient, StorageService, StorageState},
};
use sqlx::postgres::PgPoolOptions;
use std::{net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// main
///
/// Loads configuration, initializes logging, the database (with migrations
/// and seed data) and object storage, then serves the router.
#[tokio::main]
async fn main() {
    // 1. Configuration (fail fast on missing production secrets)
    dotenv::dotenv().ok();
    let config = AppConfig::load().expect("FATAL: Invalid configuration");

    // 2. Logging: RUST_LOG wins, otherwise debug for this crate.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "blog_api=debug,tower_http=info".into());

    match config.env {
        Env::Local => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
        Env::Production => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
    }

    tracing::info!("Application starting in {:?} mode", config.env);

    // 3. Database
    let pool = PgPoolOptions::new()
        .max_connections(config.db_max_connections)
        .connect(&config.db_url)
        .await
        .expect("FATAL: Failed to connect to Postgres. Check DATABASE_URL.");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("FATAL: Failed to run database migrations.");

    let repo = Arc::new(PostgresRepository::new(pool)) as RepositoryState;
    seed_defaults(&repo, &config).await;

    // 4. Storage
    let storage: StorageState = match config.storage_backend {
        StorageBackend::S3 => {
            let s3_client = S3StorageClient::new(
                &config.s3_endpoint,
                &config.s3_region,
                &config.s3_key,
                &config.s3_secret,
                &config.s3_bucket,
                &config.s3_public_url,
            );
            // LOCAL-ONLY: provision the MinIO bucket.
            if config.env == Env::Local {
                s3_client.ensure_bucket_exists().await;
            }
            Arc::new(s3_client)
        }
        StorageBackend::Local => {
            let disk = LocalDiskStorage::new(&config.upload_dir);
            disk.ensure_bucket_exists().await;
            Arc::new(disk)
        }
    };
    tracing::info!(backend = ?config.storage_backend, "object storage ready");

    // 5. Router and server
    let addr = format!("0.0.0.0:{}", config.port);
    let app = create_router(AppState {
        repo,
        storage,
        config,
    });

    let listener = TcpListener::bind(&addr)
        .await
        .expect("FATAL: Failed to bind the HTTP listener.");

    tracing::info!("Listening on {addr}");
    tracing::info!("API Documentation (Swagger UI) available at: http://{addr}/swagger-ui");

    // Peer addresses key the per-IP rate limits.
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .expect("FATAL: HTTP server error.");
}
