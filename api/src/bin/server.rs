use std::sync::Arc;

use studybuddy_api::AppState;
use studybuddy_api::catalog::{self, CatalogClient};
use studybuddy_api::config::AppConfig;
use studybuddy_api::db;
use studybuddy_api::realtime::EventHub;
use studybuddy_api::routes::build_router;
use studybuddy_api::storage::S3Storage;
use tokio::time::{Duration, sleep};

const SESSION_CLEANUP_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "studybuddy_api=debug,tower_http=debug".parse().unwrap()),
        )
        .init();

    let config = AppConfig::from_env();
    tracing::info!("starting server on {}", config.listen_addr);

    let pool = db::connect(&config.database_url)
        .await
        .expect("failed to connect to database");
    db::migrate(&pool).await.expect("failed to run migrations");

    {
        let cleanup_pool = pool.clone();
        tokio::spawn(async move {
            loop {
                match db::sessions::delete_expired_sessions(&cleanup_pool).await {
                    Ok(deleted) => {
                        tracing::info!(deleted, "session cleanup finished");
                    }
                    Err(e) => {
                        tracing::warn!(
                            error = %e,
                            "session cleanup failed"
                        );
                    }
                }
                sleep(SESSION_CLEANUP_INTERVAL).await;
            }
        });
    }

    let catalog_client = CatalogClient::new(config.catalog.clone());
    {
        let refresh_pool = pool.clone();
        let client = catalog_client.clone();
        let interval = Duration::from_secs(config.catalog.refresh_hours.max(1) * 60 * 60);
        tokio::spawn(async move {
            loop {
                if let Err(e) = catalog::refresh(&refresh_pool, &client).await {
                    tracing::warn!(error = %e, "course catalog refresh failed");
                }
                sleep(interval).await;
            }
        });
    }

    let storage = Arc::new(S3Storage::new(&config).await);

    let state = AppState {
        pool,
        config: config.clone(),
        storage,
        events: EventHub::default(),
        catalog: catalog_client,
    };

    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(&config.listen_addr)
        .await
        .expect("failed to bind");
    tracing::info!("listening on {}", config.listen_addr);
    axum::serve(listener, app).await.expect("server error");
}
