pub mod auth;
pub mod catalog;
pub mod config;
pub mod db;
pub mod error;
pub mod push;
pub mod realtime;
pub mod routes;
pub mod storage;
pub mod types;

use std::sync::Arc;

use catalog::CatalogClient;
use config::AppConfig;
use realtime::EventHub;
use storage::S3Storage;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub pool: db::Db,
    pub config: AppConfig,
    pub storage: Arc<S3Storage>,
    pub events: EventHub,
    pub catalog: CatalogClient,
}
