mod api_doc;
mod channel;
mod config;
mod db;
mod notification;
mod realtime;
mod routes;
mod schema_ext;

use dotenv::dotenv;
use sqlx::postgres::PgPoolOptions;
use std::{net::SocketAddr, sync::Arc};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::channel::{EventChannel, LocalChannel, RedisChannel};
use crate::config::AppConfig;
use crate::notification::aggregator::SystemClock;
use crate::notification::service::NotificationService;
use crate::notification::store::{MemoryNotificationStore, NotificationStore, PgNotificationStore};

const MAX_BIND_ATTEMPTS: u16 = 5;

async fn build_store(config: &AppConfig) -> Result<Arc<dyn NotificationStore>, Box<dyn std::error::Error>> {
    let window = config.notifications.aggregation_window;

    let database_url = match config.require_database_url() {
        Ok(url) => url,
        Err(e) => {
            warn!("{}, notifications are kept in memory only", e);
            return Ok(Arc::new(MemoryNotificationStore::new(window)));
        }
    };

    // Create connection pool
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(database_url)
        .await?;

    // Check if the database is initialized
    if !db::check_db_initialized(&pool).await {
        db::init_db(&pool).await?;
    }

    Ok(Arc::new(PgNotificationStore::new(pool, window)))
}

fn build_channel(config: &AppConfig) -> Result<Arc<dyn EventChannel>, Box<dyn std::error::Error>> {
    match config.redis_url.as_deref() {
        Some(url) => {
            info!("Initializing Redis pub/sub channel");
            Ok(Arc::new(RedisChannel::open(url)?))
        }
        None => {
            warn!("REDIS_URL not set, live delivery only reaches clients of this process");
            Ok(Arc::new(LocalChannel::new()))
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load .env file if it exists
    dotenv().ok();

    // Initialize logger
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug")),
        )
        .init();

    let config = AppConfig::from_env()?;

    let store = build_store(&config).await?;
    let channel = build_channel(&config)?;

    let notification_service = Arc::new(NotificationService::new(
        store,
        channel,
        Arc::new(SystemClock),
        config.notifications.clone(),
    ));

    // Build the router
    let app = routes::app(notification_service);

    // Try different ports
    let mut port = config.port;
    for attempt in 1..=MAX_BIND_ATTEMPTS {
        let addr = SocketAddr::from((config.host, port));
        match axum::Server::try_bind(&addr) {
            Ok(server) => {
                info!("Server started at http://{}", addr);
                info!("API Documentation: http://{}/docs", addr);
                info!(
                    "Live notifications: http://{}/api/notifications/stream?recipient_user_id=<id>",
                    addr
                );
                return server
                    .serve(app.into_make_service())
                    .await
                    .map_err(|e| e.into());
            }
            Err(e) => {
                warn!("Could not bind {}: {}", addr, e);
                if attempt == MAX_BIND_ATTEMPTS {
                    break;
                }
                port = port.checked_add(1).ok_or("Ran out of ports to try")?;
            }
        }
    }

    Err("Failed to bind to any port".into())
}
