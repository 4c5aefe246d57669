use std::sync::Arc;

use embedstore::{
    logger::{self, LoggerConfig},
    server::{self, AppState},
    Config, StoreClient, VectorRecordService,
};

const DEFAULT_PORT: u16 = 8080;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let env_loaded = dotenv::dotenv().is_ok();

    logger::init_with_config(LoggerConfig::from_env())?;

    if env_loaded {
        log::info!("✅ .env file loaded successfully");
    } else {
        log::warn!("⚠️  No .env file found, using system environment variables");
    }

    let config = Config::from_env();
    let port = config.port.unwrap_or(DEFAULT_PORT);
    logger::log_startup_info(
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        &config.host,
        port,
    );
    logger::log_config_info(&config);

    let client = Arc::new(StoreClient::new(config.clone()));
    log::info!("🔄 Connecting to storage backend...");
    let store = match client.connect().await {
        Ok(store) => {
            log::info!("✅ Storage backend ready");
            store
        }
        Err(e) => {
            log::error!("❌ Failed to connect to storage backend: {}", e);
            return Err(e.into());
        }
    };

    let service = VectorRecordService::new(store, &config);
    let server = server::serve(AppState::new(service, Arc::clone(&client)), &config.host, port)?;

    // Server handles SIGINT/SIGTERM and drains in-flight requests before returning.
    let result = server.await;
    log::info!("🛑 HTTP server stopped, closing storage backend");

    if let Err(e) = client.disconnect().await {
        log::error!("❌ Failed to close storage backend: {}", e);
    }

    result?;
    Ok(())
}
