use std::sync::Arc;

use tokio::task;
use tracing::{info, warn};

use inbox_module::config::{InboxConfig, StoreBackend};
use inbox_module::gateway::{build_router, serve_until, GatewayState};
use inbox_module::locks::KeyedLocks;
use inbox_module::store::InboxStore;
use inbox_module::IngestionPipeline;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt().with_target(false).init();
    dotenvy::dotenv().ok();

    let config = InboxConfig::from_env()?;
    if config.webhook_secret.is_none() {
        warn!("WEBHOOK_SECRET is not set; accepting unsigned webhooks");
    }

    let store_config = config.clone();
    let store: Arc<dyn InboxStore> = task::spawn_blocking(move || store_config.open_store())
        .await
        .map_err(|err| -> Box<dyn std::error::Error + Send + Sync> { err.into() })??;

    let pipeline = IngestionPipeline::new(store, Arc::new(KeyedLocks::new()))
        .with_country_code(&config.default_country_code);
    let state = Arc::new(
        GatewayState::new(Arc::new(pipeline), config.signature_verifier())
            .with_whatsapp_verify_token(config.whatsapp_verify_token.clone()),
    );

    let backend = match &config.store {
        StoreBackend::Sqlite { path } => format!("sqlite path={}", path.display()),
        StoreBackend::Postgres { .. } => "postgres db_url=***".to_string(),
    };
    info!(
        "inbox gateway host={}, port={}, store={}, signed={}",
        config.host,
        config.port,
        backend,
        state.verifier.is_enforced()
    );

    let app = build_router(state, config.max_body_bytes);
    let addr: std::net::SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!("inbox gateway listening on {}", addr);

    serve_until(tokio::net::TcpListener::bind(addr).await?, app, shutdown_signal()).await?;
    info!("inbox gateway stopped");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for shutdown signal: {}", err);
        std::future::pending::<()>().await;
    }
    info!("inbox gateway shutting down");
}
