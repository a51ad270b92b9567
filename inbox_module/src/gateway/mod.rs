//! HTTP surface for provider webhooks.

mod handlers;
mod state;

use std::future::Future;
use std::io;
use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;

pub use self::state::GatewayState;

pub fn build_router(state: Arc<GatewayState>, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/webhooks/whatsapp", get(handlers::verify_whatsapp_webhook))
        .route("/webhooks/whatsapp", post(handlers::ingest_whatsapp))
        .route("/webhooks/sms", post(handlers::ingest_sms))
        .route("/webhooks/email", post(handlers::ingest_email))
        .with_state(state)
        .layer(DefaultBodyLimit::max(max_body_bytes))
}

/// Serve until `shutdown` resolves, then let in-flight requests finish.
pub async fn serve_until<F>(listener: TcpListener, router: Router, shutdown: F) -> io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
}
