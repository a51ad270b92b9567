#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;

use inbox_module::gateway::{build_router, GatewayState};
use inbox_module::locks::KeyedLocks;
use inbox_module::models::{Client, Organization};
use inbox_module::signature::SignatureVerifier;
use inbox_module::store::{DirectoryWriter, InboxStore, SqliteInboxStore};
use inbox_module::IngestionPipeline;
use tempfile::TempDir;

pub const SECRET: &str = "test-webhook-secret";

pub fn require_test_db_url(test_name: &str) -> Option<String> {
    dotenvy::dotenv().ok();
    match std::env::var("INBOX_TEST_DB_URL") {
        Ok(value) if !value.trim().is_empty() => Some(value),
        _ => {
            eprintln!("Skipping {test_name}; INBOX_TEST_DB_URL not set.");
            None
        }
    }
}

/// org1 with one client reachable on WhatsApp/SMS as 0244000111 and by email.
pub fn seed_directory<S: DirectoryWriter + ?Sized>(store: &S, org_id: &str, client_id: &str) {
    store
        .upsert_organization(&Organization {
            id: org_id.to_string(),
            name: "Acme Care".to_string(),
        })
        .expect("seed org");
    store
        .upsert_client(&Client {
            id: client_id.to_string(),
            org_id: org_id.to_string(),
            user_id: Some(format!("user-{}", client_id)),
            name: "Ama Mensah".to_string(),
            phone: Some("0244000111".to_string()),
            email: Some("ama@example.com".to_string()),
        })
        .expect("seed client");
}

pub struct SqliteFixture {
    pub dir: TempDir,
    pub store: Arc<SqliteInboxStore>,
}

pub fn sqlite_fixture() -> SqliteFixture {
    let dir = TempDir::new().expect("tempdir");
    let store = Arc::new(SqliteInboxStore::new(dir.path().join("inbox.db")).expect("store"));
    seed_directory(&*store, "org1", "c1");
    SqliteFixture { dir, store }
}

pub struct RunningGateway {
    pub base_url: String,
    pub pipeline: Arc<IngestionPipeline>,
    handle: tokio::task::JoinHandle<()>,
}

impl Drop for RunningGateway {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

pub async fn start_gateway(store: Arc<dyn InboxStore>, verifier: SignatureVerifier) -> RunningGateway {
    let pipeline = Arc::new(IngestionPipeline::new(store, Arc::new(KeyedLocks::new())));
    let state = Arc::new(
        GatewayState::new(pipeline.clone(), verifier)
            .with_whatsapp_verify_token(Some("verify-me".to_string())),
    );
    let app = build_router(state, 1024 * 1024);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr: SocketAddr = listener.local_addr().expect("local addr");
    let handle = tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve");
    });
    RunningGateway {
        base_url: format!("http://{}", addr),
        pipeline,
        handle,
    }
}
