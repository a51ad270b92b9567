mod test_support;

use std::sync::Arc;

use inbox_module::locks::KeyedLocks;
use inbox_module::models::WebhookOutcome;
use inbox_module::store::{InboxStore, PostgresInboxStore, ThreadFilter, ThreadScope};
use inbox_module::{Channel, IngestOutcome, IngestionPipeline};
use test_support::{require_test_db_url, seed_directory};

#[test]
fn postgres_ingestion_end_to_end() -> Result<(), Box<dyn std::error::Error>> {
    let Some(db_url) = require_test_db_url("postgres_ingestion_end_to_end") else {
        return Ok(());
    };
    let store = Arc::new(PostgresInboxStore::new(&db_url, false)?);
    let org_id = format!("org-{}", uuid::Uuid::new_v4());
    seed_directory(&*store, &org_id, &format!("client-{}", uuid::Uuid::new_v4()));

    let pipeline = IngestionPipeline::new(store.clone(), Arc::new(KeyedLocks::new()));
    let external_id = format!("wamid.{}", uuid::Uuid::new_v4());
    let body = format!(
        r#"{{"from":"+233244000111","text":"Hi","id":"{}"}}"#,
        external_id
    );

    let first = pipeline.ingest(Some(&org_id), Channel::WhatsApp, body.as_bytes())?;
    let IngestOutcome::Accepted { thread_id, .. } = first else {
        panic!("expected accepted, got {:?}", first);
    };
    let second = pipeline.ingest(Some(&org_id), Channel::WhatsApp, body.as_bytes())?;
    assert!(matches!(second, IngestOutcome::Duplicate { .. }));

    let threads = store.list_threads(&org_id, &ThreadScope::All, &ThreadFilter::default())?;
    assert_eq!(threads.len(), 1);
    assert_eq!(threads[0].id, thread_id);
    assert_eq!(threads[0].unread_count, 1);

    let outcomes: Vec<_> = pipeline
        .audit_log()
        .recent(50)?
        .into_iter()
        .filter(|log| log.org_id.as_deref() == Some(org_id.as_str()))
        .map(|log| log.outcome)
        .collect();
    assert_eq!(
        outcomes,
        vec![Some(WebhookOutcome::Duplicate), Some(WebhookOutcome::Processed)]
    );
    Ok(())
}
