mod test_support;

use std::sync::{Arc, Barrier};
use std::thread;

use inbox_module::locks::KeyedLocks;
use inbox_module::store::{InboxStore, SqliteInboxStore, ThreadFilter, ThreadScope};
use inbox_module::{Channel, IngestOutcome, IngestionPipeline};
use test_support::sqlite_fixture;

const SENDERS: usize = 8;

fn ingest_concurrently(pipelines: Vec<Arc<IngestionPipeline>>) -> Vec<IngestOutcome> {
    let barrier = Arc::new(Barrier::new(SENDERS));
    let handles: Vec<_> = (0..SENDERS)
        .map(|idx| {
            let pipeline = pipelines[idx % pipelines.len()].clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                let body = format!(r#"{{"from":"+233244000111","text":"ping {}"}}"#, idx);
                barrier.wait();
                pipeline
                    .ingest(Some("org1"), Channel::WhatsApp, body.as_bytes())
                    .expect("ingest")
            })
        })
        .collect();
    handles
        .into_iter()
        .map(|handle| handle.join().expect("join"))
        .collect()
}

fn assert_single_thread(store: &dyn InboxStore, outcomes: &[IngestOutcome]) {
    let created = outcomes
        .iter()
        .filter(|outcome| {
            matches!(
                outcome,
                IngestOutcome::Accepted {
                    created_thread: true,
                    ..
                }
            )
        })
        .count();
    assert_eq!(created, 1, "exactly one delivery creates the thread");

    let threads = store
        .list_threads("org1", &ThreadScope::All, &ThreadFilter::default())
        .expect("threads");
    assert_eq!(threads.len(), 1);
    assert_eq!(threads[0].unread_count, SENDERS as i64);
    assert_eq!(
        store
            .list_messages("org1", &threads[0].id)
            .expect("messages")
            .len(),
        SENDERS
    );
}

#[test]
fn concurrent_deliveries_share_one_thread() {
    let fixture = sqlite_fixture();
    let pipeline = Arc::new(IngestionPipeline::new(
        fixture.store.clone(),
        Arc::new(KeyedLocks::new()),
    ));
    let outcomes = ingest_concurrently(vec![pipeline]);
    assert_single_thread(&*fixture.store, &outcomes);
}

#[test]
fn independent_processes_are_serialized_by_the_store() {
    let fixture = sqlite_fixture();
    let db_path = fixture.dir.path().join("inbox.db");
    // One store and lock table per simulated process, all on the same database.
    let pipelines = (0..4)
        .map(|_| {
            let store = Arc::new(SqliteInboxStore::new(&db_path).expect("store"));
            Arc::new(IngestionPipeline::new(store, Arc::new(KeyedLocks::new())))
        })
        .collect();
    let outcomes = ingest_concurrently(pipelines);
    assert_single_thread(&*fixture.store, &outcomes);
}
