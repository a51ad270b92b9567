//! Caller-facing thread operations, each checked by the [`AccessGuard`].

use std::sync::Arc;

use serde_json::json;
use tracing::info;

use crate::access::{AccessError, AccessGuard, Actor, ThreadAction};
use crate::models::{
    AppendOutcome, Attachment, Message, NewMessage, TargetRef, Thread, ThreadLink, ThreadStatus,
};
use crate::store::{InboxStore, StoreError, ThreadFilter};

#[derive(Debug, thiserror::Error)]
pub enum ThreadError {
    #[error("thread {0} not found")]
    NotFound(String),
    #[error("not permitted to access this thread")]
    Forbidden,
    #[error("cannot {action} a thread that is {status}")]
    InvalidTransition {
        action: &'static str,
        status: ThreadStatus,
    },
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("link target does not exist: {0:?}")]
    InvalidTarget(TargetRef),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for ThreadError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::OpenThreadExists(detail) => ThreadError::Conflict(format!(
                "another open thread already exists ({})",
                detail
            )),
            other => ThreadError::Store(other),
        }
    }
}

#[derive(Clone)]
pub struct ThreadService {
    store: Arc<dyn InboxStore>,
    guard: AccessGuard,
}

impl ThreadService {
    pub fn new(store: Arc<dyn InboxStore>) -> Self {
        Self {
            guard: AccessGuard::new(Arc::clone(&store)),
            store,
        }
    }

    pub fn list_threads(
        &self,
        actor: &Actor,
        filter: &ThreadFilter,
    ) -> Result<Vec<Thread>, ThreadError> {
        let scope = self.guard.list_scope(actor)?;
        Ok(self.store.list_threads(&actor.org_id, &scope, filter)?)
    }

    pub fn get_thread(&self, actor: &Actor, thread_id: &str) -> Result<Thread, ThreadError> {
        self.load(actor, thread_id, ThreadAction::View)
    }

    pub fn list_messages(
        &self,
        actor: &Actor,
        thread_id: &str,
    ) -> Result<Vec<Message>, ThreadError> {
        let thread = self.load(actor, thread_id, ThreadAction::View)?;
        Ok(self.store.list_messages(&thread.org_id, &thread.id)?)
    }

    /// Persist an outbound message. Delivery to the provider happens elsewhere.
    pub fn send_message(
        &self,
        actor: &Actor,
        thread_id: &str,
        text: &str,
        attachments: Vec<Attachment>,
    ) -> Result<Message, ThreadError> {
        let thread = self.load(actor, thread_id, ThreadAction::Send)?;
        let text = text.trim();
        if text.is_empty() && attachments.is_empty() {
            return Err(ThreadError::BadRequest(
                "message needs text or an attachment".to_string(),
            ));
        }
        if thread.status == ThreadStatus::Archived {
            return Err(ThreadError::InvalidTransition {
                action: "send on",
                status: thread.status,
            });
        }
        let message = NewMessage {
            sender_role: actor.role.sender_role(),
            sender_user_id: Some(actor.user_id.clone()),
            channel: thread.channel_primary,
            text: text.to_string(),
            attachments,
            meta: json!({ "direction": "outbound" }),
            external_id: None,
        };
        match self
            .store
            .append_message(&thread.org_id, &thread.id, &message)?
        {
            AppendOutcome::Appended { message, .. } => Ok(message),
            AppendOutcome::Duplicate {
                existing_message_id,
            } => Err(ThreadError::Conflict(format!(
                "message {} already stored",
                existing_message_id
            ))),
        }
    }

    pub fn mark_read(&self, actor: &Actor, thread_id: &str) -> Result<Thread, ThreadError> {
        let thread = self.load(actor, thread_id, ThreadAction::MarkRead)?;
        self.store
            .mark_thread_read(&thread.org_id, &thread.id)?
            .ok_or_else(|| ThreadError::NotFound(thread_id.to_string()))
    }

    pub fn archive(&self, actor: &Actor, thread_id: &str) -> Result<Thread, ThreadError> {
        self.transition(
            actor,
            thread_id,
            "archive",
            ThreadStatus::Open,
            ThreadStatus::Archived,
        )
    }

    pub fn unarchive(&self, actor: &Actor, thread_id: &str) -> Result<Thread, ThreadError> {
        self.transition(
            actor,
            thread_id,
            "unarchive",
            ThreadStatus::Archived,
            ThreadStatus::Open,
        )
    }

    pub fn link(
        &self,
        actor: &Actor,
        thread_id: &str,
        target: TargetRef,
    ) -> Result<ThreadLink, ThreadError> {
        let thread = self.load(actor, thread_id, ThreadAction::Link)?;
        if !self.store.target_exists(&thread.org_id, &target)? {
            return Err(ThreadError::InvalidTarget(target));
        }
        let link = self.store.insert_link(&thread.id, &target)?;
        info!(
            "linked thread thread_id={} target={}:{}",
            thread.id,
            target.target_type(),
            target.target_id()
        );
        Ok(link)
    }

    pub fn get_links(&self, actor: &Actor, thread_id: &str) -> Result<Vec<ThreadLink>, ThreadError> {
        let thread = self.load(actor, thread_id, ThreadAction::ViewLinks)?;
        Ok(self.store.list_links(&thread.id)?)
    }

    fn transition(
        &self,
        actor: &Actor,
        thread_id: &str,
        action: &'static str,
        from: ThreadStatus,
        to: ThreadStatus,
    ) -> Result<Thread, ThreadError> {
        let thread = self.load(actor, thread_id, ThreadAction::Archive)?;
        if thread.status != from {
            return Err(ThreadError::InvalidTransition {
                action,
                status: thread.status,
            });
        }
        let updated = self
            .store
            .set_thread_status(&thread.org_id, &thread.id, from, to)?
            .ok_or(ThreadError::InvalidTransition {
                action,
                status: to,
            })?;
        info!(
            "thread status changed thread_id={} status={} by={}",
            updated.id, updated.status, actor.user_id
        );
        Ok(updated)
    }

    fn load(
        &self,
        actor: &Actor,
        thread_id: &str,
        action: ThreadAction,
    ) -> Result<Thread, ThreadError> {
        let thread = self
            .store
            .get_thread(&actor.org_id, thread_id)?
            .ok_or_else(|| ThreadError::NotFound(thread_id.to_string()))?;
        match self.guard.authorize(actor, &thread, action) {
            Ok(()) => Ok(thread),
            Err(AccessError::NotFound) => Err(ThreadError::NotFound(thread_id.to_string())),
            Err(AccessError::Forbidden) => Err(ThreadError::Forbidden),
            Err(AccessError::Store(err)) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::ActorRole;
    use crate::channel::Channel;
    use crate::ingestion::{IngestOutcome, IngestionPipeline};
    use crate::locks::KeyedLocks;
    use crate::models::{Client, Invoice, Organization, ParticipantRole};
    use crate::store::{DirectoryWriter, SqliteInboxStore};
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        pipeline: IngestionPipeline,
        service: ThreadService,
        store: Arc<SqliteInboxStore>,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().expect("tempdir");
        let store = Arc::new(SqliteInboxStore::new(dir.path().join("inbox.db")).expect("store"));
        store
            .upsert_organization(&Organization {
                id: "org1".to_string(),
                name: "Acme".to_string(),
            })
            .unwrap();
        for (id, user, phone) in [
            ("c1", "u-client-1", "0244000111"),
            ("c2", "u-client-2", "0244000222"),
        ] {
            store
                .upsert_client(&Client {
                    id: id.to_string(),
                    org_id: "org1".to_string(),
                    user_id: Some(user.to_string()),
                    name: id.to_string(),
                    phone: Some(phone.to_string()),
                    email: None,
                })
                .unwrap();
        }
        Fixture {
            _dir: dir,
            pipeline: IngestionPipeline::new(store.clone(), Arc::new(KeyedLocks::new())),
            service: ThreadService::new(store.clone()),
            store,
        }
    }

    fn inbound(f: &Fixture, phone: &str, text: &str) -> String {
        let body = format!(r#"{{"from":"{}","text":"{}"}}"#, phone, text);
        match f
            .pipeline
            .ingest(Some("org1"), Channel::WhatsApp, body.as_bytes())
            .unwrap()
        {
            IngestOutcome::Accepted { thread_id, .. } => thread_id,
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    fn manager() -> Actor {
        Actor::new("org1", "u-manager", ActorRole::Manager)
    }

    #[test]
    fn outbound_message_resets_unread() {
        let f = fixture();
        let thread_id = inbound(&f, "+233244000111", "one");
        inbound(&f, "+233244000111", "two");
        assert_eq!(f.service.get_thread(&manager(), &thread_id).unwrap().unread_count, 2);

        let reply = f
            .service
            .send_message(&manager(), &thread_id, "On our way", Vec::new())
            .unwrap();
        assert_eq!(reply.sender_role, ParticipantRole::Manager);
        assert_eq!(reply.sender_user_id.as_deref(), Some("u-manager"));
        assert_eq!(f.service.get_thread(&manager(), &thread_id).unwrap().unread_count, 0);
        assert_eq!(f.service.list_messages(&manager(), &thread_id).unwrap().len(), 3);

        inbound(&f, "+233244000111", "three");
        let thread = f.service.mark_read(&manager(), &thread_id).unwrap();
        assert_eq!(thread.unread_count, 0);
    }

    #[test]
    fn client_cannot_read_another_clients_thread() {
        let f = fixture();
        let own = inbound(&f, "+233244000111", "mine");
        let other = inbound(&f, "+233244000222", "theirs");
        let client = Actor::new("org1", "u-client-1", ActorRole::Client);

        let listed: Vec<String> = f
            .service
            .list_threads(&client, &ThreadFilter::default())
            .unwrap()
            .into_iter()
            .map(|thread| thread.id)
            .collect();
        assert_eq!(listed, vec![own.clone()]);
        assert!(f.service.get_thread(&client, &own).is_ok());
        assert!(matches!(
            f.service.get_thread(&client, &other),
            Err(ThreadError::Forbidden)
        ));
        assert!(matches!(
            f.service.send_message(&client, &other, "hi", Vec::new()),
            Err(ThreadError::Forbidden)
        ));
        assert!(matches!(
            f.service.get_links(&client, &other),
            Err(ThreadError::Forbidden)
        ));
        assert!(matches!(
            f.service.archive(&client, &own),
            Err(ThreadError::Forbidden)
        ));
    }

    #[test]
    fn client_message_increments_unread() {
        let f = fixture();
        let thread_id = inbound(&f, "+233244000111", "hello");
        let client = Actor::new("org1", "u-client-1", ActorRole::Client);
        let message = f
            .service
            .send_message(&client, &thread_id, "also", Vec::new())
            .unwrap();
        assert_eq!(message.sender_role, ParticipantRole::Client);
        assert_eq!(f.service.get_thread(&manager(), &thread_id).unwrap().unread_count, 2);
    }

    #[test]
    fn archive_and_unarchive_follow_state_machine() {
        let f = fixture();
        let thread_id = inbound(&f, "+233244000111", "hello");

        let archived = f.service.archive(&manager(), &thread_id).unwrap();
        assert_eq!(archived.status, ThreadStatus::Archived);
        assert!(matches!(
            f.service.archive(&manager(), &thread_id),
            Err(ThreadError::InvalidTransition { .. })
        ));
        assert!(matches!(
            f.service.send_message(&manager(), &thread_id, "hi", Vec::new()),
            Err(ThreadError::InvalidTransition { .. })
        ));

        let reopened = f.service.unarchive(&manager(), &thread_id).unwrap();
        assert_eq!(reopened.status, ThreadStatus::Open);
        assert!(matches!(
            f.service.unarchive(&manager(), &thread_id),
            Err(ThreadError::InvalidTransition { .. })
        ));

        f.service.archive(&manager(), &thread_id).unwrap();
        let fresh = inbound(&f, "+233244000111", "new conversation");
        assert_ne!(fresh, thread_id);
        assert!(matches!(
            f.service.unarchive(&manager(), &thread_id),
            Err(ThreadError::Conflict(_))
        ));
    }

    #[test]
    fn links_are_validated_and_idempotent() {
        let f = fixture();
        let thread_id = inbound(&f, "+233244000111", "invoice question");
        f.store
            .upsert_invoice(&Invoice {
                id: "inv1".to_string(),
                org_id: "org1".to_string(),
                client_id: Some("c1".to_string()),
                reference: "INV-001".to_string(),
            })
            .unwrap();

        let missing = TargetRef::Job("no-such-job".to_string());
        assert!(matches!(
            f.service.link(&manager(), &thread_id, missing),
            Err(ThreadError::InvalidTarget(_))
        ));

        let target = TargetRef::Invoice("inv1".to_string());
        let first = f.service.link(&manager(), &thread_id, target.clone()).unwrap();
        let second = f.service.link(&manager(), &thread_id, target).unwrap();
        assert_eq!(first.id, second.id);
        let links = f.service.get_links(&manager(), &thread_id).unwrap();
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].target, TargetRef::Invoice("inv1".to_string()));
    }

    #[test]
    fn unknown_thread_is_not_found() {
        let f = fixture();
        assert!(matches!(
            f.service.get_thread(&manager(), "missing"),
            Err(ThreadError::NotFound(_))
        ));
        let thread_id = inbound(&f, "+233244000111", "hello");
        let outsider = Actor::new("org2", "u-admin", ActorRole::Admin);
        assert!(matches!(
            f.service.get_thread(&outsider, &thread_id),
            Err(ThreadError::NotFound(_))
        ));
    }

    #[test]
    fn empty_outbound_message_is_rejected() {
        let f = fixture();
        let thread_id = inbound(&f, "+233244000111", "hello");
        assert!(matches!(
            f.service.send_message(&manager(), &thread_id, "   ", Vec::new()),
            Err(ThreadError::BadRequest(_))
        ));
    }
}
