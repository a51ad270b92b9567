//! Who may see and act on which thread.
//!
//! Both the list filter and the per-thread check are derived from the same
//! [`ThreadScope`], so the two can never disagree about visibility.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::models::{ParticipantRole, Thread};
use crate::store::{InboxStore, StoreError, ThreadScope};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActorRole {
    Admin,
    Manager,
    Carer,
    Client,
}

impl ActorRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActorRole::Admin => "admin",
            ActorRole::Manager => "manager",
            ActorRole::Carer => "carer",
            ActorRole::Client => "client",
        }
    }

    /// Role recorded on messages this actor sends.
    pub fn sender_role(&self) -> ParticipantRole {
        match self {
            ActorRole::Admin | ActorRole::Manager => ParticipantRole::Manager,
            ActorRole::Carer => ParticipantRole::Carer,
            ActorRole::Client => ParticipantRole::Client,
        }
    }
}

impl fmt::Display for ActorRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActorRole {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "admin" => Ok(ActorRole::Admin),
            "manager" => Ok(ActorRole::Manager),
            "carer" => Ok(ActorRole::Carer),
            "client" => Ok(ActorRole::Client),
            other => Err(format!("unknown actor role: {}", other)),
        }
    }
}

/// An authenticated caller acting within one organization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub org_id: String,
    pub user_id: String,
    pub role: ActorRole,
}

impl Actor {
    pub fn new(org_id: impl Into<String>, user_id: impl Into<String>, role: ActorRole) -> Self {
        Self {
            org_id: org_id.into(),
            user_id: user_id.into(),
            role,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadAction {
    View,
    Send,
    MarkRead,
    Archive,
    Link,
    ViewLinks,
}

impl ThreadAction {
    fn allowed_for_participant(&self) -> bool {
        matches!(
            self,
            ThreadAction::View | ThreadAction::Send | ThreadAction::ViewLinks
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AccessError {
    #[error("thread not found")]
    NotFound,
    #[error("not permitted to access this thread")]
    Forbidden,
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Clone)]
pub struct AccessGuard {
    store: Arc<dyn InboxStore>,
}

impl AccessGuard {
    pub fn new(store: Arc<dyn InboxStore>) -> Self {
        Self { store }
    }

    /// Threads the actor may list. Clients and carers without a directory
    /// record get [`ThreadScope::Empty`].
    pub fn list_scope(&self, actor: &Actor) -> Result<ThreadScope, StoreError> {
        Ok(match actor.role {
            ActorRole::Admin | ActorRole::Manager => ThreadScope::All,
            ActorRole::Client => self
                .store
                .find_client_for_user(&actor.org_id, &actor.user_id)?
                .map_or(ThreadScope::Empty, |client| ThreadScope::Client(client.id)),
            ActorRole::Carer => self
                .store
                .find_carer_for_user(&actor.org_id, &actor.user_id)?
                .map_or(ThreadScope::Empty, |carer| ThreadScope::Carer(carer.id)),
        })
    }

    pub fn authorize(
        &self,
        actor: &Actor,
        thread: &Thread,
        action: ThreadAction,
    ) -> Result<(), AccessError> {
        if thread.org_id != actor.org_id {
            return Err(AccessError::NotFound);
        }
        let visible = match self.list_scope(actor)? {
            ThreadScope::All => return Ok(()),
            ThreadScope::Empty => false,
            ThreadScope::Client(client_id) => {
                thread.client_id.as_deref() == Some(client_id.as_str())
            }
            ThreadScope::Carer(carer_id) => {
                self.store
                    .carer_can_access(&thread.org_id, &thread.id, &carer_id)?
            }
        };
        if visible && action.allowed_for_participant() {
            Ok(())
        } else {
            Err(AccessError::Forbidden)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::Channel;
    use crate::models::{
        Carer, Client, Job, NewThread, Organization, TargetRef, ThreadKey,
    };
    use crate::store::{DirectoryWriter, SqliteInboxStore};
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        guard: AccessGuard,
        own: Thread,
        other: Thread,
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
        for (id, user) in [("c1", "u-client-1"), ("c2", "u-client-2")] {
            store
                .upsert_client(&Client {
                    id: id.to_string(),
                    org_id: "org1".to_string(),
                    user_id: Some(user.to_string()),
                    name: id.to_string(),
                    phone: None,
                    email: None,
                })
                .unwrap();
        }
        store
            .upsert_carer(&Carer {
                id: "k1".to_string(),
                org_id: "org1".to_string(),
                user_id: "u-carer".to_string(),
                name: "Kofi".to_string(),
                phone: None,
            })
            .unwrap();
        store
            .upsert_job(&Job {
                id: "j1".to_string(),
                org_id: "org1".to_string(),
                client_id: Some("c1".to_string()),
                assigned_carer_id: Some("k1".to_string()),
                title: "Visit".to_string(),
            })
            .unwrap();
        let create = |client: &str| {
            store
                .create_open_thread(
                    &NewThread {
                        org_id: "org1".to_string(),
                        client_id: Some(client.to_string()),
                        contact: None,
                        channel: Channel::WhatsApp,
                        key: ThreadKey::Client(client.to_string()),
                        tags: Vec::new(),
                    },
                    None,
                )
                .unwrap()
                .into_thread()
        };
        let own = create("c1");
        let other = create("c2");
        store
            .insert_link(&own.id, &TargetRef::Job("j1".to_string()))
            .unwrap();
        Fixture {
            _dir: dir,
            guard: AccessGuard::new(store),
            own,
            other,
        }
    }

    #[test]
    fn managers_are_unrestricted() {
        let f = fixture();
        for role in [ActorRole::Admin, ActorRole::Manager] {
            let actor = Actor::new("org1", "u-staff", role);
            assert_eq!(f.guard.list_scope(&actor).unwrap(), ThreadScope::All);
            for action in [ThreadAction::Archive, ThreadAction::Link, ThreadAction::MarkRead] {
                assert!(f.guard.authorize(&actor, &f.other, action).is_ok());
            }
        }
    }

    #[test]
    fn client_sees_only_own_threads() {
        let f = fixture();
        let actor = Actor::new("org1", "u-client-1", ActorRole::Client);
        assert_eq!(
            f.guard.list_scope(&actor).unwrap(),
            ThreadScope::Client("c1".to_string())
        );
        assert!(f.guard.authorize(&actor, &f.own, ThreadAction::View).is_ok());
        assert!(f.guard.authorize(&actor, &f.own, ThreadAction::Send).is_ok());
        assert!(matches!(
            f.guard.authorize(&actor, &f.other, ThreadAction::View),
            Err(AccessError::Forbidden)
        ));
        assert!(matches!(
            f.guard.authorize(&actor, &f.own, ThreadAction::Archive),
            Err(AccessError::Forbidden)
        ));
        assert!(matches!(
            f.guard.authorize(&actor, &f.own, ThreadAction::Link),
            Err(AccessError::Forbidden)
        ));
    }

    #[test]
    fn carer_sees_threads_linked_to_assigned_jobs() {
        let f = fixture();
        let actor = Actor::new("org1", "u-carer", ActorRole::Carer);
        assert_eq!(
            f.guard.list_scope(&actor).unwrap(),
            ThreadScope::Carer("k1".to_string())
        );
        assert!(f.guard.authorize(&actor, &f.own, ThreadAction::View).is_ok());
        assert!(f.guard.authorize(&actor, &f.own, ThreadAction::ViewLinks).is_ok());
        assert!(matches!(
            f.guard.authorize(&actor, &f.other, ThreadAction::View),
            Err(AccessError::Forbidden)
        ));
        for action in [ThreadAction::Archive, ThreadAction::Link, ThreadAction::MarkRead] {
            assert!(matches!(
                f.guard.authorize(&actor, &f.own, action),
                Err(AccessError::Forbidden)
            ));
        }
    }

    #[test]
    fn users_without_records_see_nothing() {
        let f = fixture();
        let actor = Actor::new("org1", "u-stranger", ActorRole::Client);
        assert_eq!(f.guard.list_scope(&actor).unwrap(), ThreadScope::Empty);
        assert!(matches!(
            f.guard.authorize(&actor, &f.own, ThreadAction::View),
            Err(AccessError::Forbidden)
        ));
    }

    #[test]
    fn other_org_threads_are_not_found() {
        let f = fixture();
        let actor = Actor::new("org2", "u-staff", ActorRole::Admin);
        assert!(matches!(
            f.guard.authorize(&actor, &f.own, ThreadAction::View),
            Err(AccessError::NotFound)
        ));
    }

    #[test]
    fn roles_parse_case_insensitively() {
        assert_eq!("MANAGER".parse::<ActorRole>(), Ok(ActorRole::Manager));
        assert_eq!(ActorRole::Carer.sender_role(), ParticipantRole::Carer);
        assert!("owner".parse::<ActorRole>().is_err());
    }
}
