//! Persistence for threads, messages, links and the webhook audit log.
//!
//! Two backends implement [`InboxStore`]: [`SqliteInboxStore`] for single-node
//! and development deployments, [`PostgresInboxStore`] for shared databases.
//! Both enforce the one-open-thread-per-key invariant with a unique partial
//! index, so thread creation is an insert that tolerates losing a race.

mod postgres;
mod schema;
mod sqlite;

use crate::channel::Channel;
use crate::models::{
    AppendOutcome, Carer, Client, Invoice, Job, Message, NewMessage, NewThread, Organization,
    Participant, ParticipantRole, TargetRef, Thread, ThreadKey, ThreadLink, ThreadStatus,
    WebhookLog, WebhookOutcome,
};

pub use self::postgres::PostgresInboxStore;
pub use self::sqlite::SqliteInboxStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("postgres error: {0}")]
    Postgres(#[from] ::postgres::Error),
    #[error("pool error: {0}")]
    Pool(#[from] r2d2::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("datetime parse error: {0}")]
    DateTimeParse(#[from] chrono::ParseError),
    #[error("corrupt row: {0}")]
    Corrupt(String),
    #[error("an open thread already exists for {0}")]
    OpenThreadExists(String),
    #[error("{0} not found")]
    NotFound(String),
    #[error("store config error: {0}")]
    Config(String),
}

/// Outcome of the conflict-tolerant thread insert.
#[derive(Debug, Clone)]
pub enum CreateThreadOutcome {
    Created(Thread),
    /// Another delivery created the open thread first; this is that row.
    Existing(Thread),
}

impl CreateThreadOutcome {
    pub fn into_thread(self) -> Thread {
        match self {
            CreateThreadOutcome::Created(thread) | CreateThreadOutcome::Existing(thread) => thread,
        }
    }

    pub fn was_created(&self) -> bool {
        matches!(self, CreateThreadOutcome::Created(_))
    }
}

/// Which threads of an org a caller may see. Produced by the access guard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ThreadScope {
    All,
    Client(String),
    Carer(String),
    Empty,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ThreadFilter {
    pub status: Option<ThreadStatus>,
    pub channel: Option<Channel>,
}

/// Read side of the org/client/carer/job directory owned by other modules.
pub trait Directory: Send + Sync {
    fn organization_exists(&self, org_id: &str) -> Result<bool, StoreError>;
    /// Clients whose email matches; every org when `org_id` is `None`.
    fn find_clients_by_email(
        &self,
        org_id: Option<&str>,
        email: &str,
    ) -> Result<Vec<Client>, StoreError>;
    /// Clients whose stored phone equals any of `phones`.
    fn find_clients_by_phone(
        &self,
        org_id: Option<&str>,
        phones: &[String],
    ) -> Result<Vec<Client>, StoreError>;
    fn find_client_for_user(&self, org_id: &str, user_id: &str)
        -> Result<Option<Client>, StoreError>;
    fn find_carer_for_user(&self, org_id: &str, user_id: &str) -> Result<Option<Carer>, StoreError>;
    fn target_exists(&self, org_id: &str, target: &TargetRef) -> Result<bool, StoreError>;
}

/// Write side of the directory. Phones are canonicalized on the way in.
pub trait DirectoryWriter: Send + Sync {
    fn upsert_organization(&self, org: &Organization) -> Result<(), StoreError>;
    fn upsert_client(&self, client: &Client) -> Result<Client, StoreError>;
    fn upsert_carer(&self, carer: &Carer) -> Result<(), StoreError>;
    fn upsert_job(&self, job: &Job) -> Result<(), StoreError>;
    fn upsert_invoice(&self, invoice: &Invoice) -> Result<(), StoreError>;
}

pub trait InboxStore: Directory {
    fn insert_webhook_log(
        &self,
        provider: Channel,
        org_id: Option<&str>,
        payload: &str,
    ) -> Result<WebhookLog, StoreError>;
    /// Stamp `processed_at`. `org_id` only fills a previously unknown org.
    fn complete_webhook_log(
        &self,
        id: &str,
        org_id: Option<&str>,
        outcome: WebhookOutcome,
        error: Option<&str>,
    ) -> Result<(), StoreError>;
    fn get_webhook_log(&self, id: &str) -> Result<Option<WebhookLog>, StoreError>;
    /// Newest first.
    fn list_webhook_logs(&self, limit: usize) -> Result<Vec<WebhookLog>, StoreError>;

    /// Most recently active open thread for the key.
    fn find_open_thread(
        &self,
        org_id: &str,
        channel: Channel,
        key: &ThreadKey,
    ) -> Result<Option<Thread>, StoreError>;
    /// Insert an open thread (and its participant) unless one already holds the key.
    fn create_open_thread(
        &self,
        thread: &NewThread,
        participant: Option<(&str, ParticipantRole)>,
    ) -> Result<CreateThreadOutcome, StoreError>;
    fn get_thread(&self, org_id: &str, thread_id: &str) -> Result<Option<Thread>, StoreError>;
    fn list_threads(
        &self,
        org_id: &str,
        scope: &ThreadScope,
        filter: &ThreadFilter,
    ) -> Result<Vec<Thread>, StoreError>;
    fn list_participants(&self, thread_id: &str) -> Result<Vec<Participant>, StoreError>;
    /// Same predicate as [`ThreadScope::Carer`] in `list_threads`.
    fn carer_can_access(
        &self,
        org_id: &str,
        thread_id: &str,
        carer_id: &str,
    ) -> Result<bool, StoreError>;
    /// Move a thread from `from` to `to`. `None` when the thread is not in `from`.
    fn set_thread_status(
        &self,
        org_id: &str,
        thread_id: &str,
        from: ThreadStatus,
        to: ThreadStatus,
    ) -> Result<Option<Thread>, StoreError>;
    fn mark_thread_read(&self, org_id: &str, thread_id: &str)
        -> Result<Option<Thread>, StoreError>;

    /// Insert a message and update the thread aggregate in one transaction:
    /// client messages increment `unread_count`, all others reset it to zero.
    fn append_message(
        &self,
        org_id: &str,
        thread_id: &str,
        message: &NewMessage,
    ) -> Result<AppendOutcome, StoreError>;
    fn list_messages(&self, org_id: &str, thread_id: &str) -> Result<Vec<Message>, StoreError>;
    /// The stored message carrying a provider message id, whatever thread holds it.
    fn find_message_by_external_id(
        &self,
        org_id: &str,
        channel: Channel,
        external_id: &str,
    ) -> Result<Option<Message>, StoreError>;

    /// Idempotent per `(thread, target)`.
    fn insert_link(&self, thread_id: &str, target: &TargetRef) -> Result<ThreadLink, StoreError>;
    fn list_links(&self, thread_id: &str) -> Result<Vec<ThreadLink>, StoreError>;
}

pub(crate) fn parse_channel(value: &str) -> Result<Channel, StoreError> {
    value.parse().map_err(StoreError::Corrupt)
}

pub(crate) fn parse_status(value: &str) -> Result<ThreadStatus, StoreError> {
    value.parse().map_err(StoreError::Corrupt)
}

pub(crate) fn parse_role(value: &str) -> Result<ParticipantRole, StoreError> {
    value.parse().map_err(StoreError::Corrupt)
}

pub(crate) fn parse_outcome(value: Option<String>) -> Result<Option<WebhookOutcome>, StoreError> {
    value
        .map(|raw| raw.parse().map_err(StoreError::Corrupt))
        .transpose()
}

pub(crate) fn parse_target(target_type: &str, target_id: &str) -> Result<TargetRef, StoreError> {
    TargetRef::from_parts(target_type, target_id).map_err(StoreError::Corrupt)
}

/// Canonical stored form of a client or carer phone; unparseable numbers are
/// kept in their lenient normalized form rather than dropped.
pub(crate) fn stored_phone(raw: Option<&str>, country_code: &str) -> Option<String> {
    let raw = raw.map(str::trim).filter(|value| !value.is_empty())?;
    crate::contact::canonical_phone(raw, country_code)
        .or_else(|| crate::contact::normalize_phone(raw))
}

pub(crate) fn stored_email(raw: Option<&str>) -> Option<String> {
    raw.and_then(crate::contact::normalize_email)
}
