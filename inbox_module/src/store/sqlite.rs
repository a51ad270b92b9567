use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{
    params, params_from_iter, Connection, ErrorCode, OptionalExtension, Row, TransactionBehavior,
};
use uuid::Uuid;

use super::schema::{carer_link_predicate, SQLITE_SCHEMA};
use super::{
    parse_channel, parse_outcome, parse_role, parse_status, parse_target, stored_email,
    stored_phone, CreateThreadOutcome, Directory, DirectoryWriter, InboxStore, StoreError,
    ThreadFilter, ThreadScope,
};
use crate::channel::Channel;
use crate::contact::DEFAULT_COUNTRY_CODE;
use crate::models::{
    encode_tags, parse_tags, AppendOutcome, Carer, Client, Invoice, Job, Message, NewMessage,
    NewThread, Organization, Participant, ParticipantRole, TargetRef, Thread, ThreadKey,
    ThreadLink, ThreadStatus, WebhookLog, WebhookOutcome,
};

const THREAD_COLUMNS: &str = "t.id, t.org_id, t.client_id, t.contact, t.channel_primary, t.status, \
     t.unread_count, t.last_message_at, t.tags, t.created_at";
const MESSAGE_COLUMNS: &str = "id, org_id, thread_id, sender_role, sender_user_id, channel, text, \
     attachments, meta, external_id, created_at";
const CLIENT_COLUMNS: &str = "id, org_id, user_id, name, phone, email";
const LOG_COLUMNS: &str =
    "id, org_id, provider, payload, received_at, processed_at, outcome, error";

/// SQLite-backed inbox store. Each call opens its own connection.
#[derive(Debug, Clone)]
pub struct SqliteInboxStore {
    path: PathBuf,
    country_code: String,
}

impl SqliteInboxStore {
    pub fn new(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let store = Self {
            path: path.into(),
            country_code: DEFAULT_COUNTRY_CODE.to_string(),
        };
        let conn = store.open()?;
        conn.execute_batch(SQLITE_SCHEMA)?;
        Ok(store)
    }

    /// Country code used when canonicalizing client and carer phones.
    pub fn with_country_code(mut self, country_code: impl Into<String>) -> Self {
        self.country_code = country_code.into();
        self
    }

    fn open(&self) -> Result<Connection, StoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(&self.path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        Ok(conn)
    }

    fn load_thread(
        conn: &Connection,
        org_id: &str,
        thread_id: &str,
    ) -> Result<Option<Thread>, StoreError> {
        let sql = format!(
            "SELECT {} FROM threads t WHERE t.org_id = ?1 AND t.id = ?2",
            THREAD_COLUMNS
        );
        conn.query_row(&sql, params![org_id, thread_id], read_thread)
            .optional()?
            .map(RawThread::into_thread)
            .transpose()
    }

    fn load_open_thread(
        conn: &Connection,
        org_id: &str,
        channel: Channel,
        key: &ThreadKey,
    ) -> Result<Option<Thread>, StoreError> {
        let sql = format!(
            "SELECT {} FROM threads t
             WHERE t.org_id = ?1 AND t.channel_primary = ?2 AND t.thread_key = ?3
               AND t.status = 'open'
             ORDER BY t.last_message_at IS NULL, t.last_message_at DESC, t.created_at DESC
             LIMIT 1",
            THREAD_COLUMNS
        );
        conn.query_row(
            &sql,
            params![org_id, channel.as_str(), key.encode()],
            read_thread,
        )
        .optional()?
        .map(RawThread::into_thread)
        .transpose()
    }

    fn load_clients(
        conn: &Connection,
        sql: &str,
        values: Vec<String>,
    ) -> Result<Vec<Client>, StoreError> {
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params_from_iter(values.iter()), read_client)?;
        let mut clients = Vec::new();
        for row in rows {
            clients.push(row?);
        }
        Ok(clients)
    }
}

impl Directory for SqliteInboxStore {
    fn organization_exists(&self, org_id: &str) -> Result<bool, StoreError> {
        let conn = self.open()?;
        let exists: i64 = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM organizations WHERE id = ?1)",
            params![org_id],
            |row| row.get(0),
        )?;
        Ok(exists != 0)
    }

    fn find_clients_by_email(
        &self,
        org_id: Option<&str>,
        email: &str,
    ) -> Result<Vec<Client>, StoreError> {
        let conn = self.open()?;
        let mut values = vec![email.to_string()];
        let mut sql = format!("SELECT {} FROM clients WHERE email = ?1", CLIENT_COLUMNS);
        if let Some(org_id) = org_id {
            values.push(org_id.to_string());
            sql.push_str(" AND org_id = ?2");
        }
        sql.push_str(" ORDER BY org_id, id");
        Self::load_clients(&conn, &sql, values)
    }

    fn find_clients_by_phone(
        &self,
        org_id: Option<&str>,
        phones: &[String],
    ) -> Result<Vec<Client>, StoreError> {
        if phones.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.open()?;
        let mut values: Vec<String> = phones.to_vec();
        let placeholders = (1..=phones.len())
            .map(|idx| format!("?{}", idx))
            .collect::<Vec<_>>()
            .join(", ");
        let mut sql = format!(
            "SELECT {} FROM clients WHERE phone IN ({})",
            CLIENT_COLUMNS, placeholders
        );
        if let Some(org_id) = org_id {
            values.push(org_id.to_string());
            sql.push_str(&format!(" AND org_id = ?{}", values.len()));
        }
        sql.push_str(" ORDER BY org_id, id");
        Self::load_clients(&conn, &sql, values)
    }

    fn find_client_for_user(
        &self,
        org_id: &str,
        user_id: &str,
    ) -> Result<Option<Client>, StoreError> {
        let conn = self.open()?;
        let sql = format!(
            "SELECT {} FROM clients WHERE org_id = ?1 AND user_id = ?2 ORDER BY id LIMIT 1",
            CLIENT_COLUMNS
        );
        Ok(conn
            .query_row(&sql, params![org_id, user_id], read_client)
            .optional()?)
    }

    fn find_carer_for_user(
        &self,
        org_id: &str,
        user_id: &str,
    ) -> Result<Option<Carer>, StoreError> {
        let conn = self.open()?;
        Ok(conn
            .query_row(
                "SELECT id, org_id, user_id, name, phone FROM carers
                 WHERE org_id = ?1 AND user_id = ?2 ORDER BY id LIMIT 1",
                params![org_id, user_id],
                |row| {
                    Ok(Carer {
                        id: row.get(0)?,
                        org_id: row.get(1)?,
                        user_id: row.get(2)?,
                        name: row.get(3)?,
                        phone: row.get(4)?,
                    })
                },
            )
            .optional()?)
    }

    fn target_exists(&self, org_id: &str, target: &TargetRef) -> Result<bool, StoreError> {
        let conn = self.open()?;
        let sql = match target {
            TargetRef::Job(_) => "SELECT EXISTS(SELECT 1 FROM jobs WHERE id = ?1 AND org_id = ?2)",
            TargetRef::Invoice(_) => {
                "SELECT EXISTS(SELECT 1 FROM invoices WHERE id = ?1 AND org_id = ?2)"
            }
        };
        let exists: i64 =
            conn.query_row(sql, params![target.target_id(), org_id], |row| row.get(0))?;
        Ok(exists != 0)
    }
}

impl DirectoryWriter for SqliteInboxStore {
    fn upsert_organization(&self, org: &Organization) -> Result<(), StoreError> {
        let conn = self.open()?;
        conn.execute(
            "INSERT INTO organizations (id, name) VALUES (?1, ?2)
             ON CONFLICT(id) DO UPDATE SET name = excluded.name",
            params![org.id, org.name],
        )?;
        Ok(())
    }

    fn upsert_client(&self, client: &Client) -> Result<Client, StoreError> {
        let stored = Client {
            phone: stored_phone(client.phone.as_deref(), &self.country_code),
            email: stored_email(client.email.as_deref()),
            ..client.clone()
        };
        let conn = self.open()?;
        conn.execute(
            "INSERT INTO clients (id, org_id, user_id, name, phone, email)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(id) DO UPDATE SET
                org_id = excluded.org_id,
                user_id = excluded.user_id,
                name = excluded.name,
                phone = excluded.phone,
                email = excluded.email",
            params![
                stored.id,
                stored.org_id,
                stored.user_id,
                stored.name,
                stored.phone,
                stored.email
            ],
        )?;
        Ok(stored)
    }

    fn upsert_carer(&self, carer: &Carer) -> Result<(), StoreError> {
        let phone = stored_phone(carer.phone.as_deref(), &self.country_code);
        let conn = self.open()?;
        conn.execute(
            "INSERT INTO carers (id, org_id, user_id, name, phone)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(id) DO UPDATE SET
                org_id = excluded.org_id,
                user_id = excluded.user_id,
                name = excluded.name,
                phone = excluded.phone",
            params![carer.id, carer.org_id, carer.user_id, carer.name, phone],
        )?;
        Ok(())
    }

    fn upsert_job(&self, job: &Job) -> Result<(), StoreError> {
        let conn = self.open()?;
        conn.execute(
            "INSERT INTO jobs (id, org_id, client_id, assigned_carer_id, title)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(id) DO UPDATE SET
                org_id = excluded.org_id,
                client_id = excluded.client_id,
                assigned_carer_id = excluded.assigned_carer_id,
                title = excluded.title",
            params![
                job.id,
                job.org_id,
                job.client_id,
                job.assigned_carer_id,
                job.title
            ],
        )?;
        Ok(())
    }

    fn upsert_invoice(&self, invoice: &Invoice) -> Result<(), StoreError> {
        let conn = self.open()?;
        conn.execute(
            "INSERT INTO invoices (id, org_id, client_id, reference)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET
                org_id = excluded.org_id,
                client_id = excluded.client_id,
                reference = excluded.reference",
            params![invoice.id, invoice.org_id, invoice.client_id, invoice.reference],
        )?;
        Ok(())
    }
}

impl InboxStore for SqliteInboxStore {
    fn insert_webhook_log(
        &self,
        provider: Channel,
        org_id: Option<&str>,
        payload: &str,
    ) -> Result<WebhookLog, StoreError> {
        let log = WebhookLog {
            id: Uuid::new_v4().to_string(),
            org_id: org_id.map(str::to_string),
            provider,
            payload: payload.to_string(),
            received_at: Utc::now(),
            processed_at: None,
            outcome: None,
            error: None,
        };
        let conn = self.open()?;
        conn.execute(
            "INSERT INTO channel_webhook_logs (id, org_id, provider, payload, received_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                log.id,
                log.org_id,
                log.provider.as_str(),
                log.payload,
                format_datetime(log.received_at)
            ],
        )?;
        Ok(log)
    }

    fn complete_webhook_log(
        &self,
        id: &str,
        org_id: Option<&str>,
        outcome: WebhookOutcome,
        error: Option<&str>,
    ) -> Result<(), StoreError> {
        let conn = self.open()?;
        let updated = conn.execute(
            "UPDATE channel_webhook_logs
             SET processed_at = ?2,
                 outcome = ?3,
                 error = ?4,
                 org_id = COALESCE(org_id, ?5)
             WHERE id = ?1",
            params![
                id,
                format_datetime(Utc::now()),
                outcome.as_str(),
                error,
                org_id
            ],
        )?;
        if updated == 0 {
            return Err(StoreError::NotFound(format!("webhook log {}", id)));
        }
        Ok(())
    }

    fn get_webhook_log(&self, id: &str) -> Result<Option<WebhookLog>, StoreError> {
        let conn = self.open()?;
        let sql = format!("SELECT {} FROM channel_webhook_logs WHERE id = ?1", LOG_COLUMNS);
        conn.query_row(&sql, params![id], read_log)
            .optional()?
            .map(RawLog::into_log)
            .transpose()
    }

    fn list_webhook_logs(&self, limit: usize) -> Result<Vec<WebhookLog>, StoreError> {
        let conn = self.open()?;
        let sql = format!(
            "SELECT {} FROM channel_webhook_logs ORDER BY received_at DESC, rowid DESC LIMIT ?1",
            LOG_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![limit as i64], read_log)?;
        let mut logs = Vec::new();
        for row in rows {
            logs.push(row?.into_log()?);
        }
        Ok(logs)
    }

    fn find_open_thread(
        &self,
        org_id: &str,
        channel: Channel,
        key: &ThreadKey,
    ) -> Result<Option<Thread>, StoreError> {
        let conn = self.open()?;
        Self::load_open_thread(&conn, org_id, channel, key)
    }

    fn create_open_thread(
        &self,
        thread: &NewThread,
        participant: Option<(&str, ParticipantRole)>,
    ) -> Result<CreateThreadOutcome, StoreError> {
        let mut conn = self.open()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let id = Uuid::new_v4().to_string();
        let now = format_datetime(Utc::now());
        let inserted = tx.execute(
            "INSERT INTO threads (
                id, org_id, client_id, contact, channel_primary, thread_key, status,
                unread_count, last_message_at, tags, created_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'open', 0, NULL, ?7, ?8)
             ON CONFLICT DO NOTHING",
            params![
                id,
                thread.org_id,
                thread.client_id,
                thread.contact,
                thread.channel.as_str(),
                thread.key.encode(),
                encode_tags(&thread.tags),
                now
            ],
        )?;
        if inserted == 0 {
            let existing =
                Self::load_open_thread(&tx, &thread.org_id, thread.channel, &thread.key)?
                    .ok_or_else(|| {
                        StoreError::Corrupt(format!(
                            "thread insert for {} conflicted but no open thread exists",
                            thread.key.encode()
                        ))
                    })?;
            tx.commit()?;
            return Ok(CreateThreadOutcome::Existing(existing));
        }
        if let Some((user_id, role)) = participant {
            tx.execute(
                "INSERT INTO participants (thread_id, user_id, role, created_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT DO NOTHING",
                params![id, user_id, role.as_str(), now],
            )?;
        }
        let created = Self::load_thread(&tx, &thread.org_id, &id)?
            .ok_or_else(|| StoreError::NotFound(format!("thread {}", id)))?;
        tx.commit()?;
        Ok(CreateThreadOutcome::Created(created))
    }

    fn get_thread(&self, org_id: &str, thread_id: &str) -> Result<Option<Thread>, StoreError> {
        let conn = self.open()?;
        Self::load_thread(&conn, org_id, thread_id)
    }

    fn list_threads(
        &self,
        org_id: &str,
        scope: &ThreadScope,
        filter: &ThreadFilter,
    ) -> Result<Vec<Thread>, StoreError> {
        let mut values = vec![org_id.to_string()];
        let mut sql = format!("SELECT {} FROM threads t WHERE t.org_id = ?1", THREAD_COLUMNS);
        match scope {
            ThreadScope::All => {}
            ThreadScope::Empty => return Ok(Vec::new()),
            ThreadScope::Client(client_id) => {
                values.push(client_id.clone());
                sql.push_str(&format!(" AND t.client_id = ?{}", values.len()));
            }
            ThreadScope::Carer(carer_id) => {
                values.push(carer_id.clone());
                let placeholder = format!("?{}", values.len());
                sql.push_str(" AND ");
                sql.push_str(&carer_link_predicate("t.id", &placeholder));
            }
        }
        if let Some(status) = filter.status {
            values.push(status.as_str().to_string());
            sql.push_str(&format!(" AND t.status = ?{}", values.len()));
        }
        if let Some(channel) = filter.channel {
            values.push(channel.as_str().to_string());
            sql.push_str(&format!(" AND t.channel_primary = ?{}", values.len()));
        }
        sql.push_str(
            " ORDER BY t.last_message_at IS NULL, t.last_message_at DESC, t.created_at DESC",
        );

        let conn = self.open()?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(values.iter()), read_thread)?;
        let mut threads = Vec::new();
        for row in rows {
            threads.push(row?.into_thread()?);
        }
        Ok(threads)
    }

    fn list_participants(&self, thread_id: &str) -> Result<Vec<Participant>, StoreError> {
        let conn = self.open()?;
        let mut stmt = conn.prepare(
            "SELECT thread_id, user_id, role, created_at FROM participants
             WHERE thread_id = ?1 ORDER BY created_at, user_id",
        )?;
        let rows = stmt.query_map(params![thread_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;
        let mut participants = Vec::new();
        for row in rows {
            let (thread_id, user_id, role, created_at) = row?;
            participants.push(Participant {
                thread_id,
                user_id,
                role: parse_role(&role)?,
                created_at: parse_datetime(&created_at)?,
            });
        }
        Ok(participants)
    }

    fn carer_can_access(
        &self,
        org_id: &str,
        thread_id: &str,
        carer_id: &str,
    ) -> Result<bool, StoreError> {
        let conn = self.open()?;
        let sql = format!(
            "SELECT EXISTS(SELECT 1 FROM threads t WHERE t.org_id = ?1 AND t.id = ?2 AND {})",
            carer_link_predicate("t.id", "?3")
        );
        let exists: i64 =
            conn.query_row(&sql, params![org_id, thread_id, carer_id], |row| row.get(0))?;
        Ok(exists != 0)
    }

    fn set_thread_status(
        &self,
        org_id: &str,
        thread_id: &str,
        from: ThreadStatus,
        to: ThreadStatus,
    ) -> Result<Option<Thread>, StoreError> {
        let mut conn = self.open()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let updated = tx
            .execute(
                "UPDATE threads SET status = ?4 WHERE org_id = ?1 AND id = ?2 AND status = ?3",
                params![org_id, thread_id, from.as_str(), to.as_str()],
            )
            .map_err(|err| open_thread_conflict(err, thread_id))?;
        if updated == 0 {
            return Ok(None);
        }
        let thread = Self::load_thread(&tx, org_id, thread_id)?;
        tx.commit()?;
        Ok(thread)
    }

    fn mark_thread_read(
        &self,
        org_id: &str,
        thread_id: &str,
    ) -> Result<Option<Thread>, StoreError> {
        let conn = self.open()?;
        let updated = conn.execute(
            "UPDATE threads SET unread_count = 0 WHERE org_id = ?1 AND id = ?2",
            params![org_id, thread_id],
        )?;
        if updated == 0 {
            return Ok(None);
        }
        Self::load_thread(&conn, org_id, thread_id)
    }

    fn append_message(
        &self,
        org_id: &str,
        thread_id: &str,
        message: &NewMessage,
    ) -> Result<AppendOutcome, StoreError> {
        let mut conn = self.open()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        if Self::load_thread(&tx, org_id, thread_id)?.is_none() {
            return Err(StoreError::NotFound(format!("thread {}", thread_id)));
        }

        let created_at = Utc::now();
        let stored = Message {
            id: Uuid::new_v4().to_string(),
            org_id: org_id.to_string(),
            thread_id: thread_id.to_string(),
            sender_role: message.sender_role,
            sender_user_id: message.sender_user_id.clone(),
            channel: message.channel,
            text: message.text.clone(),
            attachments: message.attachments.clone(),
            meta: message.meta.clone(),
            external_id: message.external_id.clone(),
            created_at,
        };
        let inserted = tx.execute(
            "INSERT INTO messages (
                id, org_id, thread_id, sender_role, sender_user_id, channel, text,
                attachments, meta, external_id, created_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
             ON CONFLICT DO NOTHING",
            params![
                stored.id,
                stored.org_id,
                stored.thread_id,
                stored.sender_role.as_str(),
                stored.sender_user_id,
                stored.channel.as_str(),
                stored.text,
                serde_json::to_string(&stored.attachments)?,
                serde_json::to_string(&stored.meta)?,
                stored.external_id,
                format_datetime(created_at)
            ],
        )?;
        if inserted == 0 {
            let existing: String = tx.query_row(
                "SELECT id FROM messages WHERE org_id = ?1 AND channel = ?2 AND external_id = ?3",
                params![org_id, stored.channel.as_str(), stored.external_id],
                |row| row.get(0),
            )?;
            tx.commit()?;
            return Ok(AppendOutcome::Duplicate {
                existing_message_id: existing,
            });
        }

        tx.execute(
            "UPDATE threads
             SET unread_count = CASE WHEN ?3 = 'client' THEN unread_count + 1 ELSE 0 END,
                 last_message_at = ?4
             WHERE org_id = ?1 AND id = ?2",
            params![
                org_id,
                thread_id,
                stored.sender_role.as_str(),
                format_datetime(created_at)
            ],
        )?;
        let thread = Self::load_thread(&tx, org_id, thread_id)?
            .ok_or_else(|| StoreError::NotFound(format!("thread {}", thread_id)))?;
        tx.commit()?;
        Ok(AppendOutcome::Appended {
            message: stored,
            thread,
        })
    }

    fn list_messages(&self, org_id: &str, thread_id: &str) -> Result<Vec<Message>, StoreError> {
        let conn = self.open()?;
        let sql = format!(
            "SELECT {} FROM messages WHERE org_id = ?1 AND thread_id = ?2
             ORDER BY created_at, rowid",
            MESSAGE_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![org_id, thread_id], read_message)?;
        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?.into_message()?);
        }
        Ok(messages)
    }

    fn find_message_by_external_id(
        &self,
        org_id: &str,
        channel: Channel,
        external_id: &str,
    ) -> Result<Option<Message>, StoreError> {
        let conn = self.open()?;
        let sql = format!(
            "SELECT {} FROM messages WHERE org_id = ?1 AND channel = ?2 AND external_id = ?3",
            MESSAGE_COLUMNS
        );
        conn.query_row(&sql, params![org_id, channel.as_str(), external_id], read_message)
            .optional()?
            .map(RawMessage::into_message)
            .transpose()
    }

    fn insert_link(&self, thread_id: &str, target: &TargetRef) -> Result<ThreadLink, StoreError> {
        let conn = self.open()?;
        conn.execute(
            "INSERT INTO thread_links (id, thread_id, target_type, target_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(thread_id, target_type, target_id) DO NOTHING",
            params![
                Uuid::new_v4().to_string(),
                thread_id,
                target.target_type(),
                target.target_id(),
                format_datetime(Utc::now())
            ],
        )?;
        let (id, created_at): (String, String) = conn.query_row(
            "SELECT id, created_at FROM thread_links
             WHERE thread_id = ?1 AND target_type = ?2 AND target_id = ?3",
            params![thread_id, target.target_type(), target.target_id()],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok(ThreadLink {
            id,
            thread_id: thread_id.to_string(),
            target: target.clone(),
            created_at: parse_datetime(&created_at)?,
        })
    }

    fn list_links(&self, thread_id: &str) -> Result<Vec<ThreadLink>, StoreError> {
        let conn = self.open()?;
        let mut stmt = conn.prepare(
            "SELECT id, thread_id, target_type, target_id, created_at FROM thread_links
             WHERE thread_id = ?1 ORDER BY created_at, rowid",
        )?;
        let rows = stmt.query_map(params![thread_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
            ))
        })?;
        let mut links = Vec::new();
        for row in rows {
            let (id, thread_id, target_type, target_id, created_at) = row?;
            links.push(ThreadLink {
                id,
                thread_id,
                target: parse_target(&target_type, &target_id)?,
                created_at: parse_datetime(&created_at)?,
            });
        }
        Ok(links)
    }
}

struct RawThread {
    id: String,
    org_id: String,
    client_id: Option<String>,
    contact: Option<String>,
    channel_primary: String,
    status: String,
    unread_count: i64,
    last_message_at: Option<String>,
    tags: String,
    created_at: String,
}

impl RawThread {
    fn into_thread(self) -> Result<Thread, StoreError> {
        Ok(Thread {
            id: self.id,
            org_id: self.org_id,
            client_id: self.client_id,
            contact: self.contact,
            channel_primary: parse_channel(&self.channel_primary)?,
            status: parse_status(&self.status)?,
            unread_count: self.unread_count,
            last_message_at: self
                .last_message_at
                .as_deref()
                .map(parse_datetime)
                .transpose()?,
            tags: parse_tags(&self.tags),
            created_at: parse_datetime(&self.created_at)?,
        })
    }
}

fn read_thread(row: &Row<'_>) -> rusqlite::Result<RawThread> {
    Ok(RawThread {
        id: row.get(0)?,
        org_id: row.get(1)?,
        client_id: row.get(2)?,
        contact: row.get(3)?,
        channel_primary: row.get(4)?,
        status: row.get(5)?,
        unread_count: row.get(6)?,
        last_message_at: row.get(7)?,
        tags: row.get(8)?,
        created_at: row.get(9)?,
    })
}

struct RawMessage {
    id: String,
    org_id: String,
    thread_id: String,
    sender_role: String,
    sender_user_id: Option<String>,
    channel: String,
    text: String,
    attachments: String,
    meta: String,
    external_id: Option<String>,
    created_at: String,
}

impl RawMessage {
    fn into_message(self) -> Result<Message, StoreError> {
        Ok(Message {
            id: self.id,
            org_id: self.org_id,
            thread_id: self.thread_id,
            sender_role: parse_role(&self.sender_role)?,
            sender_user_id: self.sender_user_id,
            channel: parse_channel(&self.channel)?,
            text: self.text,
            attachments: serde_json::from_str(&self.attachments)?,
            meta: serde_json::from_str(&self.meta)?,
            external_id: self.external_id,
            created_at: parse_datetime(&self.created_at)?,
        })
    }
}

fn read_message(row: &Row<'_>) -> rusqlite::Result<RawMessage> {
    Ok(RawMessage {
        id: row.get(0)?,
        org_id: row.get(1)?,
        thread_id: row.get(2)?,
        sender_role: row.get(3)?,
        sender_user_id: row.get(4)?,
        channel: row.get(5)?,
        text: row.get(6)?,
        attachments: row.get(7)?,
        meta: row.get(8)?,
        external_id: row.get(9)?,
        created_at: row.get(10)?,
    })
}

struct RawLog {
    id: String,
    org_id: Option<String>,
    provider: String,
    payload: String,
    received_at: String,
    processed_at: Option<String>,
    outcome: Option<String>,
    error: Option<String>,
}

impl RawLog {
    fn into_log(self) -> Result<WebhookLog, StoreError> {
        Ok(WebhookLog {
            id: self.id,
            org_id: self.org_id,
            provider: parse_channel(&self.provider)?,
            payload: self.payload,
            received_at: parse_datetime(&self.received_at)?,
            processed_at: self.processed_at.as_deref().map(parse_datetime).transpose()?,
            outcome: parse_outcome(self.outcome)?,
            error: self.error,
        })
    }
}

fn read_log(row: &Row<'_>) -> rusqlite::Result<RawLog> {
    Ok(RawLog {
        id: row.get(0)?,
        org_id: row.get(1)?,
        provider: row.get(2)?,
        payload: row.get(3)?,
        received_at: row.get(4)?,
        processed_at: row.get(5)?,
        outcome: row.get(6)?,
        error: row.get(7)?,
    })
}

fn read_client(row: &Row<'_>) -> rusqlite::Result<Client> {
    Ok(Client {
        id: row.get(0)?,
        org_id: row.get(1)?,
        user_id: row.get(2)?,
        name: row.get(3)?,
        phone: row.get(4)?,
        email: row.get(5)?,
    })
}

fn open_thread_conflict(err: rusqlite::Error, thread_id: &str) -> StoreError {
    match &err {
        rusqlite::Error::SqliteFailure(failure, _)
            if failure.code == ErrorCode::ConstraintViolation =>
        {
            StoreError::OpenThreadExists(format!("thread {}", thread_id))
        }
        _ => StoreError::Sqlite(err),
    }
}

// Fixed width so text ordering matches time ordering.
fn format_datetime(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_datetime(value: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    Ok(DateTime::parse_from_rfc3339(value)?.with_timezone(&Utc))
}
