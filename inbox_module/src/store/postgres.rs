use chrono::{DateTime, Utc};
use postgres::error::SqlState;
use postgres::types::ToSql;
use postgres::{GenericClient, Row};
use postgres_native_tls::MakeTlsConnector;
use r2d2::{Pool, PooledConnection};
use r2d2_postgres::PostgresConnectionManager;
use tracing::error;
use uuid::Uuid;

use super::schema::{carer_link_predicate, POSTGRES_SCHEMA};
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

type PgManager = PostgresConnectionManager<MakeTlsConnector>;

#[derive(Debug)]
struct LoggingErrorHandler;

impl r2d2::HandleError<postgres::Error> for LoggingErrorHandler {
    fn handle_error(&self, err: postgres::Error) {
        error!("inbox store postgres pool error: {:?}", err);
    }
}

#[derive(Clone)]
pub struct PostgresInboxStore {
    pool: Option<Pool<PgManager>>,
    country_code: String,
}

impl PostgresInboxStore {
    pub fn new(db_url: &str, allow_invalid_certs: bool) -> Result<Self, StoreError> {
        let config: postgres::Config = db_url.parse()?;
        let mut tls_builder = native_tls::TlsConnector::builder();
        if allow_invalid_certs {
            tls_builder.danger_accept_invalid_certs(true);
            tls_builder.danger_accept_invalid_hostnames(true);
        }
        let tls_connector = tls_builder
            .build()
            .map_err(|err| StoreError::Config(err.to_string()))?;
        let tls = MakeTlsConnector::new(tls_connector);

        let manager = PostgresConnectionManager::new(config, tls);
        let pool = Pool::builder()
            .max_size(16)
            .connection_timeout(std::time::Duration::from_secs(5))
            .idle_timeout(Some(std::time::Duration::from_secs(300)))
            .error_handler(Box::new(LoggingErrorHandler))
            .build(manager)?;
        let store = Self {
            pool: Some(pool),
            country_code: DEFAULT_COUNTRY_CODE.to_string(),
        };
        store.ensure_schema()?;
        Ok(store)
    }

    pub fn with_country_code(mut self, country_code: impl Into<String>) -> Self {
        self.country_code = country_code.into();
        self
    }

    fn connection(&self) -> Result<PooledConnection<PgManager>, StoreError> {
        let pool = self
            .pool
            .as_ref()
            .ok_or_else(|| StoreError::Config("inbox store pool dropped".to_string()))?;
        Ok(pool.get()?)
    }

    fn ensure_schema(&self) -> Result<(), StoreError> {
        let mut conn = self.connection()?;
        conn.batch_execute(POSTGRES_SCHEMA)?;
        Ok(())
    }

    #[cfg(test)]
    fn purge_org_for_tests(&self, org_id: &str) {
        if let Ok(mut conn) = self.connection() {
            let _ = conn.batch_execute(&format!(
                "DELETE FROM thread_links WHERE thread_id IN (SELECT id FROM threads WHERE org_id = '{org}');
                 DELETE FROM participants WHERE thread_id IN (SELECT id FROM threads WHERE org_id = '{org}');
                 DELETE FROM messages WHERE org_id = '{org}';
                 DELETE FROM threads WHERE org_id = '{org}';
                 DELETE FROM clients WHERE org_id = '{org}';
                 DELETE FROM carers WHERE org_id = '{org}';
                 DELETE FROM jobs WHERE org_id = '{org}';
                 DELETE FROM channel_webhook_logs WHERE org_id = '{org}';
                 DELETE FROM organizations WHERE id = '{org}';",
                org = org_id
            ));
        }
    }
}

fn load_thread<C: GenericClient>(
    client: &mut C,
    org_id: &str,
    thread_id: &str,
) -> Result<Option<Thread>, StoreError> {
    let sql = format!(
        "SELECT {} FROM threads t WHERE t.org_id = $1 AND t.id = $2",
        THREAD_COLUMNS
    );
    client
        .query_opt(sql.as_str(), &[&org_id, &thread_id])?
        .map(|row| thread_from_row(&row))
        .transpose()
}

fn load_open_thread<C: GenericClient>(
    client: &mut C,
    org_id: &str,
    channel: Channel,
    key: &ThreadKey,
) -> Result<Option<Thread>, StoreError> {
    let sql = format!(
        "SELECT {} FROM threads t
         WHERE t.org_id = $1 AND t.channel_primary = $2 AND t.thread_key = $3
           AND t.status = 'open'
         ORDER BY t.last_message_at DESC NULLS LAST, t.created_at DESC
         LIMIT 1",
        THREAD_COLUMNS
    );
    client
        .query_opt(sql.as_str(), &[&org_id, &channel.as_str(), &key.encode()])?
        .map(|row| thread_from_row(&row))
        .transpose()
}

fn as_params(values: &[String]) -> Vec<&(dyn ToSql + Sync)> {
    values
        .iter()
        .map(|value| value as &(dyn ToSql + Sync))
        .collect()
}

impl Directory for PostgresInboxStore {
    fn organization_exists(&self, org_id: &str) -> Result<bool, StoreError> {
        let mut conn = self.connection()?;
        let row = conn.query_one(
            "SELECT EXISTS(SELECT 1 FROM organizations WHERE id = $1)",
            &[&org_id],
        )?;
        Ok(row.get(0))
    }

    fn find_clients_by_email(
        &self,
        org_id: Option<&str>,
        email: &str,
    ) -> Result<Vec<Client>, StoreError> {
        let mut conn = self.connection()?;
        let sql = format!(
            "SELECT {} FROM clients
             WHERE email = $1 AND ($2::TEXT IS NULL OR org_id = $2)
             ORDER BY org_id, id",
            CLIENT_COLUMNS
        );
        let rows = conn.query(sql.as_str(), &[&email, &org_id])?;
        Ok(rows.iter().map(client_from_row).collect())
    }

    fn find_clients_by_phone(
        &self,
        org_id: Option<&str>,
        phones: &[String],
    ) -> Result<Vec<Client>, StoreError> {
        if phones.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.connection()?;
        let sql = format!(
            "SELECT {} FROM clients
             WHERE phone = ANY($1) AND ($2::TEXT IS NULL OR org_id = $2)
             ORDER BY org_id, id",
            CLIENT_COLUMNS
        );
        let phones: Vec<String> = phones.to_vec();
        let rows = conn.query(sql.as_str(), &[&phones, &org_id])?;
        Ok(rows.iter().map(client_from_row).collect())
    }

    fn find_client_for_user(
        &self,
        org_id: &str,
        user_id: &str,
    ) -> Result<Option<Client>, StoreError> {
        let mut conn = self.connection()?;
        let sql = format!(
            "SELECT {} FROM clients WHERE org_id = $1 AND user_id = $2 ORDER BY id LIMIT 1",
            CLIENT_COLUMNS
        );
        Ok(conn
            .query_opt(sql.as_str(), &[&org_id, &user_id])?
            .map(|row| client_from_row(&row)))
    }

    fn find_carer_for_user(
        &self,
        org_id: &str,
        user_id: &str,
    ) -> Result<Option<Carer>, StoreError> {
        let mut conn = self.connection()?;
        let row = conn.query_opt(
            "SELECT id, org_id, user_id, name, phone FROM carers
             WHERE org_id = $1 AND user_id = $2 ORDER BY id LIMIT 1",
            &[&org_id, &user_id],
        )?;
        Ok(row.map(|row| Carer {
            id: row.get(0),
            org_id: row.get(1),
            user_id: row.get(2),
            name: row.get(3),
            phone: row.get(4),
        }))
    }

    fn target_exists(&self, org_id: &str, target: &TargetRef) -> Result<bool, StoreError> {
        let mut conn = self.connection()?;
        let sql = match target {
            TargetRef::Job(_) => "SELECT EXISTS(SELECT 1 FROM jobs WHERE id = $1 AND org_id = $2)",
            TargetRef::Invoice(_) => {
                "SELECT EXISTS(SELECT 1 FROM invoices WHERE id = $1 AND org_id = $2)"
            }
        };
        let row = conn.query_one(sql, &[&target.target_id(), &org_id])?;
        Ok(row.get(0))
    }
}

impl DirectoryWriter for PostgresInboxStore {
    fn upsert_organization(&self, org: &Organization) -> Result<(), StoreError> {
        let mut conn = self.connection()?;
        conn.execute(
            "INSERT INTO organizations (id, name) VALUES ($1, $2)
             ON CONFLICT (id) DO UPDATE SET name = EXCLUDED.name",
            &[&org.id, &org.name],
        )?;
        Ok(())
    }

    fn upsert_client(&self, client: &Client) -> Result<Client, StoreError> {
        let stored = Client {
            phone: stored_phone(client.phone.as_deref(), &self.country_code),
            email: stored_email(client.email.as_deref()),
            ..client.clone()
        };
        let mut conn = self.connection()?;
        conn.execute(
            "INSERT INTO clients (id, org_id, user_id, name, phone, email)
             VALUES ($1, $2, $3, $4, $5, $6)
             ON CONFLICT (id) DO UPDATE SET
                org_id = EXCLUDED.org_id,
                user_id = EXCLUDED.user_id,
                name = EXCLUDED.name,
                phone = EXCLUDED.phone,
                email = EXCLUDED.email",
            &[
                &stored.id,
                &stored.org_id,
                &stored.user_id,
                &stored.name,
                &stored.phone,
                &stored.email,
            ],
        )?;
        Ok(stored)
    }

    fn upsert_carer(&self, carer: &Carer) -> Result<(), StoreError> {
        let phone = stored_phone(carer.phone.as_deref(), &self.country_code);
        let mut conn = self.connection()?;
        conn.execute(
            "INSERT INTO carers (id, org_id, user_id, name, phone)
             VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT (id) DO UPDATE SET
                org_id = EXCLUDED.org_id,
                user_id = EXCLUDED.user_id,
                name = EXCLUDED.name,
                phone = EXCLUDED.phone",
            &[&carer.id, &carer.org_id, &carer.user_id, &carer.name, &phone],
        )?;
        Ok(())
    }

    fn upsert_job(&self, job: &Job) -> Result<(), StoreError> {
        let mut conn = self.connection()?;
        conn.execute(
            "INSERT INTO jobs (id, org_id, client_id, assigned_carer_id, title)
             VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT (id) DO UPDATE SET
                org_id = EXCLUDED.org_id,
                client_id = EXCLUDED.client_id,
                assigned_carer_id = EXCLUDED.assigned_carer_id,
                title = EXCLUDED.title",
            &[
                &job.id,
                &job.org_id,
                &job.client_id,
                &job.assigned_carer_id,
                &job.title,
            ],
        )?;
        Ok(())
    }

    fn upsert_invoice(&self, invoice: &Invoice) -> Result<(), StoreError> {
        let mut conn = self.connection()?;
        conn.execute(
            "INSERT INTO invoices (id, org_id, client_id, reference)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (id) DO UPDATE SET
                org_id = EXCLUDED.org_id,
                client_id = EXCLUDED.client_id,
                reference = EXCLUDED.reference",
            &[
                &invoice.id,
                &invoice.org_id,
                &invoice.client_id,
                &invoice.reference,
            ],
        )?;
        Ok(())
    }
}

impl InboxStore for PostgresInboxStore {
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
        let mut conn = self.connection()?;
        conn.execute(
            "INSERT INTO channel_webhook_logs (id, org_id, provider, payload, received_at)
             VALUES ($1, $2, $3, $4, $5)",
            &[
                &log.id,
                &log.org_id,
                &log.provider.as_str(),
                &log.payload,
                &log.received_at,
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
        let mut conn = self.connection()?;
        let updated = conn.execute(
            "UPDATE channel_webhook_logs
             SET processed_at = now(),
                 outcome = $2,
                 error = $3,
                 org_id = COALESCE(org_id, $4)
             WHERE id = $1",
            &[&id, &outcome.as_str(), &error, &org_id],
        )?;
        if updated == 0 {
            return Err(StoreError::NotFound(format!("webhook log {}", id)));
        }
        Ok(())
    }

    fn get_webhook_log(&self, id: &str) -> Result<Option<WebhookLog>, StoreError> {
        let mut conn = self.connection()?;
        let sql = format!("SELECT {} FROM channel_webhook_logs WHERE id = $1", LOG_COLUMNS);
        conn.query_opt(sql.as_str(), &[&id])?
            .map(|row| log_from_row(&row))
            .transpose()
    }

    fn list_webhook_logs(&self, limit: usize) -> Result<Vec<WebhookLog>, StoreError> {
        let mut conn = self.connection()?;
        let sql = format!(
            "SELECT {} FROM channel_webhook_logs ORDER BY received_at DESC LIMIT $1",
            LOG_COLUMNS
        );
        let limit = limit as i64;
        conn.query(sql.as_str(), &[&limit])?
            .iter()
            .map(log_from_row)
            .collect()
    }

    fn find_open_thread(
        &self,
        org_id: &str,
        channel: Channel,
        key: &ThreadKey,
    ) -> Result<Option<Thread>, StoreError> {
        let mut conn = self.connection()?;
        load_open_thread(&mut *conn, org_id, channel, key)
    }

    fn create_open_thread(
        &self,
        thread: &NewThread,
        participant: Option<(&str, ParticipantRole)>,
    ) -> Result<CreateThreadOutcome, StoreError> {
        let mut conn = self.connection()?;
        let mut tx = conn.transaction()?;
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();
        let channel = thread.channel.as_str();
        let key = thread.key.encode();
        let tags = encode_tags(&thread.tags);
        let inserted = tx.execute(
            "INSERT INTO threads (
                id, org_id, client_id, contact, channel_primary, thread_key, status,
                unread_count, last_message_at, tags, created_at
             ) VALUES ($1, $2, $3, $4, $5, $6, 'open', 0, NULL, $7, $8)
             ON CONFLICT DO NOTHING",
            &[
                &id,
                &thread.org_id,
                &thread.client_id,
                &thread.contact,
                &channel,
                &key,
                &tags,
                &now,
            ],
        )?;
        if inserted == 0 {
            let existing = load_open_thread(&mut tx, &thread.org_id, thread.channel, &thread.key)?
                .ok_or_else(|| {
                    StoreError::Corrupt(format!(
                        "thread insert for {} conflicted but no open thread exists",
                        key
                    ))
                })?;
            tx.commit()?;
            return Ok(CreateThreadOutcome::Existing(existing));
        }
        if let Some((user_id, role)) = participant {
            tx.execute(
                "INSERT INTO participants (thread_id, user_id, role, created_at)
                 VALUES ($1, $2, $3, $4)
                 ON CONFLICT DO NOTHING",
                &[&id, &user_id, &role.as_str(), &now],
            )?;
        }
        let created = load_thread(&mut tx, &thread.org_id, &id)?
            .ok_or_else(|| StoreError::NotFound(format!("thread {}", id)))?;
        tx.commit()?;
        Ok(CreateThreadOutcome::Created(created))
    }

    fn get_thread(&self, org_id: &str, thread_id: &str) -> Result<Option<Thread>, StoreError> {
        let mut conn = self.connection()?;
        load_thread(&mut *conn, org_id, thread_id)
    }

    fn list_threads(
        &self,
        org_id: &str,
        scope: &ThreadScope,
        filter: &ThreadFilter,
    ) -> Result<Vec<Thread>, StoreError> {
        let mut values = vec![org_id.to_string()];
        let mut sql = format!("SELECT {} FROM threads t WHERE t.org_id = $1", THREAD_COLUMNS);
        match scope {
            ThreadScope::All => {}
            ThreadScope::Empty => return Ok(Vec::new()),
            ThreadScope::Client(client_id) => {
                values.push(client_id.clone());
                sql.push_str(&format!(" AND t.client_id = ${}", values.len()));
            }
            ThreadScope::Carer(carer_id) => {
                values.push(carer_id.clone());
                let placeholder = format!("${}", values.len());
                sql.push_str(" AND ");
                sql.push_str(&carer_link_predicate("t.id", &placeholder));
            }
        }
        if let Some(status) = filter.status {
            values.push(status.as_str().to_string());
            sql.push_str(&format!(" AND t.status = ${}", values.len()));
        }
        if let Some(channel) = filter.channel {
            values.push(channel.as_str().to_string());
            sql.push_str(&format!(" AND t.channel_primary = ${}", values.len()));
        }
        sql.push_str(" ORDER BY t.last_message_at DESC NULLS LAST, t.created_at DESC");

        let mut conn = self.connection()?;
        conn.query(sql.as_str(), &as_params(&values))?
            .iter()
            .map(thread_from_row)
            .collect()
    }

    fn list_participants(&self, thread_id: &str) -> Result<Vec<Participant>, StoreError> {
        let mut conn = self.connection()?;
        let rows = conn.query(
            "SELECT thread_id, user_id, role, created_at FROM participants
             WHERE thread_id = $1 ORDER BY created_at, user_id",
            &[&thread_id],
        )?;
        rows.iter()
            .map(|row| {
                let role: String = row.get(2);
                Ok(Participant {
                    thread_id: row.get(0),
                    user_id: row.get(1),
                    role: parse_role(&role)?,
                    created_at: row.get(3),
                })
            })
            .collect()
    }

    fn carer_can_access(
        &self,
        org_id: &str,
        thread_id: &str,
        carer_id: &str,
    ) -> Result<bool, StoreError> {
        let mut conn = self.connection()?;
        let sql = format!(
            "SELECT EXISTS(SELECT 1 FROM threads t WHERE t.org_id = $1 AND t.id = $2 AND {})",
            carer_link_predicate("t.id", "$3")
        );
        let row = conn.query_one(sql.as_str(), &[&org_id, &thread_id, &carer_id])?;
        Ok(row.get(0))
    }

    fn set_thread_status(
        &self,
        org_id: &str,
        thread_id: &str,
        from: ThreadStatus,
        to: ThreadStatus,
    ) -> Result<Option<Thread>, StoreError> {
        let mut conn = self.connection()?;
        let mut tx = conn.transaction()?;
        let updated = tx
            .execute(
                "UPDATE threads SET status = $4 WHERE org_id = $1 AND id = $2 AND status = $3",
                &[&org_id, &thread_id, &from.as_str(), &to.as_str()],
            )
            .map_err(|err| open_thread_conflict(err, thread_id))?;
        if updated == 0 {
            return Ok(None);
        }
        let thread = load_thread(&mut tx, org_id, thread_id)?;
        tx.commit()?;
        Ok(thread)
    }

    fn mark_thread_read(
        &self,
        org_id: &str,
        thread_id: &str,
    ) -> Result<Option<Thread>, StoreError> {
        let mut conn = self.connection()?;
        let updated = conn.execute(
            "UPDATE threads SET unread_count = 0 WHERE org_id = $1 AND id = $2",
            &[&org_id, &thread_id],
        )?;
        if updated == 0 {
            return Ok(None);
        }
        load_thread(&mut *conn, org_id, thread_id)
    }

    fn append_message(
        &self,
        org_id: &str,
        thread_id: &str,
        message: &NewMessage,
    ) -> Result<AppendOutcome, StoreError> {
        let mut conn = self.connection()?;
        let mut tx = conn.transaction()?;
        let locked = tx.query_opt(
            "SELECT id FROM threads WHERE org_id = $1 AND id = $2 FOR UPDATE",
            &[&org_id, &thread_id],
        )?;
        if locked.is_none() {
            return Err(StoreError::NotFound(format!("thread {}", thread_id)));
        }

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
            created_at: Utc::now(),
        };
        let role = stored.sender_role.as_str();
        let channel = stored.channel.as_str();
        let attachments = serde_json::to_string(&stored.attachments)?;
        let meta = serde_json::to_string(&stored.meta)?;
        let inserted = tx.execute(
            "INSERT INTO messages (
                id, org_id, thread_id, sender_role, sender_user_id, channel, text,
                attachments, meta, external_id, created_at
             ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
             ON CONFLICT DO NOTHING",
            &[
                &stored.id,
                &stored.org_id,
                &stored.thread_id,
                &role,
                &stored.sender_user_id,
                &channel,
                &stored.text,
                &attachments,
                &meta,
                &stored.external_id,
                &stored.created_at,
            ],
        )?;
        if inserted == 0 {
            let row = tx.query_one(
                "SELECT id FROM messages WHERE org_id = $1 AND channel = $2 AND external_id = $3",
                &[&org_id, &channel, &stored.external_id],
            )?;
            tx.commit()?;
            return Ok(AppendOutcome::Duplicate {
                existing_message_id: row.get(0),
            });
        }

        tx.execute(
            "UPDATE threads
             SET unread_count = CASE WHEN $3::TEXT = 'client' THEN unread_count + 1 ELSE 0 END,
                 last_message_at = $4
             WHERE org_id = $1 AND id = $2",
            &[&org_id, &thread_id, &role, &stored.created_at],
        )?;
        let thread = load_thread(&mut tx, org_id, thread_id)?
            .ok_or_else(|| StoreError::NotFound(format!("thread {}", thread_id)))?;
        tx.commit()?;
        Ok(AppendOutcome::Appended {
            message: stored,
            thread,
        })
    }

    fn list_messages(&self, org_id: &str, thread_id: &str) -> Result<Vec<Message>, StoreError> {
        let mut conn = self.connection()?;
        let sql = format!(
            "SELECT {} FROM messages WHERE org_id = $1 AND thread_id = $2
             ORDER BY created_at, seq",
            MESSAGE_COLUMNS
        );
        conn.query(sql.as_str(), &[&org_id, &thread_id])?
            .iter()
            .map(message_from_row)
            .collect()
    }

    fn find_message_by_external_id(
        &self,
        org_id: &str,
        channel: Channel,
        external_id: &str,
    ) -> Result<Option<Message>, StoreError> {
        let mut conn = self.connection()?;
        let sql = format!(
            "SELECT {} FROM messages WHERE org_id = $1 AND channel = $2 AND external_id = $3",
            MESSAGE_COLUMNS
        );
        conn.query_opt(sql.as_str(), &[&org_id, &channel.as_str(), &external_id])?
            .as_ref()
            .map(message_from_row)
            .transpose()
    }

    fn insert_link(&self, thread_id: &str, target: &TargetRef) -> Result<ThreadLink, StoreError> {
        let mut conn = self.connection()?;
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();
        conn.execute(
            "INSERT INTO thread_links (id, thread_id, target_type, target_id, created_at)
             VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT (thread_id, target_type, target_id) DO NOTHING",
            &[
                &id,
                &thread_id,
                &target.target_type(),
                &target.target_id(),
                &now,
            ],
        )?;
        let row = conn.query_one(
            "SELECT id, created_at FROM thread_links
             WHERE thread_id = $1 AND target_type = $2 AND target_id = $3",
            &[&thread_id, &target.target_type(), &target.target_id()],
        )?;
        Ok(ThreadLink {
            id: row.get(0),
            thread_id: thread_id.to_string(),
            target: target.clone(),
            created_at: row.get(1),
        })
    }

    fn list_links(&self, thread_id: &str) -> Result<Vec<ThreadLink>, StoreError> {
        let mut conn = self.connection()?;
        let rows = conn.query(
            "SELECT id, thread_id, target_type, target_id, created_at FROM thread_links
             WHERE thread_id = $1 ORDER BY created_at, id",
            &[&thread_id],
        )?;
        rows.iter()
            .map(|row| {
                let target_type: String = row.get(2);
                let target_id: String = row.get(3);
                Ok(ThreadLink {
                    id: row.get(0),
                    thread_id: row.get(1),
                    target: parse_target(&target_type, &target_id)?,
                    created_at: row.get(4),
                })
            })
            .collect()
    }
}

impl Drop for PostgresInboxStore {
    fn drop(&mut self) {
        // r2d2 joins its workers on drop, which must not happen on a runtime thread.
        if let Some(pool) = self.pool.take() {
            std::thread::spawn(move || drop(pool));
        }
    }
}

fn thread_from_row(row: &Row) -> Result<Thread, StoreError> {
    let channel: String = row.get(4);
    let status: String = row.get(5);
    let tags: String = row.get(8);
    Ok(Thread {
        id: row.get(0),
        org_id: row.get(1),
        client_id: row.get(2),
        contact: row.get(3),
        channel_primary: parse_channel(&channel)?,
        status: parse_status(&status)?,
        unread_count: row.get(6),
        last_message_at: row.get::<_, Option<DateTime<Utc>>>(7),
        tags: parse_tags(&tags),
        created_at: row.get(9),
    })
}

fn message_from_row(row: &Row) -> Result<Message, StoreError> {
    let role: String = row.get(3);
    let channel: String = row.get(5);
    let attachments: String = row.get(7);
    let meta: String = row.get(8);
    Ok(Message {
        id: row.get(0),
        org_id: row.get(1),
        thread_id: row.get(2),
        sender_role: parse_role(&role)?,
        sender_user_id: row.get(4),
        channel: parse_channel(&channel)?,
        text: row.get(6),
        attachments: serde_json::from_str(&attachments)?,
        meta: serde_json::from_str(&meta)?,
        external_id: row.get(9),
        created_at: row.get(10),
    })
}

fn log_from_row(row: &Row) -> Result<WebhookLog, StoreError> {
    let provider: String = row.get(2);
    Ok(WebhookLog {
        id: row.get(0),
        org_id: row.get(1),
        provider: parse_channel(&provider)?,
        payload: row.get(3),
        received_at: row.get(4),
        processed_at: row.get(5),
        outcome: parse_outcome(row.get(6))?,
        error: row.get(7),
    })
}

fn client_from_row(row: &Row) -> Client {
    Client {
        id: row.get(0),
        org_id: row.get(1),
        user_id: row.get(2),
        name: row.get(3),
        phone: row.get(4),
        email: row.get(5),
    }
}

fn open_thread_conflict(err: postgres::Error, thread_id: &str) -> StoreError {
    if err.code() == Some(&SqlState::UNIQUE_VIOLATION) {
        StoreError::OpenThreadExists(format!("thread {}", thread_id))
    } else {
        StoreError::Postgres(err)
    }
}
