pub(super) const SQLITE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS organizations (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS clients (
    id TEXT PRIMARY KEY,
    org_id TEXT NOT NULL,
    user_id TEXT,
    name TEXT NOT NULL,
    phone TEXT,
    email TEXT
);
CREATE INDEX IF NOT EXISTS clients_phone_idx ON clients(phone);
CREATE INDEX IF NOT EXISTS clients_email_idx ON clients(email);
CREATE INDEX IF NOT EXISTS clients_user_idx ON clients(org_id, user_id);
CREATE TABLE IF NOT EXISTS carers (
    id TEXT PRIMARY KEY,
    org_id TEXT NOT NULL,
    user_id TEXT NOT NULL,
    name TEXT NOT NULL,
    phone TEXT
);
CREATE INDEX IF NOT EXISTS carers_user_idx ON carers(org_id, user_id);
CREATE TABLE IF NOT EXISTS jobs (
    id TEXT PRIMARY KEY,
    org_id TEXT NOT NULL,
    client_id TEXT,
    assigned_carer_id TEXT,
    title TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS invoices (
    id TEXT PRIMARY KEY,
    org_id TEXT NOT NULL,
    client_id TEXT,
    reference TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS threads (
    id TEXT PRIMARY KEY,
    org_id TEXT NOT NULL,
    client_id TEXT,
    contact TEXT,
    channel_primary TEXT NOT NULL,
    thread_key TEXT NOT NULL,
    status TEXT NOT NULL,
    unread_count INTEGER NOT NULL DEFAULT 0,
    last_message_at TEXT,
    tags TEXT NOT NULL DEFAULT '[]',
    created_at TEXT NOT NULL
);
CREATE UNIQUE INDEX IF NOT EXISTS threads_one_open_idx
    ON threads(org_id, channel_primary, thread_key) WHERE status = 'open';
CREATE INDEX IF NOT EXISTS threads_org_idx ON threads(org_id, status, last_message_at);
CREATE TABLE IF NOT EXISTS participants (
    thread_id TEXT NOT NULL,
    user_id TEXT NOT NULL,
    role TEXT NOT NULL,
    created_at TEXT NOT NULL,
    PRIMARY KEY (thread_id, user_id)
);
CREATE TABLE IF NOT EXISTS messages (
    id TEXT PRIMARY KEY,
    org_id TEXT NOT NULL,
    thread_id TEXT NOT NULL,
    sender_role TEXT NOT NULL,
    sender_user_id TEXT,
    channel TEXT NOT NULL,
    text TEXT NOT NULL,
    attachments TEXT NOT NULL DEFAULT '[]',
    meta TEXT NOT NULL DEFAULT '{}',
    external_id TEXT,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS messages_thread_idx ON messages(thread_id, created_at);
CREATE UNIQUE INDEX IF NOT EXISTS messages_external_idx
    ON messages(org_id, channel, external_id) WHERE external_id IS NOT NULL;
CREATE TABLE IF NOT EXISTS thread_links (
    id TEXT PRIMARY KEY,
    thread_id TEXT NOT NULL,
    target_type TEXT NOT NULL,
    target_id TEXT NOT NULL,
    created_at TEXT NOT NULL,
    UNIQUE(thread_id, target_type, target_id)
);
CREATE INDEX IF NOT EXISTS thread_links_target_idx ON thread_links(target_type, target_id);
CREATE TABLE IF NOT EXISTS channel_webhook_logs (
    id TEXT PRIMARY KEY,
    org_id TEXT,
    provider TEXT NOT NULL,
    payload TEXT NOT NULL,
    received_at TEXT NOT NULL,
    processed_at TEXT,
    outcome TEXT,
    error TEXT
);
CREATE INDEX IF NOT EXISTS channel_webhook_logs_received_idx
    ON channel_webhook_logs(received_at);
"#;

pub(super) const POSTGRES_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS organizations (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS clients (
    id TEXT PRIMARY KEY,
    org_id TEXT NOT NULL,
    user_id TEXT,
    name TEXT NOT NULL,
    phone TEXT,
    email TEXT
);
CREATE INDEX IF NOT EXISTS clients_phone_idx ON clients(phone);
CREATE INDEX IF NOT EXISTS clients_email_idx ON clients(email);
CREATE INDEX IF NOT EXISTS clients_user_idx ON clients(org_id, user_id);
CREATE TABLE IF NOT EXISTS carers (
    id TEXT PRIMARY KEY,
    org_id TEXT NOT NULL,
    user_id TEXT NOT NULL,
    name TEXT NOT NULL,
    phone TEXT
);
CREATE INDEX IF NOT EXISTS carers_user_idx ON carers(org_id, user_id);
CREATE TABLE IF NOT EXISTS jobs (
    id TEXT PRIMARY KEY,
    org_id TEXT NOT NULL,
    client_id TEXT,
    assigned_carer_id TEXT,
    title TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS invoices (
    id TEXT PRIMARY KEY,
    org_id TEXT NOT NULL,
    client_id TEXT,
    reference TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS threads (
    id TEXT PRIMARY KEY,
    org_id TEXT NOT NULL,
    client_id TEXT,
    contact TEXT,
    channel_primary TEXT NOT NULL,
    thread_key TEXT NOT NULL,
    status TEXT NOT NULL,
    unread_count BIGINT NOT NULL DEFAULT 0,
    last_message_at TIMESTAMPTZ,
    tags TEXT NOT NULL DEFAULT '[]',
    created_at TIMESTAMPTZ NOT NULL DEFAULT now()
);
CREATE UNIQUE INDEX IF NOT EXISTS threads_one_open_idx
    ON threads(org_id, channel_primary, thread_key) WHERE status = 'open';
CREATE INDEX IF NOT EXISTS threads_org_idx ON threads(org_id, status, last_message_at);
CREATE TABLE IF NOT EXISTS participants (
    thread_id TEXT NOT NULL,
    user_id TEXT NOT NULL,
    role TEXT NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    PRIMARY KEY (thread_id, user_id)
);
CREATE TABLE IF NOT EXISTS messages (
    seq BIGSERIAL,
    id TEXT PRIMARY KEY,
    org_id TEXT NOT NULL,
    thread_id TEXT NOT NULL,
    sender_role TEXT NOT NULL,
    sender_user_id TEXT,
    channel TEXT NOT NULL,
    text TEXT NOT NULL,
    attachments TEXT NOT NULL DEFAULT '[]',
    meta TEXT NOT NULL DEFAULT '{}',
    external_id TEXT,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now()
);
CREATE INDEX IF NOT EXISTS messages_thread_idx ON messages(thread_id, created_at);
CREATE UNIQUE INDEX IF NOT EXISTS messages_external_idx
    ON messages(org_id, channel, external_id) WHERE external_id IS NOT NULL;
CREATE TABLE IF NOT EXISTS thread_links (
    id TEXT PRIMARY KEY,
    thread_id TEXT NOT NULL,
    target_type TEXT NOT NULL,
    target_id TEXT NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    UNIQUE(thread_id, target_type, target_id)
);
CREATE INDEX IF NOT EXISTS thread_links_target_idx ON thread_links(target_type, target_id);
CREATE TABLE IF NOT EXISTS channel_webhook_logs (
    id TEXT PRIMARY KEY,
    org_id TEXT,
    provider TEXT NOT NULL,
    payload TEXT NOT NULL,
    received_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    processed_at TIMESTAMPTZ,
    outcome TEXT,
    error TEXT
);
CREATE INDEX IF NOT EXISTS channel_webhook_logs_received_idx
    ON channel_webhook_logs(received_at);
"#;

/// Visibility predicate for carers: the thread links a job assigned to them.
/// `{thread}` is the thread id expression, `{carer}` the carer id placeholder.
pub(super) fn carer_link_predicate(thread: &str, carer: &str) -> String {
    format!(
        "EXISTS (
            SELECT 1 FROM thread_links l
            JOIN jobs j ON j.id = l.target_id
            JOIN threads tt ON tt.id = l.thread_id AND tt.org_id = j.org_id
            WHERE l.thread_id = {thread}
              AND l.target_type = 'job'
              AND j.assigned_carer_id = {carer}
        )",
        thread = thread,
        carer = carer
    )
}
