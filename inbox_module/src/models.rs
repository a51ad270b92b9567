use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::channel::Channel;
use crate::contact::Contact;

/// Tag applied to threads whose sender could not be matched to a client.
pub const UNMATCHED_TAG: &str = "UNMATCHED";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThreadStatus {
    Open,
    Archived,
}

impl ThreadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ThreadStatus::Open => "open",
            ThreadStatus::Archived => "archived",
        }
    }
}

impl fmt::Display for ThreadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ThreadStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "open" => Ok(ThreadStatus::Open),
            "archived" => Ok(ThreadStatus::Archived),
            other => Err(format!("unknown thread status: {}", other)),
        }
    }
}

/// Role of a thread participant or message sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParticipantRole {
    Client,
    Carer,
    Manager,
}

impl ParticipantRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParticipantRole::Client => "client",
            ParticipantRole::Carer => "carer",
            ParticipantRole::Manager => "manager",
        }
    }
}

impl fmt::Display for ParticipantRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ParticipantRole {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "client" => Ok(ParticipantRole::Client),
            "carer" => Ok(ParticipantRole::Carer),
            "manager" => Ok(ParticipantRole::Manager),
            other => Err(format!("unknown participant role: {}", other)),
        }
    }
}

/// Identity that at most one open thread per `(org, channel)` may hold.
///
/// Matched senders are keyed by client id; unmatched senders by their
/// normalized contact, so two unknown numbers never share a thread.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ThreadKey {
    Client(String),
    Contact(String),
}

impl ThreadKey {
    pub fn for_sender(client_id: Option<&str>, contact: &Contact) -> Self {
        match client_id {
            Some(id) => ThreadKey::Client(id.to_string()),
            None => ThreadKey::Contact(contact.as_str().to_string()),
        }
    }

    pub fn encode(&self) -> String {
        match self {
            ThreadKey::Client(id) => format!("client:{}", id),
            ThreadKey::Contact(value) => format!("contact:{}", value),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Thread {
    pub id: String,
    pub org_id: String,
    pub client_id: Option<String>,
    pub contact: Option<String>,
    pub channel_primary: Channel,
    pub status: ThreadStatus,
    pub unread_count: i64,
    pub last_message_at: Option<DateTime<Utc>>,
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl Thread {
    pub fn is_unmatched(&self) -> bool {
        self.tags.iter().any(|tag| tag == UNMATCHED_TAG)
    }
}

#[derive(Debug, Clone)]
pub struct NewThread {
    pub org_id: String,
    pub client_id: Option<String>,
    pub contact: Option<String>,
    pub channel: Channel,
    pub key: ThreadKey,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub thread_id: String,
    pub user_id: String,
    pub role: ParticipantRole,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub kind: String,
    pub reference: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub org_id: String,
    pub thread_id: String,
    pub sender_role: ParticipantRole,
    pub sender_user_id: Option<String>,
    pub channel: Channel,
    pub text: String,
    pub attachments: Vec<Attachment>,
    pub meta: serde_json::Value,
    pub external_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewMessage {
    pub sender_role: ParticipantRole,
    pub sender_user_id: Option<String>,
    pub channel: Channel,
    pub text: String,
    pub attachments: Vec<Attachment>,
    pub meta: serde_json::Value,
    pub external_id: Option<String>,
}

/// Result of appending a message to a thread.
#[derive(Debug, Clone)]
pub enum AppendOutcome {
    Appended { message: Message, thread: Thread },
    /// The provider message id was already ingested; nothing changed.
    Duplicate { existing_message_id: String },
}

/// Business entity a thread can be linked to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "lowercase")]
pub enum TargetRef {
    Job(String),
    Invoice(String),
}

impl TargetRef {
    pub fn target_type(&self) -> &'static str {
        match self {
            TargetRef::Job(_) => "job",
            TargetRef::Invoice(_) => "invoice",
        }
    }

    pub fn target_id(&self) -> &str {
        match self {
            TargetRef::Job(id) | TargetRef::Invoice(id) => id,
        }
    }

    pub fn from_parts(target_type: &str, target_id: &str) -> Result<Self, String> {
        let target_id = target_id.trim();
        if target_id.is_empty() {
            return Err("link target id cannot be empty".to_string());
        }
        match target_type.trim().to_ascii_lowercase().as_str() {
            "job" => Ok(TargetRef::Job(target_id.to_string())),
            "invoice" => Ok(TargetRef::Invoice(target_id.to_string())),
            other => Err(format!("unknown link target type: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadLink {
    pub id: String,
    pub thread_id: String,
    pub target: TargetRef,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WebhookOutcome {
    Processed,
    Duplicate,
    Unmatched,
    Failed,
}

impl WebhookOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            WebhookOutcome::Processed => "processed",
            WebhookOutcome::Duplicate => "duplicate",
            WebhookOutcome::Unmatched => "unmatched",
            WebhookOutcome::Failed => "failed",
        }
    }
}

impl FromStr for WebhookOutcome {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "processed" => Ok(WebhookOutcome::Processed),
            "duplicate" => Ok(WebhookOutcome::Duplicate),
            "unmatched" => Ok(WebhookOutcome::Unmatched),
            "failed" => Ok(WebhookOutcome::Failed),
            other => Err(format!("unknown webhook outcome: {}", other)),
        }
    }
}

/// One inbound delivery attempt, as recorded in `channel_webhook_logs`.
#[derive(Debug, Clone, PartialEq)]
pub struct WebhookLog {
    pub id: String,
    pub org_id: Option<String>,
    pub provider: Channel,
    pub payload: String,
    pub received_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub outcome: Option<WebhookOutcome>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Organization {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Client {
    pub id: String,
    pub org_id: String,
    pub user_id: Option<String>,
    pub name: String,
    pub phone: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Carer {
    pub id: String,
    pub org_id: String,
    pub user_id: String,
    pub name: String,
    pub phone: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub id: String,
    pub org_id: String,
    pub client_id: Option<String>,
    pub assigned_carer_id: Option<String>,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invoice {
    pub id: String,
    pub org_id: String,
    pub client_id: Option<String>,
    pub reference: String,
}

pub(crate) fn parse_tags(raw: &str) -> Vec<String> {
    serde_json::from_str::<Vec<String>>(raw).unwrap_or_default()
}

pub(crate) fn encode_tags(tags: &[String]) -> String {
    serde_json::to_string(tags).unwrap_or_else(|_| "[]".to_string())
}
