//! Inbound message ingestion: one call per authenticated webhook delivery.

use std::sync::Arc;

use tracing::{error, info, warn};

use crate::adapters::{adapter_for, decode_body};
use crate::audit_log::{AuditEntry, WebhookAuditLog};
use crate::channel::Channel;
use crate::contact::normalize_contact;
use crate::locks::KeyedLocks;
use crate::models::{AppendOutcome, NewMessage, ParticipantRole};
use crate::resolver::ThreadResolver;
use crate::store::{InboxStore, StoreError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    Accepted {
        thread_id: String,
        message_id: String,
        created_thread: bool,
    },
    /// The provider redelivered a message that is already stored.
    Duplicate {
        thread_id: String,
        message_id: String,
    },
    Unmatched,
}

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("malformed payload: {0}")]
    MalformedPayload(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub struct IngestionPipeline {
    store: Arc<dyn InboxStore>,
    audit: WebhookAuditLog,
    resolver: ThreadResolver,
}

impl IngestionPipeline {
    pub fn new(store: Arc<dyn InboxStore>, locks: Arc<KeyedLocks>) -> Self {
        Self {
            audit: WebhookAuditLog::new(Arc::clone(&store)),
            resolver: ThreadResolver::new(Arc::clone(&store), locks),
            store,
        }
    }

    pub fn with_country_code(mut self, country_code: &str) -> Self {
        self.resolver = self.resolver.with_country_code(country_code);
        self
    }

    pub fn audit_log(&self) -> &WebhookAuditLog {
        &self.audit
    }

    /// Ingest one delivery. Every call that gets past audit insertion leaves
    /// exactly one completed audit row, whatever the outcome.
    pub fn ingest(
        &self,
        org_hint: Option<&str>,
        channel: Channel,
        raw_body: &[u8],
    ) -> Result<IngestOutcome, IngestError> {
        let payload_text = String::from_utf8_lossy(raw_body);
        let mut entry = self.audit.open(channel, org_hint, &payload_text)?;
        let result = self.process(&mut entry, org_hint, channel, raw_body);

        let log_id = entry.id().to_string();
        let completed = match &result {
            Ok(IngestOutcome::Accepted { .. }) => entry.processed(),
            Ok(IngestOutcome::Duplicate { .. }) => entry.duplicate(),
            Ok(IngestOutcome::Unmatched) => entry.unmatched(),
            Err(err) => entry.failed(&err.to_string()),
        };
        if let Err(err) = completed {
            error!("failed to complete webhook log {}: {}", log_id, err);
        }
        result
    }

    fn process(
        &self,
        entry: &mut AuditEntry,
        org_hint: Option<&str>,
        channel: Channel,
        raw_body: &[u8],
    ) -> Result<IngestOutcome, IngestError> {
        let payload =
            decode_body(raw_body).map_err(|err| IngestError::MalformedPayload(err.to_string()))?;
        let fields = adapter_for(channel)
            .parse(&payload)
            .map_err(|err| IngestError::MalformedPayload(err.to_string()))?;
        let contact = normalize_contact(&fields.from).ok_or_else(|| {
            IngestError::MalformedPayload(format!("unparseable sender: {}", fields.from))
        })?;

        let Some(sender) = self.resolver.identify(org_hint, channel, &contact)? else {
            warn!(
                "unmatched inbound message channel={} log_id={}",
                channel,
                entry.id()
            );
            return Ok(IngestOutcome::Unmatched);
        };
        entry.set_org(&sender.org_id);

        // Redeliveries resolve to the thread holding the original message, even
        // when that thread has been archived since.
        if let Some(external_id) = fields.external_id.as_deref() {
            if let Some(existing) =
                self.store
                    .find_message_by_external_id(&sender.org_id, channel, external_id)?
            {
                return Ok(duplicate(channel, existing.thread_id, existing.id));
            }
        }

        let (thread, created_thread) = self.resolver.open_thread(&sender, channel, &contact)?;
        let message = NewMessage {
            sender_role: ParticipantRole::Client,
            sender_user_id: sender.client.and_then(|c| c.user_id),
            channel,
            text: fields.text,
            attachments: fields.attachments,
            meta: payload,
            external_id: fields.external_id,
        };
        match self.store.append_message(&thread.org_id, &thread.id, &message)? {
            AppendOutcome::Appended { message, thread } => {
                info!(
                    "ingested message message_id={} thread_id={} channel={} unread={}",
                    message.id, thread.id, channel, thread.unread_count
                );
                Ok(IngestOutcome::Accepted {
                    thread_id: thread.id,
                    message_id: message.id,
                    created_thread,
                })
            }
            // A concurrent delivery of the same message won the insert.
            AppendOutcome::Duplicate {
                existing_message_id,
            } => {
                let original_thread = match message.external_id.as_deref() {
                    Some(external_id) => self
                        .store
                        .find_message_by_external_id(&thread.org_id, channel, external_id)?
                        .map(|existing| existing.thread_id),
                    None => None,
                };
                Ok(duplicate(
                    channel,
                    original_thread.unwrap_or(thread.id),
                    existing_message_id,
                ))
            }
        }
    }
}

fn duplicate(channel: Channel, thread_id: String, message_id: String) -> IngestOutcome {
    info!(
        "duplicate delivery message_id={} thread_id={} channel={}",
        message_id, thread_id, channel
    );
    IngestOutcome::Duplicate {
        thread_id,
        message_id,
    }
}
