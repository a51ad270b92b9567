//! Webhook audit log.
//!
//! Every authenticated delivery gets a row in `channel_webhook_logs` before any
//! parsing happens, and that row is completed exactly once with the outcome.
//! [`AuditEntry`] enforces the "exactly once": dropping an entry that was never
//! completed records it as failed.

use std::sync::Arc;

use tracing::{error, warn};

use crate::channel::Channel;
use crate::models::{WebhookLog, WebhookOutcome};
use crate::store::{InboxStore, StoreError};

pub const ABORTED_ERROR: &str = "ingestion aborted before completion";

#[derive(Clone)]
pub struct WebhookAuditLog {
    store: Arc<dyn InboxStore>,
}

impl WebhookAuditLog {
    pub fn new(store: Arc<dyn InboxStore>) -> Self {
        Self { store }
    }

    /// Record the raw payload as received. The entry stays open until completed.
    pub fn open(
        &self,
        provider: Channel,
        org_id: Option<&str>,
        payload: &str,
    ) -> Result<AuditEntry, StoreError> {
        let log = self.store.insert_webhook_log(provider, org_id, payload)?;
        Ok(AuditEntry {
            store: Arc::clone(&self.store),
            log_id: log.id,
            provider,
            org_id: log.org_id,
            completed: false,
        })
    }

    pub fn get(&self, id: &str) -> Result<Option<WebhookLog>, StoreError> {
        self.store.get_webhook_log(id)
    }

    pub fn recent(&self, limit: usize) -> Result<Vec<WebhookLog>, StoreError> {
        self.store.list_webhook_logs(limit)
    }
}

/// An open audit row. Complete it with one of the outcome methods.
pub struct AuditEntry {
    store: Arc<dyn InboxStore>,
    log_id: String,
    provider: Channel,
    org_id: Option<String>,
    completed: bool,
}

impl AuditEntry {
    pub fn id(&self) -> &str {
        &self.log_id
    }

    /// Remember the resolved org; it is written when the entry completes.
    pub fn set_org(&mut self, org_id: &str) {
        if self.org_id.is_none() {
            self.org_id = Some(org_id.to_string());
        }
    }

    pub fn processed(self) -> Result<(), StoreError> {
        self.complete(WebhookOutcome::Processed, None)
    }

    pub fn duplicate(self) -> Result<(), StoreError> {
        self.complete(WebhookOutcome::Duplicate, None)
    }

    pub fn unmatched(self) -> Result<(), StoreError> {
        self.complete(WebhookOutcome::Unmatched, None)
    }

    pub fn failed(self, error: &str) -> Result<(), StoreError> {
        self.complete(WebhookOutcome::Failed, Some(error))
    }

    fn complete(mut self, outcome: WebhookOutcome, error: Option<&str>) -> Result<(), StoreError> {
        self.completed = true;
        self.store
            .complete_webhook_log(&self.log_id, self.org_id.as_deref(), outcome, error)
    }
}

impl Drop for AuditEntry {
    fn drop(&mut self) {
        if self.completed {
            return;
        }
        warn!(
            "webhook log {} ({}) dropped without an outcome",
            self.log_id, self.provider
        );
        if let Err(err) = self.store.complete_webhook_log(
            &self.log_id,
            self.org_id.as_deref(),
            WebhookOutcome::Failed,
            Some(ABORTED_ERROR),
        ) {
            error!("failed to close webhook log {}: {}", self.log_id, err);
        }
    }
}
