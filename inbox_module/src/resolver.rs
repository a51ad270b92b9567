//! Find-or-create of the open conversation thread for an inbound sender.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{info, warn};

use crate::channel::Channel;
use crate::contact::{phone_lookup_candidates, Contact, DEFAULT_COUNTRY_CODE};
use crate::locks::KeyedLocks;
use crate::models::{Client, NewThread, ParticipantRole, Thread, ThreadKey, UNMATCHED_TAG};
use crate::store::{InboxStore, StoreError};

#[derive(Debug, Clone)]
pub enum Resolution {
    Thread {
        thread: Thread,
        client: Option<Client>,
        created: bool,
    },
    /// No organization could be determined for the sender.
    Unmatched,
}

/// The organization a sender belongs to, and the client record when known.
#[derive(Debug, Clone)]
pub struct Sender {
    pub org_id: String,
    pub client: Option<Client>,
}

enum ClientMatch {
    Found(Client),
    NotFound,
    Ambiguous(usize),
}

pub struct ThreadResolver {
    store: Arc<dyn InboxStore>,
    locks: Arc<KeyedLocks>,
    country_code: String,
}

impl ThreadResolver {
    pub fn new(store: Arc<dyn InboxStore>, locks: Arc<KeyedLocks>) -> Self {
        Self {
            store,
            locks,
            country_code: DEFAULT_COUNTRY_CODE.to_string(),
        }
    }

    pub fn with_country_code(mut self, country_code: impl Into<String>) -> Self {
        self.country_code = country_code.into();
        self
    }

    pub fn resolve(
        &self,
        org_hint: Option<&str>,
        channel: Channel,
        contact: &Contact,
    ) -> Result<Resolution, StoreError> {
        let Some(sender) = self.identify(org_hint, channel, contact)? else {
            return Ok(Resolution::Unmatched);
        };
        let (thread, created) = self.open_thread(&sender, channel, contact)?;
        Ok(Resolution::Thread {
            thread,
            client: sender.client,
            created,
        })
    }

    /// Settle the sender's organization without touching threads. `None` when
    /// the hint names no organization, the contact is ambiguous across orgs,
    /// or there is neither a hint nor a client match.
    pub fn identify(
        &self,
        org_hint: Option<&str>,
        channel: Channel,
        contact: &Contact,
    ) -> Result<Option<Sender>, StoreError> {
        if let Some(org_id) = org_hint {
            if !self.store.organization_exists(org_id)? {
                warn!("webhook org hint does not exist org_id={}", org_id);
                return Ok(None);
            }
        }

        let client = match self.match_client(org_hint, contact)? {
            ClientMatch::Found(client) => Some(client),
            ClientMatch::NotFound => None,
            ClientMatch::Ambiguous(orgs) => {
                warn!(
                    "contact matches clients in {} orgs; leaving unmatched channel={}",
                    orgs, channel
                );
                return Ok(None);
            }
        };

        let org_id = match (&client, org_hint) {
            (Some(client), _) => client.org_id.clone(),
            (None, Some(org_id)) => org_id.to_string(),
            (None, None) => return Ok(None),
        };
        Ok(Some(Sender { org_id, client }))
    }

    /// Find or create the open thread for an identified sender. The flag is
    /// true when this call created the thread.
    pub fn open_thread(
        &self,
        sender: &Sender,
        channel: Channel,
        contact: &Contact,
    ) -> Result<(Thread, bool), StoreError> {
        let Sender { org_id, client } = sender;
        let key = ThreadKey::for_sender(client.as_ref().map(|c| c.id.as_str()), contact);
        let lock_key = format!("{}:{}:{}", org_id, channel, key.encode());
        self.locks.with_lock(&lock_key, || {
            if let Some(thread) = self.store.find_open_thread(org_id, channel, &key)? {
                return Ok((thread, false));
            }

            let new_thread = NewThread {
                org_id: org_id.clone(),
                client_id: client.as_ref().map(|c| c.id.clone()),
                contact: Some(contact.as_str().to_string()),
                channel,
                key: key.clone(),
                tags: if client.is_some() {
                    Vec::new()
                } else {
                    vec![UNMATCHED_TAG.to_string()]
                },
            };
            let participant = client
                .as_ref()
                .and_then(|c| c.user_id.as_deref())
                .map(|user_id| (user_id, ParticipantRole::Client));
            let outcome = self.store.create_open_thread(&new_thread, participant)?;
            let created = outcome.was_created();
            let thread = outcome.into_thread();
            if created {
                info!(
                    "created thread thread_id={} org_id={} channel={} matched={}",
                    thread.id,
                    thread.org_id,
                    channel,
                    client.is_some()
                );
            }
            Ok((thread, created))
        })
    }

    fn match_client(
        &self,
        org_hint: Option<&str>,
        contact: &Contact,
    ) -> Result<ClientMatch, StoreError> {
        let candidates = match contact {
            Contact::Email(email) => self.store.find_clients_by_email(org_hint, email)?,
            Contact::Phone(phone) => {
                let phones = phone_lookup_candidates(phone, &self.country_code);
                self.store.find_clients_by_phone(org_hint, &phones)?
            }
        };
        let orgs: BTreeSet<&str> = candidates.iter().map(|c| c.org_id.as_str()).collect();
        if orgs.len() > 1 {
            return Ok(ClientMatch::Ambiguous(orgs.len()));
        }
        Ok(candidates
            .into_iter()
            .next()
            .map_or(ClientMatch::NotFound, ClientMatch::Found))
    }
}
