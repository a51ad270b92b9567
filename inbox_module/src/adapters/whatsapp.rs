//! WhatsApp payloads: the Meta Cloud API webhook and flat relay JSON.

use serde::Deserialize;
use serde_json::Value;

use super::{finish, first_field, AdapterError, InboundAdapter, InboundFields};
use crate::channel::Channel;
use crate::models::Attachment;

#[derive(Debug, Clone, Copy, Default)]
pub struct WhatsAppAdapter;

impl InboundAdapter for WhatsAppAdapter {
    fn channel(&self) -> Channel {
        Channel::WhatsApp
    }

    fn parse(&self, payload: &Value) -> Result<InboundFields, AdapterError> {
        if payload.get("entry").is_some() {
            return parse_cloud_webhook(payload);
        }
        finish(
            first_field(payload, &["from", "From", "sender", "wa_id"]),
            first_field(payload, &["text", "Body", "body", "message"]),
            first_field(payload, &["id", "messageId", "message_id", "MessageSid"]),
            Vec::new(),
        )
    }
}

fn parse_cloud_webhook(payload: &Value) -> Result<InboundFields, AdapterError> {
    let webhook: WhatsAppWebhook = serde_json::from_value(payload.clone())
        .map_err(|err| AdapterError::NoMessage(err.to_string()))?;

    let value = webhook
        .entry
        .into_iter()
        .flat_map(|entry| entry.changes)
        .map(|change| change.value)
        .find(|value| value.messages.as_ref().is_some_and(|msgs| !msgs.is_empty()));
    let Some(value) = value else {
        return Err(AdapterError::NoMessage(
            "no messages in webhook (status update?)".to_string(),
        ));
    };
    let Some(message) = value.messages.and_then(|msgs| msgs.into_iter().next()) else {
        return Err(AdapterError::NoMessage("no messages in webhook".to_string()));
    };

    let mut attachments = Vec::new();
    let mut caption = None;
    for (kind, media) in [
        ("image", &message.image),
        ("audio", &message.audio),
        ("video", &message.video),
        ("document", &message.document),
        ("sticker", &message.sticker),
    ] {
        if let Some(media) = media {
            attachments.push(Attachment {
                kind: kind.to_string(),
                reference: media.id.clone(),
                name: media.filename.clone(),
                mime_type: media.mime_type.clone(),
            });
            if caption.is_none() {
                caption = media.caption.clone();
            }
        }
    }

    let text = message
        .text
        .map(|text| text.body)
        .or_else(|| message.button.map(|button| button.text))
        .or_else(|| {
            message.interactive.and_then(|interactive| {
                interactive
                    .button_reply
                    .map(|reply| reply.title)
                    .or_else(|| interactive.list_reply.map(|reply| reply.title))
            })
        })
        .or(caption)
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty());

    let from = Some(message.from.trim().to_string()).filter(|from| !from.is_empty());
    finish(from, text, Some(message.id), attachments)
}

#[derive(Debug, Clone, Deserialize)]
struct WhatsAppWebhook {
    #[serde(default)]
    entry: Vec<WhatsAppEntry>,
}

#[derive(Debug, Clone, Deserialize)]
struct WhatsAppEntry {
    #[serde(default)]
    changes: Vec<WhatsAppChange>,
}

#[derive(Debug, Clone, Deserialize)]
struct WhatsAppChange {
    value: WhatsAppValue,
}

#[derive(Debug, Clone, Deserialize)]
struct WhatsAppValue {
    #[serde(default)]
    messages: Option<Vec<WhatsAppMessage>>,
}

#[derive(Debug, Clone, Deserialize)]
struct WhatsAppMessage {
    id: String,
    from: String,
    #[serde(default)]
    text: Option<WhatsAppText>,
    #[serde(default)]
    button: Option<WhatsAppButton>,
    #[serde(default)]
    interactive: Option<WhatsAppInteractive>,
    #[serde(default)]
    image: Option<WhatsAppMedia>,
    #[serde(default)]
    audio: Option<WhatsAppMedia>,
    #[serde(default)]
    video: Option<WhatsAppMedia>,
    #[serde(default)]
    document: Option<WhatsAppMedia>,
    #[serde(default)]
    sticker: Option<WhatsAppMedia>,
}

#[derive(Debug, Clone, Deserialize)]
struct WhatsAppText {
    body: String,
}

#[derive(Debug, Clone, Deserialize)]
struct WhatsAppButton {
    text: String,
}

#[derive(Debug, Clone, Deserialize)]
struct WhatsAppInteractive {
    button_reply: Option<WhatsAppReply>,
    list_reply: Option<WhatsAppReply>,
}

#[derive(Debug, Clone, Deserialize)]
struct WhatsAppReply {
    title: String,
}

#[derive(Debug, Clone, Deserialize)]
struct WhatsAppMedia {
    id: String,
    mime_type: Option<String>,
    caption: Option<String>,
    filename: Option<String>,
}
