//! Per-provider payload adapters.
//!
//! Providers disagree on field names and nesting. Each adapter maps one
//! provider's payload onto [`InboundFields`], so the pipeline never probes
//! field-name variants itself.

mod email;
mod sms;
mod whatsapp;

use serde_json::{Map, Value};

use crate::channel::Channel;
use crate::models::Attachment;

pub use email::EmailAdapter;
pub use sms::SmsAdapter;
pub use whatsapp::WhatsAppAdapter;

/// The provider-independent part of an inbound message.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundFields {
    pub from: String,
    pub text: String,
    /// Provider message id, used to drop redeliveries.
    pub external_id: Option<String>,
    pub attachments: Vec<Attachment>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AdapterError {
    #[error("payload is neither JSON nor form data")]
    Undecodable,
    #[error("payload has no sender")]
    MissingFrom,
    #[error("payload has no message text")]
    MissingText,
    #[error("payload carries no message: {0}")]
    NoMessage(String),
}

pub trait InboundAdapter: Send + Sync {
    fn channel(&self) -> Channel;
    fn parse(&self, payload: &Value) -> Result<InboundFields, AdapterError>;
}

static WHATSAPP: WhatsAppAdapter = WhatsAppAdapter;
static SMS: SmsAdapter = SmsAdapter;
static EMAIL: EmailAdapter = EmailAdapter;

pub fn adapter_for(channel: Channel) -> &'static dyn InboundAdapter {
    match channel {
        Channel::WhatsApp => &WHATSAPP,
        Channel::Sms => &SMS,
        Channel::Email => &EMAIL,
    }
}

/// Decode a raw webhook body: JSON first, then `application/x-www-form-urlencoded`.
pub fn decode_body(raw: &[u8]) -> Result<Value, AdapterError> {
    if let Ok(value) = serde_json::from_slice::<Value>(raw) {
        return match value {
            Value::Object(_) => Ok(value),
            _ => Err(AdapterError::Undecodable),
        };
    }
    if std::str::from_utf8(raw).is_err() {
        return Err(AdapterError::Undecodable);
    }
    let pairs: Vec<(String, String)> =
        serde_urlencoded::from_bytes(raw).map_err(|_| AdapterError::Undecodable)?;
    if pairs.is_empty() {
        return Err(AdapterError::Undecodable);
    }
    let mut map = Map::new();
    for (key, value) in pairs {
        map.entry(key).or_insert(Value::String(value));
    }
    Ok(Value::Object(map))
}

/// First non-empty string (or number) found under any of `keys`.
pub(crate) fn first_field(payload: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match payload.get(*key) {
        Some(Value::String(value)) => {
            let value = value.trim();
            (!value.is_empty()).then(|| value.to_string())
        }
        Some(Value::Number(value)) => Some(value.to_string()),
        _ => None,
    })
}

/// Require a sender and message text. Attachments never stand in for text;
/// a provider caption counts only when the adapter passes it as `text`.
pub(crate) fn finish(
    from: Option<String>,
    text: Option<String>,
    external_id: Option<String>,
    attachments: Vec<Attachment>,
) -> Result<InboundFields, AdapterError> {
    let from = from.ok_or(AdapterError::MissingFrom)?;
    let text = text.ok_or(AdapterError::MissingText)?;
    Ok(InboundFields {
        from,
        text,
        external_id,
        attachments,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_json_and_form_bodies() {
        let json_body = decode_body(br#"{"from":"+233244000111","text":"Hi"}"#).unwrap();
        assert_eq!(json_body["text"], "Hi");

        let form = decode_body(b"From=%2B233244000111&Body=Hello+there").unwrap();
        assert_eq!(form["From"], "+233244000111");
        assert_eq!(form["Body"], "Hello there");
    }

    #[test]
    fn rejects_non_object_bodies() {
        assert_eq!(decode_body(b"[1,2,3]"), Err(AdapterError::Undecodable));
        assert_eq!(decode_body(b""), Err(AdapterError::Undecodable));
        assert_eq!(decode_body(&[0xff, 0xfe]), Err(AdapterError::Undecodable));
    }

    #[test]
    fn first_field_skips_blank_values() {
        let payload = json!({"from": "  ", "From": "+1555", "id": 42});
        assert_eq!(first_field(&payload, &["from", "From"]), Some("+1555".to_string()));
        assert_eq!(first_field(&payload, &["id"]), Some("42".to_string()));
        assert_eq!(first_field(&payload, &["missing"]), None);
    }

    #[test]
    fn finish_requires_sender_and_content() {
        assert_eq!(
            finish(None, Some("hi".to_string()), None, Vec::new()),
            Err(AdapterError::MissingFrom)
        );
        assert_eq!(
            finish(Some("+1".to_string()), None, None, Vec::new()),
            Err(AdapterError::MissingText)
        );
        let media_only = finish(
            Some("+1".to_string()),
            None,
            None,
            vec![Attachment {
                kind: "image".to_string(),
                reference: "media-1".to_string(),
                name: None,
                mime_type: None,
            }],
        );
        assert_eq!(media_only, Err(AdapterError::MissingText));
    }

    #[test]
    fn adapter_for_matches_channel() {
        for channel in Channel::ALL {
            assert_eq!(adapter_for(channel).channel(), channel);
        }
    }
}
