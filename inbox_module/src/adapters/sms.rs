//! SMS payloads: Twilio-style form posts and flat JSON.

use serde_json::Value;

use super::{finish, first_field, AdapterError, InboundAdapter, InboundFields};
use crate::channel::Channel;
use crate::models::Attachment;

// Twilio caps inbound MMS at ten media items.
const MAX_MEDIA: usize = 10;

#[derive(Debug, Clone, Copy, Default)]
pub struct SmsAdapter;

impl InboundAdapter for SmsAdapter {
    fn channel(&self) -> Channel {
        Channel::Sms
    }

    fn parse(&self, payload: &Value) -> Result<InboundFields, AdapterError> {
        let from = first_field(payload, &["From", "from", "sender", "msisdn"]);
        let text = first_field(payload, &["Body", "text", "message", "body"]);
        let external_id = first_field(
            payload,
            &["MessageSid", "SmsSid", "SmsMessageSid", "id", "messageId", "message_id"],
        );
        finish(from, text, external_id, twilio_media(payload))
    }
}

fn twilio_media(payload: &Value) -> Vec<Attachment> {
    let count = first_field(payload, &["NumMedia"])
        .and_then(|raw| raw.parse::<usize>().ok())
        .unwrap_or(0)
        .min(MAX_MEDIA);
    (0..count)
        .filter_map(|idx| {
            let url = first_field(payload, &[format!("MediaUrl{}", idx).as_str()])?;
            let mime_type = first_field(payload, &[format!("MediaContentType{}", idx).as_str()]);
            Some(Attachment {
                kind: media_kind(mime_type.as_deref()).to_string(),
                reference: url,
                name: None,
                mime_type,
            })
        })
        .collect()
}

fn media_kind(mime_type: Option<&str>) -> &'static str {
    match mime_type.and_then(|mime| mime.split('/').next()) {
        Some("image") => "image",
        Some("audio") => "audio",
        Some("video") => "video",
        _ => "file",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::decode_body;
    use serde_json::json;

    #[test]
    fn parses_twilio_form_post() {
        let payload = decode_body(
            b"MessageSid=SM123&From=%2B233244000111&To=%2B15550001111&Body=Running+late&NumMedia=0",
        )
        .unwrap();
        let fields = SmsAdapter.parse(&payload).unwrap();
        assert_eq!(fields.from, "+233244000111");
        assert_eq!(fields.text, "Running late");
        assert_eq!(fields.external_id.as_deref(), Some("SM123"));
        assert!(fields.attachments.is_empty());
    }

    #[test]
    fn parses_twilio_media() {
        let payload = decode_body(
            b"MessageSid=MM1&From=%2B233244000111&Body=Swollen+ankle&NumMedia=1\
              &MediaUrl0=https%3A%2F%2Fapi.twilio.com%2Fm%2F1&MediaContentType0=image%2Fpng",
        )
        .unwrap();
        let fields = SmsAdapter.parse(&payload).unwrap();
        assert_eq!(fields.text, "Swollen ankle");
        assert_eq!(fields.attachments.len(), 1);
        assert_eq!(fields.attachments[0].kind, "image");
        assert_eq!(fields.attachments[0].reference, "https://api.twilio.com/m/1");
    }

    #[test]
    fn parses_flat_json() {
        let fields = SmsAdapter
            .parse(&json!({"from": "0244000111", "text": "ok"}))
            .unwrap();
        assert_eq!(fields.from, "0244000111");
        assert_eq!(fields.text, "ok");
    }

    #[test]
    fn media_without_body_is_rejected() {
        let payload = decode_body(
            b"MessageSid=MM2&From=%2B233244000111&NumMedia=1\
              &MediaUrl0=https%3A%2F%2Fapi.twilio.com%2Fm%2F2&MediaContentType0=image%2Fpng",
        )
        .unwrap();
        assert_eq!(SmsAdapter.parse(&payload), Err(AdapterError::MissingText));
    }

    #[test]
    fn missing_body_is_rejected() {
        assert_eq!(
            SmsAdapter.parse(&json!({"From": "+233244000111", "NumMedia": "0"})),
            Err(AdapterError::MissingText)
        );
    }
}
