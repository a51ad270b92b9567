//! Email payloads: Postmark-style inbound JSON and flat JSON.

use serde_json::Value;

use super::{finish, first_field, AdapterError, InboundAdapter, InboundFields};
use crate::channel::Channel;
use crate::models::Attachment;

#[derive(Debug, Clone, Copy, Default)]
pub struct EmailAdapter;

impl InboundAdapter for EmailAdapter {
    fn channel(&self) -> Channel {
        Channel::Email
    }

    fn parse(&self, payload: &Value) -> Result<InboundFields, AdapterError> {
        let from = payload
            .get("FromFull")
            .and_then(|full| first_field(full, &["Email"]))
            .or_else(|| first_field(payload, &["From", "from", "sender", "email"]));
        let text = first_field(
            payload,
            &["StrippedTextReply", "TextBody", "text", "body", "message", "Subject"],
        );
        let external_id = first_field(payload, &["MessageID", "MessageId", "messageId", "id"]);
        finish(from, text, external_id, postmark_attachments(payload))
    }
}

fn postmark_attachments(payload: &Value) -> Vec<Attachment> {
    let Some(items) = payload.get("Attachments").and_then(Value::as_array) else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| {
            let name = first_field(item, &["Name"]);
            let reference = first_field(item, &["ContentID"]).or_else(|| name.clone())?;
            Some(Attachment {
                kind: "file".to_string(),
                reference,
                name,
                mime_type: first_field(item, &["ContentType"]),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_postmark_inbound() {
        let payload = json!({
            "From": "Ama Mensah <ama@example.com>",
            "FromFull": {"Email": "Ama@Example.com", "Name": "Ama Mensah"},
            "Subject": "Visit on Friday",
            "MessageID": "73e6d360-66eb-11e1-8e72-a8904824019b",
            "TextBody": "Can we move the visit to 3pm?",
            "Attachments": [
                {"Name": "note.pdf", "ContentType": "application/pdf", "ContentID": ""}
            ]
        });
        let fields = EmailAdapter.parse(&payload).unwrap();
        assert_eq!(fields.from, "Ama@Example.com");
        assert_eq!(fields.text, "Can we move the visit to 3pm?");
        assert_eq!(
            fields.external_id.as_deref(),
            Some("73e6d360-66eb-11e1-8e72-a8904824019b")
        );
        assert_eq!(fields.attachments.len(), 1);
        assert_eq!(fields.attachments[0].reference, "note.pdf");
        assert_eq!(fields.attachments[0].mime_type.as_deref(), Some("application/pdf"));
    }

    #[test]
    fn prefers_stripped_reply_over_full_body() {
        let payload = json!({
            "From": "ama@example.com",
            "TextBody": "Thanks!\n\nOn Mon, someone wrote:\n> earlier",
            "StrippedTextReply": "Thanks!"
        });
        assert_eq!(EmailAdapter.parse(&payload).unwrap().text, "Thanks!");
    }

    #[test]
    fn falls_back_to_subject() {
        let payload = json!({"From": "ama@example.com", "Subject": "Call me"});
        assert_eq!(EmailAdapter.parse(&payload).unwrap().text, "Call me");
    }

    #[test]
    fn parses_flat_json() {
        let fields = EmailAdapter
            .parse(&json!({"from": "client@example.com", "text": "Hi"}))
            .unwrap();
        assert_eq!(fields.from, "client@example.com");
        assert_eq!(fields.text, "Hi");
    }

    #[test]
    fn missing_sender_is_rejected() {
        assert_eq!(
            EmailAdapter.parse(&json!({"TextBody": "hello"})),
            Err(AdapterError::MissingFrom)
        );
    }
}
