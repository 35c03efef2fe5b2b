use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::message::InboundContent;
use crate::webhook::ChannelMetadata;

/// One unit of asynchronous work: a single normalized inbound message plus
/// the context the worker needs to answer it. Attempt bookkeeping lives in
/// the queue wrapper, not here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageJob {
    /// Provider-assigned message id; also the idempotency key.
    pub message_id: String,
    /// Sender address (phone-equivalent key); the session key.
    pub from: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact_name: Option<String>,
    pub content: InboundContent,
    #[serde(default)]
    pub channel: ChannelMetadata,
    #[serde(with = "time::serde::rfc3339")]
    pub received_at: OffsetDateTime,
}

impl MessageJob {
    pub fn new(
        message_id: impl Into<String>,
        from: impl Into<String>,
        contact_name: Option<String>,
        content: InboundContent,
        channel: ChannelMetadata,
    ) -> Self {
        Self {
            message_id: message_id.into(),
            from: from.into(),
            contact_name,
            content,
            channel,
            received_at: OffsetDateTime::now_utc(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_roundtrips_json() {
        let job = MessageJob::new(
            "wamid.X",
            "5511988887777",
            Some("Maria".into()),
            InboundContent::Text { text: "Oi".into() },
            ChannelMetadata {
                display_phone_number: "5511999990000".into(),
                phone_number_id: "phone-1".into(),
            },
        );
        let raw = serde_json::to_string(&job).unwrap();
        let parsed: MessageJob = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed.message_id, "wamid.X");
        assert_eq!(parsed.content, job.content);
        assert_eq!(parsed.channel.phone_number_id, "phone-1");
    }
}
