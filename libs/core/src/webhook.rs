//! Raw webhook payload model for the WhatsApp Cloud API.
//!
//! The shapes mirror what Meta ships (`entry[].changes[].value`); normalization
//! into [`InboundContent`] happens in [`extract_content`] so the rest of the
//! pipeline never touches provider-specific structure.

use serde::{Deserialize, Serialize};

use crate::message::{InboundContent, MediaKind};

/// Object discriminator expected on genuine WhatsApp business payloads.
pub const WHATSAPP_OBJECT: &str = "whatsapp_business_account";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookPayload {
    pub object: String,
    #[serde(default)]
    pub entry: Vec<WebhookEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEntry {
    pub id: String,
    #[serde(default)]
    pub changes: Vec<WebhookChange>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookChange {
    pub field: String,
    pub value: WebhookChangeValue,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookChangeValue {
    #[serde(default)]
    pub messaging_product: Option<String>,
    #[serde(default)]
    pub metadata: Option<ChannelMetadata>,
    #[serde(default)]
    pub contacts: Vec<WebhookContact>,
    #[serde(default)]
    pub messages: Vec<WebhookMessage>,
    #[serde(default)]
    pub statuses: Vec<WebhookStatus>,
}

/// Receiving channel identity (our number), attached to every change.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ChannelMetadata {
    #[serde(default)]
    pub display_phone_number: String,
    #[serde(default)]
    pub phone_number_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookContact {
    pub wa_id: String,
    #[serde(default)]
    pub profile: Option<ContactProfile>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContactProfile {
    pub name: String,
}

/// One inbound message as shipped by the provider, with per-type sections.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookMessage {
    pub from: String,
    pub id: String,
    pub timestamp: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub text: Option<TextBody>,
    #[serde(default)]
    pub image: Option<MediaBody>,
    #[serde(default)]
    pub document: Option<MediaBody>,
    #[serde(default)]
    pub audio: Option<MediaBody>,
    #[serde(default)]
    pub video: Option<MediaBody>,
    #[serde(default)]
    pub location: Option<LocationBody>,
    #[serde(default)]
    pub interactive: Option<InteractiveBody>,
    #[serde(default)]
    pub button: Option<ButtonBody>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextBody {
    pub body: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaBody {
    pub id: String,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub caption: Option<String>,
    #[serde(default)]
    pub filename: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocationBody {
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InteractiveBody {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub button_reply: Option<ReplyBody>,
    #[serde(default)]
    pub list_reply: Option<ReplyBody>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplyBody {
    pub id: String,
    pub title: String,
}

/// Legacy quick-reply button payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ButtonBody {
    pub payload: String,
    pub text: String,
}

/// Delivery status update; logged by the gateway, never enqueued.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookStatus {
    pub id: String,
    pub status: String,
    #[serde(default)]
    pub recipient_id: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
}

/// Normalizes a raw provider message into [`InboundContent`].
pub fn extract_content(message: &WebhookMessage) -> InboundContent {
    match message.kind.as_str() {
        "text" => InboundContent::Text {
            text: message
                .text
                .as_ref()
                .map(|t| t.body.clone())
                .unwrap_or_default(),
        },
        "image" => media_content(MediaKind::Image, message.image.as_ref()),
        "document" => media_content(MediaKind::Document, message.document.as_ref()),
        "audio" => media_content(MediaKind::Audio, message.audio.as_ref()),
        "video" => media_content(MediaKind::Video, message.video.as_ref()),
        "location" => match &message.location {
            Some(loc) => InboundContent::Location {
                latitude: loc.latitude,
                longitude: loc.longitude,
            },
            None => InboundContent::Unknown,
        },
        "interactive" => match &message.interactive {
            Some(body) if body.kind == "button_reply" => match &body.button_reply {
                Some(reply) => InboundContent::Button {
                    id: reply.id.clone(),
                    title: reply.title.clone(),
                },
                None => InboundContent::Unknown,
            },
            Some(body) if body.kind == "list_reply" => match &body.list_reply {
                Some(reply) => InboundContent::ListReply {
                    id: reply.id.clone(),
                    title: reply.title.clone(),
                },
                None => InboundContent::Unknown,
            },
            _ => InboundContent::Unknown,
        },
        "button" => match &message.button {
            Some(body) => InboundContent::Button {
                id: body.payload.clone(),
                title: body.text.clone(),
            },
            None => InboundContent::Unknown,
        },
        _ => InboundContent::Unknown,
    }
}

fn media_content(kind: MediaKind, body: Option<&MediaBody>) -> InboundContent {
    match body {
        Some(media) => InboundContent::Media {
            kind,
            media_id: media.id.clone(),
            mime_type: media.mime_type.clone(),
            caption: media.caption.clone(),
            filename: media.filename.clone(),
        },
        None => InboundContent::Unknown,
    }
}
