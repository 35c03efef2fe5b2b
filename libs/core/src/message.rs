use serde::{Deserialize, Serialize};

/// Normalized inbound message content.
///
/// Produced once per webhook message by [`crate::extract_content`] and
/// consumed by exactly one flow step.
///
/// ```
/// use pvm_core::InboundContent;
///
/// let content = InboundContent::Text { text: "Oi".into() };
/// assert_eq!(content.text(), Some("Oi"));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum InboundContent {
    Text {
        text: String,
    },
    Button {
        id: String,
        title: String,
    },
    ListReply {
        id: String,
        title: String,
    },
    Media {
        kind: MediaKind,
        media_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mime_type: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        caption: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        filename: Option<String>,
    },
    Location {
        latitude: f64,
        longitude: f64,
    },
    Unknown,
}

impl InboundContent {
    /// Returns the text body when this is a plain text message.
    pub fn text(&self) -> Option<&str> {
        match self {
            InboundContent::Text { text } => Some(text),
            _ => None,
        }
    }

    /// Returns the reply id for button and list replies.
    pub fn reply_id(&self) -> Option<&str> {
        match self {
            InboundContent::Button { id, .. } | InboundContent::ListReply { id, .. } => Some(id),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Document,
    Audio,
    Video,
}

/// Normalized outbound message.
///
/// Flows produce zero or more of these per step; the dispatcher delivers them
/// strictly in order. Each variant maps to exactly one provider send call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OutboundMessage {
    Text {
        text: String,
    },
    Interactive {
        interactive: InteractiveMessage,
    },
    Image {
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        caption: Option<String>,
    },
    Document {
        url: String,
        filename: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        caption: Option<String>,
    },
    Template {
        template: TemplateMessage,
    },
}

impl OutboundMessage {
    pub fn text(text: impl Into<String>) -> Self {
        OutboundMessage::Text { text: text.into() }
    }

    /// Builds a reply-button interactive message from `(id, title)` pairs.
    pub fn buttons<I, S, T>(body: impl Into<String>, buttons: I) -> Self
    where
        I: IntoIterator<Item = (S, T)>,
        S: Into<String>,
        T: Into<String>,
    {
        OutboundMessage::Interactive {
            interactive: InteractiveMessage::Buttons {
                body: body.into(),
                buttons: buttons
                    .into_iter()
                    .map(|(id, title)| ReplyButton {
                        id: id.into(),
                        title: title.into(),
                    })
                    .collect(),
                header: None,
                footer: None,
            },
        }
    }

    pub fn document(
        url: impl Into<String>,
        filename: impl Into<String>,
        caption: Option<String>,
    ) -> Self {
        OutboundMessage::Document {
            url: url.into(),
            filename: filename.into(),
            caption,
        }
    }
}

/// Interactive payloads supported by the provider: reply buttons or a list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum InteractiveMessage {
    Buttons {
        body: String,
        buttons: Vec<ReplyButton>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        header: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        footer: Option<String>,
    },
    List {
        body: String,
        /// Label of the button that opens the list.
        button: String,
        sections: Vec<ListSection>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        header: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        footer: Option<String>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReplyButton {
    pub id: String,
    pub title: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ListSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub rows: Vec<ListRow>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ListRow {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Pre-approved template message used outside the 24h session window.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TemplateMessage {
    pub name: String,
    pub language: String,
    #[serde(default)]
    pub body_parameters: Vec<String>,
}
