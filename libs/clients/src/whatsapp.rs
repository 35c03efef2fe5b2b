use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};

use pvm_core::{InteractiveMessage, TemplateMessage};

use crate::error::{ApiError, ApiResult};

/// Messaging-provider send API. The only place that knows the wire format.
#[async_trait]
pub trait MessagingApi: Send + Sync {
    async fn send_text(&self, to: &str, text: &str) -> ApiResult<()>;
    async fn send_interactive(&self, to: &str, interactive: &InteractiveMessage) -> ApiResult<()>;
    async fn send_image(&self, to: &str, url: &str, caption: Option<&str>) -> ApiResult<()>;
    async fn send_document(
        &self,
        to: &str,
        url: &str,
        filename: &str,
        caption: Option<&str>,
    ) -> ApiResult<()>;
    async fn send_template(&self, to: &str, template: &TemplateMessage) -> ApiResult<()>;
    async fn mark_as_read(&self, message_id: &str) -> ApiResult<()>;
    /// Resolves a provider media id to its CDN location.
    async fn media_url(&self, media_id: &str) -> ApiResult<MediaLocation>;
}

#[derive(Debug, Clone, Deserialize)]
pub struct MediaLocation {
    pub url: String,
    #[serde(default)]
    pub mime_type: Option<String>,
}

/// WhatsApp Cloud API client.
pub struct WhatsAppClient {
    http: reqwest::Client,
    api_base: String,
    api_version: String,
    phone_number_id: String,
    access_token: String,
}

impl WhatsAppClient {
    pub fn new(
        http: reqwest::Client,
        api_base: impl Into<String>,
        api_version: impl Into<String>,
        phone_number_id: impl Into<String>,
        access_token: impl Into<String>,
    ) -> Self {
        Self {
            http,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            api_version: api_version.into(),
            phone_number_id: phone_number_id.into(),
            access_token: access_token.into(),
        }
    }

    fn messages_url(&self) -> String {
        format!(
            "{}/{}/{}/messages",
            self.api_base, self.api_version, self.phone_number_id
        )
    }

    async fn post_message(&self, payload: Value) -> ApiResult<()> {
        // `mock://` short-circuits network sends in unit tests.
        if self.api_base.starts_with("mock://") {
            return Ok(());
        }
        let response = self
            .http
            .post(self.messages_url())
            .bearer_auth(&self.access_token)
            .json(&payload)
            .send()
            .await?;
        ApiError::check(response).await?;
        Ok(())
    }
}

fn interactive_payload(interactive: &InteractiveMessage) -> Value {
    match interactive {
        InteractiveMessage::Buttons {
            body,
            buttons,
            header,
            footer,
        } => {
            let mut payload = json!({
                "type": "button",
                "body": { "text": body },
                "action": {
                    "buttons": buttons.iter().map(|b| json!({
                        "type": "reply",
                        "reply": { "id": b.id, "title": b.title }
                    })).collect::<Vec<_>>()
                }
            });
            if let Some(header) = header {
                payload["header"] = json!({ "type": "text", "text": header });
            }
            if let Some(footer) = footer {
                payload["footer"] = json!({ "text": footer });
            }
            payload
        }
        InteractiveMessage::List {
            body,
            button,
            sections,
            header,
            footer,
        } => {
            let mut payload = json!({
                "type": "list",
                "body": { "text": body },
                "action": {
                    "button": button,
                    "sections": sections.iter().map(|section| {
                        let mut sec = json!({
                            "rows": section.rows.iter().map(|row| {
                                let mut r = json!({ "id": row.id, "title": row.title });
                                if let Some(desc) = &row.description {
                                    r["description"] = json!(desc);
                                }
                                r
                            }).collect::<Vec<_>>()
                        });
                        if let Some(title) = &section.title {
                            sec["title"] = json!(title);
                        }
                        sec
                    }).collect::<Vec<_>>()
                }
            });
            if let Some(header) = header {
                payload["header"] = json!({ "type": "text", "text": header });
            }
            if let Some(footer) = footer {
                payload["footer"] = json!({ "text": footer });
            }
            payload
        }
    }
}

fn template_payload(template: &TemplateMessage) -> Value {
    let mut payload = json!({
        "name": template.name,
        "language": { "code": template.language }
    });
    if !template.body_parameters.is_empty() {
        payload["components"] = json!([{
            "type": "body",
            "parameters": template
                .body_parameters
                .iter()
                .map(|text| json!({ "type": "text", "text": text }))
                .collect::<Vec<_>>()
        }]);
    }
    payload
}

#[async_trait]
impl MessagingApi for WhatsAppClient {
    async fn send_text(&self, to: &str, text: &str) -> ApiResult<()> {
        self.post_message(json!({
            "messaging_product": "whatsapp",
            "recipient_type": "individual",
            "to": to,
            "type": "text",
            "text": { "body": text }
        }))
        .await
    }

    async fn send_interactive(&self, to: &str, interactive: &InteractiveMessage) -> ApiResult<()> {
        self.post_message(json!({
            "messaging_product": "whatsapp",
            "recipient_type": "individual",
            "to": to,
            "type": "interactive",
            "interactive": interactive_payload(interactive)
        }))
        .await
    }

    async fn send_image(&self, to: &str, url: &str, caption: Option<&str>) -> ApiResult<()> {
        let mut image = json!({ "link": url });
        if let Some(caption) = caption {
            image["caption"] = json!(caption);
        }
        self.post_message(json!({
            "messaging_product": "whatsapp",
            "recipient_type": "individual",
            "to": to,
            "type": "image",
            "image": image
        }))
        .await
    }

    async fn send_document(
        &self,
        to: &str,
        url: &str,
        filename: &str,
        caption: Option<&str>,
    ) -> ApiResult<()> {
        let mut document = json!({ "link": url, "filename": filename });
        if let Some(caption) = caption {
            document["caption"] = json!(caption);
        }
        self.post_message(json!({
            "messaging_product": "whatsapp",
            "recipient_type": "individual",
            "to": to,
            "type": "document",
            "document": document
        }))
        .await
    }

    async fn send_template(&self, to: &str, template: &TemplateMessage) -> ApiResult<()> {
        self.post_message(json!({
            "messaging_product": "whatsapp",
            "recipient_type": "individual",
            "to": to,
            "type": "template",
            "template": template_payload(template)
        }))
        .await
    }

    async fn mark_as_read(&self, message_id: &str) -> ApiResult<()> {
        self.post_message(json!({
            "messaging_product": "whatsapp",
            "status": "read",
            "message_id": message_id
        }))
        .await
    }

    async fn media_url(&self, media_id: &str) -> ApiResult<MediaLocation> {
        if self.api_base.starts_with("mock://") {
            return Ok(MediaLocation {
                url: format!("mock://media/{media_id}"),
                mime_type: None,
            });
        }
        let url = format!("{}/{}/{}", self.api_base, self.api_version, media_id);
        let response = self
            .http
            .get(url)
            .bearer_auth(&self.access_token)
            .send()
            .await?;
        Ok(ApiError::check(response).await?.json().await?)
    }
}
