//! Outbound dispatcher: delivers flow replies through the provider client in
//! production order, spacing sends so the provider keeps them ordered.

use std::time::Duration;

use anyhow::Result;

use pvm_clients::MessagingApi;
use pvm_core::OutboundMessage;

/// The provider does not guarantee ordering of rapid successive sends; a
/// short gap biases delivery toward production order.
const SEND_SPACING: Duration = Duration::from_millis(100);

pub async fn deliver_all(
    messaging: &dyn MessagingApi,
    to: &str,
    messages: &[OutboundMessage],
) -> Result<usize> {
    for (index, message) in messages.iter().enumerate() {
        if index > 0 {
            tokio::time::sleep(SEND_SPACING).await;
        }
        deliver(messaging, to, message).await?;
        metrics::counter!("messages_sent").increment(1);
    }
    Ok(messages.len())
}

async fn deliver(messaging: &dyn MessagingApi, to: &str, message: &OutboundMessage) -> Result<()> {
    match message {
        OutboundMessage::Text { text } => messaging.send_text(to, text).await?,
        OutboundMessage::Interactive { interactive } => {
            messaging.send_interactive(to, interactive).await?
        }
        OutboundMessage::Image { url, caption } => {
            messaging.send_image(to, url, caption.as_deref()).await?
        }
        OutboundMessage::Document {
            url,
            filename,
            caption,
        } => {
            messaging
                .send_document(to, url, filename, caption.as_deref())
                .await?
        }
        OutboundMessage::Template { template } => messaging.send_template(to, template).await?,
    }
    Ok(())
}
