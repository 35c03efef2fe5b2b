//! The queue worker: one job in, session lease held, flow engine invoked,
//! replies delivered in order, state persisted.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use pvm_clients::MessagingApi;
use pvm_core::MessageJob;
use pvm_flows::{FlowContext, FlowEngine};
use pvm_queue::{JobHandler, QueuedJob};
use pvm_session::SessionManager;

use crate::outbound;

const APOLOGY: &str = "Desculpe, ocorreu um erro ao processar sua mensagem. \
                       Por favor, tente novamente em alguns instantes.";

pub struct MessageWorker {
    pub engine: FlowEngine,
    pub sessions: Arc<SessionManager>,
    pub messaging: Arc<dyn MessagingApi>,
}

#[async_trait]
impl JobHandler<MessageJob> for MessageWorker {
    async fn handle(&self, job: &QueuedJob<MessageJob>) -> Result<()> {
        let message = &job.payload;
        tracing::info!(
            job_id = %job.id,
            message_id = %message.message_id,
            attempt = job.attempt,
            "processing message"
        );

        // Serializes jobs per sender; concurrent messages from the same
        // address would otherwise race the session read-modify-write.
        let _lease = self.sessions.leases().acquire(&message.from).await;

        let processed: Result<usize> = async {
            let session = self
                .sessions
                .get_or_create(&message.from, message.contact_name.as_deref())
                .await?;

            if let Err(err) = self.messaging.mark_as_read(&message.message_id).await {
                tracing::debug!(error = %err, "mark-as-read failed");
            }

            let result = self
                .engine
                .process(FlowContext {
                    session,
                    content: message.content.clone(),
                    message_id: message.message_id.clone(),
                })
                .await;

            let sent =
                outbound::deliver_all(self.messaging.as_ref(), &message.from, &result.messages)
                    .await?;
            self.sessions.update(&message.from, result.new_state).await?;
            Ok(sent)
        }
        .await;

        match processed {
            Ok(sent) => {
                tracing::info!(
                    job_id = %job.id,
                    message_id = %message.message_id,
                    responses = sent,
                    "message processed"
                );
                Ok(())
            }
            Err(err) => {
                tracing::error!(
                    job_id = %job.id,
                    message_id = %message.message_id,
                    error = %err,
                    "error processing message"
                );
                if let Err(send_err) = self.messaging.send_text(&message.from, APOLOGY).await {
                    tracing::error!(error = %send_err, "failed to send error message");
                }
                Err(err)
            }
        }
    }
}
