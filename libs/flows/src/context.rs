use pvm_core::{FlowState, InboundContent, OutboundMessage};
use pvm_session::Session;

/// Everything a flow step sees for one inbound message.
#[derive(Debug, Clone)]
pub struct FlowContext {
    pub session: Session,
    pub content: InboundContent,
    /// Provider-assigned id of the inbound message, for logging.
    pub message_id: String,
}

/// What the engine hands back to the worker: reply messages in delivery
/// order plus the state to persist.
#[derive(Debug, Clone, PartialEq)]
pub struct FlowResult {
    pub messages: Vec<OutboundMessage>,
    pub new_state: FlowState,
}

/// A flow step either answers in place or hands control to another flow.
///
/// On `Handoff` the engine re-enters the target flow with the same inbound
/// content, so the target's entry prompt lands in the same turn; `messages`
/// are delivered ahead of whatever the target produces.
#[derive(Debug, Clone)]
pub enum FlowOutcome {
    Respond(FlowResult),
    Handoff {
        messages: Vec<OutboundMessage>,
        target: FlowState,
    },
}

impl FlowOutcome {
    pub fn respond(messages: Vec<OutboundMessage>, new_state: FlowState) -> Self {
        FlowOutcome::Respond(FlowResult {
            messages,
            new_state,
        })
    }

    pub fn handoff(messages: Vec<OutboundMessage>, target: FlowState) -> Self {
        FlowOutcome::Handoff { messages, target }
    }
}
