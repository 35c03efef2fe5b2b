use std::sync::Arc;

use pvm_core::{FlowState, OutboundMessage};

use crate::context::{FlowContext, FlowOutcome, FlowResult};
use crate::{FlowRegistry, FlowServices, main_menu};

/// Upper bound on flow handoffs per inbound message. Well above any chain the
/// flows actually form (menu -> registration -> consultation is three).
const MAX_HOPS: usize = 4;

const MENU_COMMANDS: [&str; 5] = ["menu", "inicio", "voltar", "home", "0"];
const HELP_COMMANDS: [&str; 4] = ["ajuda", "help", "?", "socorro"];
const CANCEL_COMMANDS: [&str; 4] = ["cancelar", "sair", "cancel", "exit"];

/// Dispatches inbound messages to the active flow.
///
/// Global commands win over any flow step, and no error escapes: a failing
/// flow is logged and converted into an apology with the session reset to the
/// main menu.
pub struct FlowEngine {
    registry: FlowRegistry,
    services: Arc<FlowServices>,
}

impl FlowEngine {
    pub fn new(services: Arc<FlowServices>) -> Self {
        Self {
            registry: FlowRegistry::new(),
            services,
        }
    }

    pub async fn process(&self, mut ctx: FlowContext) -> FlowResult {
        if let Some(text) = ctx.content.text() {
            if let Some(result) = self.handle_global_command(text, &ctx) {
                return result;
            }
        }

        let mut collected: Vec<OutboundMessage> = Vec::new();
        let mut hops = 0;
        loop {
            let flow = self.registry.resolve(&ctx.session.state);
            tracing::debug!(
                flow = flow.name(),
                step = ctx.session.state.step_name().unwrap_or("-"),
                message_id = %ctx.message_id,
                "dispatching to flow"
            );

            match flow.process(&ctx, &self.services).await {
                Ok(FlowOutcome::Respond(mut result)) => {
                    let mut messages = collected;
                    messages.append(&mut result.messages);
                    return FlowResult {
                        messages,
                        new_state: result.new_state,
                    };
                }
                Ok(FlowOutcome::Handoff {
                    mut messages,
                    target,
                }) => {
                    collected.append(&mut messages);
                    tracing::debug!(
                        from = ctx.session.state.flow_name(),
                        to = target.flow_name(),
                        "flow handoff"
                    );
                    ctx.session.state = target;
                    hops += 1;
                    if hops > MAX_HOPS {
                        tracing::error!(
                            flow = ctx.session.state.flow_name(),
                            "handoff loop exceeded hop budget"
                        );
                        return Self::recovery();
                    }
                }
                Err(err) => {
                    tracing::error!(
                        flow = flow.name(),
                        step = ctx.session.state.step_name().unwrap_or("-"),
                        message_id = %ctx.message_id,
                        error = %err,
                        "flow processing error"
                    );
                    return Self::recovery();
                }
            }
        }
    }

    fn handle_global_command(&self, text: &str, ctx: &FlowContext) -> Option<FlowResult> {
        let normalized = text.trim().to_lowercase();
        let normalized = normalized.as_str();

        if MENU_COMMANDS.contains(&normalized) {
            return Some(main_menu::menu_result(&ctx.session, None));
        }
        if HELP_COMMANDS.contains(&normalized) {
            return Some(Self::help(ctx));
        }
        if CANCEL_COMMANDS.contains(&normalized) {
            return Some(main_menu::menu_result(&ctx.session, Some("Operacao cancelada.")));
        }
        None
    }

    /// Short help text; the active flow and step are left untouched.
    fn help(ctx: &FlowContext) -> FlowResult {
        FlowResult {
            messages: vec![OutboundMessage::text(
                "*Ajuda - PetVet AI*\n\n\
                 Comandos disponiveis:\n\
                 - *menu* - Voltar ao menu principal\n\
                 - *ajuda* - Mostrar esta mensagem\n\
                 - *cancelar* - Cancelar operacao atual\n\n\
                 Para iniciar uma consulta, envie \"menu\" e selecione \"Nova Consulta\".\n\n\
                 Duvidas? Envie um email para suporte@petvet.ai",
            )],
            new_state: ctx.session.state.clone(),
        }
    }

    /// Generic recovery: apology plus a safe terminal state.
    fn recovery() -> FlowResult {
        FlowResult {
            messages: vec![OutboundMessage::text(
                "Desculpe, ocorreu um erro. Por favor, tente novamente.\n\n\
                 Digite *menu* para voltar ao inicio.",
            )],
            new_state: FlowState::main_menu(),
        }
    }
}
