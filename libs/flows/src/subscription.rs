use anyhow::Result;
use async_trait::async_trait;

use pvm_clients::SubscriptionOutcome;
use pvm_core::{
    FlowState, InboundContent, OutboundMessage, PetDraft, PlanId, RegistrationStep, ReturnTarget,
    SubscriptionStatus, SubscriptionStep,
};

use crate::context::{FlowContext, FlowOutcome};
use crate::main_menu::menu_result;
use crate::{Flow, FlowServices};

struct PlanSpec {
    id: PlanId,
    name: &'static str,
    price: &'static str,
    features: &'static [&'static str],
}

const PLANS: [PlanSpec; 3] = [
    PlanSpec {
        id: PlanId::Basic,
        name: "Basico",
        price: "R$ 29,90/mes",
        features: &["5 consultas/mes", "1 pet"],
    },
    PlanSpec {
        id: PlanId::Family,
        name: "Familia",
        price: "R$ 49,90/mes",
        features: &["Consultas ilimitadas", "Ate 3 pets"],
    },
    PlanSpec {
        id: PlanId::Premium,
        name: "Premium",
        price: "R$ 79,90/mes",
        features: &[
            "Consultas ilimitadas",
            "Pets ilimitados",
            "Analise de imagem",
            "Suporte prioritario",
        ],
    },
];

fn plan_spec(plan: PlanId) -> &'static PlanSpec {
    PLANS
        .iter()
        .find(|spec| spec.id == plan)
        .unwrap_or(&PLANS[0])
}

fn features_list(spec: &PlanSpec) -> String {
    spec.features
        .iter()
        .map(|f| format!("- {f}"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Plan view, selection, confirmation, billing handover, and cancellation.
#[derive(Default)]
pub struct SubscriptionFlow;

#[async_trait]
impl Flow for SubscriptionFlow {
    fn name(&self) -> &'static str {
        "subscription"
    }

    async fn process(&self, ctx: &FlowContext, services: &FlowServices) -> Result<FlowOutcome> {
        let (step, selected_plan) = match &ctx.session.state {
            FlowState::Subscription {
                step,
                selected_plan,
            } => (*step, *selected_plan),
            _ => (SubscriptionStep::View, None),
        };

        match step {
            SubscriptionStep::View => self.handle_view(ctx, services).await,
            SubscriptionStep::SelectPlan => self.handle_plan_selection(ctx, services).await,
            SubscriptionStep::Confirm => {
                self.handle_confirmation(ctx, services, selected_plan).await
            }
            SubscriptionStep::Activate => match selected_plan {
                Some(plan) => Ok(self.process_subscription(ctx, services, plan).await),
                None => Ok(show_plans("Escolha um plano:")),
            },
            SubscriptionStep::CancelConfirm => self.handle_cancel_confirm(ctx, services).await,
        }
    }
}

fn show_plans(prefix: &str) -> FlowOutcome {
    let listing = PLANS
        .iter()
        .map(|spec| {
            format!(
                "*{}* - {}\n{}",
                spec.name,
                spec.price,
                spec.features
                    .iter()
                    .map(|f| format!("  - {f}"))
                    .collect::<Vec<_>>()
                    .join("\n")
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n");

    FlowOutcome::respond(
        vec![
            OutboundMessage::text(format!("{prefix}\n\n{listing}")),
            OutboundMessage::buttons(
                "Escolha um plano:",
                [
                    ("plan-basic", "Basico R$29,90"),
                    ("plan-family", "Familia R$49,90"),
                    ("plan-premium", "Premium R$79,90"),
                ],
            ),
        ],
        FlowState::Subscription {
            step: SubscriptionStep::SelectPlan,
            selected_plan: None,
        },
    )
}

fn confirm_cancellation() -> FlowOutcome {
    FlowOutcome::respond(
        vec![
            OutboundMessage::text(
                "*Cancelar Assinatura*\n\n\
                 Tem certeza que deseja cancelar sua assinatura?\n\n\
                 Voce perdera acesso a:\n\
                 - Consultas ilimitadas\n\
                 - Historico de saude\n\
                 - Lembretes de vacinacao\n\n\
                 A assinatura permanecera ativa ate o fim do periodo atual.",
            ),
            OutboundMessage::buttons(
                "Confirmar cancelamento?",
                [("confirm-cancel", "Sim, Cancelar"), ("menu", "Nao, Manter")],
            ),
        ],
        FlowState::Subscription {
            step: SubscriptionStep::CancelConfirm,
            selected_plan: None,
        },
    )
}

impl SubscriptionFlow {
    async fn handle_view(&self, ctx: &FlowContext, services: &FlowServices) -> Result<FlowOutcome> {
        match ctx.content.reply_id() {
            Some("upgrade-plan") => return Ok(show_plans("Escolha seu novo plano:")),
            Some("cancel-subscription") => return Ok(confirm_cancellation()),
            Some("menu") => return Ok(FlowOutcome::Respond(menu_result(&ctx.session, None))),
            _ => {}
        }

        let Some(user_id) = ctx.session.user_id.clone() else {
            return Ok(show_plans("Conheca nossos planos:"));
        };

        let subscription = match services.backend.get_subscription(&user_id).await {
            Ok(subscription) => subscription,
            Err(err) => {
                tracing::error!(error = %err, "failed to fetch subscription");
                return Ok(show_plans("Conheca nossos planos:"));
            }
        };

        let Some(subscription) = subscription.filter(|s| s.status == SubscriptionStatus::Active)
        else {
            return Ok(show_plans("Voce ainda nao tem uma assinatura ativa."));
        };

        let spec = plan_spec(subscription.plan);
        Ok(FlowOutcome::respond(
            vec![
                OutboundMessage::text(format!(
                    "*Sua Assinatura*\n\n\
                     Plano: *{}*\n\
                     Status: *Ativo*\n\
                     Renovacao: {}\n\n\
                     Beneficios:\n{}",
                    spec.name,
                    subscription.current_period_end,
                    features_list(spec),
                )),
                OutboundMessage::buttons(
                    "O que deseja fazer?",
                    [
                        ("upgrade-plan", "Mudar Plano"),
                        ("cancel-subscription", "Cancelar"),
                        ("menu", "Menu"),
                    ],
                ),
            ],
            FlowState::Subscription {
                step: SubscriptionStep::View,
                selected_plan: None,
            },
        ))
    }

    async fn handle_plan_selection(
        &self,
        ctx: &FlowContext,
        _services: &FlowServices,
    ) -> Result<FlowOutcome> {
        match ctx.content.reply_id() {
            Some("upgrade-plan") => return Ok(show_plans("Escolha seu novo plano:")),
            Some("cancel-subscription") => return Ok(confirm_cancellation()),
            Some("menu") => return Ok(FlowOutcome::Respond(menu_result(&ctx.session, None))),
            _ => {}
        }

        let selected = selected_plan(&ctx.content);
        let Some(plan) = selected else {
            return Ok(FlowOutcome::respond(
                vec![OutboundMessage::text("Por favor, selecione um plano valido.")],
                FlowState::Subscription {
                    step: SubscriptionStep::SelectPlan,
                    selected_plan: None,
                },
            ));
        };

        let spec = plan_spec(plan);
        Ok(FlowOutcome::respond(
            vec![
                OutboundMessage::text(format!(
                    "*Confirmar Assinatura*\n\n\
                     Plano: *{}*\n\
                     Valor: *{}*\n\n\
                     Beneficios:\n{}",
                    spec.name,
                    spec.price,
                    features_list(spec),
                )),
                OutboundMessage::buttons(
                    "Deseja confirmar esta assinatura?",
                    [
                        ("confirm-subscription", "Confirmar"),
                        ("change-plan", "Mudar Plano"),
                        ("menu", "Cancelar"),
                    ],
                ),
            ],
            FlowState::Subscription {
                step: SubscriptionStep::Confirm,
                selected_plan: Some(plan),
            },
        ))
    }

    async fn handle_confirmation(
        &self,
        ctx: &FlowContext,
        services: &FlowServices,
        selected_plan: Option<PlanId>,
    ) -> Result<FlowOutcome> {
        match ctx.content.reply_id() {
            Some("confirm-subscription") => {
                let Some(plan) = selected_plan else {
                    return Ok(show_plans("Escolha um plano:"));
                };
                if ctx.session.user_id.is_none() {
                    // Registration collects the profile, then resumes at
                    // Activate with the plan stashed in the transition.
                    return Ok(FlowOutcome::handoff(
                        vec![OutboundMessage::text(
                            "Para assinar, primeiro precisamos cadastrar voce. Vamos criar seu perfil?",
                        )],
                        FlowState::PetRegistration {
                            step: RegistrationStep::Start,
                            draft: PetDraft::default(),
                            return_to: Some(ReturnTarget::Subscription { plan }),
                        },
                    ));
                }
                Ok(self.process_subscription(ctx, services, plan).await)
            }
            Some("change-plan") => Ok(show_plans("Escolha seu plano:")),
            Some("menu") => Ok(FlowOutcome::Respond(menu_result(&ctx.session, None))),
            _ => Ok(FlowOutcome::respond(
                vec![OutboundMessage::text("Por favor, confirme ou altere seu plano.")],
                FlowState::Subscription {
                    step: SubscriptionStep::Confirm,
                    selected_plan,
                },
            )),
        }
    }

    async fn process_subscription(
        &self,
        ctx: &FlowContext,
        services: &FlowServices,
        plan: PlanId,
    ) -> FlowOutcome {
        let user_id = match ctx.session.user_id.clone() {
            Some(user_id) => user_id,
            None => {
                // Activate is only reachable after registration linked the
                // session; reload in case this copy predates the link.
                match services.sessions.get_or_create(&ctx.session.address, None).await {
                    Ok(session) => match session.user_id {
                        Some(user_id) => user_id,
                        None => return show_plans("Escolha um plano:"),
                    },
                    Err(err) => {
                        tracing::error!(error = %err, "session reload failed");
                        return show_plans("Escolha um plano:");
                    }
                }
            }
        };

        let outcome = match services.billing.create_subscription(&user_id, plan).await {
            Ok(outcome) => outcome,
            Err(err) => {
                tracing::error!(error = %err, plan = plan.as_str(), "failed to create subscription");
                return FlowOutcome::respond(
                    vec![
                        OutboundMessage::text(
                            "Desculpe, ocorreu um erro ao processar sua assinatura. \
                             Por favor, tente novamente.",
                        ),
                        OutboundMessage::buttons(
                            "O que deseja fazer?",
                            [
                                (format!("plan-{}", plan.as_str()), "Tentar Novamente".to_string()),
                                ("menu".to_string(), "Menu".to_string()),
                            ],
                        ),
                    ],
                    FlowState::Subscription {
                        step: SubscriptionStep::SelectPlan,
                        selected_plan: None,
                    },
                );
            }
        };

        match outcome {
            SubscriptionOutcome::CheckoutRequired { url } => FlowOutcome::respond(
                vec![
                    OutboundMessage::text(format!(
                        "Para finalizar sua assinatura, acesse o link de pagamento:\n\n\
                         {url}\n\n\
                         Apos o pagamento, sua assinatura sera ativada automaticamente."
                    )),
                    OutboundMessage::buttons("Precisa de ajuda?", [("menu", "Voltar ao Menu")]),
                ],
                FlowState::main_menu(),
            ),
            SubscriptionOutcome::Activated(subscription) => {
                let spec = plan_spec(subscription.plan);
                FlowOutcome::respond(
                    vec![
                        OutboundMessage::text(format!(
                            "*Assinatura Ativada!*\n\n\
                             Plano: *{}*\n\n\
                             Agora voce pode aproveitar todos os beneficios:\n{}\n\n\
                             Obrigado por assinar o PetVet AI!",
                            spec.name,
                            features_list(spec),
                        )),
                        OutboundMessage::buttons(
                            "O que deseja fazer agora?",
                            [("new-consultation", "Nova Consulta"), ("menu", "Menu")],
                        ),
                    ],
                    FlowState::main_menu(),
                )
            }
        }
    }

    async fn handle_cancel_confirm(
        &self,
        ctx: &FlowContext,
        services: &FlowServices,
    ) -> Result<FlowOutcome> {
        match ctx.content.reply_id() {
            Some("confirm-cancel") => {
                let Some(user_id) = ctx.session.user_id.clone() else {
                    return Ok(FlowOutcome::Respond(menu_result(&ctx.session, None)));
                };
                match services.billing.cancel_subscription(&user_id).await {
                    Ok(()) => Ok(FlowOutcome::Respond(menu_result(
                        &ctx.session,
                        Some(
                            "Sua assinatura foi cancelada. \
                             Ela permanece ativa ate o fim do periodo atual.",
                        ),
                    ))),
                    Err(err) => {
                        tracing::error!(error = %err, "failed to cancel subscription");
                        Ok(FlowOutcome::respond(
                            vec![
                                OutboundMessage::text(
                                    "Desculpe, nao consegui cancelar agora. Tente novamente.",
                                ),
                                OutboundMessage::buttons(
                                    "Confirmar cancelamento?",
                                    [("confirm-cancel", "Sim, Cancelar"), ("menu", "Nao, Manter")],
                                ),
                            ],
                            FlowState::Subscription {
                                step: SubscriptionStep::CancelConfirm,
                                selected_plan: None,
                            },
                        ))
                    }
                }
            }
            Some("menu") => Ok(FlowOutcome::Respond(menu_result(
                &ctx.session,
                Some("Sua assinatura foi mantida."),
            ))),
            _ => Ok(confirm_cancellation()),
        }
    }
}

fn selected_plan(content: &InboundContent) -> Option<PlanId> {
    if let Some(id) = content.reply_id() {
        return match id.strip_prefix("plan-") {
            Some("basic") => Some(PlanId::Basic),
            Some("family") => Some(PlanId::Family),
            Some("premium") => Some(PlanId::Premium),
            _ => None,
        };
    }
    let text = content.text()?.to_lowercase();
    let text = text.trim();
    if text.contains("basico") || text == "1" {
        Some(PlanId::Basic)
    } else if text.contains("familia") || text == "2" {
        Some(PlanId::Family)
    } else if text.contains("premium") || text == "3" {
        Some(PlanId::Premium)
    } else {
        None
    }
}
