use anyhow::Result;
use async_trait::async_trait;
use time::{Date, OffsetDateTime, macros::format_description};

use pvm_core::{
    ConsultationData, ConsultationStep, FlowState, InboundContent, OutboundMessage, Pet, PetDraft,
    PetRef, RegistrationStep, SubscriptionStep,
};
use pvm_session::Session;

use crate::context::{FlowContext, FlowOutcome, FlowResult};
use crate::{Flow, FlowServices};

/// Terminal/home flow: routes button taps and free-text intent keywords to
/// the sub-flows, and answers the pets-list / health-history queries itself.
#[derive(Default)]
pub struct MainMenuFlow;

/// The greeting menu; also used by the engine for the global menu/cancel
/// commands.
pub(crate) fn menu_result(session: &Session, prefix: Option<&str>) -> FlowResult {
    let greeting = match &session.contact_name {
        Some(name) => format!("Ola, {name}!"),
        None => "Ola!".to_string(),
    };
    let body = format!(
        "{}{greeting} Sou o PetVet IA, seu veterinario virtual.\n\nComo posso ajudar?",
        prefix.map(|p| format!("{p}\n\n")).unwrap_or_default()
    );
    FlowResult {
        messages: vec![OutboundMessage::buttons(
            body,
            [
                ("new-consultation", "Nova Consulta"),
                ("my-pets", "Meus Pets"),
                ("health-history", "Historico"),
            ],
        )],
        new_state: FlowState::main_menu(),
    }
}

fn registration_target() -> FlowState {
    FlowState::PetRegistration {
        step: RegistrationStep::Start,
        draft: PetDraft::default(),
        return_to: None,
    }
}

fn consultation_target() -> FlowState {
    FlowState::Consultation {
        step: ConsultationStep::Start,
        data: ConsultationData::default(),
    }
}

fn subscription_target() -> FlowState {
    FlowState::Subscription {
        step: SubscriptionStep::View,
        selected_plan: None,
    }
}

#[async_trait]
impl Flow for MainMenuFlow {
    fn name(&self) -> &'static str {
        "main-menu"
    }

    async fn process(&self, ctx: &FlowContext, services: &FlowServices) -> Result<FlowOutcome> {
        match &ctx.content {
            InboundContent::Button { id, .. } | InboundContent::ListReply { id, .. } => {
                self.handle_button(ctx, services, id).await
            }
            InboundContent::Text { text } => self.handle_text(ctx, services, text).await,
            _ => Ok(FlowOutcome::Respond(menu_result(&ctx.session, None))),
        }
    }
}

impl MainMenuFlow {
    async fn handle_button(
        &self,
        ctx: &FlowContext,
        services: &FlowServices,
        id: &str,
    ) -> Result<FlowOutcome> {
        match id {
            "new-consultation" => Ok(FlowOutcome::handoff(vec![], consultation_target())),
            "my-pets" => Ok(self.show_pets_list(ctx, services).await),
            "health-history" => Ok(self.show_health_history(ctx, services).await),
            "subscription" => Ok(FlowOutcome::handoff(vec![], subscription_target())),
            "register-pet" => Ok(FlowOutcome::handoff(vec![], registration_target())),
            "help" => Ok(FlowOutcome::Respond(help_result())),
            _ => Ok(FlowOutcome::Respond(menu_result(&ctx.session, None))),
        }
    }

    async fn handle_text(
        &self,
        ctx: &FlowContext,
        services: &FlowServices,
        text: &str,
    ) -> Result<FlowOutcome> {
        let normalized = text.to_lowercase();
        let normalized = normalized.trim();

        if ["consulta", "doente", "sintoma"]
            .iter()
            .any(|kw| normalized.contains(kw))
        {
            return Ok(FlowOutcome::handoff(vec![], consultation_target()));
        }
        if ["assinatura", "plano"].iter().any(|kw| normalized.contains(kw)) {
            return Ok(FlowOutcome::handoff(vec![], subscription_target()));
        }
        if ["pet", "cachorro", "gato"]
            .iter()
            .any(|kw| normalized.contains(kw))
        {
            return Ok(self.show_pets_list(ctx, services).await);
        }
        if ["historico", "registro"]
            .iter()
            .any(|kw| normalized.contains(kw))
        {
            return Ok(self.show_health_history(ctx, services).await);
        }

        // A number or a name selects from the last listed pets.
        if let FlowState::MainMenu { pets } = &ctx.session.state {
            if let Some(pet) = match_cached_pet(pets, normalized) {
                return Ok(self.show_pet_details(ctx, services, &pet.id).await);
            }
        }

        Ok(FlowOutcome::Respond(menu_result(&ctx.session, None)))
    }

    async fn show_pets_list(&self, ctx: &FlowContext, services: &FlowServices) -> FlowOutcome {
        let Some(user_id) = ctx.session.user_id.clone() else {
            return FlowOutcome::handoff(
                vec![OutboundMessage::text(
                    "Voce ainda nao tem pets cadastrados. Vamos cadastrar seu primeiro pet?",
                )],
                registration_target(),
            );
        };

        let pets = match services.backend.get_pets(&user_id).await {
            Ok(pets) => pets,
            Err(err) => {
                tracing::error!(error = %err, "failed to fetch pets");
                return FlowOutcome::Respond(menu_result(
                    &ctx.session,
                    Some("Desculpe, nao consegui carregar seus pets."),
                ));
            }
        };

        if pets.is_empty() {
            return FlowOutcome::respond(
                vec![
                    OutboundMessage::text("Voce ainda nao tem pets cadastrados."),
                    OutboundMessage::buttons(
                        "Deseja cadastrar seu primeiro pet?",
                        [("register-pet", "Cadastrar Pet"), ("menu", "Voltar ao Menu")],
                    ),
                ],
                FlowState::main_menu(),
            );
        }

        let today = OffsetDateTime::now_utc().date();
        let listing = pets
            .iter()
            .enumerate()
            .map(|(index, pet)| {
                let age = pet
                    .birth_date
                    .as_deref()
                    .and_then(|birth| age_label(birth, today))
                    .map(|age| format!(" ({age})"))
                    .unwrap_or_default();
                let breed = pet
                    .breed
                    .as_deref()
                    .map(|b| format!(" - {b}"))
                    .unwrap_or_default();
                format!(
                    "{}. {} *{}*{breed}{age}",
                    index + 1,
                    pet.species.emoji(),
                    pet.name
                )
            })
            .collect::<Vec<_>>()
            .join("\n");

        FlowOutcome::respond(
            vec![
                OutboundMessage::text(format!(
                    "*Seus Pets*\n\n{listing}\n\nEnvie o numero do pet para ver detalhes."
                )),
                OutboundMessage::buttons(
                    "Ou escolha uma opcao:",
                    [("register-pet", "Novo Pet"), ("menu", "Voltar ao Menu")],
                ),
            ],
            FlowState::MainMenu {
                pets: pets.iter().map(PetRef::from).collect(),
            },
        )
    }

    async fn show_pet_details(
        &self,
        ctx: &FlowContext,
        services: &FlowServices,
        pet_id: &str,
    ) -> FlowOutcome {
        let pet = match services.backend.get_pet(pet_id).await {
            Ok(pet) => pet,
            Err(err) => {
                tracing::error!(error = %err, pet_id, "failed to fetch pet");
                return FlowOutcome::Respond(menu_result(
                    &ctx.session,
                    Some("Desculpe, nao consegui carregar os dados do pet."),
                ));
            }
        };

        FlowOutcome::respond(
            vec![
                OutboundMessage::text(pet_details_text(&pet)),
                OutboundMessage::buttons(
                    "O que deseja fazer?",
                    [("new-consultation", "Nova Consulta"), ("menu", "Voltar ao Menu")],
                ),
            ],
            FlowState::main_menu(),
        )
    }

    async fn show_health_history(&self, ctx: &FlowContext, services: &FlowServices) -> FlowOutcome {
        if ctx.session.user_id.is_none() {
            return FlowOutcome::Respond(menu_result(
                &ctx.session,
                Some("Para ver o historico, primeiro cadastre seu pet."),
            ));
        }
        let Some(pet_id) = ctx.session.active_pet_id.clone() else {
            return self.show_pets_list(ctx, services).await;
        };

        let fetched = async {
            let records = services.backend.get_health_records(&pet_id).await?;
            let pet = services.backend.get_pet(&pet_id).await?;
            Ok::<_, pvm_clients::ApiError>((records, pet))
        }
        .await;

        let (records, pet) = match fetched {
            Ok(ok) => ok,
            Err(err) => {
                tracing::error!(error = %err, "failed to fetch health history");
                return FlowOutcome::Respond(menu_result(
                    &ctx.session,
                    Some("Desculpe, nao consegui carregar o historico."),
                ));
            }
        };

        let body = if records.is_empty() {
            format!(
                "*Historico de {}*\n\nNenhum registro de saude encontrado.\n\n\
                 Inicie uma consulta para comecar a registrar o historico de saude do seu pet.",
                pet.name
            )
        } else {
            let listing = records
                .iter()
                .take(5)
                .map(|record| format!("- *{}*: {}", record.date, record.title))
                .collect::<Vec<_>>()
                .join("\n");
            format!("*Historico de {}*\n\nUltimos registros:\n{listing}", pet.name)
        };

        FlowOutcome::respond(
            vec![
                OutboundMessage::text(body),
                OutboundMessage::buttons(
                    "O que deseja fazer?",
                    [("new-consultation", "Nova Consulta"), ("menu", "Voltar ao Menu")],
                ),
            ],
            FlowState::main_menu(),
        )
    }
}

fn help_result() -> FlowResult {
    FlowResult {
        messages: vec![
            OutboundMessage::text(
                "*Ajuda - PetVet AI*\n\n\
                 *Nova Consulta*\n\
                 Descreva os sintomas do seu pet e receba um diagnostico preliminar com recomendacoes de tratamento.\n\n\
                 *Meus Pets*\n\
                 Gerencie os pets cadastrados e veja informacoes de cada um.\n\n\
                 *Historico*\n\
                 Acesse o historico de consultas e registros de saude.\n\n\
                 *Assinatura*\n\
                 Veja seu plano atual e opcoes de upgrade.\n\n\
                 Para duvidas, envie um email para suporte@petvet.ai",
            ),
            OutboundMessage::buttons("Voltar ao menu principal?", [("menu", "Menu Principal")]),
        ],
        new_state: FlowState::main_menu(),
    }
}

fn match_cached_pet<'a>(pets: &'a [PetRef], input: &str) -> Option<&'a PetRef> {
    if let Ok(number) = input.parse::<usize>() {
        if number >= 1 && number <= pets.len() {
            return Some(&pets[number - 1]);
        }
    }
    pets.iter().find(|pet| pet.name.to_lowercase().contains(input))
}

fn pet_details_text(pet: &Pet) -> String {
    let today = OffsetDateTime::now_utc().date();
    let age = pet
        .birth_date
        .as_deref()
        .and_then(|birth| age_label(birth, today))
        .unwrap_or_else(|| "Nao informado".to_string());
    let weight = pet
        .weight
        .map(|w| format!("{w} kg"))
        .unwrap_or_else(|| "Nao informado".to_string());
    format!(
        "{} *{}*\n\nEspecie: {}\nRaca: {}\nIdade: {age}\nPeso: {weight}",
        pet.species.emoji(),
        pet.name,
        pet.species.label_pt(),
        pet.breed.as_deref().unwrap_or("Nao informado"),
    )
}

/// Rough age label from an ISO birth date: whole years, else whole months,
/// else "Filhote".
fn age_label(birth_date: &str, today: Date) -> Option<String> {
    let format = format_description!("[year]-[month]-[day]");
    let birth = Date::parse(birth_date, &format).ok()?;
    let years = today.year() - birth.year();
    let months = today.month() as i32 - birth.month() as i32;
    if years > 0 {
        Some(format!("{years} ano{}", if years > 1 { "s" } else { "" }))
    } else if months > 0 {
        Some(format!("{months} mes{}", if months > 1 { "es" } else { "" }))
    } else {
        Some("Filhote".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::{ctx_with_state, sample_pet, services_with, FakeEnv};
    use time::macros::date;

    #[tokio::test]
    async fn button_new_consultation_hands_off() {
        let env = FakeEnv::default();
        let services = services_with(&env).await;
        let flow = MainMenuFlow;
        let ctx = ctx_with_state(
            FlowState::main_menu(),
            InboundContent::Button {
                id: "new-consultation".into(),
                title: "Nova Consulta".into(),
            },
        );
        match flow.process(&ctx, &services).await.unwrap() {
            FlowOutcome::Handoff { messages, target } => {
                assert!(messages.is_empty());
                assert_eq!(target.flow_name(), "consultation");
            }
            other => panic!("expected handoff, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn pets_list_caches_refs_for_matching() {
        let env = FakeEnv::default();
        env.backend.add_pet(sample_pet("p1", "u1", "Rex"));
        env.backend.add_pet(sample_pet("p2", "u1", "Mimi"));
        let services = services_with(&env).await;
        let flow = MainMenuFlow;

        let mut ctx = ctx_with_state(
            FlowState::main_menu(),
            InboundContent::Text { text: "meus pets".into() },
        );
        ctx.session.user_id = Some("u1".into());

        let outcome = flow.process(&ctx, &services).await.unwrap();
        let result = match outcome {
            FlowOutcome::Respond(result) => result,
            other => panic!("expected respond, got {other:?}"),
        };
        match &result.new_state {
            FlowState::MainMenu { pets } => {
                assert_eq!(pets.len(), 2);
                assert_eq!(pets[0].name, "Rex");
            }
            other => panic!("unexpected state: {other:?}"),
        }

        // Selecting "2" from the cached list shows Mimi's details.
        let mut ctx = ctx_with_state(
            result.new_state.clone(),
            InboundContent::Text { text: "2".into() },
        );
        ctx.session.user_id = Some("u1".into());
        let outcome = flow.process(&ctx, &services).await.unwrap();
        match outcome {
            FlowOutcome::Respond(result) => match &result.messages[0] {
                OutboundMessage::Text { text } => assert!(text.contains("Mimi")),
                other => panic!("unexpected message: {other:?}"),
            },
            other => panic!("expected respond, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn anonymous_pets_request_routes_to_registration() {
        let env = FakeEnv::default();
        let services = services_with(&env).await;
        let flow = MainMenuFlow;
        let ctx = ctx_with_state(
            FlowState::main_menu(),
            InboundContent::Button {
                id: "my-pets".into(),
                title: "Meus Pets".into(),
            },
        );
        match flow.process(&ctx, &services).await.unwrap() {
            FlowOutcome::Handoff { target, .. } => {
                assert_eq!(target.flow_name(), "pet-registration")
            }
            other => panic!("expected handoff, got {other:?}"),
        }
    }

    #[test]
    fn age_label_prefers_years() {
        assert_eq!(
            age_label("2022-03-01", date!(2026 - 08 - 07)),
            Some("4 anos".to_string())
        );
        assert_eq!(
            age_label("2026-02-01", date!(2026 - 08 - 07)),
            Some("6 meses".to_string())
        );
        assert_eq!(
            age_label("2026-08-01", date!(2026 - 08 - 07)),
            Some("Filhote".to_string())
        );
        assert_eq!(age_label("not-a-date", date!(2026 - 08 - 07)), None);
    }

    #[test]
    fn menu_greets_known_contacts_by_name() {
        let mut session = pvm_session::Session::new("551", Some("Maria".into()));
        let result = menu_result(&session, None);
        match &result.messages[0] {
            OutboundMessage::Interactive {
                interactive: pvm_core::InteractiveMessage::Buttons { body, buttons, .. },
            } => {
                assert!(body.contains("Ola, Maria!"));
                assert_eq!(buttons.len(), 3);
            }
            other => panic!("unexpected message: {other:?}"),
        }

        session.contact_name = None;
        let result = menu_result(&session, Some("Operacao cancelada."));
        match &result.messages[0] {
            OutboundMessage::Interactive {
                interactive: pvm_core::InteractiveMessage::Buttons { body, .. },
            } => {
                assert!(body.starts_with("Operacao cancelada.\n\nOla!"));
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }
}
