use std::sync::LazyLock;

use anyhow::{Context, Result};
use async_trait::async_trait;
use regex::Regex;
use time::{Date, OffsetDateTime};

use pvm_core::{
    ConsultationData, ConsultationStep, FlowState, NewPet, OutboundMessage, PetDraft, PlanId,
    RegistrationStep, ReturnTarget, Sex, Species, SubscriptionStep,
};

use crate::context::{FlowContext, FlowOutcome};
use crate::{Flow, FlowServices};

static YEARS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)\s*anos?").expect("valid years regex"));
static MONTHS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)\s*mes(?:es)?").expect("valid months regex"));

/// Linear seven-step wizard collecting a pet record, ending in backend
/// creation. `return_to` carries the flow to resume once the pet exists.
#[derive(Default)]
pub struct PetRegistrationFlow;

#[async_trait]
impl Flow for PetRegistrationFlow {
    fn name(&self) -> &'static str {
        "pet-registration"
    }

    async fn process(&self, ctx: &FlowContext, services: &FlowServices) -> Result<FlowOutcome> {
        let (step, draft, return_to) = match &ctx.session.state {
            FlowState::PetRegistration {
                step,
                draft,
                return_to,
            } => (*step, draft.clone(), return_to.clone()),
            _ => (RegistrationStep::Start, PetDraft::default(), None),
        };

        match step {
            RegistrationStep::Start => Ok(ask_name(return_to)),
            RegistrationStep::Name => Ok(handle_name(ctx, draft, return_to)),
            RegistrationStep::Species => Ok(handle_species(ctx, draft, return_to)),
            RegistrationStep::Breed => Ok(handle_breed(ctx, draft, return_to)),
            RegistrationStep::Age => Ok(handle_age(ctx, draft, return_to)),
            RegistrationStep::Sex => Ok(handle_sex(ctx, draft, return_to)),
            RegistrationStep::Weight => Ok(handle_weight(ctx, draft, return_to)),
            RegistrationStep::Confirm => self.handle_confirm(ctx, services, draft, return_to).await,
        }
    }
}

fn state(step: RegistrationStep, draft: PetDraft, return_to: Option<ReturnTarget>) -> FlowState {
    FlowState::PetRegistration {
        step,
        draft,
        return_to,
    }
}

fn reprompt(text: &str, step: RegistrationStep, draft: PetDraft, return_to: Option<ReturnTarget>) -> FlowOutcome {
    FlowOutcome::respond(
        vec![OutboundMessage::text(text)],
        state(step, draft, return_to),
    )
}

fn ask_name(return_to: Option<ReturnTarget>) -> FlowOutcome {
    FlowOutcome::respond(
        vec![OutboundMessage::text(
            "Vamos cadastrar seu pet! Qual e o nome dele?",
        )],
        state(RegistrationStep::Name, PetDraft::default(), return_to),
    )
}

fn handle_name(ctx: &FlowContext, mut draft: PetDraft, return_to: Option<ReturnTarget>) -> FlowOutcome {
    let Some(text) = ctx.content.text() else {
        return reprompt(
            "Por favor, digite o nome do seu pet.",
            RegistrationStep::Name,
            draft,
            return_to,
        );
    };
    let name = text.trim();
    let length = name.chars().count();
    if !(2..=50).contains(&length) {
        return reprompt(
            "O nome deve ter entre 2 e 50 caracteres. Tente novamente.",
            RegistrationStep::Name,
            draft,
            return_to,
        );
    }

    draft.name = Some(name.to_string());
    FlowOutcome::respond(
        vec![OutboundMessage::buttons(
            format!("{name}, que nome lindo! Qual e a especie?"),
            [("dog", "Cachorro"), ("cat", "Gato"), ("other", "Outro")],
        )],
        state(RegistrationStep::Species, draft, return_to),
    )
}

fn handle_species(ctx: &FlowContext, mut draft: PetDraft, return_to: Option<ReturnTarget>) -> FlowOutcome {
    let species = match ctx.content.reply_id() {
        Some("dog") => Some(Species::Dog),
        Some("cat") => Some(Species::Cat),
        Some("bird") => Some(Species::Bird),
        Some("exotic") => Some(Species::Exotic),
        Some("other") => {
            return FlowOutcome::respond(
                vec![OutboundMessage::buttons(
                    "Qual tipo de animal?",
                    [("bird", "Ave"), ("exotic", "Exotico")],
                )],
                state(RegistrationStep::Species, draft, return_to),
            );
        }
        _ => None,
    };

    let Some(species) = species else {
        return reprompt(
            "Por favor, selecione a especie do seu pet.",
            RegistrationStep::Species,
            draft,
            return_to,
        );
    };

    let breed_question = match species {
        Species::Dog => "Qual a raca do cachorro? (ou digite \"vira-lata\" se nao souber)",
        Species::Cat => "Qual a raca do gato? (ou digite \"SRD\" se nao souber)",
        _ => "Qual a especie especifica? (ex: papagaio, hamster)",
    };

    draft.species = Some(species);
    FlowOutcome::respond(
        vec![OutboundMessage::text(breed_question)],
        state(RegistrationStep::Breed, draft, return_to),
    )
}

fn handle_breed(ctx: &FlowContext, mut draft: PetDraft, return_to: Option<ReturnTarget>) -> FlowOutcome {
    let Some(text) = ctx.content.text() else {
        return reprompt(
            "Por favor, digite a raca ou especie.",
            RegistrationStep::Breed,
            draft,
            return_to,
        );
    };

    draft.breed = Some(text.trim().to_string());
    let name = draft.name.clone().unwrap_or_default();
    FlowOutcome::respond(
        vec![OutboundMessage::text(format!(
            "Qual a idade aproximada de {name}?\n\nExemplos: \"2 anos\", \"6 meses\", \"nao sei\""
        ))],
        state(RegistrationStep::Age, draft, return_to),
    )
}

fn handle_age(ctx: &FlowContext, mut draft: PetDraft, return_to: Option<ReturnTarget>) -> FlowOutcome {
    let Some(text) = ctx.content.text() else {
        return reprompt(
            "Por favor, informe a idade.",
            RegistrationStep::Age,
            draft,
            return_to,
        );
    };

    let age_text = text.to_lowercase();
    draft.birth_date = birth_date_from_age(age_text.trim(), OffsetDateTime::now_utc().date());

    let name = draft.name.clone().unwrap_or_default();
    FlowOutcome::respond(
        vec![OutboundMessage::buttons(
            format!("{name} e macho ou femea?"),
            [("male", "Macho"), ("female", "Femea")],
        )],
        state(RegistrationStep::Sex, draft, return_to),
    )
}

fn handle_sex(ctx: &FlowContext, mut draft: PetDraft, return_to: Option<ReturnTarget>) -> FlowOutcome {
    let sex = match ctx.content.reply_id() {
        Some("male") => Some(Sex::Male),
        Some("female") => Some(Sex::Female),
        _ => None,
    };
    let Some(sex) = sex else {
        return reprompt(
            "Por favor, selecione macho ou femea.",
            RegistrationStep::Sex,
            draft,
            return_to,
        );
    };

    draft.sex = Some(sex);
    let name = draft.name.clone().unwrap_or_default();
    FlowOutcome::respond(
        vec![OutboundMessage::text(format!(
            "Qual o peso aproximado de {name} em kg?\n\nExemplo: \"8.5\" ou \"nao sei\""
        ))],
        state(RegistrationStep::Weight, draft, return_to),
    )
}

fn handle_weight(ctx: &FlowContext, mut draft: PetDraft, return_to: Option<ReturnTarget>) -> FlowOutcome {
    let Some(text) = ctx.content.text() else {
        return reprompt(
            "Por favor, informe o peso.",
            RegistrationStep::Weight,
            draft,
            return_to,
        );
    };

    draft.weight = text
        .trim()
        .replace(',', ".")
        .parse::<f64>()
        .ok()
        .filter(|weight| *weight > 0.0 && *weight < 500.0);

    let name = draft.name.clone().unwrap_or_default();
    let species = draft
        .species
        .map(|s| s.label_pt())
        .unwrap_or("Nao informado");
    let confirm_text = format!(
        "*Confirme os dados de {name}:*\n\n\
         Especie: {species}\n\
         Raca: {}\n\
         Sexo: {}\n\
         Peso: {}\n\n\
         Os dados estao corretos?",
        draft.breed.as_deref().unwrap_or("Nao informado"),
        draft.sex.map(|s| s.label_pt()).unwrap_or("Nao informado"),
        draft
            .weight
            .map(|w| format!("{w} kg"))
            .unwrap_or_else(|| "Nao informado".to_string()),
    );

    FlowOutcome::respond(
        vec![OutboundMessage::buttons(
            confirm_text,
            [("confirm", "Sim, confirmar"), ("restart", "Corrigir dados")],
        )],
        state(RegistrationStep::Confirm, draft, return_to),
    )
}

impl PetRegistrationFlow {
    async fn handle_confirm(
        &self,
        ctx: &FlowContext,
        services: &FlowServices,
        draft: PetDraft,
        return_to: Option<ReturnTarget>,
    ) -> Result<FlowOutcome> {
        match ctx.content.reply_id() {
            Some("restart") => return Ok(ask_name(return_to)),
            Some("confirm") => {}
            _ => {
                return Ok(reprompt(
                    "Por favor, confirme ou corrija os dados.",
                    RegistrationStep::Confirm,
                    draft,
                    return_to,
                ));
            }
        }

        match self.create_pet(ctx, services, &draft, &return_to).await {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                tracing::error!(error = %err, "failed to create pet");
                Ok(FlowOutcome::respond(
                    vec![
                        OutboundMessage::text(
                            "Desculpe, ocorreu um erro ao cadastrar o pet. Por favor, tente novamente.",
                        ),
                        OutboundMessage::buttons(
                            "Tentar novamente?",
                            [("confirm", "Sim"), ("menu", "Voltar ao Menu")],
                        ),
                    ],
                    state(RegistrationStep::Confirm, draft, return_to),
                ))
            }
        }
    }

    async fn create_pet(
        &self,
        ctx: &FlowContext,
        services: &FlowServices,
        draft: &PetDraft,
        return_to: &Option<ReturnTarget>,
    ) -> Result<FlowOutcome> {
        let name = draft.name.clone().context("registration draft missing name")?;
        let species = draft.species.context("registration draft missing species")?;

        let user_id = match ctx.session.user_id.clone() {
            Some(user_id) => user_id,
            None => {
                let user = services
                    .backend
                    .create_user(&ctx.session.address, ctx.session.contact_name.as_deref())
                    .await?;
                services
                    .sessions
                    .set_linked_user(&ctx.session.address, &user.id)
                    .await?;
                tracing::info!(user_id = %user.id, "user created");
                user.id
            }
        };

        let pet = services
            .backend
            .create_pet(
                &user_id,
                &NewPet {
                    name: name.clone(),
                    species,
                    breed: draft.breed.clone(),
                    birth_date: draft.birth_date.clone(),
                    sex: draft.sex,
                    weight: draft.weight,
                },
            )
            .await?;
        tracing::info!(pet_id = %pet.id, user_id = %user_id, "pet created");
        services
            .sessions
            .set_active_pet(&ctx.session.address, &pet.id)
            .await?;

        match return_to {
            Some(ReturnTarget::Consultation) => Ok(FlowOutcome::handoff(
                vec![OutboundMessage::text(format!(
                    "{} foi cadastrado com sucesso! \u{1F389}\n\nAgora vamos iniciar a consulta.",
                    pet.name
                ))],
                FlowState::Consultation {
                    step: ConsultationStep::Start,
                    data: ConsultationData::default(),
                },
            )),
            Some(ReturnTarget::Subscription { plan }) => Ok(FlowOutcome::handoff(
                vec![OutboundMessage::text(format!(
                    "{} foi cadastrado com sucesso! \u{1F389}",
                    pet.name
                ))],
                subscription_resume(*plan),
            )),
            None => Ok(FlowOutcome::respond(
                vec![
                    OutboundMessage::text(format!(
                        "{} foi cadastrado com sucesso! \u{1F389}\n\n\
                         Agora voce pode fazer consultas e acompanhar a saude do seu pet.",
                        pet.name
                    )),
                    OutboundMessage::buttons(
                        "O que deseja fazer agora?",
                        [("new-consultation", "Nova Consulta"), ("menu", "Menu Principal")],
                    ),
                ],
                FlowState::main_menu(),
            )),
        }
    }
}

fn subscription_resume(plan: PlanId) -> FlowState {
    FlowState::Subscription {
        step: SubscriptionStep::Activate,
        selected_plan: Some(plan),
    }
}

/// Turns "2 anos" / "6 meses" into an ISO birth date anchored on the first of
/// the month; anything else ("nao sei" included) is no date.
fn birth_date_from_age(age_text: &str, today: Date) -> Option<String> {
    if let Some(captures) = YEARS_RE.captures(age_text) {
        let years: i32 = captures[1].parse().ok()?;
        return Some(format!(
            "{:04}-{:02}-01",
            today.year() - years,
            today.month() as u8
        ));
    }
    if let Some(captures) = MONTHS_RE.captures(age_text) {
        let months: i32 = captures[1].parse().ok()?;
        let total = today.year() * 12 + (today.month() as i32 - 1) - months;
        return Some(format!(
            "{:04}-{:02}-01",
            total.div_euclid(12),
            total.rem_euclid(12) + 1
        ));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::{ctx_with_state, services_with, FakeEnv};
    use pvm_core::InboundContent;
    use time::macros::date;

    fn button(id: &str) -> InboundContent {
        InboundContent::Button {
            id: id.into(),
            title: id.into(),
        }
    }

    fn text(body: &str) -> InboundContent {
        InboundContent::Text { text: body.into() }
    }

    fn step_of(outcome: &FlowOutcome) -> (RegistrationStep, PetDraft, Option<ReturnTarget>) {
        let state = match outcome {
            FlowOutcome::Respond(result) => &result.new_state,
            FlowOutcome::Handoff { target, .. } => target,
        };
        match state {
            FlowState::PetRegistration {
                step,
                draft,
                return_to,
            } => (*step, draft.clone(), return_to.clone()),
            other => panic!("not in registration: {other:?}"),
        }
    }

    #[test]
    fn birth_date_from_age_parses_relative_expressions() {
        let today = date!(2026 - 08 - 07);
        assert_eq!(
            birth_date_from_age("2 anos", today),
            Some("2024-08-01".to_string())
        );
        assert_eq!(
            birth_date_from_age("1 ano", today),
            Some("2025-08-01".to_string())
        );
        assert_eq!(
            birth_date_from_age("10 meses", today),
            Some("2025-10-01".to_string())
        );
        assert_eq!(
            birth_date_from_age("6 meses", today),
            Some("2026-02-01".to_string())
        );
        assert_eq!(birth_date_from_age("nao sei", today), None);
    }

    #[tokio::test]
    async fn name_length_is_validated() {
        let env = FakeEnv::default();
        let services = services_with(&env).await;
        let flow = PetRegistrationFlow;

        let ctx = ctx_with_state(
            FlowState::PetRegistration {
                step: RegistrationStep::Name,
                draft: PetDraft::default(),
                return_to: None,
            },
            text("R"),
        );
        let outcome = flow.process(&ctx, &services).await.unwrap();
        let (step, draft, _) = step_of(&outcome);
        assert_eq!(step, RegistrationStep::Name);
        assert!(draft.name.is_none());
    }

    #[tokio::test]
    async fn wizard_collects_and_creates() {
        let env = FakeEnv::default();
        let services = services_with(&env).await;
        let flow = PetRegistrationFlow;

        let mut state = FlowState::PetRegistration {
            step: RegistrationStep::Start,
            draft: PetDraft::default(),
            return_to: None,
        };
        let inputs: Vec<InboundContent> = vec![
            text("oi"),
            text("Rex"),
            button("dog"),
            text("vira-lata"),
            text("2 anos"),
            button("male"),
            text("8,5"),
        ];
        for input in inputs {
            let ctx = ctx_with_state(state.clone(), input);
            let outcome = flow.process(&ctx, &services).await.unwrap();
            let (step, draft, ret) = step_of(&outcome);
            state = FlowState::PetRegistration {
                step,
                draft,
                return_to: ret,
            };
        }

        let (step, draft, _) = match &state {
            FlowState::PetRegistration {
                step,
                draft,
                return_to,
            } => (*step, draft.clone(), return_to.clone()),
            other => panic!("unexpected state: {other:?}"),
        };
        assert_eq!(step, RegistrationStep::Confirm);
        assert_eq!(draft.name.as_deref(), Some("Rex"));
        assert_eq!(draft.species, Some(Species::Dog));
        assert_eq!(draft.weight, Some(8.5));

        // Confirm: creates the user (anonymous session) and the pet.
        let ctx = ctx_with_state(state, button("confirm"));
        let outcome = flow.process(&ctx, &services).await.unwrap();
        match outcome {
            FlowOutcome::Respond(result) => {
                assert_eq!(result.new_state, FlowState::main_menu());
                match &result.messages[0] {
                    OutboundMessage::Text { text } => assert!(text.contains("Rex")),
                    other => panic!("unexpected message: {other:?}"),
                }
            }
            other => panic!("expected respond, got {other:?}"),
        }
        assert_eq!(env.backend.created_users(), 1);
        assert_eq!(env.backend.created_pets(), 1);
    }

    #[tokio::test]
    async fn confirm_resumes_return_flow() {
        let env = FakeEnv::default();
        let services = services_with(&env).await;
        let flow = PetRegistrationFlow;

        let state = FlowState::PetRegistration {
            step: RegistrationStep::Confirm,
            draft: PetDraft {
                name: Some("Rex".into()),
                species: Some(Species::Dog),
                ..Default::default()
            },
            return_to: Some(ReturnTarget::Consultation),
        };
        let ctx = ctx_with_state(state, button("confirm"));
        match flow.process(&ctx, &services).await.unwrap() {
            FlowOutcome::Handoff { messages, target } => {
                assert_eq!(target.flow_name(), "consultation");
                assert!(!messages.is_empty());
            }
            other => panic!("expected handoff, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn backend_failure_keeps_wizard_state() {
        let env = FakeEnv::default();
        env.backend.fail_create_pet();
        let services = services_with(&env).await;
        let flow = PetRegistrationFlow;

        let state = FlowState::PetRegistration {
            step: RegistrationStep::Confirm,
            draft: PetDraft {
                name: Some("Rex".into()),
                species: Some(Species::Dog),
                ..Default::default()
            },
            return_to: None,
        };
        let ctx = ctx_with_state(state.clone(), button("confirm"));
        match flow.process(&ctx, &services).await.unwrap() {
            FlowOutcome::Respond(result) => {
                assert_eq!(result.new_state, state);
                match &result.messages[0] {
                    OutboundMessage::Text { text } => assert!(text.contains("erro ao cadastrar")),
                    other => panic!("unexpected message: {other:?}"),
                }
            }
            other => panic!("expected respond, got {other:?}"),
        }
    }
}
