use anyhow::{Context, Result};
use async_trait::async_trait;
use time::{OffsetDateTime, macros::format_description};

use pvm_clients::{
    ConsultationUpdate, ImageAnalysisRequest, NewConsultation, PetInfo, SymptomAnalysisRequest,
    TreatmentRequest,
};
use pvm_core::{
    ConsultationData, ConsultationStatus, ConsultationStep, Diagnosis, FlowState, InboundContent,
    MediaKind, OutboundMessage, PetDraft, PetRef, RegistrationStep, ReturnTarget,
};

use crate::context::{FlowContext, FlowOutcome};
use crate::main_menu::menu_result;
use crate::{Flow, FlowServices};

/// Symptom consultation: pet selection, symptom capture, AI analysis with
/// clarifying questions, diagnosis, treatment protocol, and prescription
/// delivery.
#[derive(Default)]
pub struct ConsultationFlow;

#[async_trait]
impl Flow for ConsultationFlow {
    fn name(&self) -> &'static str {
        "consultation"
    }

    async fn process(&self, ctx: &FlowContext, services: &FlowServices) -> Result<FlowOutcome> {
        let (step, data) = match &ctx.session.state {
            FlowState::Consultation { step, data } => (*step, data.clone()),
            _ => (ConsultationStep::Start, ConsultationData::default()),
        };

        match step {
            ConsultationStep::Start => self.start(ctx, services).await,
            ConsultationStep::SelectPet => Ok(self.handle_pet_selection(ctx, data)),
            ConsultationStep::DescribeSymptoms => self.handle_symptoms(ctx, services, data).await,
            ConsultationStep::ClarifyingQuestions => self.handle_answer(ctx, services, data).await,
            ConsultationStep::ShowDiagnosis => self.handle_diagnosis_choice(ctx, services, data).await,
            ConsultationStep::Treatment => self.handle_treatment_choice(ctx, services, data).await,
            ConsultationStep::Prescription => self.handle_prescription_choice(ctx, services, data).await,
        }
    }
}

fn state(step: ConsultationStep, data: ConsultationData) -> FlowState {
    FlowState::Consultation { step, data }
}

fn registration_detour() -> FlowState {
    FlowState::PetRegistration {
        step: RegistrationStep::Start,
        draft: PetDraft::default(),
        return_to: Some(ReturnTarget::Consultation),
    }
}

fn ask_for_symptoms(pet: &PetRef) -> FlowOutcome {
    FlowOutcome::respond(
        vec![OutboundMessage::text(format!(
            "O que {} esta sentindo? Descreva os sintomas com o maximo de detalhes possivel.\n\n\
             Dica: Mencione ha quanto tempo, frequencia e intensidade dos sintomas.",
            pet.name
        ))],
        state(
            ConsultationStep::DescribeSymptoms,
            ConsultationData {
                pet_id: Some(pet.id.clone()),
                pet_name: Some(pet.name.clone()),
                ..Default::default()
            },
        ),
    )
}

fn diagnosis_buttons() -> OutboundMessage {
    OutboundMessage::buttons(
        "O que voce gostaria de fazer?",
        [
            ("show-treatment", "Ver Tratamento"),
            ("get-prescription", "Gerar Receita"),
            ("menu", "Menu"),
        ],
    )
}

impl ConsultationFlow {
    async fn start(&self, ctx: &FlowContext, services: &FlowServices) -> Result<FlowOutcome> {
        let Some(user_id) = ctx.session.user_id.clone() else {
            return Ok(FlowOutcome::handoff(
                vec![OutboundMessage::text(
                    "Para iniciar uma consulta, primeiro precisamos cadastrar seu pet.",
                )],
                registration_detour(),
            ));
        };

        let pets = services.backend.get_pets(&user_id).await?;

        if pets.is_empty() {
            return Ok(FlowOutcome::handoff(
                vec![OutboundMessage::text(
                    "Voce ainda nao tem nenhum pet cadastrado. Vamos cadastrar agora?",
                )],
                registration_detour(),
            ));
        }

        // Exactly one pet: skip selection, go straight to symptom capture.
        if pets.len() == 1 {
            return Ok(ask_for_symptoms(&PetRef::from(&pets[0])));
        }

        let buttons: Vec<(String, String)> = pets
            .iter()
            .take(3)
            .map(|pet| {
                (
                    format!("pet-{}", pet.id),
                    format!("{} {}", pet.species.emoji(), pet.name),
                )
            })
            .collect();

        Ok(FlowOutcome::respond(
            vec![OutboundMessage::buttons("Para qual pet e a consulta?", buttons)],
            state(
                ConsultationStep::SelectPet,
                ConsultationData {
                    pets: pets.iter().map(PetRef::from).collect(),
                    ..Default::default()
                },
            ),
        ))
    }

    fn handle_pet_selection(&self, ctx: &FlowContext, data: ConsultationData) -> FlowOutcome {
        if let Some(id) = ctx.content.reply_id() {
            if let Some(pet_id) = id.strip_prefix("pet-") {
                if let Some(pet) = data.pets.iter().find(|pet| pet.id == pet_id) {
                    return ask_for_symptoms(pet);
                }
            }
        }

        if let Some(text) = ctx.content.text() {
            let input = text.to_lowercase();
            let input = input.trim();
            let chosen = input
                .parse::<usize>()
                .ok()
                .filter(|n| *n >= 1 && *n <= data.pets.len())
                .map(|n| &data.pets[n - 1])
                .or_else(|| {
                    data.pets
                        .iter()
                        .find(|pet| pet.name.to_lowercase().contains(input))
                });
            if let Some(pet) = chosen {
                return ask_for_symptoms(pet);
            }
        }

        FlowOutcome::respond(
            vec![OutboundMessage::text(
                "Por favor, selecione um pet da lista ou digite o nome.",
            )],
            state(ConsultationStep::SelectPet, data),
        )
    }

    async fn handle_symptoms(
        &self,
        ctx: &FlowContext,
        services: &FlowServices,
        mut data: ConsultationData,
    ) -> Result<FlowOutcome> {
        if let InboundContent::Media {
            kind: MediaKind::Image,
            media_id,
            ..
        } = &ctx.content
        {
            return Ok(self.analyze_image(services, &data, media_id).await);
        }

        let Some(symptoms) = ctx.content.text().map(str::to_string) else {
            return Ok(FlowOutcome::respond(
                vec![OutboundMessage::text(
                    "Por favor, descreva os sintomas em texto. Voce tambem pode enviar fotos.",
                )],
                state(ConsultationStep::DescribeSymptoms, data),
            ));
        };

        let pet_id = data
            .pet_id
            .clone()
            .context("symptom step without a selected pet")?;

        let started = async {
            let consultation = services
                .backend
                .start_consultation(&NewConsultation {
                    pet_id: pet_id.clone(),
                    symptoms: symptoms.clone(),
                })
                .await?;
            let pet = services.backend.get_pet(&pet_id).await?;
            let analysis = services
                .analysis
                .analyze_symptoms(&SymptomAnalysisRequest {
                    symptoms: symptoms.clone(),
                    pet_id: pet_id.clone(),
                    consultation_id: consultation.id.clone(),
                    pet_info: Some(PetInfo::from(&pet)),
                    clarifying_answers: Vec::new(),
                })
                .await?;
            Ok::<_, pvm_clients::ApiError>((consultation, analysis))
        }
        .await;

        let (consultation, analysis) = match started {
            Ok(ok) => ok,
            Err(err) => {
                tracing::warn!(error = %err, "symptom analysis unavailable");
                return Ok(FlowOutcome::respond(
                    vec![OutboundMessage::text(
                        "Desculpe, nao consegui analisar os sintomas agora. \
                         Por favor, envie os sintomas novamente em alguns instantes.",
                    )],
                    state(ConsultationStep::DescribeSymptoms, data),
                ));
            }
        };
        tracing::info!(consultation_id = %consultation.id, pet_id = %pet_id, "consultation started");

        data.symptoms = Some(symptoms);
        data.consultation_id = Some(consultation.id.clone());

        if analysis.needs_clarification && !analysis.clarifying_questions.is_empty() {
            let listing = analysis
                .clarifying_questions
                .iter()
                .enumerate()
                .map(|(i, q)| format!("{}. {q}", i + 1))
                .collect::<Vec<_>>()
                .join("\n");
            data.pending_questions = analysis.clarifying_questions;
            data.answers = Vec::new();
            return Ok(FlowOutcome::respond(
                vec![OutboundMessage::text(format!(
                    "Entendi. Para um diagnostico mais preciso, preciso de algumas informacoes:\n\n\
                     {listing}\n\nResponda cada pergunta separadamente."
                ))],
                state(ConsultationStep::ClarifyingQuestions, data),
            ));
        }

        let diagnosis = analysis
            .diagnosis
            .context("analysis returned neither questions nor diagnosis")?;
        Ok(self.show_diagnosis(services, data, diagnosis).await)
    }

    async fn handle_answer(
        &self,
        ctx: &FlowContext,
        services: &FlowServices,
        mut data: ConsultationData,
    ) -> Result<FlowOutcome> {
        let Some(answer) = ctx.content.text() else {
            return Ok(FlowOutcome::respond(
                vec![OutboundMessage::text("Por favor, responda em texto.")],
                state(ConsultationStep::ClarifyingQuestions, data),
            ));
        };

        // When every question already has an answer we are retrying a failed
        // final analysis; don't collect the nudge text as another answer.
        if data.answers.len() < data.pending_questions.len() {
            data.answers.push(answer.to_string());
        }

        if data.answers.len() < data.pending_questions.len() {
            let next = data.answers.len();
            let question = data.pending_questions[next].clone();
            return Ok(FlowOutcome::respond(
                vec![OutboundMessage::text(format!("{}. {question}", next + 1))],
                state(ConsultationStep::ClarifyingQuestions, data),
            ));
        }

        let pet_id = data
            .pet_id
            .clone()
            .context("clarifying step without a selected pet")?;
        let consultation_id = data
            .consultation_id
            .clone()
            .context("clarifying step without a consultation")?;
        let symptoms = data
            .symptoms
            .clone()
            .context("clarifying step without symptoms")?;

        let analyzed = async {
            let pet = services.backend.get_pet(&pet_id).await?;
            services
                .analysis
                .analyze_symptoms(&SymptomAnalysisRequest {
                    symptoms,
                    pet_id: pet_id.clone(),
                    consultation_id,
                    pet_info: Some(PetInfo::from(&pet)),
                    clarifying_answers: data.answers.clone(),
                })
                .await
        }
        .await;

        let analysis = match analyzed {
            Ok(analysis) => analysis,
            Err(err) => {
                tracing::warn!(error = %err, "final analysis unavailable");
                return Ok(FlowOutcome::respond(
                    vec![OutboundMessage::text(
                        "Desculpe, nao consegui concluir a analise. \
                         Envie qualquer mensagem para tentar novamente.",
                    )],
                    state(ConsultationStep::ClarifyingQuestions, data),
                ));
            }
        };

        let diagnosis = analysis
            .diagnosis
            .context("final analysis returned no diagnosis")?;
        Ok(self.show_diagnosis(services, data, diagnosis).await)
    }

    async fn show_diagnosis(
        &self,
        services: &FlowServices,
        mut data: ConsultationData,
        diagnosis: Diagnosis,
    ) -> FlowOutcome {
        let differentials = diagnosis
            .differentials
            .iter()
            .enumerate()
            .map(|(i, d)| format!("{}. {} ({}%)", i + 1, d.condition, d.probability))
            .collect::<Vec<_>>()
            .join("\n");
        let pet_name = data.pet_name.clone().unwrap_or_default();
        let body = format!(
            "{} *ANALISE CLINICA - {pet_name}*\n\n\
             *Diagnosticos Diferenciais:*\n{differentials}\n\n\
             *Diagnostico Mais Provavel:*\n{}\n\n\
             *Nivel de Urgencia:* {}",
            diagnosis.urgency_level.emoji(),
            diagnosis.primary,
            diagnosis.urgency_level.label_pt(),
        );

        // The diagnosis is already in hand; failing to persist it must not
        // cost the user the answer.
        if let Some(consultation_id) = &data.consultation_id {
            let update = ConsultationUpdate {
                diagnosis: Some(diagnosis.clone()),
                urgency_level: Some(diagnosis.urgency_level),
                ..Default::default()
            };
            if let Err(err) = services
                .backend
                .update_consultation(consultation_id, &update)
                .await
            {
                tracing::warn!(error = %err, consultation_id, "failed to record diagnosis");
            }
        }

        data.diagnosis = Some(diagnosis);
        FlowOutcome::respond(
            vec![OutboundMessage::text(body), diagnosis_buttons()],
            state(ConsultationStep::ShowDiagnosis, data),
        )
    }

    async fn handle_diagnosis_choice(
        &self,
        ctx: &FlowContext,
        services: &FlowServices,
        data: ConsultationData,
    ) -> Result<FlowOutcome> {
        match ctx.content.reply_id() {
            Some("show-treatment") => Ok(self.show_treatment(services, data).await),
            Some("get-prescription") => Ok(self.send_prescription(services, data).await),
            Some("menu") => Ok(FlowOutcome::Respond(menu_result(&ctx.session, None))),
            _ => Ok(FlowOutcome::respond(
                vec![diagnosis_buttons()],
                state(ConsultationStep::ShowDiagnosis, data),
            )),
        }
    }

    async fn show_treatment(
        &self,
        services: &FlowServices,
        data: ConsultationData,
    ) -> FlowOutcome {
        let fetched = async {
            let pet_id = data.pet_id.as_deref().unwrap_or_default();
            let pet = services.backend.get_pet(pet_id).await?;
            let diagnosis = data.diagnosis.clone().ok_or(pvm_clients::ApiError::NotFound)?;
            let consultation_id = data.consultation_id.clone().unwrap_or_default();
            services
                .analysis
                .treatment_protocol(&TreatmentRequest {
                    consultation_id,
                    diagnosis,
                    pet_info: Some(PetInfo::from(&pet)),
                })
                .await
        }
        .await;

        let treatment = match fetched {
            Ok(treatment) => treatment,
            Err(err) => {
                tracing::warn!(error = %err, "treatment protocol unavailable");
                return FlowOutcome::respond(
                    vec![
                        OutboundMessage::text(
                            "Desculpe, nao consegui gerar o protocolo de tratamento agora. Tente novamente.",
                        ),
                        diagnosis_buttons(),
                    ],
                    state(ConsultationStep::ShowDiagnosis, data),
                );
            }
        };

        let medications = treatment
            .medications
            .iter()
            .map(|med| {
                format!(
                    "- *{}*\n  Dose: {}\n  Via: {}\n  Frequencia: {}\n  Duracao: {}",
                    med.name, med.dosage, med.route, med.frequency, med.duration
                )
            })
            .collect::<Vec<_>>()
            .join("\n\n");
        let supportive = treatment
            .supportive_care
            .iter()
            .map(|care| format!("- {care}"))
            .collect::<Vec<_>>()
            .join("\n");
        let body = format!(
            "*PROTOCOLO DE TRATAMENTO*\n\n\
             *Medicacoes:*\n{medications}\n\n\
             *Cuidados de Suporte:*\n{supportive}\n\n\
             *Monitoramento:*\n\
             Se nao houver melhora em 48-72h, procure um veterinario presencial."
        );

        if let Some(consultation_id) = &data.consultation_id {
            let update = ConsultationUpdate {
                treatment: Some(treatment.clone()),
                ..Default::default()
            };
            if let Err(err) = services
                .backend
                .update_consultation(consultation_id, &update)
                .await
            {
                tracing::warn!(error = %err, consultation_id, "failed to record treatment");
            }
        }

        FlowOutcome::respond(
            vec![
                OutboundMessage::text(body),
                OutboundMessage::buttons(
                    "Deseja receber a receita em PDF?",
                    [("get-prescription", "Sim, enviar receita"), ("menu", "Finalizar")],
                ),
            ],
            state(ConsultationStep::Treatment, data),
        )
    }

    async fn handle_treatment_choice(
        &self,
        ctx: &FlowContext,
        services: &FlowServices,
        data: ConsultationData,
    ) -> Result<FlowOutcome> {
        match ctx.content.reply_id() {
            Some("get-prescription") => Ok(self.send_prescription(services, data).await),
            _ => Ok(FlowOutcome::Respond(menu_result(&ctx.session, None))),
        }
    }

    async fn send_prescription(
        &self,
        services: &FlowServices,
        data: ConsultationData,
    ) -> FlowOutcome {
        let Some(consultation_id) = data.consultation_id.clone() else {
            tracing::error!("prescription requested without a consultation");
            return FlowOutcome::respond(
                vec![OutboundMessage::text(
                    "Desculpe, nao encontrei a consulta. Digite *menu* para voltar ao inicio.",
                )],
                FlowState::main_menu(),
            );
        };

        let url = match services.backend.generate_prescription(&consultation_id).await {
            Ok(url) => url,
            Err(err) => {
                tracing::error!(error = %err, consultation_id, "failed to generate prescription");
                return FlowOutcome::respond(
                    vec![
                        OutboundMessage::text(
                            "Desculpe, nao consegui gerar a receita. Por favor, tente novamente.",
                        ),
                        OutboundMessage::buttons(
                            "O que deseja fazer?",
                            [("get-prescription", "Tentar Novamente"), ("menu", "Voltar ao Menu")],
                        ),
                    ],
                    state(ConsultationStep::Prescription, data),
                );
            }
        };

        let update = ConsultationUpdate {
            status: Some(ConsultationStatus::Completed),
            ..Default::default()
        };
        if let Err(err) = services
            .backend
            .update_consultation(&consultation_id, &update)
            .await
        {
            tracing::warn!(error = %err, consultation_id, "failed to close consultation");
        }

        let date_format = format_description!("[year]-[month]-[day]");
        let date = OffsetDateTime::now_utc()
            .date()
            .format(&date_format)
            .unwrap_or_default();
        let pet_name = data.pet_name.clone().unwrap_or_default();

        FlowOutcome::respond(
            vec![
                OutboundMessage::document(
                    url,
                    format!("Receita_PetVet_{date}.pdf"),
                    Some("Receita Veterinaria - PetVet AI".to_string()),
                ),
                OutboundMessage::text(format!(
                    "Receita enviada!\n\n\
                     Esta consulta foi salva no historico de saude de {pet_name}.\n\n\
                     Melhoras para o seu pet! \u{1F43E}"
                )),
            ],
            FlowState::main_menu(),
        )
    }

    async fn handle_prescription_choice(
        &self,
        ctx: &FlowContext,
        services: &FlowServices,
        data: ConsultationData,
    ) -> Result<FlowOutcome> {
        match ctx.content.reply_id() {
            Some("get-prescription") => Ok(self.send_prescription(services, data).await),
            _ => Ok(FlowOutcome::Respond(menu_result(&ctx.session, None))),
        }
    }

    async fn analyze_image(
        &self,
        services: &FlowServices,
        data: &ConsultationData,
        media_id: &str,
    ) -> FlowOutcome {
        let analyzed = async {
            let media = services.messaging.media_url(media_id).await?;
            services
                .analysis
                .analyze_image(&ImageAnalysisRequest {
                    image_url: media.url,
                    pet_id: data.pet_id.clone().unwrap_or_default(),
                    consultation_id: data.consultation_id.clone(),
                    context: data.symptoms.clone(),
                })
                .await
        }
        .await;

        let analysis = match analyzed {
            Ok(analysis) => analysis,
            Err(err) => {
                tracing::warn!(error = %err, media_id, "image analysis unavailable");
                return FlowOutcome::respond(
                    vec![OutboundMessage::text(
                        "Nao consegui analisar a imagem agora. \
                         Descreva os sintomas em texto para continuarmos.",
                    )],
                    state(ConsultationStep::DescribeSymptoms, data.clone()),
                );
            }
        };

        let findings = analysis
            .findings
            .iter()
            .chain(analysis.concerns.iter())
            .map(|item| format!("- {item}"))
            .collect::<Vec<_>>()
            .join("\n");
        let body = format!(
            "{} *Analise da imagem:*\n\n{findings}\n\n\
             Para continuar a consulta, descreva tambem os sintomas em texto.",
            analysis.urgency_level.emoji()
        );

        FlowOutcome::respond(
            vec![OutboundMessage::text(body)],
            state(ConsultationStep::DescribeSymptoms, data.clone()),
        )
    }
}
