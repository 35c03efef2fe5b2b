//! In-memory collaborator fakes for flow tests.

use std::sync::{
    Arc, Mutex,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

use pvm_clients::{
    AnalysisApi, ApiError, ApiResult, BackendApi, BillingApi, ConsultationUpdate,
    ImageAnalysisRequest, ImageAnalysisResponse, MediaLocation, MessagingApi, NewConsultation,
    SubscriptionOutcome, SymptomAnalysisRequest, SymptomAnalysisResponse, TreatmentRequest,
};
use pvm_core::{
    Consultation, ConsultationStatus, FlowState, HealthRecord, InboundContent, InteractiveMessage,
    NewPet, Pet, PlanId, Species, SubscriptionInfo, TemplateMessage, TreatmentPlan, UrgencyLevel,
    User,
};
use pvm_session::{DirectoryEntry, Session, SessionManager, UserDirectory, shared_memory_store};

use crate::context::FlowContext;
use crate::FlowServices;

pub(crate) fn sample_pet(id: &str, user_id: &str, name: &str) -> Pet {
    Pet {
        id: id.into(),
        user_id: user_id.into(),
        name: name.into(),
        species: Species::Dog,
        breed: Some("vira-lata".into()),
        birth_date: Some("2022-03-01".into()),
        sex: None,
        weight: Some(8.5),
        neutered: None,
    }
}

pub(crate) fn ctx_with_state(state: FlowState, content: InboundContent) -> FlowContext {
    let mut session = Session::new("5511988887777", Some("Maria".into()));
    session.state = state;
    FlowContext {
        session,
        content,
        message_id: "wamid.TEST".into(),
    }
}

fn unavailable() -> ApiError {
    ApiError::Status {
        status: 500,
        body: "fake failure".into(),
    }
}

#[derive(Default)]
pub(crate) struct FakeEnv {
    pub backend: Arc<FakeBackend>,
    pub analysis: Arc<FakeAnalysis>,
    pub billing: Arc<FakeBilling>,
    pub messaging: Arc<FakeMessaging>,
}

pub(crate) async fn services_with(env: &FakeEnv) -> Arc<FlowServices> {
    struct NoDirectory;
    #[async_trait]
    impl UserDirectory for NoDirectory {
        async fn lookup_by_address(&self, _address: &str) -> Result<Option<DirectoryEntry>> {
            Ok(None)
        }
    }

    let sessions = Arc::new(SessionManager::new(
        shared_memory_store(),
        Arc::new(NoDirectory),
        Duration::from_secs(60),
    ));
    Arc::new(FlowServices {
        backend: env.backend.clone(),
        analysis: env.analysis.clone(),
        billing: env.billing.clone(),
        messaging: env.messaging.clone(),
        sessions,
    })
}

#[derive(Default)]
pub(crate) struct FakeBackend {
    users: Mutex<Vec<User>>,
    pets: Mutex<Vec<Pet>>,
    records: Mutex<Vec<HealthRecord>>,
    subscription: Mutex<Option<SubscriptionInfo>>,
    consultation_seq: AtomicUsize,
    created_users: AtomicUsize,
    created_pets: AtomicUsize,
    fail_pets: AtomicBool,
    fail_create_pet: AtomicBool,
}

impl FakeBackend {
    pub fn add_pet(&self, pet: Pet) {
        self.pets.lock().unwrap().push(pet);
    }

    pub fn created_users(&self) -> usize {
        self.created_users.load(Ordering::SeqCst)
    }

    pub fn created_pets(&self) -> usize {
        self.created_pets.load(Ordering::SeqCst)
    }

    pub fn fail_pets(&self) {
        self.fail_pets.store(true, Ordering::SeqCst);
    }

    pub fn fail_create_pet(&self) {
        self.fail_create_pet.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl BackendApi for FakeBackend {
    async fn lookup_user_by_phone(&self, phone: &str) -> ApiResult<Option<User>> {
        Ok(self
            .users
            .lock()
            .unwrap()
            .iter()
            .find(|u| u.phone_number == phone)
            .cloned())
    }

    async fn create_user(&self, phone: &str, name: Option<&str>) -> ApiResult<User> {
        let n = self.created_users.fetch_add(1, Ordering::SeqCst) + 1;
        let user = User {
            id: format!("user-{n}"),
            phone_number: phone.into(),
            name: name.map(str::to_string),
        };
        self.users.lock().unwrap().push(user.clone());
        Ok(user)
    }

    async fn get_pets(&self, user_id: &str) -> ApiResult<Vec<Pet>> {
        if self.fail_pets.load(Ordering::SeqCst) {
            return Err(unavailable());
        }
        Ok(self
            .pets
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn create_pet(&self, user_id: &str, pet: &NewPet) -> ApiResult<Pet> {
        if self.fail_create_pet.load(Ordering::SeqCst) {
            return Err(unavailable());
        }
        let n = self.created_pets.fetch_add(1, Ordering::SeqCst) + 1;
        let pet = Pet {
            id: format!("pet-{n}"),
            user_id: user_id.into(),
            name: pet.name.clone(),
            species: pet.species,
            breed: pet.breed.clone(),
            birth_date: pet.birth_date.clone(),
            sex: pet.sex,
            weight: pet.weight,
            neutered: None,
        };
        self.pets.lock().unwrap().push(pet.clone());
        Ok(pet)
    }

    async fn get_pet(&self, pet_id: &str) -> ApiResult<Pet> {
        self.pets
            .lock()
            .unwrap()
            .iter()
            .find(|p| p.id == pet_id)
            .cloned()
            .ok_or(ApiError::NotFound)
    }

    async fn start_consultation(&self, consultation: &NewConsultation) -> ApiResult<Consultation> {
        let n = self.consultation_seq.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Consultation {
            id: format!("cons-{n}"),
            pet_id: consultation.pet_id.clone(),
            status: ConsultationStatus::Active,
            symptoms: Some(consultation.symptoms.clone()),
        })
    }

    async fn update_consultation(
        &self,
        consultation_id: &str,
        _update: &ConsultationUpdate,
    ) -> ApiResult<Consultation> {
        Ok(Consultation {
            id: consultation_id.into(),
            pet_id: "p1".into(),
            status: ConsultationStatus::Active,
            symptoms: None,
        })
    }

    async fn generate_prescription(&self, consultation_id: &str) -> ApiResult<String> {
        Ok(format!("https://files.petvet.ai/rx/{consultation_id}.pdf"))
    }

    async fn get_health_records(&self, pet_id: &str) -> ApiResult<Vec<HealthRecord>> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.pet_id == pet_id)
            .cloned()
            .collect())
    }

    async fn get_subscription(&self, _user_id: &str) -> ApiResult<Option<SubscriptionInfo>> {
        Ok(self.subscription.lock().unwrap().clone())
    }
}

#[derive(Default)]
pub(crate) struct FakeAnalysis {
    response: Mutex<Option<SymptomAnalysisResponse>>,
    last_request: Mutex<Option<SymptomAnalysisRequest>>,
    fail_next: AtomicBool,
}

impl FakeAnalysis {
    pub fn respond_with(&self, response: SymptomAnalysisResponse) {
        *self.response.lock().unwrap() = Some(response);
    }

    pub fn fail_next(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    pub fn last_request(&self) -> Option<SymptomAnalysisRequest> {
        self.last_request.lock().unwrap().clone()
    }
}

#[async_trait]
impl AnalysisApi for FakeAnalysis {
    async fn analyze_symptoms(
        &self,
        request: &SymptomAnalysisRequest,
    ) -> ApiResult<SymptomAnalysisResponse> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(unavailable());
        }
        *self.last_request.lock().unwrap() = Some(request.clone());
        self.response
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(unavailable)
    }

    async fn treatment_protocol(&self, _request: &TreatmentRequest) -> ApiResult<TreatmentPlan> {
        Ok(TreatmentPlan {
            medications: vec![],
            supportive_care: vec!["Hidratacao".into()],
            monitoring: vec![],
            follow_up: None,
        })
    }

    async fn analyze_image(
        &self,
        _request: &ImageAnalysisRequest,
    ) -> ApiResult<ImageAnalysisResponse> {
        Ok(ImageAnalysisResponse {
            findings: vec!["Sem alteracoes visiveis".into()],
            concerns: vec![],
            recommendations: vec![],
            urgency_level: UrgencyLevel::Low,
        })
    }
}

#[derive(Default)]
pub(crate) struct FakeBilling {
    outcome: Mutex<Option<SubscriptionOutcome>>,
    cancellations: AtomicUsize,
    fail_next: AtomicBool,
}

impl FakeBilling {
    pub fn respond_with_checkout(&self, url: &str) {
        *self.outcome.lock().unwrap() = Some(SubscriptionOutcome::CheckoutRequired {
            url: url.to_string(),
        });
    }

    pub fn respond_with_active(&self, subscription: SubscriptionInfo) {
        *self.outcome.lock().unwrap() = Some(SubscriptionOutcome::Activated(subscription));
    }

    pub fn fail_next(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    pub fn cancellations(&self) -> usize {
        self.cancellations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BillingApi for FakeBilling {
    async fn create_subscription(
        &self,
        _user_id: &str,
        plan: PlanId,
    ) -> ApiResult<SubscriptionOutcome> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(unavailable());
        }
        Ok(self.outcome.lock().unwrap().clone().unwrap_or_else(|| {
            SubscriptionOutcome::Activated(SubscriptionInfo {
                plan,
                status: pvm_core::SubscriptionStatus::Active,
                current_period_end: "2026-09-07".into(),
            })
        }))
    }

    async fn cancel_subscription(&self, _user_id: &str) -> ApiResult<()> {
        self.cancellations.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
pub(crate) struct FakeMessaging {
    sent: Mutex<Vec<String>>,
}

#[async_trait]
impl MessagingApi for FakeMessaging {
    async fn send_text(&self, _to: &str, text: &str) -> ApiResult<()> {
        self.sent.lock().unwrap().push(format!("text:{text}"));
        Ok(())
    }

    async fn send_interactive(
        &self,
        _to: &str,
        _interactive: &InteractiveMessage,
    ) -> ApiResult<()> {
        self.sent.lock().unwrap().push("interactive".into());
        Ok(())
    }

    async fn send_image(&self, _to: &str, url: &str, _caption: Option<&str>) -> ApiResult<()> {
        self.sent.lock().unwrap().push(format!("image:{url}"));
        Ok(())
    }

    async fn send_document(
        &self,
        _to: &str,
        url: &str,
        _filename: &str,
        _caption: Option<&str>,
    ) -> ApiResult<()> {
        self.sent.lock().unwrap().push(format!("document:{url}"));
        Ok(())
    }

    async fn send_template(&self, _to: &str, template: &TemplateMessage) -> ApiResult<()> {
        self.sent
            .lock()
            .unwrap()
            .push(format!("template:{}", template.name));
        Ok(())
    }

    async fn mark_as_read(&self, _message_id: &str) -> ApiResult<()> {
        Ok(())
    }

    async fn media_url(&self, media_id: &str) -> ApiResult<MediaLocation> {
        Ok(MediaLocation {
            url: format!("https://cdn.example/{media_id}"),
            mime_type: Some("image/jpeg".into()),
        })
    }
}
