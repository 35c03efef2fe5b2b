use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use pvm_core::{Diagnosis, Sex, Species, TreatmentPlan, UrgencyLevel};

use crate::error::{ApiError, ApiResult};

/// AI diagnosis service. These calls can be slow; the HTTP client is built
/// with a longer timeout than the other collaborators.
#[async_trait]
pub trait AnalysisApi: Send + Sync {
    /// Returns either clarifying questions or a diagnosis.
    async fn analyze_symptoms(
        &self,
        request: &SymptomAnalysisRequest,
    ) -> ApiResult<SymptomAnalysisResponse>;
    async fn treatment_protocol(&self, request: &TreatmentRequest) -> ApiResult<TreatmentPlan>;
    async fn analyze_image(
        &self,
        request: &ImageAnalysisRequest,
    ) -> ApiResult<ImageAnalysisResponse>;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PetInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub species: Option<Species>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub breed: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sex: Option<Sex>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub neutered: Option<bool>,
}

impl From<&pvm_core::Pet> for PetInfo {
    fn from(pet: &pvm_core::Pet) -> Self {
        PetInfo {
            species: Some(pet.species),
            breed: pet.breed.clone(),
            weight: pet.weight,
            sex: pet.sex,
            neutered: pet.neutered,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymptomAnalysisRequest {
    pub symptoms: String,
    pub pet_id: String,
    pub consultation_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pet_info: Option<PetInfo>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub clarifying_answers: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymptomAnalysisResponse {
    pub needs_clarification: bool,
    #[serde(default)]
    pub clarifying_questions: Vec<String>,
    #[serde(default)]
    pub diagnosis: Option<Diagnosis>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TreatmentRequest {
    pub consultation_id: String,
    pub diagnosis: Diagnosis,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pet_info: Option<PetInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageAnalysisRequest {
    pub image_url: String,
    pub pet_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consultation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageAnalysisResponse {
    #[serde(default)]
    pub findings: Vec<String>,
    #[serde(default)]
    pub concerns: Vec<String>,
    #[serde(default)]
    pub recommendations: Vec<String>,
    pub urgency_level: UrgencyLevel,
}

pub struct HttpAnalysisClient {
    http: reqwest::Client,
    base_url: String,
}

impl HttpAnalysisClient {
    pub fn new(base_url: impl Into<String>, http: reqwest::Client) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

#[async_trait]
impl AnalysisApi for HttpAnalysisClient {
    async fn analyze_symptoms(
        &self,
        request: &SymptomAnalysisRequest,
    ) -> ApiResult<SymptomAnalysisResponse> {
        let response = self
            .http
            .post(self.url("/api/v1/diagnosis/analyze"))
            .json(request)
            .send()
            .await?;
        let parsed: SymptomAnalysisResponse = ApiError::check(response).await?.json().await?;
        tracing::info!(
            consultation_id = %request.consultation_id,
            needs_clarification = parsed.needs_clarification,
            has_diagnosis = parsed.diagnosis.is_some(),
            "symptom analysis completed"
        );
        Ok(parsed)
    }

    async fn treatment_protocol(&self, request: &TreatmentRequest) -> ApiResult<TreatmentPlan> {
        let response = self
            .http
            .post(self.url("/api/v1/diagnosis/treatment"))
            .json(request)
            .send()
            .await?;
        let plan: TreatmentPlan = ApiError::check(response).await?.json().await?;
        tracing::info!(
            consultation_id = %request.consultation_id,
            medications = plan.medications.len(),
            "treatment protocol generated"
        );
        Ok(plan)
    }

    async fn analyze_image(
        &self,
        request: &ImageAnalysisRequest,
    ) -> ApiResult<ImageAnalysisResponse> {
        let response = self
            .http
            .post(self.url("/api/v1/diagnosis/image"))
            .json(request)
            .send()
            .await?;
        Ok(ApiError::check(response).await?.json().await?)
    }
}
