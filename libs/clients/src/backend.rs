use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use pvm_core::{
    Consultation, ConsultationStatus, Diagnosis, HealthRecord, NewPet, Pet, SubscriptionInfo,
    TreatmentPlan, UrgencyLevel, User,
};

use crate::error::{ApiError, ApiResult};

/// Domain persistence API (users, pets, consultations, records).
#[async_trait]
pub trait BackendApi: Send + Sync {
    async fn lookup_user_by_phone(&self, phone: &str) -> ApiResult<Option<User>>;
    async fn create_user(&self, phone: &str, name: Option<&str>) -> ApiResult<User>;
    async fn get_pets(&self, user_id: &str) -> ApiResult<Vec<Pet>>;
    async fn create_pet(&self, user_id: &str, pet: &NewPet) -> ApiResult<Pet>;
    async fn get_pet(&self, pet_id: &str) -> ApiResult<Pet>;
    async fn start_consultation(&self, consultation: &NewConsultation) -> ApiResult<Consultation>;
    async fn update_consultation(
        &self,
        consultation_id: &str,
        update: &ConsultationUpdate,
    ) -> ApiResult<Consultation>;
    /// Returns the URL of the generated prescription document.
    async fn generate_prescription(&self, consultation_id: &str) -> ApiResult<String>;
    async fn get_health_records(&self, pet_id: &str) -> ApiResult<Vec<HealthRecord>>;
    async fn get_subscription(&self, user_id: &str) -> ApiResult<Option<SubscriptionInfo>>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewConsultation {
    pub pet_id: String,
    pub symptoms: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsultationUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnosis: Option<Diagnosis>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub urgency_level: Option<UrgencyLevel>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub treatment: Option<TreatmentPlan>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<ConsultationStatus>,
}

pub struct HttpBackendClient {
    http: reqwest::Client,
    base_url: String,
}

impl HttpBackendClient {
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

#[derive(Deserialize)]
struct PrescriptionResponse {
    url: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateUserRequest<'a> {
    phone_number: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<&'a str>,
}

#[async_trait]
impl BackendApi for HttpBackendClient {
    async fn lookup_user_by_phone(&self, phone: &str) -> ApiResult<Option<User>> {
        let response = self
            .http
            .get(self.url(&format!("/api/v1/users/by-phone/{phone}")))
            .send()
            .await?;
        match ApiError::check(response).await {
            Ok(response) => Ok(Some(response.json().await?)),
            Err(ApiError::NotFound) => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn create_user(&self, phone: &str, name: Option<&str>) -> ApiResult<User> {
        let response = self
            .http
            .post(self.url("/api/v1/users"))
            .json(&CreateUserRequest {
                phone_number: phone,
                name,
            })
            .send()
            .await?;
        Ok(ApiError::check(response).await?.json().await?)
    }

    async fn get_pets(&self, user_id: &str) -> ApiResult<Vec<Pet>> {
        let response = self
            .http
            .get(self.url(&format!("/api/v1/users/{user_id}/pets")))
            .send()
            .await?;
        Ok(ApiError::check(response).await?.json().await?)
    }

    async fn create_pet(&self, user_id: &str, pet: &NewPet) -> ApiResult<Pet> {
        let response = self
            .http
            .post(self.url(&format!("/api/v1/users/{user_id}/pets")))
            .json(pet)
            .send()
            .await?;
        Ok(ApiError::check(response).await?.json().await?)
    }

    async fn get_pet(&self, pet_id: &str) -> ApiResult<Pet> {
        let response = self
            .http
            .get(self.url(&format!("/api/v1/pets/{pet_id}")))
            .send()
            .await?;
        Ok(ApiError::check(response).await?.json().await?)
    }

    async fn start_consultation(&self, consultation: &NewConsultation) -> ApiResult<Consultation> {
        let response = self
            .http
            .post(self.url("/api/v1/consultations"))
            .json(consultation)
            .send()
            .await?;
        Ok(ApiError::check(response).await?.json().await?)
    }

    async fn update_consultation(
        &self,
        consultation_id: &str,
        update: &ConsultationUpdate,
    ) -> ApiResult<Consultation> {
        let response = self
            .http
            .patch(self.url(&format!("/api/v1/consultations/{consultation_id}")))
            .json(update)
            .send()
            .await?;
        Ok(ApiError::check(response).await?.json().await?)
    }

    async fn generate_prescription(&self, consultation_id: &str) -> ApiResult<String> {
        let response = self
            .http
            .post(self.url(&format!(
                "/api/v1/consultations/{consultation_id}/prescription"
            )))
            .send()
            .await?;
        let parsed: PrescriptionResponse = ApiError::check(response).await?.json().await?;
        Ok(parsed.url)
    }

    async fn get_health_records(&self, pet_id: &str) -> ApiResult<Vec<HealthRecord>> {
        let response = self
            .http
            .get(self.url(&format!("/api/v1/pets/{pet_id}/records")))
            .send()
            .await?;
        Ok(ApiError::check(response).await?.json().await?)
    }

    async fn get_subscription(&self, user_id: &str) -> ApiResult<Option<SubscriptionInfo>> {
        let response = self
            .http
            .get(self.url(&format!("/api/v1/users/{user_id}/subscription")))
            .send()
            .await?;
        match ApiError::check(response).await {
            Ok(response) => Ok(Some(response.json().await?)),
            Err(ApiError::NotFound) => Ok(None),
            Err(err) => Err(err),
        }
    }
}
