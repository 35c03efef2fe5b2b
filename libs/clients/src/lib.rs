//! HTTP collaborators.
//!
//! Each collaborator is a trait (so flows and the worker are testable with
//! in-memory fakes) plus one `reqwest`-backed implementation that owns the
//! wire format. Nothing above this crate knows provider URLs or payload
//! shapes.

mod analysis;
mod backend;
mod billing;
mod error;
mod whatsapp;

pub use analysis::{
    AnalysisApi, HttpAnalysisClient, ImageAnalysisRequest, ImageAnalysisResponse, PetInfo,
    SymptomAnalysisRequest, SymptomAnalysisResponse, TreatmentRequest,
};
pub use backend::{BackendApi, ConsultationUpdate, HttpBackendClient, NewConsultation};
pub use billing::{BillingApi, HttpBillingClient, SubscriptionOutcome};
pub use error::{ApiError, ApiResult};
pub use whatsapp::{MediaLocation, MessagingApi, WhatsAppClient};
