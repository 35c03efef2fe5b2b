//! The flow engine and its four conversational state machines.
//!
//! A flow exposes a single `process` entry point; step dispatch is a private
//! match inside each flow. Flows never talk to the provider directly: they
//! return ordered [`pvm_core::OutboundMessage`]s and the next
//! [`pvm_core::FlowState`], and the worker persists/delivers both.

mod consultation;
mod context;
mod engine;
mod main_menu;
mod pet_registration;
mod subscription;

#[cfg(test)]
pub(crate) mod testkit;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use pvm_clients::{AnalysisApi, BackendApi, BillingApi, MessagingApi};
use pvm_core::FlowState;
use pvm_session::SessionManager;

pub use consultation::ConsultationFlow;
pub use context::{FlowContext, FlowOutcome, FlowResult};
pub use engine::FlowEngine;
pub use main_menu::MainMenuFlow;
pub use pet_registration::PetRegistrationFlow;
pub use subscription::SubscriptionFlow;

/// Collaborators shared by all flows.
pub struct FlowServices {
    pub backend: Arc<dyn BackendApi>,
    pub analysis: Arc<dyn AnalysisApi>,
    pub billing: Arc<dyn BillingApi>,
    pub messaging: Arc<dyn MessagingApi>,
    pub sessions: Arc<SessionManager>,
}

/// One conversational state machine.
#[async_trait]
pub trait Flow: Send + Sync {
    fn name(&self) -> &'static str;
    async fn process(&self, ctx: &FlowContext, services: &FlowServices) -> Result<FlowOutcome>;
}

/// Closed set of flows; resolution is by the state's own variant, so an
/// unknown flow name cannot occur past deserialization.
#[derive(Default)]
pub struct FlowRegistry {
    main_menu: MainMenuFlow,
    registration: PetRegistrationFlow,
    consultation: ConsultationFlow,
    subscription: SubscriptionFlow,
}

impl FlowRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn resolve(&self, state: &FlowState) -> &dyn Flow {
        match state {
            FlowState::MainMenu { .. } => &self.main_menu,
            FlowState::PetRegistration { .. } => &self.registration,
            FlowState::Consultation { .. } => &self.consultation,
            FlowState::Subscription { .. } => &self.subscription,
        }
    }
}
