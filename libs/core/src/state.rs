use serde::{Deserialize, Serialize};

use crate::domain::{Diagnosis, PetRef, PlanId, Sex, Species};

/// Conversation state, one variant per flow.
///
/// The active flow and its step-scoped working data travel together: switching
/// flows necessarily replaces the whole value, so stale step data cannot leak
/// across flows. The terminal state of every flow is [`FlowState::main_menu`].
///
/// ```
/// use pvm_core::FlowState;
///
/// let state = FlowState::default();
/// assert_eq!(state.flow_name(), "main-menu");
/// assert_eq!(state.step_name(), None);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "flow", rename_all = "kebab-case")]
pub enum FlowState {
    MainMenu {
        /// Pets cached by the last list response, for number/name matching.
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        pets: Vec<PetRef>,
    },
    PetRegistration {
        step: RegistrationStep,
        #[serde(default)]
        draft: PetDraft,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        return_to: Option<ReturnTarget>,
    },
    Consultation {
        step: ConsultationStep,
        #[serde(default)]
        data: ConsultationData,
    },
    Subscription {
        step: SubscriptionStep,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        selected_plan: Option<PlanId>,
    },
}

impl FlowState {
    /// The clean terminal state: main menu, no cached data.
    pub fn main_menu() -> Self {
        FlowState::MainMenu { pets: Vec::new() }
    }

    pub fn flow_name(&self) -> &'static str {
        match self {
            FlowState::MainMenu { .. } => "main-menu",
            FlowState::PetRegistration { .. } => "pet-registration",
            FlowState::Consultation { .. } => "consultation",
            FlowState::Subscription { .. } => "subscription",
        }
    }

    /// Step identifier for logging; `None` for the step-less main menu.
    pub fn step_name(&self) -> Option<&'static str> {
        match self {
            FlowState::MainMenu { .. } => None,
            FlowState::PetRegistration { step, .. } => Some(step.as_str()),
            FlowState::Consultation { step, .. } => Some(step.as_str()),
            FlowState::Subscription { step, .. } => Some(step.as_str()),
        }
    }
}

impl Default for FlowState {
    fn default() -> Self {
        FlowState::main_menu()
    }
}

/// Explicit "hand control back to flow X with seed data Y" transition, set
/// when a flow detours through pet registration and wants to resume after.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "flow", rename_all = "kebab-case")]
pub enum ReturnTarget {
    Consultation,
    Subscription { plan: PlanId },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum RegistrationStep {
    Start,
    Name,
    Species,
    Breed,
    Age,
    Sex,
    Weight,
    Confirm,
}

impl RegistrationStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            RegistrationStep::Start => "start",
            RegistrationStep::Name => "name",
            RegistrationStep::Species => "species",
            RegistrationStep::Breed => "breed",
            RegistrationStep::Age => "age",
            RegistrationStep::Sex => "sex",
            RegistrationStep::Weight => "weight",
            RegistrationStep::Confirm => "confirm",
        }
    }
}

/// Answers collected by the registration wizard, one field per step.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PetDraft {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub species: Option<Species>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub breed: Option<String>,
    /// ISO date derived from a relative age expression, if the user knew it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub birth_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sex: Option<Sex>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ConsultationStep {
    Start,
    SelectPet,
    DescribeSymptoms,
    ClarifyingQuestions,
    ShowDiagnosis,
    Treatment,
    Prescription,
}

impl ConsultationStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConsultationStep::Start => "start",
            ConsultationStep::SelectPet => "select-pet",
            ConsultationStep::DescribeSymptoms => "describe-symptoms",
            ConsultationStep::ClarifyingQuestions => "clarifying-questions",
            ConsultationStep::ShowDiagnosis => "show-diagnosis",
            ConsultationStep::Treatment => "treatment",
            ConsultationStep::Prescription => "prescription",
        }
    }
}

/// Working data accumulated across consultation steps.
///
/// The next clarifying question is always `pending_questions[answers.len()]`;
/// once every question has an answer the flow re-invokes analysis with the
/// full answer list attached.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConsultationData {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pets: Vec<PetRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pet_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pet_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symptoms: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consultation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pending_questions: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub answers: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnosis: Option<Diagnosis>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum SubscriptionStep {
    View,
    SelectPlan,
    Confirm,
    /// Entered when registration resumes a stashed plan; processes it
    /// immediately instead of waiting for another confirmation.
    Activate,
    CancelConfirm,
}

impl SubscriptionStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStep::View => "view",
            SubscriptionStep::SelectPlan => "select-plan",
            SubscriptionStep::Confirm => "confirm",
            SubscriptionStep::Activate => "activate",
            SubscriptionStep::CancelConfirm => "cancel-confirm",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_state_is_terminal_main_menu() {
        let state = FlowState::default();
        assert_eq!(state, FlowState::main_menu());
        assert_eq!(state.flow_name(), "main-menu");
    }

    #[test]
    fn state_roundtrips_with_flow_tag() {
        let state = FlowState::Consultation {
            step: ConsultationStep::DescribeSymptoms,
            data: ConsultationData {
                pet_id: Some("p1".into()),
                pet_name: Some("Rex".into()),
                ..Default::default()
            },
        };
        let raw = serde_json::to_value(&state).unwrap();
        assert_eq!(raw["flow"], "consultation");
        assert_eq!(raw["step"], "describe-symptoms");
        let parsed: FlowState = serde_json::from_value(raw).unwrap();
        assert_eq!(parsed, state);
    }

    #[test]
    fn return_target_carries_seed_data() {
        let target = ReturnTarget::Subscription {
            plan: PlanId::Family,
        };
        let raw = serde_json::to_string(&target).unwrap();
        let parsed: ReturnTarget = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed, target);
    }
}
