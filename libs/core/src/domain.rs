use serde::{Deserialize, Serialize};

/// Backend user record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub phone_number: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Species {
    Dog,
    Cat,
    Bird,
    Exotic,
}

impl Species {
    pub fn emoji(&self) -> &'static str {
        match self {
            Species::Dog => "\u{1F415}",
            Species::Cat => "\u{1F408}",
            Species::Bird => "\u{1F426}",
            Species::Exotic => "\u{1F98E}",
        }
    }

    pub fn label_pt(&self) -> &'static str {
        match self {
            Species::Dog => "Cachorro",
            Species::Cat => "Gato",
            Species::Bird => "Ave",
            Species::Exotic => "Exotico",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Sex {
    Male,
    Female,
}

impl Sex {
    pub fn label_pt(&self) -> &'static str {
        match self {
            Sex::Male => "Macho",
            Sex::Female => "Femea",
        }
    }
}

/// Backend pet record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Pet {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub species: Species,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub breed: Option<String>,
    /// ISO date (`YYYY-MM-DD`) as the backend ships it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub birth_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sex: Option<Sex>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub neutered: Option<bool>,
}

/// Creation payload for a pet record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NewPet {
    pub name: String,
    pub species: Species,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub breed: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub birth_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sex: Option<Sex>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
}

/// Slim pet reference cached in flow state for number/name matching.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PetRef {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub species: Option<Species>,
}

impl From<&Pet> for PetRef {
    fn from(pet: &Pet) -> Self {
        PetRef {
            id: pet.id.clone(),
            name: pet.name.clone(),
            species: Some(pet.species),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Consultation {
    pub id: String,
    pub pet_id: String,
    pub status: ConsultationStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symptoms: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ConsultationStatus {
    Active,
    Completed,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Diagnosis {
    pub primary: String,
    pub differentials: Vec<Differential>,
    pub urgency_level: UrgencyLevel,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Differential {
    pub condition: String,
    /// Percent probability, 0..=100.
    pub probability: u8,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum UrgencyLevel {
    Low,
    Medium,
    High,
    Emergency,
}

impl UrgencyLevel {
    pub fn emoji(&self) -> &'static str {
        match self {
            UrgencyLevel::Low => "\u{1F7E2}",
            UrgencyLevel::Medium => "\u{1F7E1}",
            UrgencyLevel::High => "\u{1F7E0}",
            UrgencyLevel::Emergency => "\u{1F534}",
        }
    }

    pub fn label_pt(&self) -> &'static str {
        match self {
            UrgencyLevel::Low => "BAIXO",
            UrgencyLevel::Medium => "MEDIO",
            UrgencyLevel::High => "ALTO",
            UrgencyLevel::Emergency => "EMERGENCIA",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TreatmentPlan {
    pub medications: Vec<Medication>,
    pub supportive_care: Vec<String>,
    #[serde(default)]
    pub monitoring: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub follow_up: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Medication {
    pub name: String,
    pub dosage: String,
    pub route: String,
    pub frequency: String,
    pub duration: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HealthRecord {
    pub id: String,
    pub pet_id: String,
    pub title: String,
    /// ISO date of the record.
    pub date: String,
}

/// Subscription plans offered over the bot.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum PlanId {
    Basic,
    Family,
    Premium,
}

impl PlanId {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanId::Basic => "basic",
            PlanId::Family => "family",
            PlanId::Premium => "premium",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionInfo {
    pub plan: PlanId,
    pub status: SubscriptionStatus,
    /// ISO date the current period ends.
    pub current_period_end: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionStatus {
    Active,
    PastDue,
    Cancelled,
}
