use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::identity::IdentityId;

/// The submitted field set. Shared by the current row and every history snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RegistrationFields {
    pub arrival_date: DateTime<Utc>,
    pub departure_date: DateTime<Utc>,
    #[serde(default)]
    pub food_restrictions: String,
    #[serde(default)]
    pub children_count: u32,
    #[serde(default)]
    pub cancelled: bool,
    #[serde(default)]
    pub note: String,
}

/// Current state for one (identity, event) pair.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Registration {
    pub id: u64,
    pub user_id: IdentityId,
    pub event: String,
    #[serde(flatten)]
    pub fields: RegistrationFields,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Registration {
    pub fn is_cancelled(&self) -> bool { self.fields.cancelled }
}

/// Immutable snapshot appended with every registration write.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HistoryEntry {
    pub id: u64,
    pub registration_id: u64,
    pub user_id: IdentityId,
    pub event: String,
    pub fields: RegistrationFields,
    pub created_at: DateTime<Utc>,
}

/// Body of a registration submission.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RegistrationRequest {
    pub event: String,
    #[serde(flatten)]
    pub fields: RegistrationFields,
}

/// A registration together with its owner's display name, for organizer listings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RegistrationWithOwner {
    #[serde(flatten)]
    pub registration: Registration,
    pub display_name: String,
}
