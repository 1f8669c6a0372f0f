use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type IdentityId = u64;

/// Durable local record of a user who logged in through the identity provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Identity {
    pub id: IdentityId,
    /// Provider-side user id; unique across identities.
    pub external_id: String,
    pub display_name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub avatar: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
