use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::achievements::{Achievement, AchievementService};
use crate::error::AppResult;
use crate::identity::{AuthorizationPolicy, IdentityId};
use crate::registration::{Registration, RegistrationLedger};

const PAID_ROLE_SUFFIX: &str = "::paid";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Profile {
    pub id: IdentityId,
    pub username: String,
    pub email: String,
    pub avatar: String,
    /// Paid status per enabled event.
    pub paid: BTreeMap<String, bool>,
    pub registrations: Vec<Registration>,
    pub achievements: Vec<Achievement>,
}

/// Backs `GET /me`.
#[derive(Clone)]
pub struct ProfileService {
    policy: AuthorizationPolicy,
    ledger: RegistrationLedger,
    achievements: AchievementService,
    enabled_events: Vec<String>,
}

impl ProfileService {
    pub fn new(
        policy: AuthorizationPolicy,
        ledger: RegistrationLedger,
        achievements: AchievementService,
        enabled_events: Vec<String>,
    ) -> Self {
        Self { policy, ledger, achievements, enabled_events }
    }

    pub async fn me(&self, actor: IdentityId) -> AppResult<Profile> {
        let identity = self.policy.identity(actor)?;
        let mut paid = BTreeMap::new();
        for event in &self.enabled_events {
            let role = format!("{}{}", event, PAID_ROLE_SUFFIX);
            // Display only; a lookup failure shows as unpaid and grants nothing.
            let has = match self.policy.roles().has_role(&identity.external_id, &role).await {
                Ok(b) => b,
                Err(e) => {
                    warn!(user_id = actor, role = %role, error = %e, "paid role lookup failed");
                    false
                }
            };
            paid.insert(event.clone(), has);
        }
        Ok(Profile {
            id: identity.id,
            username: identity.display_name,
            email: identity.email,
            avatar: identity.avatar,
            paid,
            registrations: self.ledger.registrations_for(actor),
            achievements: self.achievements.list_for(actor),
        })
    }
}
