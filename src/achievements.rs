//! Achievements: organizer-defined badges backed by an external role, claimed with a secret
//! code or granted by an organizer.
//!
//! Grant ordering is external role grant first, local record second, so a recorded grant
//! always has its role. The duplicate check runs before the external call.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{AppError, AppResult};
use crate::identity::{AuthorizationPolicy, Elevated, Identity, IdentityId};
use crate::notifier::Notifier;
use crate::storage::SharedStore;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Achievement {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub image: String,
    pub code: String,
    pub external_role_id: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AchievementGrant {
    pub id: u64,
    pub achievement_id: u64,
    pub user_id: IdentityId,
    pub granted_by: IdentityId,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateAchievement {
    pub name: String,
    #[serde(default)]
    pub image: String,
    pub code: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GrantAchievement {
    pub code: String,
    #[serde(default)]
    pub user_id: Option<IdentityId>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GrantOutcome {
    pub achievement: Achievement,
    pub target: IdentityId,
    pub message: String,
}

#[derive(Clone)]
pub struct AchievementService {
    store: SharedStore,
    notifier: Arc<dyn Notifier>,
    policy: AuthorizationPolicy,
    role_prefix: String,
}

impl AchievementService {
    pub fn new(store: SharedStore, notifier: Arc<dyn Notifier>, policy: AuthorizationPolicy, role_prefix: impl Into<String>) -> Self {
        Self { store, notifier, policy, role_prefix: role_prefix.into() }
    }

    pub async fn create(&self, proof: &Elevated, req: CreateAchievement) -> AppResult<Achievement> {
        let name = req.name.trim();
        let code = req.code.trim();
        if name.is_empty() || code.is_empty() {
            return Err(AppError::bad_request("invalid_achievement", "name and code are required"));
        }
        if self.store.read(|t| t.achievement_by_code(code).is_some()) {
            return Err(AppError::conflict("achievement_code_taken", "an achievement with this code already exists"));
        }

        let role_name = format!("{}{}", self.role_prefix, name);
        let role_id = self.notifier.create_role(&role_name).await.map_err(|e| {
            warn!(role = %role_name, error = %e, "role creation failed");
            AppError::external("role_create_failed", format!("Failed to create role: {}", e))
        })?;

        let created = self.store.transaction(|t| {
            t.insert_achievement(Achievement {
                id: 0,
                name: name.to_string(),
                image: req.image.trim().to_string(),
                code: code.to_string(),
                external_role_id: role_id.clone(),
                created_at: Utc::now(),
            })
        })?;
        info!(achievement_id = created.id, user_id = proof.identity_id(), role_id = %created.external_role_id, "achievement created");
        Ok(created)
    }

    pub async fn grant(&self, actor: &Identity, req: GrantAchievement) -> AppResult<GrantOutcome> {
        let target_id = self.policy.grant_target(actor, req.user_id).await?;

        let (achievement, target) = self.store.read(|t| {
            let achievement = t
                .achievement_by_code(req.code.trim())
                .cloned()
                .ok_or_else(|| AppError::not_found("achievement_not_found", "Achievement not found or invalid code"))?;
            if t.grant(achievement.id, target_id).is_some() {
                return Err(AppError::conflict("already_granted", "Achievement already granted to this user"));
            }
            let target = t
                .identity(target_id)
                .cloned()
                .ok_or_else(|| AppError::not_found("target_not_found", "Target user not found"))?;
            Ok((achievement, target))
        })?;

        self.notifier
            .grant_role(&target.external_id, &achievement.external_role_id)
            .await
            .map_err(|e| {
                warn!(user_id = target.id, achievement_id = achievement.id, error = %e, "role grant failed");
                AppError::external("role_grant_failed", format!("Failed to grant role: {}", e))
            })?;

        // A concurrent grant for the same pair loses here with Conflict.
        self.store.transaction(|t| {
            t.insert_grant(AchievementGrant {
                id: 0,
                achievement_id: achievement.id,
                user_id: target.id,
                granted_by: actor.id,
                created_at: Utc::now(),
            })
        })?;
        info!(achievement_id = achievement.id, user_id = target.id, granted_by = actor.id, "achievement granted");

        let show_grantor = target.id != actor.id;
        if let Err(e) = self.notifier.notify_achievement(&target, &achievement, actor, show_grantor).await {
            warn!(achievement_id = achievement.id, error = %e, "achievement notification failed");
        }

        Ok(GrantOutcome {
            message: format!("Achievement '{}' granted to {}", achievement.name, target.display_name),
            target: target.id,
            achievement,
        })
    }

    /// Achievements granted to `user`, in grant order.
    pub fn list_for(&self, user: IdentityId) -> Vec<Achievement> {
        self.store.read(|t| {
            t.grants_for(user)
                .iter()
                .filter_map(|g| t.achievement(g.achievement_id).cloned())
                .collect()
        })
    }
}
