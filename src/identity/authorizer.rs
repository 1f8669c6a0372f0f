use super::principal::{Identity, IdentityId};
use super::role_authority::RoleGateway;
use crate::error::{AppError, AppResult};
use crate::storage::SharedStore;

/// Proof that an identity passed the organizer check. Only `AuthorizationPolicy` can mint one,
/// so elevated service calls take it as a parameter instead of re-checking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Elevated {
    identity_id: IdentityId,
}

impl Elevated {
    pub fn identity_id(&self) -> IdentityId { self.identity_id }
}

/// Per-operation access gates. Self-service operations only need a verified identity;
/// elevated ones go through the organizer role.
#[derive(Clone)]
pub struct AuthorizationPolicy {
    store: SharedStore,
    roles: RoleGateway,
    organizer_role: String,
}

impl AuthorizationPolicy {
    pub fn new(store: SharedStore, roles: RoleGateway, organizer_role: impl Into<String>) -> Self {
        Self { store, roles, organizer_role: organizer_role.into() }
    }

    pub fn roles(&self) -> &RoleGateway { &self.roles }

    /// Load the identity behind a verified credential.
    pub fn identity(&self, id: IdentityId) -> AppResult<Identity> {
        self.store
            .read(|t| t.identity(id).cloned())
            .ok_or_else(|| AppError::not_found("user_not_found", "User not found"))
    }

    pub async fn require_organizer(&self, actor: &Identity) -> AppResult<Elevated> {
        if self.roles.has_role(&actor.external_id, &self.organizer_role).await? {
            Ok(Elevated { identity_id: actor.id })
        } else {
            tracing::info!(user_id = actor.id, role = %self.organizer_role, "elevated operation denied");
            Err(AppError::forbidden(
                "missing_role",
                format!("Access denied: missing {} role", self.organizer_role),
            ))
        }
    }

    /// Resolve who an achievement grant targets. Granting to oneself (no target, or the
    /// actor's own id) needs no role; any other target requires the organizer role.
    pub async fn grant_target(&self, actor: &Identity, requested: Option<IdentityId>) -> AppResult<IdentityId> {
        match requested {
            Some(target) if target != 0 && target != actor.id => {
                self.require_organizer(actor).await.map_err(|e| {
                    if e.is_forbidden() {
                        AppError::forbidden("missing_role", "Access denied: only organizers can grant to others")
                    } else {
                        e
                    }
                })?;
                Ok(target)
            }
            _ => Ok(actor.id),
        }
    }
}
