//! Role lookups against the external membership service.
//!
//! `RoleAuthority` is the raw capability (list a group's roles, fetch one member's role ids).
//! `RoleGateway` wraps it with the policy callers rely on: an unconfigured gateway or an
//! unknown member answers "no", anything else that goes wrong is an error and must be treated
//! as a denial. Nothing is cached between calls.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::discord::{DiscordRest, RestError};
use crate::error::{AppError, AppResult};

#[derive(Debug, thiserror::Error)]
pub enum RoleAuthorityError {
    #[error("member {external_id} not found in group")]
    MemberNotFound { external_id: String },

    #[error(transparent)]
    Rest(#[from] RestError),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GroupRole {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Membership {
    #[serde(rename = "roles", default)]
    pub role_ids: Vec<String>,
}

#[async_trait]
pub trait RoleAuthority: Send + Sync {
    async fn list_roles(&self, group_id: &str) -> Result<Vec<GroupRole>, RoleAuthorityError>;
    async fn get_membership(&self, group_id: &str, external_id: &str) -> Result<Membership, RoleAuthorityError>;
}

/// Guild roles and guild members through the bot API.
pub struct DiscordRoleAuthority {
    rest: DiscordRest,
}

impl DiscordRoleAuthority {
    pub fn new(rest: DiscordRest) -> Self { Self { rest } }
}

#[async_trait]
impl RoleAuthority for DiscordRoleAuthority {
    async fn list_roles(&self, group_id: &str) -> Result<Vec<GroupRole>, RoleAuthorityError> {
        Ok(self.rest.get_json(&format!("/guilds/{}/roles", group_id)).await?)
    }

    async fn get_membership(&self, group_id: &str, external_id: &str) -> Result<Membership, RoleAuthorityError> {
        match self.rest.get_json(&format!("/guilds/{}/members/{}", group_id, external_id)).await {
            Ok(m) => Ok(m),
            Err(e) if e.is_not_found() => Err(RoleAuthorityError::MemberNotFound { external_id: external_id.to_string() }),
            Err(e) => Err(e.into()),
        }
    }
}

#[derive(Clone)]
pub struct RoleGateway {
    authority: Option<Arc<dyn RoleAuthority>>,
    group_id: String,
    timeout: Duration,
}

impl RoleGateway {
    pub fn new(authority: Arc<dyn RoleAuthority>, group_id: impl Into<String>, timeout: Duration) -> Self {
        Self { authority: Some(authority), group_id: group_id.into(), timeout }
    }

    /// A gateway that answers "no" to every question.
    pub fn unconfigured() -> Self {
        Self { authority: None, group_id: String::new(), timeout: Duration::from_secs(0) }
    }

    pub fn is_configured(&self) -> bool {
        self.authority.is_some() && !self.group_id.is_empty()
    }

    pub async fn has_role(&self, external_id: &str, role: &str) -> AppResult<bool> {
        let Some(authority) = self.authority.as_ref().filter(|_| self.is_configured()) else {
            return Ok(false);
        };
        match tokio::time::timeout(self.timeout, lookup(authority.as_ref(), &self.group_id, external_id, role)).await {
            Ok(Ok(found)) => Ok(found),
            Ok(Err(e)) => {
                warn!(role, error = %e, "role lookup failed");
                Err(AppError::external("role_authority_unavailable", format!("Failed to check role: {}", e)))
            }
            Err(_) => {
                warn!(role, timeout_ms = self.timeout.as_millis() as u64, "role lookup timed out");
                Err(AppError::external("role_authority_timeout", "Failed to check role: timed out"))
            }
        }
    }
}

async fn lookup(authority: &dyn RoleAuthority, group: &str, external_id: &str, role: &str) -> Result<bool, RoleAuthorityError> {
    let roles = authority.list_roles(group).await?;
    let Some(role_id) = roles.into_iter().find(|r| r.name == role).map(|r| r.id) else {
        debug!(role, "role not defined in group");
        return Ok(false);
    };
    match authority.get_membership(group, external_id).await {
        Ok(m) => Ok(m.role_ids.iter().any(|r| *r == role_id)),
        Err(RoleAuthorityError::MemberNotFound { .. }) => Ok(false),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed {
        roles: Vec<GroupRole>,
        member: Result<Vec<String>, u16>,
    }

    #[async_trait]
    impl RoleAuthority for Fixed {
        async fn list_roles(&self, _group_id: &str) -> Result<Vec<GroupRole>, RoleAuthorityError> {
            Ok(self.roles.clone())
        }

        async fn get_membership(&self, _group_id: &str, external_id: &str) -> Result<Membership, RoleAuthorityError> {
            match &self.member {
                Ok(ids) => Ok(Membership { role_ids: ids.clone() }),
                Err(404) => Err(RoleAuthorityError::MemberNotFound { external_id: external_id.into() }),
                Err(s) => Err(RestError::Status { status: *s, body: String::new() }.into()),
            }
        }
    }

    fn gateway(member: Result<Vec<String>, u16>) -> RoleGateway {
        let roles = vec![GroupRole { id: "10".into(), name: "g::t::orgs".into() }];
        RoleGateway::new(Arc::new(Fixed { roles, member }), "guild", Duration::from_secs(1))
    }

    #[tokio::test]
    async fn member_with_role_id_matches() {
        assert!(gateway(Ok(vec!["3".into(), "10".into()])).has_role("u", "g::t::orgs").await.unwrap());
        assert!(!gateway(Ok(vec!["3".into()])).has_role("u", "g::t::orgs").await.unwrap());
    }

    #[tokio::test]
    async fn unknown_role_and_unknown_member_are_negative() {
        assert!(!gateway(Ok(vec!["10".into()])).has_role("u", "missing").await.unwrap());
        assert!(!gateway(Err(404)).has_role("u", "g::t::orgs").await.unwrap());
    }

    #[tokio::test]
    async fn service_failure_is_external_error() {
        let err = gateway(Err(500)).has_role("u", "g::t::orgs").await.unwrap_err();
        assert!(err.is_external());
    }

    #[tokio::test]
    async fn unconfigured_gateway_says_no() {
        let g = RoleGateway::unconfigured();
        assert!(!g.is_configured());
        assert!(!g.has_role("u", "g::t::orgs").await.unwrap());
    }

    #[tokio::test]
    async fn blank_group_is_unconfigured_even_with_an_authority() {
        let roles = vec![GroupRole { id: "10".into(), name: "g::t::orgs".into() }];
        let g = RoleGateway::new(Arc::new(Fixed { roles, member: Err(500) }), "", Duration::from_secs(1));
        assert!(!g.is_configured());
        assert!(!g.has_role("u", "g::t::orgs").await.unwrap());
    }
}
