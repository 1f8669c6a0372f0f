//! Shared fixtures: in-process stand-ins for the external collaborators.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use parking_lot::Mutex;

use tripgate::achievements::Achievement;
use tripgate::identity::{
    ExternalProfile, GroupRole, Identity, IdentityProvider, Membership, ProviderError, RoleAuthority, RoleAuthorityError,
};
use tripgate::notifier::{Notifier, NotifierError};
use tripgate::registration::{Registration, RegistrationFields, RegistrationRequest};
use tripgate::storage::SharedStore;

pub const ORGS: &str = "g::t::orgs";
pub const EVENT: &str = "g::t::7.0.0";

/// Records every call; role operations can be made to fail.
#[derive(Default)]
pub struct RecordingNotifier {
    pub registrations: AtomicUsize,
    pub achievements: AtomicUsize,
    pub role_grants: Mutex<Vec<(String, String)>>,
    pub created_roles: Mutex<Vec<String>>,
    pub fail_roles: bool,
    pub fail_messages: bool,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify_registration(&self, _user: &Identity, _registration: &Registration) -> Result<(), NotifierError> {
        self.registrations.fetch_add(1, Ordering::SeqCst);
        if self.fail_messages { return Err(NotifierError::Disabled); }
        Ok(())
    }

    async fn notify_achievement(&self, _: &Identity, _: &Achievement, _: &Identity, _: bool) -> Result<(), NotifierError> {
        self.achievements.fetch_add(1, Ordering::SeqCst);
        if self.fail_messages { return Err(NotifierError::Disabled); }
        Ok(())
    }

    async fn create_role(&self, name: &str) -> Result<String, NotifierError> {
        if self.fail_roles { return Err(NotifierError::Disabled); }
        let mut roles = self.created_roles.lock();
        roles.push(name.to_string());
        Ok(format!("role-{}", roles.len()))
    }

    async fn grant_role(&self, external_id: &str, role_id: &str) -> Result<(), NotifierError> {
        if self.fail_roles { return Err(NotifierError::Disabled); }
        self.role_grants.lock().push((external_id.to_string(), role_id.to_string()));
        Ok(())
    }
}

/// Role authority backed by a map of external id -> role names. `fail` simulates an outage.
#[derive(Default)]
pub struct StaticRoles {
    pub members: HashMap<String, Vec<String>>,
    pub fail: bool,
}

impl StaticRoles {
    pub fn with_member(mut self, external_id: &str, roles: &[&str]) -> Self {
        self.members.insert(external_id.to_string(), roles.iter().map(|r| r.to_string()).collect());
        self
    }

    fn catalog() -> Vec<GroupRole> {
        vec![
            GroupRole { id: "1".into(), name: ORGS.into() },
            GroupRole { id: "2".into(), name: format!("{}::paid", EVENT) },
        ]
    }
}

#[async_trait]
impl RoleAuthority for StaticRoles {
    async fn list_roles(&self, _group_id: &str) -> Result<Vec<GroupRole>, RoleAuthorityError> {
        if self.fail {
            return Err(tripgate::discord::RestError::Transport { message: "connection refused".into() }.into());
        }
        Ok(Self::catalog())
    }

    async fn get_membership(&self, _group_id: &str, external_id: &str) -> Result<Membership, RoleAuthorityError> {
        let Some(names) = self.members.get(external_id) else {
            return Err(RoleAuthorityError::MemberNotFound { external_id: external_id.into() });
        };
        let role_ids = Self::catalog().into_iter().filter(|r| names.contains(&r.name)).map(|r| r.id).collect();
        Ok(Membership { role_ids })
    }
}

/// Identity provider that accepts any code of the form `code-<external id>`.
pub struct StaticProvider {
    pub groups: Vec<String>,
}

#[async_trait]
impl IdentityProvider for StaticProvider {
    fn authorize_url(&self, state: &str) -> String {
        format!("https://provider.test/authorize?state={}", state)
    }

    async fn exchange_code(&self, code: &str) -> Result<ExternalProfile, ProviderError> {
        let Some(ext) = code.strip_prefix("code-") else {
            return Err(ProviderError::Exchange { message: "invalid_grant".into() });
        };
        Ok(ExternalProfile {
            external_id: ext.to_string(),
            display_name: format!("user-{}", ext),
            email: format!("{}@example.test", ext),
            avatar: String::new(),
            groups: self.groups.clone(),
        })
    }
}

pub fn add_identity(store: &SharedStore, external_id: &str) -> Identity {
    let profile = ExternalProfile {
        external_id: external_id.into(),
        display_name: format!("user-{}", external_id),
        ..Default::default()
    };
    store.transaction(|t| Ok(t.upsert_identity(&profile, Utc::now()))).expect("identity insert")
}

pub fn request(children: u32, note: &str) -> RegistrationRequest {
    RegistrationRequest {
        event: EVENT.into(),
        fields: RegistrationFields {
            arrival_date: Utc.with_ymd_and_hms(2026, 7, 1, 12, 0, 0).unwrap(),
            departure_date: Utc.with_ymd_and_hms(2026, 7, 5, 12, 0, 0).unwrap(),
            food_restrictions: String::new(),
            children_count: children,
            cancelled: false,
            note: note.into(),
        },
    }
}

pub fn recording() -> Arc<RecordingNotifier> {
    Arc::new(RecordingNotifier::default())
}
