//! Single entry point that turns a presented credential into an identity id.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use super::principal::IdentityId;
use super::session::{IssuedToken, SessionIssuer};
use crate::error::{AppError, AppResult};
use crate::storage::SharedStore;

/// A credential as found on the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credential {
    SessionToken(String),
    ApiKey(String),
}

impl Credential {
    /// Pick the credential to verify. An API key header wins over the session cookie; blank
    /// values count as absent.
    pub fn from_presentation(api_key: Option<&str>, cookie: Option<&str>) -> Option<Credential> {
        let present = |v: Option<&str>| v.map(str::trim).filter(|s| !s.is_empty()).map(str::to_string);
        if let Some(k) = present(api_key) {
            return Some(Credential::ApiKey(k));
        }
        present(cookie).map(Credential::SessionToken)
    }

    pub fn kind(&self) -> CredentialKind {
        match self {
            Credential::SessionToken(_) => CredentialKind::Session,
            Credential::ApiKey(_) => CredentialKind::ApiKey,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialKind {
    Session,
    ApiKey,
}

#[derive(Debug, Clone)]
pub struct Verified {
    pub identity_id: IdentityId,
    pub kind: CredentialKind,
    /// Set when the session was past half its window and a fresh token was minted.
    pub renewed: Option<IssuedToken>,
}

#[derive(Clone)]
pub struct CredentialVerifier {
    store: SharedStore,
    sessions: Arc<SessionIssuer>,
}

impl CredentialVerifier {
    pub fn new(store: SharedStore, sessions: Arc<SessionIssuer>) -> Self {
        Self { store, sessions }
    }

    pub fn verify_presented(&self, api_key: Option<&str>, cookie: Option<&str>) -> AppResult<Verified> {
        match Credential::from_presentation(api_key, cookie) {
            Some(c) => self.verify(&c),
            None => Err(AppError::unauthorized("missing_credential", "Unauthorized: No credential found")),
        }
    }

    pub fn verify(&self, credential: &Credential) -> AppResult<Verified> {
        self.verify_at(credential, Utc::now())
    }

    pub fn verify_at(&self, credential: &Credential, now: DateTime<Utc>) -> AppResult<Verified> {
        match credential {
            Credential::ApiKey(key) => self.verify_api_key(key, now),
            Credential::SessionToken(token) => self.verify_session(token, now),
        }
    }

    fn verify_api_key(&self, key: &str, now: DateTime<Utc>) -> AppResult<Verified> {
        let owner = self.store.transaction(|t| {
            let found = t
                .api_key_by_value(key)
                .cloned()
                .ok_or_else(|| AppError::unauthorized("invalid_api_key", "Unauthorized: Invalid API key"))?;
            if found.is_expired_at(now) {
                return Err(AppError::unauthorized("api_key_expired", "Unauthorized: API key expired"));
            }
            if t.identity(found.owner_id).is_none() {
                warn!(key_id = found.id, user_id = found.owner_id, "api key owner no longer exists");
                return Err(AppError::unauthorized("orphaned_api_key", "Unauthorized: Invalid API key"));
            }
            t.touch_api_key(found.id, now);
            Ok(found.owner_id)
        })?;
        Ok(Verified { identity_id: owner, kind: CredentialKind::ApiKey, renewed: None })
    }

    fn verify_session(&self, token: &str, now: DateTime<Utc>) -> AppResult<Verified> {
        let claims = self.sessions.decode_at(token, now)?;
        let renewed = if self.sessions.renewal_due(&claims, now) {
            match self.sessions.renew(&claims, now) {
                Ok(t) => t,
                Err(e) => {
                    warn!(user_id = claims.user_id, error = %e, "session renewal skipped");
                    None
                }
            }
        } else {
            None
        };
        if renewed.is_some() {
            debug!(user_id = claims.user_id, "session renewed");
        }
        Ok(Verified { identity_id: claims.user_id, kind: CredentialKind::Session, renewed })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_key_header_takes_precedence() {
        let c = Credential::from_presentation(Some("k"), Some("t")).unwrap();
        assert_eq!(c, Credential::ApiKey("k".into()));
        assert_eq!(c.kind(), CredentialKind::ApiKey);
    }

    #[test]
    fn blank_values_are_absent() {
        assert_eq!(Credential::from_presentation(Some("  "), Some("t")), Some(Credential::SessionToken("t".into())));
        assert_eq!(Credential::from_presentation(None, Some("")), None);
    }
}
