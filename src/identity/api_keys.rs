//! Long-lived API keys as an alternative to the session cookie.
//!
//! Key material is 32 random bytes rendered as unpadded base64url. The full value is returned
//! exactly once, at creation; listings only ever show the last four characters.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use getrandom::getrandom;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::principal::IdentityId;
use crate::error::{AppError, AppResult};
use crate::storage::SharedStore;

const KEY_BYTES: usize = 32;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ApiKey {
    pub id: u64,
    pub owner_id: IdentityId,
    pub key: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub last_used_at: Option<DateTime<Utc>>,
}

impl ApiKey {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expires_at, Some(exp) if now > exp)
    }
}

/// What listings return: everything but the key material.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ApiKeyView {
    pub id: u64,
    pub name: String,
    pub key: String,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_used_at: Option<DateTime<Utc>>,
}

impl From<&ApiKey> for ApiKeyView {
    fn from(k: &ApiKey) -> Self {
        ApiKeyView {
            id: k.id,
            name: k.name.clone(),
            key: mask(&k.key),
            created_at: k.created_at,
            expires_at: k.expires_at,
            last_used_at: k.last_used_at,
        }
    }
}

#[derive(Clone)]
pub struct ApiKeyService {
    store: SharedStore,
}

impl ApiKeyService {
    pub fn new(store: SharedStore) -> Self { Self { store } }

    pub fn create(&self, owner: IdentityId, name: &str, expires_at: Option<DateTime<Utc>>) -> AppResult<ApiKey> {
        self.create_at(owner, name, expires_at, Utc::now())
    }

    pub fn create_at(
        &self,
        owner: IdentityId,
        name: &str,
        expires_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> AppResult<ApiKey> {
        if let Some(exp) = expires_at {
            if exp <= now {
                return Err(AppError::bad_request("invalid_expiry", "expires_at must be in the future"));
            }
        }
        let key = generate_key()?;
        let created = self.store.transaction(|t| {
            t.insert_api_key(ApiKey {
                id: 0,
                owner_id: owner,
                key,
                name: name.trim().to_string(),
                created_at: now,
                expires_at,
                last_used_at: None,
            })
        })?;
        info!(user_id = owner, key_id = created.id, "api key created");
        Ok(created)
    }

    pub fn list(&self, owner: IdentityId) -> Vec<ApiKeyView> {
        self.store.read(|t| t.api_keys_for(owner).iter().map(ApiKeyView::from).collect())
    }

    pub fn delete(&self, owner: IdentityId, id: u64) -> AppResult<()> {
        let removed = self.store.transaction(|t| Ok(t.delete_api_key(owner, id)))?;
        if !removed {
            return Err(AppError::not_found("api_key_not_found", "API key not found"));
        }
        info!(user_id = owner, key_id = id, "api key deleted");
        Ok(())
    }
}

pub fn generate_key() -> AppResult<String> {
    let mut bytes = [0u8; KEY_BYTES];
    getrandom(&mut bytes).map_err(|e| AppError::internal("key_generation_failed", format!("random source failed: {}", e)))?;
    Ok(URL_SAFE_NO_PAD.encode(bytes))
}

pub fn mask(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    let tail: String = chars[chars.len().saturating_sub(4)..].iter().collect();
    format!("...{}", tail)
}
