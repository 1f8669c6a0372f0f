//! Stateless signed session tokens (HS256).
//!
//! A token carries the identity id, its issue and expiry instants and the time of the login
//! that started the session. Nothing is persisted: the signing secret is the only state and
//! it lives inside the issuer.

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::principal::IdentityId;
use crate::config::AppConfig;
use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionClaims {
    pub user_id: IdentityId,
    pub iat: i64,
    pub exp: i64,
    /// Unix time of the login that started this session; carried across renewals.
    pub auth_time: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

pub struct SessionIssuer {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    ttl: Duration,
    max_age: Option<Duration>,
}

impl SessionIssuer {
    pub fn new(secret: &[u8], ttl: std::time::Duration, max_age: Option<std::time::Duration>) -> AppResult<Self> {
        if secret.is_empty() {
            return Err(AppError::internal("session_secret_missing", "session signing secret is empty"));
        }
        if ttl.as_secs() == 0 {
            return Err(AppError::internal("session_ttl_invalid", "session lifetime must be at least one second"));
        }
        let ttl = to_delta(ttl)
            .ok_or_else(|| AppError::internal("session_ttl_invalid", "session lifetime out of range"))?;
        let max_age = match max_age {
            Some(m) => Some(
                to_delta(m)
                    .ok_or_else(|| AppError::internal("session_ttl_invalid", "session max age out of range"))?,
            ),
            None => None,
        };
        let mut validation = Validation::new(Algorithm::HS256);
        // Expiry is checked against the caller's clock in `decode_at`.
        validation.validate_exp = false;
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp"]);
        Ok(Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            validation,
            ttl,
            max_age,
        })
    }

    pub fn from_config(cfg: &AppConfig) -> AppResult<Self> {
        Self::new(cfg.jwt_secret.as_bytes(), cfg.session_ttl, cfg.session_max_age)
    }

    pub fn issue(&self, user_id: IdentityId) -> AppResult<IssuedToken> {
        self.issue_at(user_id, Utc::now())
    }

    /// Mint a token valid for the full window starting at `now`.
    pub fn issue_at(&self, user_id: IdentityId, now: DateTime<Utc>) -> AppResult<IssuedToken> {
        let claims = SessionClaims {
            user_id,
            iat: now.timestamp(),
            exp: self.window_end(now)?,
            auth_time: now.timestamp(),
        };
        self.sign(&claims)
    }

    pub fn decode(&self, token: &str) -> AppResult<SessionClaims> {
        self.decode_at(token, Utc::now())
    }

    /// Verify the signature and shape of `token`, then reject it if expired at `now`.
    pub fn decode_at(&self, token: &str, now: DateTime<Utc>) -> AppResult<SessionClaims> {
        let data = decode::<SessionClaims>(token, &self.decoding, &self.validation).map_err(|e| {
            debug!(error = %e, "session token rejected");
            AppError::unauthorized("invalid_token", "Unauthorized: Invalid token")
        })?;
        if data.claims.exp <= now.timestamp() {
            return Err(AppError::unauthorized("token_expired", "Unauthorized: Token expired"));
        }
        Ok(data.claims)
    }

    /// True once less than half of the validity window remains.
    pub fn renewal_due(&self, claims: &SessionClaims, now: DateTime<Utc>) -> bool {
        claims.exp - now.timestamp() < self.ttl.num_seconds() / 2
    }

    /// Re-issue `claims` with a fresh window. Returns `None` when the configured max session
    /// age has already been reached.
    pub fn renew(&self, claims: &SessionClaims, now: DateTime<Utc>) -> AppResult<Option<IssuedToken>> {
        let mut exp = self.window_end(now)?;
        if let Some(max_age) = self.max_age {
            let cap = claims.auth_time.saturating_add(max_age.num_seconds());
            if cap <= now.timestamp() {
                return Ok(None);
            }
            exp = exp.min(cap);
        }
        let renewed = SessionClaims { user_id: claims.user_id, iat: now.timestamp(), exp, auth_time: claims.auth_time };
        self.sign(&renewed).map(Some)
    }

    fn window_end(&self, now: DateTime<Utc>) -> AppResult<i64> {
        now.checked_add_signed(self.ttl)
            .map(|t| t.timestamp())
            .ok_or_else(|| AppError::internal("session_ttl_invalid", "session expiry out of range"))
    }

    fn sign(&self, claims: &SessionClaims) -> AppResult<IssuedToken> {
        let token = encode(&Header::new(Algorithm::HS256), claims, &self.encoding)
            .map_err(|e| AppError::internal("token_signing_failed", format!("Failed to generate token: {}", e)))?;
        let expires_at = DateTime::<Utc>::from_timestamp(claims.exp, 0)
            .ok_or_else(|| AppError::internal("token_signing_failed", "token expiry out of range"))?;
        Ok(IssuedToken { token, expires_at })
    }
}

fn to_delta(d: std::time::Duration) -> Option<Duration> {
    i64::try_from(d.as_secs()).ok().and_then(Duration::try_seconds)
}
