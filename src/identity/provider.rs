use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use tracing::{info, warn};

use super::principal::Identity;
use super::session::{IssuedToken, SessionIssuer};
use crate::config::DiscordConfig;
use crate::error::{AppError, AppResult};
use crate::storage::SharedStore;

const OAUTH_SCOPES: &str = "identify email guilds";
const OAUTH_STATE: &str = "state";

/// Profile reported by the identity provider after a successful code exchange.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExternalProfile {
    pub external_id: String,
    pub display_name: String,
    pub email: String,
    pub avatar: String,
    /// Ids of the groups (guilds) the user belongs to.
    pub groups: Vec<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("token exchange failed: {message}")]
    Exchange { message: String },

    #[error("profile fetch failed: {message}")]
    Profile { message: String },

    #[error("network error: {message}")]
    Network { message: String },
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        ProviderError::Network { message: err.to_string() }
    }
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    fn authorize_url(&self, state: &str) -> String;
    async fn exchange_code(&self, code: &str) -> Result<ExternalProfile, ProviderError>;
}

/// OAuth2 authorization-code login against Discord.
pub struct DiscordIdentityProvider {
    client: reqwest::Client,
    cfg: DiscordConfig,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Deserialize)]
struct DiscordUser {
    id: String,
    username: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    avatar: Option<String>,
}

#[derive(Deserialize)]
struct DiscordGuild {
    id: String,
}

impl DiscordIdentityProvider {
    pub fn new(cfg: DiscordConfig) -> Self {
        Self { client: reqwest::Client::new(), cfg }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.cfg.api_base.trim_end_matches('/'), path)
    }

    async fn bearer_get<T: serde::de::DeserializeOwned>(&self, path: &str, token: &str) -> Result<T, ProviderError> {
        let resp = self.client.get(self.url(path)).bearer_auth(token).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(ProviderError::Profile { message: format!("{} returned {}", path, status) });
        }
        resp.json::<T>().await.map_err(|e| ProviderError::Profile { message: e.to_string() })
    }
}

#[async_trait]
impl IdentityProvider for DiscordIdentityProvider {
    fn authorize_url(&self, state: &str) -> String {
        format!(
            "{}?client_id={}&redirect_uri={}&response_type=code&scope={}&state={}",
            self.url("/oauth2/authorize"),
            urlencoding::encode(&self.cfg.client_id),
            urlencoding::encode(&self.cfg.redirect_url),
            urlencoding::encode(OAUTH_SCOPES),
            urlencoding::encode(state),
        )
    }

    async fn exchange_code(&self, code: &str) -> Result<ExternalProfile, ProviderError> {
        let form = [
            ("client_id", self.cfg.client_id.as_str()),
            ("client_secret", self.cfg.client_secret.as_str()),
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.cfg.redirect_url.as_str()),
        ];
        let resp = self.client.post(self.url("/oauth2/token")).form(&form).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ProviderError::Exchange { message: format!("{}: {}", status, body) });
        }
        let token: TokenResponse = resp.json().await.map_err(|e| ProviderError::Exchange { message: e.to_string() })?;

        let user: DiscordUser = self.bearer_get("/users/@me", &token.access_token).await?;
        let guilds: Vec<DiscordGuild> = self.bearer_get("/users/@me/guilds", &token.access_token).await?;
        Ok(ExternalProfile {
            external_id: user.id,
            display_name: user.username,
            email: user.email.unwrap_or_default(),
            avatar: user.avatar.unwrap_or_default(),
            groups: guilds.into_iter().map(|g| g.id).collect(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct LoginOutcome {
    pub identity: Identity,
    pub session: IssuedToken,
}

/// Completes an external login: exchange, membership gate, identity upsert, session issue.
#[derive(Clone)]
pub struct LoginService {
    provider: Arc<dyn IdentityProvider>,
    store: SharedStore,
    sessions: Arc<SessionIssuer>,
    required_group: Option<String>,
}

impl LoginService {
    pub fn new(
        provider: Arc<dyn IdentityProvider>,
        store: SharedStore,
        sessions: Arc<SessionIssuer>,
        required_group: Option<String>,
    ) -> Self {
        Self { provider, store, sessions, required_group }
    }

    pub fn login_url(&self) -> String {
        self.provider.authorize_url(OAUTH_STATE)
    }

    pub async fn complete_login(&self, code: &str) -> AppResult<LoginOutcome> {
        if code.trim().is_empty() {
            return Err(AppError::bad_request("missing_code", "Code not found"));
        }
        let profile = self.provider.exchange_code(code).await.map_err(|e| {
            warn!(error = %e, "identity provider exchange failed");
            AppError::external("identity_provider_failed", e.to_string())
        })?;
        if let Some(group) = &self.required_group {
            if !profile.groups.iter().any(|g| g == group) {
                info!(external_id = %profile.external_id, "login rejected: not a member of required group");
                return Err(AppError::forbidden(
                    "not_a_member",
                    format!("Access denied: You are not a member of the required Discord guild: {}", group),
                ));
            }
        }
        let identity = self.store.transaction(|t| Ok(t.upsert_identity(&profile, Utc::now())))?;
        let session = self.sessions.issue(identity.id)?;
        info!(user_id = identity.id, external_id = %identity.external_id, "user logged in");
        Ok(LoginOutcome { identity, session })
    }
}
