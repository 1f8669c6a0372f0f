//!
//! tripgate HTTP server
//! --------------------
//! Axum router for the registration API.
//!
//! Responsibilities:
//! - Discord login redirect and callback, which sets the session cookie.
//! - A route layer on every protected route that verifies the API key header or session
//!   cookie, hands the identity id to the handler and appends a renewed session cookie.
//! - Handlers that delegate to the services; every failure is an `AppError` response.
//! - Optional CORS for browser frontends on another origin.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{FromRequest, FromRequestParts, Path, Query, Request, State};
use axum::http::header::{ACCESS_CONTROL_ALLOW_CREDENTIALS, ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN, ORIGIN, SET_COOKIE};
use axum::http::request::Parts;
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{AppendHeaders, IntoResponse, Redirect, Response};
use axum::routing::{delete, get, post};
use axum::{Extension, Json, Router};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

use crate::achievements::{AchievementService, CreateAchievement, GrantAchievement};
use crate::config::AppConfig;
use crate::discord::DiscordRest;
use crate::error::{AppError, AppResult};
use crate::identity::{
    ApiKeyService, AuthorizationPolicy, CredentialVerifier, DiscordIdentityProvider, DiscordRoleAuthority, IdentityId,
    IdentityProvider, LoginService, RoleGateway, SessionIssuer,
};
use crate::notifier::{DisabledNotifier, DiscordNotifier, Notifier};
use crate::profile::ProfileService;
use crate::registration::{RegistrationLedger, RegistrationRequest};
use crate::storage::SharedStore;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub verifier: CredentialVerifier,
    pub login: LoginService,
    pub policy: AuthorizationPolicy,
    pub ledger: RegistrationLedger,
    pub achievements: AchievementService,
    pub api_keys: ApiKeyService,
    pub profile: ProfileService,
}

/// Identity id of the verified caller, placed in request extensions by the auth layer.
#[derive(Debug, Clone, Copy)]
pub struct AuthedUser(pub IdentityId);

impl AppState {
    /// Wire services around explicit collaborators.
    pub fn new(
        config: AppConfig,
        store: SharedStore,
        provider: Arc<dyn IdentityProvider>,
        roles: RoleGateway,
        notifier: Arc<dyn Notifier>,
    ) -> AppResult<Self> {
        let sessions = Arc::new(SessionIssuer::from_config(&config)?);
        let verifier = CredentialVerifier::new(store.clone(), sessions.clone());
        let login = LoginService::new(provider, store.clone(), sessions, config.discord.guild_id.clone());
        let policy = AuthorizationPolicy::new(store.clone(), roles, config.organizer_role.clone());
        let ledger = RegistrationLedger::new(store.clone(), notifier.clone(), config.enabled_events.clone());
        let achievements = AchievementService::new(store.clone(), notifier, policy.clone(), config.achievement_prefix.clone());
        let api_keys = ApiKeyService::new(store);
        let profile = ProfileService::new(policy.clone(), ledger.clone(), achievements.clone(), config.enabled_events.clone());
        Ok(Self { config: Arc::new(config), verifier, login, policy, ledger, achievements, api_keys, profile })
    }

    /// Wire the Discord-backed collaborators from configuration. Without a bot token and guild
    /// id the role gateway is unconfigured and role operations are refused.
    pub fn from_config(config: AppConfig, store: SharedStore) -> AppResult<Self> {
        let provider: Arc<dyn IdentityProvider> = Arc::new(DiscordIdentityProvider::new(config.discord.clone()));
        let (roles, notifier): (RoleGateway, Arc<dyn Notifier>) = match (&config.discord.bot_token, &config.discord.guild_id) {
            (Some(token), Some(guild)) => {
                let rest = DiscordRest::new(config.discord.api_base.clone(), token.clone());
                let authority = Arc::new(DiscordRoleAuthority::new(rest.clone()));
                (
                    RoleGateway::new(authority, guild.clone(), config.role_lookup_timeout),
                    Arc::new(DiscordNotifier::new(rest, guild.clone(), config.discord.notifications_channel_id.clone())) as Arc<dyn Notifier>,
                )
            }
            _ => {
                info!("discord bot not configured; role checks deny and notifications are disabled");
                (RoleGateway::unconfigured(), Arc::new(DisabledNotifier) as Arc<dyn Notifier>)
            }
        };
        Self::new(config, store, provider, roles, notifier)
    }
}

pub fn build_router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/me", get(me))
        .route("/register", post(register))
        .route("/history", get(history))
        .route("/registrations", get(list_registrations))
        .route("/achievements/create", post(create_achievement))
        .route("/achievements/grant", post(grant_achievement))
        .route("/api-keys", post(create_api_key).get(list_api_keys))
        .route("/api-keys/{id}", delete(delete_api_key))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_identity));

    let mut app = Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/auth/discord/login", get(login_redirect))
        .route("/auth/discord/callback", get(login_callback))
        .merge(protected);

    if state.config.enable_cors {
        app = app.layer(middleware::from_fn_with_state(state.clone(), cors));
    }
    app.with_state(state)
}

pub async fn run(config: AppConfig) -> anyhow::Result<()> {
    let store = match &config.database_path {
        Some(path) => SharedStore::open(path)?,
        None => {
            info!("DATABASE_PATH not set; using a volatile in-memory store");
            SharedStore::in_memory()
        }
    };
    let port = config.port;
    let state = AppState::from_config(config, store)?;
    let app = build_router(state);

    let addr: SocketAddr = format!("0.0.0.0:{}", port).parse()?;
    info!("Starting server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn parse_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    let cookie = headers.get("cookie")?;
    let s = cookie.to_str().ok()?;
    for part in s.split(';') {
        let p = part.trim();
        if let Some(eq) = p.find('=') {
            let (k, v) = p.split_at(eq);
            if k == name { return Some(v[1..].to_string()); }
        }
    }
    None
}

fn session_cookie(name: &str, token: &str, expires_at: DateTime<Utc>) -> AppResult<HeaderValue> {
    let max_age = (expires_at - Utc::now()).num_seconds().max(0);
    HeaderValue::from_str(&format!("{}={}; HttpOnly; Path=/; SameSite=Lax; Max-Age={}", name, token, max_age))
        .map_err(|e| AppError::internal("cookie_encoding_failed", e.to_string()))
}

async fn require_identity(State(state): State<AppState>, mut req: Request, next: Next) -> Response {
    let headers = req.headers();
    let api_key = headers
        .get(state.config.api_key_header.as_str())
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let cookie = parse_cookie(headers, &state.config.session_cookie);

    let verified = match state.verifier.verify_presented(api_key.as_deref(), cookie.as_deref()) {
        Ok(v) => v,
        Err(e) => {
            debug!(path = %req.uri().path(), code = e.code_str(), "request not authenticated");
            return e.into_response();
        }
    };
    req.extensions_mut().insert(AuthedUser(verified.identity_id));
    let mut resp = next.run(req).await;
    if let Some(renewed) = verified.renewed {
        match session_cookie(&state.config.session_cookie, &renewed.token, renewed.expires_at) {
            Ok(v) => { resp.headers_mut().append(SET_COOKIE, v); }
            Err(e) => tracing::warn!(error = %e, "renewed session cookie dropped"),
        }
    }
    resp
}

async fn cors(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let origin = req.headers().get(ORIGIN).cloned();
    let mut resp = if req.method() == Method::OPTIONS {
        StatusCode::OK.into_response()
    } else {
        next.run(req).await
    };
    if let Some(origin) = origin {
        let h = resp.headers_mut();
        h.insert(ACCESS_CONTROL_ALLOW_ORIGIN, origin);
        h.insert(ACCESS_CONTROL_ALLOW_METHODS, HeaderValue::from_static("POST, GET, OPTIONS, PUT, DELETE"));
        let allow = format!("Accept, Content-Type, Content-Length, Accept-Encoding, X-CSRF-Token, {}", state.config.api_key_header);
        if let Ok(v) = HeaderValue::from_str(&allow) {
            h.insert(ACCESS_CONTROL_ALLOW_HEADERS, v);
        }
        h.insert(ACCESS_CONTROL_ALLOW_CREDENTIALS, HeaderValue::from_static("true"));
    }
    resp
}

/// JSON body extractor whose rejection is a `bad_request` `AppError`.
struct ApiJson<T>(T);

impl<S, T> FromRequest<S> for ApiJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|e| AppError::bad_request("invalid_body", e.body_text()))?;
        Ok(Self(value))
    }
}

/// Query string extractor whose rejection is a `bad_request` `AppError`.
struct ApiQuery<T>(T);

impl<S, T> FromRequestParts<S> for ApiQuery<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Query(value) = Query::<T>::from_request_parts(parts, state)
            .await
            .map_err(|e| AppError::bad_request("invalid_query", e.body_text()))?;
        Ok(Self(value))
    }
}

// --- public ---

async fn login_redirect(State(state): State<AppState>) -> Redirect {
    Redirect::temporary(&state.login.login_url())
}

#[derive(Debug, Deserialize)]
struct CallbackParams {
    #[serde(default)]
    code: String,
}

async fn login_callback(State(state): State<AppState>, ApiQuery(params): ApiQuery<CallbackParams>) -> AppResult<impl IntoResponse> {
    let outcome = state.login.complete_login(&params.code).await?;
    let cookie = session_cookie(&state.config.session_cookie, &outcome.session.token, outcome.session.expires_at)?;
    Ok((
        AppendHeaders([(SET_COOKIE, cookie)]),
        Json(json!({ "message": format!("Welcome {}! You are logged in.", outcome.identity.display_name) })),
    ))
}

// --- protected ---

async fn me(State(state): State<AppState>, Extension(AuthedUser(id)): Extension<AuthedUser>) -> AppResult<impl IntoResponse> {
    Ok(Json(state.profile.me(id).await?))
}

async fn register(
    State(state): State<AppState>,
    Extension(AuthedUser(id)): Extension<AuthedUser>,
    ApiJson(body): ApiJson<RegistrationRequest>,
) -> AppResult<impl IntoResponse> {
    let saved = state.ledger.submit(id, body).await?;
    Ok(Json(json!({ "message": "Registration processed successfully", "registration": saved })))
}

#[derive(Debug, Deserialize)]
struct HistoryParams {
    diff: Option<bool>,
    event: Option<String>,
}

async fn history(
    State(state): State<AppState>,
    Extension(AuthedUser(id)): Extension<AuthedUser>,
    ApiQuery(params): ApiQuery<HistoryParams>,
) -> impl IntoResponse {
    let event = params.event.as_deref().filter(|e| !e.is_empty());
    Json(json!({ "history": state.ledger.history(id, params.diff, event) }))
}

#[derive(Debug, Deserialize)]
struct EventFilter {
    event: Option<String>,
}

async fn list_registrations(
    State(state): State<AppState>,
    Extension(AuthedUser(id)): Extension<AuthedUser>,
    ApiQuery(filter): ApiQuery<EventFilter>,
) -> AppResult<impl IntoResponse> {
    let actor = state.policy.identity(id)?;
    let proof = state.policy.require_organizer(&actor).await?;
    let event = filter.event.as_deref().filter(|e| !e.is_empty());
    Ok(Json(json!({ "registrations": state.ledger.list_all(&proof, event) })))
}

async fn create_achievement(
    State(state): State<AppState>,
    Extension(AuthedUser(id)): Extension<AuthedUser>,
    ApiJson(body): ApiJson<CreateAchievement>,
) -> AppResult<impl IntoResponse> {
    let actor = state.policy.identity(id)?;
    let proof = state.policy.require_organizer(&actor).await?;
    let created = state.achievements.create(&proof, body).await?;
    Ok(Json(json!({ "id": created.id, "discord_role_id": created.external_role_id })))
}

async fn grant_achievement(
    State(state): State<AppState>,
    Extension(AuthedUser(id)): Extension<AuthedUser>,
    ApiJson(body): ApiJson<GrantAchievement>,
) -> AppResult<impl IntoResponse> {
    let actor = state.policy.identity(id)?;
    let outcome = state.achievements.grant(&actor, body).await?;
    Ok(Json(json!({ "message": outcome.message })))
}

#[derive(Debug, Deserialize)]
struct CreateApiKey {
    #[serde(default)]
    name: String,
    #[serde(default)]
    expires_at: Option<DateTime<Utc>>,
}

async fn create_api_key(
    State(state): State<AppState>,
    Extension(AuthedUser(id)): Extension<AuthedUser>,
    ApiJson(body): ApiJson<CreateApiKey>,
) -> AppResult<impl IntoResponse> {
    let key = state.api_keys.create(id, &body.name, body.expires_at)?;
    Ok((StatusCode::CREATED, Json(key)))
}

async fn list_api_keys(State(state): State<AppState>, Extension(AuthedUser(id)): Extension<AuthedUser>) -> impl IntoResponse {
    Json(json!({ "api_keys": state.api_keys.list(id) }))
}

async fn delete_api_key(
    State(state): State<AppState>,
    Extension(AuthedUser(id)): Extension<AuthedUser>,
    Path(key_id): Path<u64>,
) -> AppResult<StatusCode> {
    state.api_keys.delete(id, key_id)?;
    Ok(StatusCode::NO_CONTENT)
}
