//! Process configuration read once from the environment at startup.

use anyhow::{anyhow, bail, Context, Result};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_DISCORD_API_BASE: &str = "https://discord.com/api/v10";

/// Upper bound for session lifetimes configured in hours (ten years).
pub const MAX_SESSION_HOURS: u64 = 24 * 365 * 10;

#[derive(Debug, Clone)]
pub struct DiscordConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_url: String,
    pub guild_id: Option<String>,
    pub bot_token: Option<String>,
    pub notifications_channel_id: Option<String>,
    pub api_base: String,
}

impl Default for DiscordConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            redirect_url: "http://127.0.0.1:8080/auth/discord/callback".into(),
            guild_id: None,
            bot_token: None,
            notifications_channel_id: None,
            api_base: DEFAULT_DISCORD_API_BASE.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub database_path: Option<PathBuf>,
    pub jwt_secret: String,
    pub session_ttl: Duration,
    pub session_max_age: Option<Duration>,
    pub session_cookie: String,
    pub api_key_header: String,
    pub discord: DiscordConfig,
    pub organizer_role: String,
    pub achievement_prefix: String,
    pub enabled_events: Vec<String>,
    pub enable_cors: bool,
    pub role_lookup_timeout: Duration,
}

impl AppConfig {
    /// Defaults used by tests and as the base for `from_env`.
    pub fn with_secret(secret: impl Into<String>) -> Self {
        Self {
            port: 8080,
            database_path: None,
            jwt_secret: secret.into(),
            session_ttl: Duration::from_secs(24 * 3600),
            session_max_age: None,
            session_cookie: "auth_token".into(),
            api_key_header: "x-api-key".into(),
            discord: DiscordConfig::default(),
            organizer_role: "g::t::orgs".into(),
            achievement_prefix: "achievement::".into(),
            enabled_events: vec!["g::t::7.0.0".into()],
            enable_cors: false,
            role_lookup_timeout: Duration::from_secs(5),
        }
    }

    pub fn from_env() -> Result<Self> {
        let secret = non_empty_env("JWT_SECRET").ok_or_else(|| anyhow!("JWT_SECRET must be set"))?;
        let mut cfg = Self::with_secret(secret);

        if let Some(port) = parse_env::<u16>("PORT")? { cfg.port = port; }
        cfg.database_path = non_empty_env("DATABASE_PATH").map(PathBuf::from);
        if let Some(h) = parse_env::<u64>("SESSION_TTL_HOURS")? {
            cfg.session_ttl = session_hours("SESSION_TTL_HOURS", h)?;
        }
        cfg.session_max_age = parse_env::<u64>("SESSION_MAX_AGE_HOURS")?
            .map(|h| session_hours("SESSION_MAX_AGE_HOURS", h))
            .transpose()?;
        if let Some(v) = non_empty_env("SESSION_COOKIE") { cfg.session_cookie = v; }
        if let Some(v) = non_empty_env("API_KEY_HEADER") { cfg.api_key_header = v.to_ascii_lowercase(); }

        cfg.discord.client_id = non_empty_env("DISCORD_CLIENT_ID").unwrap_or_default();
        cfg.discord.client_secret = non_empty_env("DISCORD_CLIENT_SECRET").unwrap_or_default();
        if let Some(v) = non_empty_env("DISCORD_REDIRECT_URL") { cfg.discord.redirect_url = v; }
        cfg.discord.guild_id = non_empty_env("DISCORD_GUILD_ID");
        cfg.discord.bot_token = non_empty_env("DISCORD_BOT_TOKEN");
        cfg.discord.notifications_channel_id = non_empty_env("DISCORD_NOTIFICATIONS_CHANNEL_ID");
        if let Some(v) = non_empty_env("DISCORD_API_BASE") { cfg.discord.api_base = v.trim_end_matches('/').to_string(); }

        if let Some(v) = non_empty_env("ORGANIZER_ROLE") { cfg.organizer_role = v; }
        if let Some(v) = non_empty_env("ACHIEVEMENT_PREFIX") { cfg.achievement_prefix = v; }
        if let Ok(v) = env::var("ENABLED_EVENTS") { cfg.enabled_events = split_list(&v); }
        if let Some(b) = parse_bool_env("ENABLE_CORS")? { cfg.enable_cors = b; }
        if let Some(s) = parse_env::<u64>("ROLE_LOOKUP_TIMEOUT_SECS")? {
            cfg.role_lookup_timeout = lookup_timeout("ROLE_LOOKUP_TIMEOUT_SECS", s)?;
        }
        Ok(cfg)
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    env::var(name).ok().map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn parse_env<T>(name: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match non_empty_env(name) {
        Some(v) => v.parse::<T>().map(Some).with_context(|| format!("invalid value for {}: {:?}", name, v)),
        None => Ok(None),
    }
}

fn parse_bool_env(name: &str) -> Result<Option<bool>> {
    let Some(v) = non_empty_env(name) else { return Ok(None); };
    match v.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(Some(true)),
        "0" | "false" | "no" | "off" => Ok(Some(false)),
        other => bail!("invalid boolean for {}: {:?}", name, other),
    }
}

fn session_hours(name: &str, hours: u64) -> Result<Duration> {
    if hours == 0 { bail!("{} must be positive", name); }
    if hours > MAX_SESSION_HOURS { bail!("{} must be at most {} hours", name, MAX_SESSION_HOURS); }
    Ok(Duration::from_secs(hours * 3600))
}

fn lookup_timeout(name: &str, secs: u64) -> Result<Duration> {
    if secs == 0 { bail!("{} must be positive", name); }
    Ok(Duration::from_secs(secs))
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',').map(|s| s.trim()).filter(|s| !s.is_empty()).map(|s| s.to_string()).collect()
}
