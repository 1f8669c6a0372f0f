//! Thin bot-authenticated client for the Discord REST API.
//!
//! Status handling lives here and nowhere else: callers get either a decoded body or a
//! `RestError` that still carries the HTTP status, so they can pick out the cases (404 on a
//! member lookup) that mean something in their domain.

use reqwest::header::AUTHORIZATION;
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum RestError {
    #[error("network error: {message}")]
    Transport { message: String },

    #[error("discord returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid response: {message}")]
    InvalidResponse { message: String },
}

impl RestError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, RestError::Status { status: 404, .. })
    }
}

impl From<reqwest::Error> for RestError {
    fn from(err: reqwest::Error) -> Self {
        RestError::Transport { message: err.to_string() }
    }
}

#[derive(Debug, Clone)]
pub struct DiscordRest {
    client: reqwest::Client,
    base_url: String,
    bot_token: String,
}

impl DiscordRest {
    pub fn new(base_url: impl Into<String>, bot_token: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url, bot_token)
    }

    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>, bot_token: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            bot_token: bot_token.into(),
        }
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, RestError> {
        let resp = self.send(Method::GET, path, None::<&()>).await?;
        decode(resp).await
    }

    pub async fn post_json<B: Serialize, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T, RestError> {
        let resp = self.send(Method::POST, path, Some(body)).await?;
        decode(resp).await
    }

    /// PUT with no body; any 2xx (Discord answers 204) counts as success.
    pub async fn put(&self, path: &str) -> Result<(), RestError> {
        self.send(Method::PUT, path, None::<&()>).await.map(|_| ())
    }

    async fn send<B: Serialize>(&self, method: Method, path: &str, body: Option<&B>) -> Result<reqwest::Response, RestError> {
        let url = format!("{}{}", self.base_url, path);
        debug!(%method, %url, "discord request");
        let mut req = self
            .client
            .request(method, &url)
            .header(AUTHORIZATION, format!("Bot {}", self.bot_token));
        req = match body {
            Some(b) => req.json(b),
            None => req.header(reqwest::header::CONTENT_LENGTH, 0),
        };
        let resp = req.send().await?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        Err(RestError::Status { status: status.as_u16(), body })
    }
}

async fn decode<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, RestError> {
    let bytes = resp.bytes().await?;
    serde_json::from_slice(&bytes).map_err(|e| RestError::InvalidResponse { message: e.to_string() })
}
