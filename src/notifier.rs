//! Outbound side channel: channel messages and role provisioning.
//!
//! Message delivery is best-effort; callers log failures and move on. Role creation and role
//! grants are not: achievement flows depend on them and surface their failures.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use crate::achievements::Achievement;
use crate::discord::{DiscordRest, RestError};
use crate::identity::Identity;
use crate::registration::Registration;

#[derive(Debug, thiserror::Error)]
pub enum NotifierError {
    #[error("notifier is not configured")]
    Disabled,

    #[error(transparent)]
    Rest(#[from] RestError),
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify_registration(&self, user: &Identity, registration: &Registration) -> Result<(), NotifierError>;

    async fn notify_achievement(
        &self,
        target: &Identity,
        achievement: &Achievement,
        grantor: &Identity,
        show_grantor: bool,
    ) -> Result<(), NotifierError>;

    /// Create a role and return its id.
    async fn create_role(&self, name: &str) -> Result<String, NotifierError>;

    async fn grant_role(&self, external_id: &str, role_id: &str) -> Result<(), NotifierError>;
}

pub struct DiscordNotifier {
    rest: DiscordRest,
    guild_id: String,
    channel_id: Option<String>,
}

#[derive(Deserialize)]
struct CreatedRole {
    id: String,
}

#[derive(Serialize)]
struct MessageBody<'a> {
    content: &'a str,
}

impl DiscordNotifier {
    pub fn new(rest: DiscordRest, guild_id: impl Into<String>, channel_id: Option<String>) -> Self {
        Self { rest, guild_id: guild_id.into(), channel_id }
    }

    async fn post_message(&self, content: &str) -> Result<(), NotifierError> {
        let Some(channel) = &self.channel_id else {
            debug!("no notifications channel configured; message dropped");
            return Ok(());
        };
        let _: serde_json::Value = self
            .rest
            .post_json(&format!("/channels/{}/messages", channel), &MessageBody { content })
            .await?;
        Ok(())
    }
}

pub fn registration_message(user: &Identity, reg: &Registration) -> String {
    let status = if reg.fields.cancelled { "cancelled registration" } else { "registered/updated registration" };
    format!(
        "🔔 **Registration Update**\n**User:** {} (<@{}>)\n**Event:** {}\n**Status:** {}\n**Dates:** {} - {}\n**Children:** {}\n**Food Restrictions:** {}",
        user.display_name,
        user.external_id,
        reg.event,
        status,
        reg.fields.arrival_date.format("%Y-%m-%d"),
        reg.fields.departure_date.format("%Y-%m-%d"),
        reg.fields.children_count,
        reg.fields.food_restrictions,
    )
}

pub fn achievement_message(target: &Identity, achievement: &Achievement, grantor: &Identity, show_grantor: bool) -> String {
    let mut msg = format!("🏆 <@{}> unlocked **{}**", target.external_id, achievement.name);
    if show_grantor {
        msg.push_str(&format!(" (granted by <@{}>)", grantor.external_id));
    }
    if !achievement.image.is_empty() {
        msg.push('\n');
        msg.push_str(&achievement.image);
    }
    msg
}

#[async_trait]
impl Notifier for DiscordNotifier {
    async fn notify_registration(&self, user: &Identity, registration: &Registration) -> Result<(), NotifierError> {
        self.post_message(&registration_message(user, registration)).await
    }

    async fn notify_achievement(
        &self,
        target: &Identity,
        achievement: &Achievement,
        grantor: &Identity,
        show_grantor: bool,
    ) -> Result<(), NotifierError> {
        self.post_message(&achievement_message(target, achievement, grantor, show_grantor)).await
    }

    async fn create_role(&self, name: &str) -> Result<String, NotifierError> {
        let role: CreatedRole = self
            .rest
            .post_json(&format!("/guilds/{}/roles", self.guild_id), &json!({ "name": name, "mentionable": true }))
            .await?;
        Ok(role.id)
    }

    async fn grant_role(&self, external_id: &str, role_id: &str) -> Result<(), NotifierError> {
        self.rest
            .put(&format!("/guilds/{}/members/{}/roles/{}", self.guild_id, external_id, role_id))
            .await?;
        Ok(())
    }
}

/// Used when no bot is configured.
pub struct DisabledNotifier;

#[async_trait]
impl Notifier for DisabledNotifier {
    async fn notify_registration(&self, _user: &Identity, _registration: &Registration) -> Result<(), NotifierError> {
        Ok(())
    }

    async fn notify_achievement(&self, _: &Identity, _: &Achievement, _: &Identity, _: bool) -> Result<(), NotifierError> {
        Ok(())
    }

    async fn create_role(&self, _name: &str) -> Result<String, NotifierError> {
        Err(NotifierError::Disabled)
    }

    async fn grant_role(&self, _external_id: &str, _role_id: &str) -> Result<(), NotifierError> {
        Err(NotifierError::Disabled)
    }
}
