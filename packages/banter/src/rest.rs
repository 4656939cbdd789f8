//! REST collaborator for history, channels, and message actions.
//!
//! The live session only pushes deltas; everything fetch-shaped (channel
//! lists, history pages, deletes, reactions) goes through this client. The
//! identity token rides an `Authorization: Bearer` header.

use anyhow::{Context, Result};
use banter_session::{ChatMessage, RoomId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize)]
pub struct Channel {
    pub id: RoomId,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub user_id: String,
    pub display_name: String,
    #[serde(default)]
    pub is_admin: bool,
}

#[derive(Debug, Deserialize)]
struct ReactionCount {
    count: u32,
}

#[derive(Debug, Serialize)]
struct ProfileUpdate<'a> {
    display_name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    avatar_url: Option<&'a str>,
}

#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            token: token.into(),
        }
    }

    pub async fn channels(&self) -> Result<Vec<Channel>> {
        self.get("/api/channels")
            .await
            .context("failed to list channels")
    }

    /// The latest `limit` messages of a channel, newest first. Feed this
    /// straight into the session's history seeding.
    pub async fn messages(&self, channel_id: RoomId, limit: usize) -> Result<Vec<ChatMessage>> {
        self.get(&format!(
            "/api/channels/{channel_id}/messages?limit={limit}"
        ))
        .await
        .with_context(|| format!("failed to fetch messages for channel {channel_id}"))
    }

    pub async fn delete_message(&self, message_id: i64) -> Result<()> {
        self.http
            .delete(format!("{}/api/messages/{message_id}", self.base_url))
            .bearer_auth(&self.token)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .with_context(|| format!("failed to delete message {message_id}"))?;
        Ok(())
    }

    /// Toggle the caller's reaction on a message; returns the new count.
    /// The live connection broadcasts the change to subscribed sessions.
    pub async fn toggle_reaction(&self, message_id: i64) -> Result<u32> {
        let response: ReactionCount = self
            .http
            .post(format!(
                "{}/api/messages/{message_id}/reactions",
                self.base_url
            ))
            .bearer_auth(&self.token)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .with_context(|| format!("failed to toggle reaction on message {message_id}"))?
            .json()
            .await
            .context("malformed reaction response")?;
        Ok(response.count)
    }

    /// Upsert the caller's profile server-side. Run once before opening a
    /// live session so typing and presence carry a display name.
    pub async fn sync_user(&self) -> Result<User> {
        self.http
            .post(format!("{}/api/users/sync", self.base_url))
            .bearer_auth(&self.token)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .context("failed to sync user")?
            .json()
            .await
            .context("malformed user response")
    }

    pub async fn update_profile(
        &self,
        display_name: &str,
        avatar_url: Option<&str>,
    ) -> Result<User> {
        self.http
            .put(format!("{}/api/users/me", self.base_url))
            .bearer_auth(&self.token)
            .json(&ProfileUpdate {
                display_name,
                avatar_url,
            })
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .context("failed to update profile")?
            .json()
            .await
            .context("malformed user response")
    }

    pub async fn me(&self) -> Result<User> {
        self.get("/api/users/me").await.context("failed to fetch profile")
    }

    async fn get<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T> {
        Ok(self
            .http
            .get(format!("{}{path}", self.base_url))
            .bearer_auth(&self.token)
            .send()
            .await
            .and_then(|r| r.error_for_status())?
            .json()
            .await?)
    }
}
