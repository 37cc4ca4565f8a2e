// src/chat.rs
//! Slack Web API client: image uploads and user lookups.

use crate::credentials::IdentityDirectory;
use crate::error::ChatError;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, info, warn};

/// One image ready to post.
#[derive(Debug, Clone)]
pub struct ImageUpload {
    pub file_name: String,
    pub bytes: Vec<u8>,
    pub title: String,
    pub comment: String,
}

/// The chat platform the uploader posts to.
#[async_trait]
pub trait ChatPlatform: Send + Sync {
    async fn upload_image(&self, upload: ImageUpload) -> Result<(), ChatError>;
}

/// Slack Web API client.
#[derive(Clone)]
pub struct SlackClient {
    http: Client,
    api_url: String,
    token: String,
    channel: String,
    team_id: Option<String>,
}

#[derive(Deserialize)]
struct ApiReply {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize)]
struct UploadUrlReply {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    upload_url: Option<String>,
    #[serde(default)]
    file_id: Option<String>,
}

#[derive(Deserialize)]
struct UserInfoReply {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    user: Option<UserInfo>,
}

#[derive(Deserialize)]
struct UserInfo {
    #[serde(default)]
    team_id: Option<String>,
}

impl SlackClient {
    /// Builds a client against `api_url` (normally `https://slack.com/api`).
    pub fn new(
        api_url: impl Into<String>,
        token: impl Into<String>,
        channel: impl Into<String>,
        team_id: Option<String>,
        timeout: Duration,
    ) -> Result<Self, ChatError> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(SlackClient {
            http,
            api_url: api_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            channel: channel.into(),
            team_id,
        })
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/{}", self.api_url, method)
    }

    /// The team the user belongs to, or `None` if the platform does not know them.
    pub async fn user_team(&self, user_id: &str) -> Result<Option<String>, ChatError> {
        let reply: UserInfoReply = self
            .http
            .get(self.method_url("users.info"))
            .bearer_auth(&self.token)
            .query(&[("user", user_id)])
            .send()
            .await?
            .json()
            .await?;

        if !reply.ok {
            debug!(
                "users.info for {} failed: {}",
                user_id,
                reply.error.as_deref().unwrap_or("unknown error")
            );
            return Ok(None);
        }
        Ok(Some(
            reply.user.and_then(|u| u.team_id).unwrap_or_default(),
        ))
    }
}

#[async_trait]
impl ChatPlatform for SlackClient {
    async fn upload_image(&self, upload: ImageUpload) -> Result<(), ChatError> {
        let length = upload.bytes.len().to_string();
        let reserve: UploadUrlReply = self
            .http
            .post(self.method_url("files.getUploadURLExternal"))
            .bearer_auth(&self.token)
            .form(&[
                ("filename", upload.file_name.as_str()),
                ("length", length.as_str()),
            ])
            .send()
            .await?
            .json()
            .await?;

        let (upload_url, file_id) = match (reserve.ok, reserve.upload_url, reserve.file_id) {
            (true, Some(url), Some(id)) => (url, id),
            _ => {
                return Err(ChatError::Api {
                    method: "files.getUploadURLExternal",
                    reason: reserve.error.unwrap_or_else(|| "missing upload_url".to_string()),
                })
            }
        };

        let status = self
            .http
            .post(&upload_url)
            .body(upload.bytes)
            .send()
            .await?
            .status();
        if !status.is_success() {
            return Err(ChatError::Api {
                method: "upload",
                reason: format!("upload URL answered {}", status),
            });
        }

        let complete: ApiReply = self
            .http
            .post(self.method_url("files.completeUploadExternal"))
            .bearer_auth(&self.token)
            .json(&json!({
                "files": [{ "id": file_id, "title": upload.title }],
                "channel_id": self.channel,
                "initial_comment": upload.comment,
            }))
            .send()
            .await?
            .json()
            .await?;
        if !complete.ok {
            return Err(ChatError::Api {
                method: "files.completeUploadExternal",
                reason: complete.error.unwrap_or_else(|| "unknown error".to_string()),
            });
        }

        info!("Uploaded {} to channel {}", upload.file_name, self.channel);
        Ok(())
    }
}

#[async_trait]
impl IdentityDirectory for SlackClient {
    async fn is_recognized(&self, owner_id: &str) -> bool {
        match self.user_team(owner_id).await {
            Ok(Some(team)) => match &self.team_id {
                Some(expected) => {
                    let member = &team == expected;
                    if !member {
                        info!("User {} is not in team {}", owner_id, expected);
                    }
                    member
                }
                None => true,
            },
            Ok(None) => {
                info!("User {} not found", owner_id);
                false
            }
            Err(e) => {
                warn!("Identity lookup for {} failed: {}", owner_id, e);
                false
            }
        }
    }
}
