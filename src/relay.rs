// src/relay.rs
//! Meeting-webhook relay: handshake, filtering and message formatting.

use crate::event::{
    ChallengeResponse, WebhookEvent, PARTICIPANT_JOINED, PARTICIPANT_LEFT, URL_VALIDATION,
};
use crate::sinks::{self, Sink};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::sync::Arc;
use tracing::{debug, error, info};

type HmacSha256 = Hmac<Sha256>;

/// What the relay decided to do with one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayDecision {
    /// Answer the ownership handshake with this body.
    Challenge(ChallengeResponse),
    /// The topic filter excluded this meeting.
    Filtered,
    /// Not an event type that produces a message.
    Ignored,
    /// A handshake that could not be signed.
    Unsigned,
    /// Send this message to every sink.
    Notify(String),
}

/// Lowercase hex HMAC-SHA256 of `token` keyed by `secret`.
///
/// `None` if the MAC cannot be keyed with `secret`.
pub fn sign_challenge(secret: &str, token: &str) -> Option<String> {
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(m) => m,
        Err(e) => {
            error!("Cannot key HMAC with the webhook secret: {}", e);
            return None;
        }
    };
    mac.update(token.as_bytes());
    Some(hex::encode(mac.finalize().into_bytes()))
}

/// Stateless per-request relay logic plus the sinks it fans out to.
pub struct Relay {
    secret: String,
    topic_filter: Option<String>,
    message_suffix: String,
    sinks: Vec<Arc<dyn Sink>>,
}

impl Relay {
    pub fn new(
        secret: impl Into<String>,
        topic_filter: Option<String>,
        message_suffix: impl Into<String>,
        sinks: Vec<Arc<dyn Sink>>,
    ) -> Self {
        Relay {
            secret: secret.into(),
            topic_filter: topic_filter.map(|f| f.to_lowercase()),
            message_suffix: message_suffix.into(),
            sinks,
        }
    }

    /// Decides how to answer `event`.
    ///
    /// The handshake is recognized by its event tag, not by the presence of
    /// a token, and is answered before any filtering.
    pub fn decide(&self, event: &WebhookEvent) -> RelayDecision {
        if event.event == URL_VALIDATION {
            let token = &event.payload.plain_token;
            return match sign_challenge(&self.secret, token) {
                Some(encrypted_token) => {
                    info!("Answering endpoint validation challenge");
                    RelayDecision::Challenge(ChallengeResponse {
                        plain_token: token.clone(),
                        encrypted_token,
                    })
                }
                None => RelayDecision::Unsigned,
            };
        }

        let meeting = &event.payload.object;
        if let Some(filter) = &self.topic_filter {
            if !meeting.topic.to_lowercase().contains(filter.as_str()) {
                debug!(
                    "Dropping {} for topic {:?}: does not match filter",
                    event.event, meeting.topic
                );
                return RelayDecision::Filtered;
            }
        }

        let verb = match event.event.as_str() {
            PARTICIPANT_JOINED => "joined",
            PARTICIPANT_LEFT => "left",
            other => {
                debug!("Ignoring event type {:?}", other);
                return RelayDecision::Ignored;
            }
        };

        RelayDecision::Notify(format!(
            "{} {} {}{}",
            meeting.participant.user_name, verb, meeting.topic, self.message_suffix
        ))
    }

    /// Sends `message` to every sink; returns how many accepted it.
    pub async fn fan_out(&self, message: &str) -> usize {
        sinks::fan_out(&self.sinks, message).await
    }
}
