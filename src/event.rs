// src/event.rs
use serde::{Deserialize, Serialize};

/// Event tag of the endpoint ownership handshake.
pub const URL_VALIDATION: &str = "endpoint.url_validation";
pub const PARTICIPANT_JOINED: &str = "meeting.participant_joined";
pub const PARTICIPANT_LEFT: &str = "meeting.participant_left";

/// An inbound meeting-platform webhook notification.
///
/// Only the fields the relay reads are modelled; everything is defaulted so
/// that payloads of other event types still deserialize.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct WebhookEvent {
    /// e.g. `meeting.participant_joined` or `endpoint.url_validation`.
    #[serde(default)]
    pub event: String,
    #[serde(default)]
    pub event_ts: i64,
    #[serde(default)]
    pub payload: Payload,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct Payload {
    /// Present only in the handshake.
    #[serde(default, rename = "plainToken")]
    pub plain_token: String,
    #[serde(default)]
    pub account_id: String,
    #[serde(default)]
    pub object: Meeting,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct Meeting {
    #[serde(default)]
    pub topic: String,
    #[serde(default)]
    pub participant: Participant,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct Participant {
    #[serde(default)]
    pub user_name: String,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub email: String,
}

/// Body returned for the handshake.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ChallengeResponse {
    #[serde(rename = "plainToken")]
    pub plain_token: String,
    #[serde(rename = "encryptedToken")]
    pub encrypted_token: String,
}
