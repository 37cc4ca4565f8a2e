// src/error.rs
//! Error types shared across the watcher, the HTTP services and the sinks.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Startup configuration problems. Always fatal.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A value required by the selected mode is unset or empty.
    #[error("missing required configuration: {0}")]
    Missing(&'static str),

    /// A value is present but unusable.
    #[error("invalid configuration value for '{key}': {reason}")]
    Invalid { key: &'static str, reason: String },

    /// Relay mode with every sink disabled.
    #[error("no notification sink enabled; enable slack_webhook_enable and/or irc_enable")]
    NoSinks,
}

/// Failures talking to the chat platform API.
#[derive(Error, Debug)]
pub enum ChatError {
    #[error("chat platform request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// The API answered but reported `ok: false`.
    #[error("chat platform rejected {method}: {reason}")]
    Api { method: &'static str, reason: String },
}

/// Failures delivering to a notification sink.
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("webhook post to {url} failed: {reason}")]
    Webhook { url: String, reason: String },

    #[error("irc i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("irc tls setup failed: {0}")]
    Tls(String),

    #[error("irc server rejected the session: {0}")]
    Protocol(String),

    #[error("irc session timed out")]
    Timeout,
}

/// An error at the HTTP boundary. Always rendered as a JSON body.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({ "status": "error", "message": self.to_string() });
        (self.status(), Json(body)).into_response()
    }
}
