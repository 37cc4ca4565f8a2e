// src/sinks.rs
//! Outbound notification destinations for the webhook relay.

use crate::config::{AppConfig, IrcConfig};
use crate::error::SinkError;
use async_trait::async_trait;
use futures_util::future::join_all;
use reqwest::Client;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

/// A destination for relay messages.
#[async_trait]
pub trait Sink: Send + Sync {
    fn name(&self) -> &str;
    async fn send(&self, message: &str) -> Result<(), SinkError>;
}

/// Posts `payload={"text": ...}` forms to one or more incoming-webhook URLs.
pub struct ChatWebhookSink {
    http: Client,
    urls: Vec<String>,
}

impl ChatWebhookSink {
    pub fn new(urls: Vec<String>, timeout: Duration) -> Result<Self, SinkError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SinkError::Webhook {
                url: String::new(),
                reason: e.to_string(),
            })?;
        Ok(ChatWebhookSink { http, urls })
    }
}

#[async_trait]
impl Sink for ChatWebhookSink {
    fn name(&self) -> &str {
        "chat-webhook"
    }

    /// Posts to every URL; reports the first failure after trying them all.
    async fn send(&self, message: &str) -> Result<(), SinkError> {
        let payload = json!({ "text": message }).to_string();
        let mut first_error = None;

        for url in &self.urls {
            let result = self
                .http
                .post(url)
                .form(&[("payload", payload.as_str())])
                .send()
                .await;
            let failure = match result {
                Ok(resp) if resp.status().is_success() => {
                    debug!("Webhook {} answered {}", url, resp.status());
                    continue;
                }
                Ok(resp) => format!("status {}", resp.status()),
                Err(e) => e.to_string(),
            };
            error!("Webhook post to {} failed: {}", url, failure);
            if first_error.is_none() {
                first_error = Some(SinkError::Webhook {
                    url: url.clone(),
                    reason: failure,
                });
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Delivers each message over a fresh TLS IRC session.
pub struct IrcSink {
    config: IrcConfig,
    timeout: Duration,
}

impl IrcSink {
    pub fn new(config: IrcConfig, timeout: Duration) -> Self {
        IrcSink { config, timeout }
    }
}

#[async_trait]
impl Sink for IrcSink {
    fn name(&self) -> &str {
        "irc"
    }

    async fn send(&self, message: &str) -> Result<(), SinkError> {
        crate::irc::send_over_tls(&self.config, message, self.timeout).await
    }
}

/// Builds every sink the configuration enables.
pub fn from_config(config: &AppConfig) -> Result<Vec<Arc<dyn Sink>>, SinkError> {
    let mut sinks: Vec<Arc<dyn Sink>> = Vec::new();
    if let Some(urls) = &config.slack_webhook_urls {
        sinks.push(Arc::new(ChatWebhookSink::new(
            urls.clone(),
            config.http_timeout,
        )?));
    }
    if let Some(irc) = &config.irc {
        sinks.push(Arc::new(IrcSink::new(irc.clone(), config.http_timeout)));
    }
    Ok(sinks)
}

/// Sends `message` to every sink concurrently.
///
/// Failures are logged and swallowed; the returned count is how many sinks
/// accepted the message.
pub async fn fan_out(sinks: &[Arc<dyn Sink>], message: &str) -> usize {
    let results = join_all(sinks.iter().map(|sink| async move {
        let result = sink.send(message).await;
        (sink.name().to_string(), result)
    }))
    .await;

    let mut delivered = 0;
    for (name, result) in results {
        match result {
            Ok(()) => {
                info!("Relayed message via {}", name);
                delivered += 1;
            }
            Err(e) => error!("Sink {} failed: {}", name, e),
        }
    }
    delivered
}
