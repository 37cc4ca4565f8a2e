// src/lib.rs

#![doc = r#"
# Dropwatch

Dropwatch watches a drop directory for images (or JSON sidecars describing an
image plus caption) and posts them to Slack, issues per-user API keys for the
HTTP upload endpoint, and separately relays meeting participant webhooks to a
Slack incoming webhook and/or an IRC channel.

## Modules

- [`config`]: Configuration loading and merging from CLI, file, and environment.
- [`classify`]: Image / sidecar / unknown classification and file relocation.
- [`descriptor`]: Pending uploads and their JSON sidecar files.
- [`credentials`]: File-per-key API key store.
- [`chat`]: Slack Web API client.
- [`dispatcher`]: Upload-then-relocate of classified files.
- [`watcher`]: Per-directory file system watcher.
- [`event`]: Meeting webhook payloads.
- [`relay`]: Webhook handshake, filtering and message formatting.
- [`sinks`]: Chat webhook and IRC notification sinks.
- [`irc`]: Minimal TLS IRC session.
- [`web`]: HTTP routes for both services.
- [`systemd`]: systemd unit rendering.
- [`error`]: Error types.
"#]

pub mod chat;
pub mod classify;
pub mod config;
pub mod credentials;
pub mod descriptor;
pub mod dispatcher;
pub mod error;
pub mod event;
pub mod irc;
pub mod relay;
pub mod sinks;
pub mod systemd;
pub mod watcher;
pub mod web;
