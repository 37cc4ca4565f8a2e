// src/web.rs
use crate::classify::has_image_extension;
use crate::credentials::{CredentialStore, KeyStatus};
use crate::descriptor::{sidecar_path_for, write_atomic, write_sidecar, ImageDescriptor};
use crate::error::ApiError;
use crate::event::WebhookEvent;
use crate::relay::{Relay, RelayDecision};
use anyhow::Result;
use axum::{
    body::Bytes,
    extract::{multipart::MultipartRejection, DefaultBodyLimit, Multipart, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch::Receiver as WatchReceiver;
use tracing::{debug, error, info, warn};

/// Header carrying the bearer API key.
pub const API_KEY_HEADER: &str = "X-API-Key";

/// Multipart uploads are capped at 10 MiB.
const MAX_UPLOAD_BYTES: usize = 10 << 20;

/// Shared state for the uploader service.
#[derive(Clone)]
pub struct UploadState {
    pub credentials: Arc<CredentialStore>,
    pub uploads_dir: PathBuf,
}

/// Shared state for the relay service.
#[derive(Clone)]
pub struct RelayState {
    pub relay: Arc<Relay>,
}

#[derive(Deserialize)]
struct KeyRequest {
    #[serde(default)]
    slack_id: String,
}

fn api_key(headers: &HeaderMap) -> &str {
    headers
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
}

/// Resolves the key to its owner or rejects the request.
async fn authorize(state: &UploadState, headers: &HeaderMap) -> Result<String, ApiError> {
    match state.credentials.validate(api_key(headers)).await {
        KeyStatus::Valid { owner_id } => Ok(owner_id),
        KeyStatus::Revoked => Err(ApiError::Unauthorized("Key has been revoked.".to_string())),
        KeyStatus::NotFound => Err(ApiError::Unauthorized("Key not valid.".to_string())),
    }
}

/// `POST /upload`: stores the image plus a sidecar in the uploads directory.
///
/// The watcher picks the pair up from there.
async fn upload_handler(
    State(state): State<UploadState>,
    headers: HeaderMap,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Response, ApiError> {
    let owner_id = authorize(&state, &headers).await.map_err(|e| {
        warn!("Unauthorized upload attempt: {}", e);
        e
    })?;
    let mut multipart =
        multipart.map_err(|e| ApiError::BadRequest(format!("Unable to parse form: {}", e)))?;

    let mut image: Option<(String, Bytes)> = None;
    let mut caption = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("Unable to parse form: {}", e)))?
    {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("image") => {
                let original = field.file_name().unwrap_or_default().to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::BadRequest(format!("Unable to get image: {}", e)))?;
                image = Some((original, bytes));
            }
            Some("caption") => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| ApiError::BadRequest(format!("Unable to read caption: {}", e)))?;
                caption = Some(text);
            }
            other => debug!("Ignoring form field {:?}", other),
        }
    }

    let (original, bytes) =
        image.ok_or_else(|| ApiError::BadRequest("Unable to get image".to_string()))?;
    let base_name = Path::new(&original)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    if base_name.is_empty() || !has_image_extension(Path::new(&base_name)) {
        return Err(ApiError::BadRequest(format!(
            "Unsupported image file name {:?}",
            original
        )));
    }

    let image_name = format!("{}_{}", chrono::Utc::now().timestamp_millis(), base_name);
    let image_path = state.uploads_dir.join(&image_name);
    write_atomic(&image_path, &bytes).await.map_err(|e| {
        error!("Error saving image file {}: {}", image_path.display(), e);
        ApiError::Internal("Unable to save image".to_string())
    })?;

    let descriptor = ImageDescriptor {
        image_path: image_path.clone(),
        caption: caption.filter(|c| !c.is_empty()),
        author: Some(owner_id),
        sidecar_path: None,
    };
    let sidecar = sidecar_path_for(&image_path);
    write_sidecar(&descriptor, &sidecar).await.map_err(|e| {
        error!("Error saving JSON file {}: {}", sidecar.display(), e);
        ApiError::Internal("Unable to save JSON".to_string())
    })?;

    info!("Accepted upload {} ({} bytes)", image_name, bytes.len());
    Ok((
        StatusCode::OK,
        Json(json!({ "message": "Upload successful", "filename": image_name })),
    )
        .into_response())
}

/// `POST /api`: issues a key for a recognized identity.
async fn issue_key_handler(
    State(state): State<UploadState>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let request: KeyRequest = serde_json::from_slice(&body).map_err(|e| {
        debug!("Error processing JSON POST: {}", e);
        ApiError::BadRequest(e.to_string())
    })?;

    match state.credentials.issue(&request.slack_id).await {
        Some(apikey) => Ok(Json(json!({ "status": "ok", "apikey": apikey })).into_response()),
        None => Err(ApiError::Unauthorized("identity not recognized".to_string())),
    }
}

/// `DELETE /api`: revokes the key presented in the header.
async fn revoke_key_handler(
    State(state): State<UploadState>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let key = api_key(&headers).to_string();
    authorize(&state, &headers).await.map_err(|e| {
        warn!("Unable to revoke key because key not valid: {}", e);
        e
    })?;

    if state.credentials.revoke(&key).await {
        Ok(Json(json!({ "status": "ok", "message": "Key revoked." })).into_response())
    } else {
        error!("Unable to revoke key, but key file found.");
        Err(ApiError::Internal("Unable to revoke key.".to_string()))
    }
}

/// `POST /` and `POST /zoom`: the meeting webhook receiver.
async fn webhook_handler(
    State(state): State<RelayState>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let event: WebhookEvent = serde_json::from_slice(&body).map_err(|e| {
        warn!("Rejecting malformed webhook payload: {}", e);
        ApiError::BadRequest(format!("malformed webhook payload: {}", e))
    })?;
    debug!("Webhook event {:?} at {}", event.event, event.event_ts);

    match state.relay.decide(&event) {
        RelayDecision::Challenge(reply) => Ok(Json(reply).into_response()),
        RelayDecision::Notify(message) => {
            // Sinks can be slow (IRC waits before quitting); answer first.
            let relay = Arc::clone(&state.relay);
            tokio::spawn(async move {
                relay.fan_out(&message).await;
            });
            Ok(StatusCode::OK.into_response())
        }
        RelayDecision::Filtered | RelayDecision::Ignored => Ok(StatusCode::OK.into_response()),
        RelayDecision::Unsigned => Err(ApiError::Internal(
            "unable to sign validation challenge".to_string(),
        )),
    }
}

/// Routes of the uploader service.
pub fn upload_router(state: UploadState) -> Router {
    Router::new()
        .route("/upload", post(upload_handler))
        .route("/api", post(issue_key_handler).delete(revoke_key_handler))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .with_state(state)
}

/// Routes of the relay service.
pub fn relay_router(state: RelayState) -> Router {
    Router::new()
        .route("/", post(webhook_handler))
        .route("/zoom", post(webhook_handler))
        .with_state(state)
}

/// Serves `app` on `web_addr` until the shutdown signal fires.
///
/// # Returns
/// Returns `Ok(())` when the server shuts down cleanly, or an error if startup fails.
pub async fn start_server(
    web_addr: &str,
    app: Router,
    shutdown_signal: WatchReceiver<bool>,
) -> Result<()> {
    let socket_addr: SocketAddr = web_addr.parse()?;

    info!("Web server starting on http://{}", socket_addr);

    let mut shutdown = shutdown_signal.clone();
    axum::serve(
        tokio::net::TcpListener::bind(socket_addr).await?,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        shutdown.changed().await.ok();
        info!("Web server shutting down gracefully.");
    })
    .await?;

    info!("Web server stopped.");
    Ok(())
}
