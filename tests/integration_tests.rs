//! # Integration Tests for Dropwatch
//!
//! Covers configuration merging, file classification, the credential store,
//! the dispatcher, and the directory watcher end to end against a recording
//! chat platform.

use async_trait::async_trait;
use clap::Parser;
use dropwatch::chat::{ChatPlatform, ImageUpload};
use dropwatch::classify::{classify, classify_or_discard, FileKind};
use dropwatch::config::{AppConfig, CliArgs, Mode};
use dropwatch::credentials::{CredentialEntry, CredentialStore, IdentityDirectory, KeyStatus};
use dropwatch::descriptor::{sidecar_path_for, ImageDescriptor, DEFAULT_AUTHOR};
use dropwatch::dispatcher::{DispatchOutcome, Dispatcher};
use dropwatch::error::{ChatError, ConfigError};
use dropwatch::systemd::{service_args, SystemdUnit};
use dropwatch::watcher::{DirectoryWatcher, WatchState};
use figment::providers::{Format, Toml};
use figment::Figment;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio::time::{sleep, timeout, Duration};

/// Generous bound for debounced watcher events to land.
const WATCH_TIMEOUT: Duration = Duration::from_secs(15);

/// Chat platform double that records every upload.
#[derive(Default)]
struct RecordingChat {
    uploads: Mutex<Vec<ImageUpload>>,
    fail: bool,
}

impl RecordingChat {
    fn failing() -> Self {
        RecordingChat {
            fail: true,
            ..Default::default()
        }
    }

    fn uploads(&self) -> Vec<ImageUpload> {
        self.uploads.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatPlatform for RecordingChat {
    async fn upload_image(&self, upload: ImageUpload) -> Result<(), ChatError> {
        self.uploads.lock().unwrap().push(upload);
        if self.fail {
            return Err(ChatError::Api {
                method: "files.completeUploadExternal",
                reason: "channel_not_found".to_string(),
            });
        }
        Ok(())
    }
}

/// Identity directory that knows a fixed set of users.
struct KnownUsers(Vec<&'static str>);

#[async_trait]
impl IdentityDirectory for KnownUsers {
    async fn is_recognized(&self, owner_id: &str) -> bool {
        self.0.contains(&owner_id)
    }
}

/// uploads/, processed/ and discard/ side by side in a temp dir.
struct DropDirs {
    _root: tempfile::TempDir,
    uploads: PathBuf,
    processed: PathBuf,
    discard: PathBuf,
}

fn drop_dirs() -> DropDirs {
    let root = tempfile::tempdir().expect("Failed to create temp dir");
    let uploads = root.path().join("uploads");
    let processed = root.path().join("processed");
    let discard = root.path().join("discard");
    for dir in [&uploads, &processed, &discard] {
        std::fs::create_dir_all(dir).expect("Failed to create dir");
    }
    DropDirs {
        _root: root,
        uploads,
        processed,
        discard,
    }
}

fn credential_store(dir: &Path) -> CredentialStore {
    CredentialStore::new(dir, Arc::new(KnownUsers(vec!["U123", "U456"])))
}

async fn wait_for_file(path: &Path) -> bool {
    timeout(WATCH_TIMEOUT, async {
        while !path.exists() {
            sleep(Duration::from_millis(100)).await;
        }
    })
    .await
    .is_ok()
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Test: directories default under data_dir and CLI folders extend the watch list.
#[test]
fn test_config_defaults_and_cli_folders() {
    let cli_args = CliArgs::parse_from(["dropwatch", "--webaddr", "127.0.0.1:9000", "/srv/extra"]);
    let fig = Figment::new().merge(Toml::string(
        r#"
        data_dir = "/var/lib/dropwatch"
        processed_dir = "/mnt/done"
        slack_token = "xoxb-1"
        slack_channel = "C1"
        "#,
    ));

    let config = AppConfig::resolve(&cli_args, fig).expect("Failed to resolve config");

    assert_eq!(config.mode, Mode::Uploader);
    assert_eq!(config.web_addr, "127.0.0.1:9000");
    assert_eq!(config.uploads_dir, PathBuf::from("/var/lib/dropwatch/uploads"));
    assert_eq!(config.processed_dir, PathBuf::from("/mnt/done"));
    assert_eq!(
        config.credentials_dir,
        PathBuf::from("/var/lib/dropwatch/credentials")
    );
    assert_eq!(
        config.watch_dirs,
        vec![
            PathBuf::from("/var/lib/dropwatch/uploads"),
            PathBuf::from("/srv/extra")
        ]
    );
    assert_eq!(config.rescan_interval, None);
    assert!(config.validate().is_ok());
}

/// Test: the uploader refuses to start without chat credentials.
#[test]
fn test_config_uploader_requires_slack_token() {
    let cli_args = CliArgs::parse_from(["dropwatch"]);
    let config = AppConfig::resolve(&cli_args, Figment::new()).unwrap();
    assert_eq!(config.validate(), Err(ConfigError::Missing("slack_token")));
}

/// Test: relay mode with every sink disabled is a startup error.
#[test]
fn test_config_relay_requires_a_sink() {
    let cli_args = CliArgs::parse_from(["dropwatch", "--relay"]);
    let fig = Figment::new().merge(Toml::string(
        r#"
        webhook_secret = "s3cret"
        slack_webhook_urls = "https://hooks.example/a"
        "#,
    ));
    let config = AppConfig::resolve(&cli_args, fig).unwrap();

    assert_eq!(config.mode, Mode::Relay);
    // URLs are ignored until the sink is enabled.
    assert_eq!(config.slack_webhook_urls, None);
    assert_eq!(config.validate(), Err(ConfigError::NoSinks));
}

/// Test: comma-separated webhook URLs and IRC settings resolve into enabled sinks.
#[test]
fn test_config_relay_sinks_resolve() {
    let cli_args = CliArgs::parse_from(["dropwatch", "--relay"]);
    let fig = Figment::new().merge(Toml::string(
        r##"
        webhook_secret = "s3cret"
        slack_webhook_enable = true
        slack_webhook_urls = "https://hooks.example/a, https://hooks.example/b"
        irc_enable = true
        irc_server = "irc.example:6697"
        irc_channel = "#ops"
        irc_nick = "relaybot"
        "##,
    ));
    let config = AppConfig::resolve(&cli_args, fig).unwrap();

    assert_eq!(
        config.slack_webhook_urls,
        Some(vec![
            "https://hooks.example/a".to_string(),
            "https://hooks.example/b".to_string()
        ])
    );
    let irc = config.irc.as_ref().expect("IRC should be enabled");
    assert_eq!(irc.channel, "#ops");
    assert!(!irc.insecure_tls, "certificate checks must be on by default");
    assert_eq!(irc.quit_delay, Duration::from_secs(1));
    assert!(config.validate().is_ok());
}

/// Test: an enabled chat webhook sink without URLs is fatal even when IRC is complete.
#[test]
fn test_config_enabled_webhook_requires_urls() {
    let cli_args = CliArgs::parse_from(["dropwatch", "--relay"]);
    let fig = Figment::new().merge(Toml::string(
        r##"
        webhook_secret = "s3cret"
        slack_webhook_enable = true
        irc_enable = true
        irc_server = "irc.example:6697"
        irc_channel = "#ops"
        irc_nick = "relaybot"
        "##,
    ));
    let config = AppConfig::resolve(&cli_args, fig).unwrap();

    assert_eq!(config.slack_webhook_urls, Some(Vec::new()));
    assert_eq!(
        config.validate(),
        Err(ConfigError::Missing("slack_webhook_urls"))
    );
}

/// Test: an enabled IRC sink without a nick fails validation.
#[test]
fn test_config_irc_requires_nick() {
    let cli_args = CliArgs::parse_from(["dropwatch", "--relay"]);
    let fig = Figment::new().merge(Toml::string(
        r##"
        webhook_secret = "s3cret"
        irc_enable = true
        irc_server = "irc.example:6697"
        irc_channel = "#ops"
        "##,
    ));
    let config = AppConfig::resolve(&cli_args, fig).unwrap();
    assert_eq!(config.validate(), Err(ConfigError::Missing("irc_nick")));
}

// ---------------------------------------------------------------------------
// Systemd unit
// ---------------------------------------------------------------------------

/// Test: the unit forwards mode, config and folders as absolute paths.
#[test]
fn test_systemd_service_args() {
    let cli_args = CliArgs::parse_from([
        "dropwatch",
        "--relay",
        "--systemd-unit",
        "--config",
        "conf/dw.toml",
        "--log-level",
        "debug",
        "drops",
        "/srv/extra",
    ]);

    let args = service_args(&cli_args, Path::new("/opt/dropwatch"));

    assert_eq!(
        args,
        vec![
            "--relay",
            "--config",
            "/opt/dropwatch/conf/dw.toml",
            "--log-level",
            "debug",
            "/opt/dropwatch/drops",
            "/srv/extra",
        ]
    );
    assert!(!args.iter().any(|a| a == "--systemd-unit"));
}

/// Test: the rendered unit pins the working directory and quotes spaced paths.
#[test]
fn test_systemd_render() {
    let cli_args = CliArgs::parse_from(["dropwatch", "--config", "/etc/drop watch.toml"]);
    let unit = SystemdUnit::for_executable(
        Path::new("/usr/local/bin/dropwatch"),
        PathBuf::from("/var/lib/dropwatch"),
        "drop",
        &cli_args,
    );

    let rendered = unit.render();
    let lines: Vec<&str> = rendered.lines().collect();
    for expected in [
        "[Unit]",
        "Description=dropwatch",
        "After=network.target",
        "[Service]",
        "WorkingDirectory=/var/lib/dropwatch",
        "ExecStart=/usr/local/bin/dropwatch --config \"/etc/drop watch.toml\"",
        "Restart=always",
        "User=drop",
        "[Install]",
        "WantedBy=multi-user.target",
    ] {
        assert!(lines.contains(&expected), "missing {:?} in\n{}", expected, rendered);
    }
}

/// Test: the unit for this process runs from the current directory.
#[test]
fn test_systemd_for_current_process() {
    let cli_args = CliArgs::parse_from(["dropwatch", "--relay"]);
    let unit = SystemdUnit::for_current_process(&cli_args).unwrap();

    assert_eq!(unit.working_directory, std::env::current_dir().unwrap());
    assert!(unit.exec_start.ends_with(" --relay"), "{}", unit.exec_start);
    assert!(unit.render().contains(&format!(
        "WorkingDirectory={}\n",
        unit.working_directory.display()
    )));
}

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

/// Test: image extensions match regardless of case.
#[tokio::test]
async fn test_classify_is_case_insensitive() {
    let dir = tempfile::tempdir().unwrap();
    for name in ["photo.jpg", "photo.JPG", "a.Jpeg", "b.PNG", "c.gif"] {
        let path = dir.path().join(name);
        std::fs::write(&path, b"bytes").unwrap();
        assert_eq!(classify(&path).await, FileKind::Image, "{}", name);
    }
    assert_eq!(
        classify(&dir.path().join("photo.jpg")).await,
        classify(&dir.path().join("photo.JPG")).await
    );
    assert_eq!(classify(&dir.path().join("notes.txt")).await, FileKind::Unknown);
}

/// Test: JSON is a sidecar only when it parses.
#[tokio::test]
async fn test_classify_json_by_content() {
    let dir = tempfile::tempdir().unwrap();
    let good = dir.path().join("good.JSON");
    let bad = dir.path().join("bad.json");
    std::fs::write(&good, br#"{"caption": "hi"}"#).unwrap();
    std::fs::write(&bad, b"{not json").unwrap();

    assert_eq!(classify(&good).await, FileKind::JsonSidecar);
    assert_eq!(classify(&bad).await, FileKind::Unknown);
    assert_eq!(
        classify(&dir.path().join("missing.json")).await,
        FileKind::Unknown
    );
}

/// Test: a malformed JSON file is moved to the discard directory.
#[tokio::test]
async fn test_classify_or_discard_moves_malformed_json() {
    let dirs = drop_dirs();
    let bad = dirs.uploads.join("bad.json");
    let stray = dirs.uploads.join("notes.txt");
    std::fs::write(&bad, b"{\"caption\": ").unwrap();
    std::fs::write(&stray, b"hello").unwrap();

    assert_eq!(
        classify_or_discard(&bad, &dirs.discard).await,
        FileKind::Unknown
    );
    assert_eq!(
        classify_or_discard(&stray, &dirs.discard).await,
        FileKind::Unknown
    );
    assert!(!bad.exists());
    assert!(dirs.discard.join("bad.json").exists());
    // Non-JSON unknowns stay put.
    assert!(stray.exists());
}

// ---------------------------------------------------------------------------
// Sidecars
// ---------------------------------------------------------------------------

/// Test: sidecar fields are optional and the image path can be implied by the name.
#[tokio::test]
async fn test_sidecar_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let image = dir.path().join("1700000000000_cat.png");
    let sidecar = sidecar_path_for(&image);
    assert_eq!(
        sidecar.file_name().unwrap().to_string_lossy(),
        "1700000000000_cat.png.json"
    );
    std::fs::write(&sidecar, br#"{"caption": "a cat"}"#).unwrap();

    let descriptor = ImageDescriptor::from_sidecar(&sidecar).await.unwrap();
    assert_eq!(descriptor.image_path, image);
    assert_eq!(descriptor.caption.as_deref(), Some("a cat"));
    assert_eq!(descriptor.author_or_default(), DEFAULT_AUTHOR);
    assert_eq!(descriptor.sidecar_path.as_deref(), Some(sidecar.as_path()));
}

// ---------------------------------------------------------------------------
// Credential store
// ---------------------------------------------------------------------------

/// Test: an issued key is valid until revoked, and revoked for good after.
#[tokio::test]
async fn test_key_lifecycle() {
    let dir = tempfile::tempdir().unwrap();
    let store = credential_store(dir.path());

    let key = store.issue("U123").await.expect("U123 should get a key");
    assert_eq!(
        store.validate(&key).await,
        KeyStatus::Valid {
            owner_id: "U123".to_string()
        }
    );

    assert!(store.revoke(&key).await);
    assert_eq!(store.validate(&key).await, KeyStatus::Revoked);

    // Revoking again is harmless and changes nothing.
    let once = store.load(&key).await.unwrap();
    assert!(store.revoke(&key).await);
    let twice = store.load(&key).await.unwrap();
    assert!(twice.revoked);
    assert_eq!(once, twice);
    assert_eq!(store.validate(&key).await, KeyStatus::Revoked);
}

/// Test: keys are unique and persisted with the expected field names.
#[tokio::test]
async fn test_issued_entries_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let store = credential_store(dir.path());

    let first = store.issue("U123").await.unwrap();
    let second = store.issue("U123").await.unwrap();
    assert_ne!(first, second);

    let raw = std::fs::read_to_string(dir.path().join(format!("{}.json", first))).unwrap();
    let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(value["api_key"], first.as_str());
    assert_eq!(value["slack_id"], "U123");
    assert_eq!(value["revoked"], false);
    assert!(value["issue_date"].as_str().map(|s| !s.is_empty()).unwrap_or(false));

    let entry: CredentialEntry = serde_json::from_str(&raw).unwrap();
    assert_eq!(entry.key, first);
    assert_eq!(entry.owner_id, "U123");
    assert!(!entry.revoked);
}

/// Test: unknown identities get no key and nothing is written.
#[tokio::test]
async fn test_issue_rejects_unknown_identity() {
    let dir = tempfile::tempdir().unwrap();
    let store = credential_store(dir.path());

    assert_eq!(store.issue("U999").await, None);
    assert_eq!(store.issue("").await, None);
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

/// Test: unknown keys are NotFound and cannot be revoked.
#[tokio::test]
async fn test_unknown_key() {
    let dir = tempfile::tempdir().unwrap();
    let store = credential_store(dir.path());
    store.issue("U456").await.unwrap();

    assert_eq!(store.validate("nope").await, KeyStatus::NotFound);
    assert_eq!(store.validate("").await, KeyStatus::NotFound);
    assert!(!store.revoke("nope").await);
    assert!(!store.revoke("../escape").await);
}

/// Test: a corrupt entry file never validates, while other corrupt files are ignored.
#[tokio::test]
async fn test_corrupt_entries_fail_closed() {
    let dir = tempfile::tempdir().unwrap();
    let store = credential_store(dir.path());
    let good = store.issue("U123").await.unwrap();

    std::fs::write(dir.path().join("deadbeef.json"), b"{\"api_key\": ").unwrap();
    std::fs::write(dir.path().join("garbage.json"), b"\x00\x01").unwrap();

    assert_eq!(store.validate("deadbeef").await, KeyStatus::Revoked);
    assert!(!store.revoke("deadbeef").await);
    assert_eq!(
        store.validate(&good).await,
        KeyStatus::Valid {
            owner_id: "U123".to_string()
        }
    );
}

/// Test: per-key revocation locks are released once revocations finish.
#[tokio::test]
async fn test_revocation_locks_are_released() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(credential_store(dir.path()));

    let mut keys = Vec::new();
    for _ in 0..5 {
        keys.push(store.issue("U123").await.unwrap());
    }

    // Every key revoked several times concurrently, plus some unknown keys.
    let mut tasks = tokio::task::JoinSet::new();
    for key in keys.iter().cloned().chain(["missing-1".to_string(), "missing-2".to_string()]) {
        for _ in 0..4 {
            let store = Arc::clone(&store);
            let key = key.clone();
            tasks.spawn(async move { store.revoke(&key).await });
        }
    }
    while let Some(joined) = tasks.join_next().await {
        joined.unwrap();
    }

    assert_eq!(store.locked_keys(), 0);
    for key in &keys {
        assert_eq!(store.validate(key).await, KeyStatus::Revoked);
    }
}

/// Test: when two files claim the same key, a revoked one wins.
#[tokio::test]
async fn test_duplicate_key_revoked_wins() {
    let dir = tempfile::tempdir().unwrap();
    let store = credential_store(dir.path());
    let key = store.issue("U123").await.unwrap();

    let mut copy = store.load(&key).await.unwrap();
    copy.revoked = true;
    std::fs::write(
        dir.path().join("copy.json"),
        serde_json::to_vec(&copy).unwrap(),
    )
    .unwrap();

    assert_eq!(store.validate(&key).await, KeyStatus::Revoked);
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

/// Test: a sidecar drives the upload of its image; the bare image defers to it.
#[tokio::test]
async fn test_dispatch_sidecar_with_caption() {
    let dirs = drop_dirs();
    let chat = Arc::new(RecordingChat::default());
    let dispatcher = Dispatcher::new(chat.clone(), &dirs.processed, &dirs.discard);

    let image = dirs.uploads.join("42_cat.png");
    std::fs::write(&image, b"png").unwrap();
    let sidecar = sidecar_path_for(&image);
    std::fs::write(
        &sidecar,
        serde_json::json!({
            "image_path": image,
            "caption": "Office cat",
            "author": "U123",
        })
        .to_string(),
    )
    .unwrap();

    assert_eq!(dispatcher.handle_path(&image).await, DispatchOutcome::Skipped);
    assert_eq!(
        dispatcher.handle_path(&sidecar).await,
        DispatchOutcome::Uploaded
    );

    let uploads = chat.uploads();
    assert_eq!(uploads.len(), 1);
    assert_eq!(uploads[0].file_name, "42_cat.png");
    assert_eq!(uploads[0].bytes, b"png");
    assert_eq!(uploads[0].title, "Office cat");
    assert!(uploads[0].comment.contains("Office cat"));
    assert!(uploads[0].comment.contains("U123"));

    assert!(!image.exists());
    assert!(!sidecar.exists());
    assert!(dirs.processed.join("42_cat.png").exists());
    assert!(dirs.processed.join("42_cat.png.json").exists());
}

/// Test: a bare image is attributed to the default author.
#[tokio::test]
async fn test_dispatch_bare_image_default_author() {
    let dirs = drop_dirs();
    let chat = Arc::new(RecordingChat::default());
    let dispatcher = Dispatcher::new(chat.clone(), &dirs.processed, &dirs.discard);

    let image = dirs.uploads.join("dog.GIF");
    std::fs::write(&image, b"gif").unwrap();

    assert_eq!(
        dispatcher.dispatch(ImageDescriptor::bare(&image)).await,
        DispatchOutcome::Uploaded
    );
    let uploads = chat.uploads();
    assert_eq!(uploads[0].title, "dog.GIF");
    assert!(uploads[0].comment.contains(DEFAULT_AUTHOR));

    // A second dispatch of the same descriptor finds nothing left to send.
    assert_eq!(
        dispatcher.dispatch(ImageDescriptor::bare(&image)).await,
        DispatchOutcome::Skipped
    );
    assert_eq!(chat.uploads().len(), 1);
}

/// Test: a failed upload leaves the source files in place.
#[tokio::test]
async fn test_dispatch_upload_failure_leaves_files() {
    let dirs = drop_dirs();
    let chat = Arc::new(RecordingChat::failing());
    let dispatcher = Dispatcher::new(chat.clone(), &dirs.processed, &dirs.discard);

    let image = dirs.uploads.join("cat.png");
    std::fs::write(&image, b"png").unwrap();

    match dispatcher.handle_path(&image).await {
        DispatchOutcome::UploadFailed(reason) => assert!(reason.contains("channel_not_found")),
        other => panic!("expected UploadFailed, got {:?}", other),
    }
    assert!(image.exists());
    assert!(!dirs.processed.join("cat.png").exists());
    assert_eq!(chat.uploads().len(), 1);
}

/// Test: a sidecar pointing at a missing image is discarded without uploading.
#[tokio::test]
async fn test_dispatch_sidecar_without_image_is_discarded() {
    let dirs = drop_dirs();
    let chat = Arc::new(RecordingChat::default());
    let dispatcher = Dispatcher::new(chat.clone(), &dirs.processed, &dirs.discard);

    let sidecar = dirs.uploads.join("orphan.json");
    std::fs::write(
        &sidecar,
        serde_json::json!({ "image_path": dirs.uploads.join("gone.png") }).to_string(),
    )
    .unwrap();

    assert_eq!(
        dispatcher.handle_path(&sidecar).await,
        DispatchOutcome::Skipped
    );
    assert!(dirs.discard.join("orphan.json").exists());
    assert!(chat.uploads().is_empty());
}

// ---------------------------------------------------------------------------
// Watcher
// ---------------------------------------------------------------------------

async fn start_watcher(
    dirs: &DropDirs,
    chat: Arc<RecordingChat>,
) -> (
    tokio::task::JoinHandle<anyhow::Result<()>>,
    watch::Sender<bool>,
    watch::Receiver<WatchState>,
) {
    let dispatcher = Arc::new(Dispatcher::new(chat, &dirs.processed, &dirs.discard));
    let watcher = DirectoryWatcher::new(&dirs.uploads, dispatcher);
    let mut state = watcher.state();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(watcher.run(shutdown_rx));

    timeout(WATCH_TIMEOUT, state.wait_for(|s| *s == WatchState::Watching))
        .await
        .expect("Watcher never started")
        .expect("Watcher state channel closed");
    (handle, shutdown_tx, state)
}

async fn stop_watcher(
    handle: tokio::task::JoinHandle<anyhow::Result<()>>,
    shutdown_tx: watch::Sender<bool>,
    state: watch::Receiver<WatchState>,
) {
    shutdown_tx.send(true).unwrap();
    timeout(WATCH_TIMEOUT, handle)
        .await
        .expect("Watcher did not stop")
        .expect("Watcher task panicked")
        .expect("Watcher returned an error");
    assert_eq!(*state.borrow(), WatchState::Stopped);
}

/// Test: dropping cat.png uploads it once and moves it to processed.
#[tokio::test]
async fn test_watcher_uploads_dropped_image() {
    let dirs = drop_dirs();
    let chat = Arc::new(RecordingChat::default());
    let (handle, shutdown_tx, state) = start_watcher(&dirs, chat.clone()).await;

    std::fs::write(dirs.uploads.join("cat.png"), b"png bytes").unwrap();

    assert!(
        wait_for_file(&dirs.processed.join("cat.png")).await,
        "cat.png never reached processed"
    );
    assert!(!dirs.uploads.join("cat.png").exists());

    // Let any straggling events settle before counting.
    sleep(Duration::from_millis(1500)).await;
    let uploads = chat.uploads();
    assert_eq!(uploads.len(), 1);
    assert_eq!(uploads[0].file_name, "cat.png");

    stop_watcher(handle, shutdown_tx, state).await;
}

/// Test: dropping a malformed sidecar discards it and uploads nothing.
#[tokio::test]
async fn test_watcher_discards_malformed_sidecar() {
    let dirs = drop_dirs();
    let chat = Arc::new(RecordingChat::default());
    let (handle, shutdown_tx, state) = start_watcher(&dirs, chat.clone()).await;

    std::fs::write(dirs.uploads.join("bad.json"), b"{ this is not json").unwrap();

    assert!(
        wait_for_file(&dirs.discard.join("bad.json")).await,
        "bad.json never reached discard"
    );
    assert!(!dirs.uploads.join("bad.json").exists());
    assert!(chat.uploads().is_empty());

    stop_watcher(handle, shutdown_tx, state).await;
}

/// Test: files present before the watch starts are swept up.
#[tokio::test]
async fn test_watcher_sweeps_existing_files() {
    let dirs = drop_dirs();
    std::fs::write(dirs.uploads.join("early.jpeg"), b"jpeg").unwrap();
    std::fs::write(dirs.uploads.join("readme.txt"), b"ignore me").unwrap();

    let chat = Arc::new(RecordingChat::default());
    let (handle, shutdown_tx, state) = start_watcher(&dirs, chat.clone()).await;

    assert!(wait_for_file(&dirs.processed.join("early.jpeg")).await);
    assert!(dirs.uploads.join("readme.txt").exists());
    assert_eq!(chat.uploads().len(), 1);

    stop_watcher(handle, shutdown_tx, state).await;
}

/// Test: watching a missing directory fails and leaves the watcher stopped.
#[tokio::test]
async fn test_watcher_missing_directory_is_fatal() {
    let dirs = drop_dirs();
    let dispatcher = Arc::new(Dispatcher::new(
        Arc::new(RecordingChat::default()),
        &dirs.processed,
        &dirs.discard,
    ));
    let watcher = DirectoryWatcher::new(dirs.uploads.join("does-not-exist"), dispatcher);
    let state = watcher.state();
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);

    let result = timeout(WATCH_TIMEOUT, watcher.run(shutdown_rx))
        .await
        .expect("run should return promptly");
    assert!(result.is_err());
    assert_eq!(*state.borrow(), WatchState::Stopped);
}
