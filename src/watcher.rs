// src/watcher.rs
use crate::dispatcher::{DispatchOutcome, Dispatcher};
use anyhow::Result;
use notify::Watcher as NotifyWatcherTrait; // To use .watcher() and .cache()
use notify_debouncer_full::{new_debouncer, DebouncedEvent};
use std::path::{Path, PathBuf};
use std::sync::mpsc::RecvTimeoutError;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::mpsc::{self, Sender};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

const DEBOUNCE: Duration = Duration::from_secs(1);
/// How often the notify thread checks whether the async side went away.
const THREAD_POLL: Duration = Duration::from_millis(250);

/// Lifecycle of one watched directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchState {
    Idle,
    Watching,
    /// No new notifications are consumed; in-flight files are finishing.
    Draining,
    Stopped,
}

/// Watches one directory and hands every created file to the [`Dispatcher`].
pub struct DirectoryWatcher {
    dir: PathBuf,
    dispatcher: Arc<Dispatcher>,
    rescan_interval: Option<Duration>,
    state_tx: watch::Sender<WatchState>,
}

impl DirectoryWatcher {
    pub fn new(dir: impl Into<PathBuf>, dispatcher: Arc<Dispatcher>) -> Self {
        let (state_tx, _) = watch::channel(WatchState::Idle);
        DirectoryWatcher {
            dir: dir.into(),
            dispatcher,
            rescan_interval: None,
            state_tx,
        }
    }

    /// Re-sweep the directory on this interval in addition to notifications.
    pub fn with_rescan_interval(mut self, interval: Option<Duration>) -> Self {
        self.rescan_interval = interval;
        self
    }

    /// Subscribe to state transitions.
    pub fn state(&self) -> watch::Receiver<WatchState> {
        self.state_tx.subscribe()
    }

    fn set_state(&self, state: WatchState) {
        debug!("Watcher for {} is now {:?}", self.dir.display(), state);
        self.state_tx.send_replace(state);
    }

    /// Runs the watch until `shutdown` flips to `true` or notifications end.
    ///
    /// Files already in the directory are swept once before notifications are
    /// consumed. Every created file gets its own task; on shutdown those tasks
    /// are awaited, never aborted.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be subscribed to. The watcher
    /// is then `Stopped` and is not retried.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let (event_tx, mut event_rx) = mpsc::channel::<PathBuf>(100);
        let (ready_tx, ready_rx) = tokio::sync::oneshot::channel();

        spawn_notify_thread(self.dir.clone(), event_tx, ready_tx);
        match ready_rx.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                self.set_state(WatchState::Stopped);
                return Err(anyhow::anyhow!(
                    "Failed to watch {}: {}",
                    self.dir.display(),
                    e
                ));
            }
            Err(_) => {
                self.set_state(WatchState::Stopped);
                return Err(anyhow::anyhow!(
                    "Notify thread for {} exited during setup",
                    self.dir.display()
                ));
            }
        }
        let mut in_flight = JoinSet::new();
        self.sweep(&mut in_flight).await;
        self.set_state(WatchState::Watching);
        info!("Watching folder: {}", self.dir.display());

        let mut rescan = self.rescan_interval.map(|every| {
            let mut interval = tokio::time::interval(every);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            interval
        });
        // The first tick fires immediately and the startup sweep already ran.
        if let Some(interval) = rescan.as_mut() {
            interval.tick().await;
        }

        loop {
            tokio::select! {
                maybe_path = event_rx.recv() => {
                    match maybe_path {
                        Some(path) => self.spawn_dispatch(&mut in_flight, path),
                        None => {
                            warn!("Notification channel for {} closed.", self.dir.display());
                            break;
                        }
                    }
                }
                _ = tick(&mut rescan) => {
                    self.sweep(&mut in_flight).await;
                }
                Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                    if let Err(e) = joined {
                        error!("A dispatch task panicked: {}", e);
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Watcher for {} shutting down.", self.dir.display());
                        break;
                    }
                }
            }
        }

        // Dropping the receiver tells the notify thread to exit.
        drop(event_rx);
        self.set_state(WatchState::Draining);
        while let Some(joined) = in_flight.join_next().await {
            if let Err(e) = joined {
                error!("A dispatch task panicked: {}", e);
            }
        }
        self.set_state(WatchState::Stopped);
        Ok(())
    }

    fn spawn_dispatch(&self, in_flight: &mut JoinSet<()>, path: PathBuf) {
        let dispatcher = Arc::clone(&self.dispatcher);
        in_flight.spawn(async move {
            match dispatcher.handle_path(&path).await {
                DispatchOutcome::Uploaded => debug!("Dispatched {}", path.display()),
                DispatchOutcome::UploadFailed(reason) => {
                    debug!("Upload of {} failed: {}", path.display(), reason)
                }
                DispatchOutcome::Skipped => debug!("Skipped {}", path.display()),
            }
        });
    }

    /// Queues every regular file currently in the directory, oldest first.
    async fn sweep(&self, in_flight: &mut JoinSet<()>) {
        match list_files_oldest_first(&self.dir).await {
            Ok(files) => {
                for path in files {
                    self.spawn_dispatch(in_flight, path);
                }
            }
            Err(e) => error!("Error reading directory {}: {}", self.dir.display(), e),
        }
    }
}

async fn tick(interval: &mut Option<tokio::time::Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

/// Regular files directly inside `dir`, sorted by modification time.
pub async fn list_files_oldest_first(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut read_dir = tokio::fs::read_dir(dir).await?;
    let mut files = Vec::new();
    while let Some(entry) = read_dir.next_entry().await? {
        let metadata = match entry.metadata().await {
            Ok(m) if m.is_file() => m,
            _ => continue,
        };
        let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        files.push((modified, entry.path()));
    }
    files.sort();
    Ok(files.into_iter().map(|(_, path)| path).collect())
}

/// Runs the debounced notify watcher for `dir` on a dedicated thread.
///
/// Setup success or failure is reported once through `ready`. Created paths
/// are forwarded to `event_tx`; the thread exits when `event_tx` is closed.
fn spawn_notify_thread(
    dir: PathBuf,
    event_tx: Sender<PathBuf>,
    ready: tokio::sync::oneshot::Sender<std::result::Result<(), String>>,
) {
    std::thread::spawn(move || {
        // This is the std::sync::mpsc channel for communication between the debouncer and this thread.
        let (debouncer_internal_tx, debouncer_internal_rx) = std::sync::mpsc::channel();

        // Create debouncer. It will live as long as this thread.
        let mut debouncer = match new_debouncer(DEBOUNCE, None, debouncer_internal_tx) {
            Ok(d) => d,
            Err(e) => {
                let _ = ready.send(Err(format!("failed to create debouncer: {}", e)));
                return;
            }
        };

        if !dir.is_dir() {
            let _ = ready.send(Err("path is not a directory".to_string()));
            return;
        }
        if let Err(e) = debouncer
            .watcher()
            .watch(&dir, notify::RecursiveMode::NonRecursive)
        {
            let _ = ready.send(Err(e.to_string()));
            return;
        }
        debouncer
            .cache()
            .add_root(&dir, notify::RecursiveMode::NonRecursive);

        if ready.send(Ok(())).is_err() {
            return;
        }

        loop {
            match debouncer_internal_rx.recv_timeout(THREAD_POLL) {
                Ok(Ok(events)) => {
                    for debounced_event in events {
                        if let Some(path) = created_path(&debounced_event) {
                            if event_tx.blocking_send(path).is_err() {
                                debug!("[WatcherThread] Receiver gone for {}", dir.display());
                                return;
                            }
                        }
                    }
                }
                Ok(Err(errors)) => {
                    // Errors from notify itself do not end the watch.
                    for error in errors {
                        error!("[WatcherThread] Debouncer reported error: {:?}", error);
                    }
                }
                Err(RecvTimeoutError::Timeout) => {
                    if event_tx.is_closed() {
                        break;
                    }
                }
                Err(RecvTimeoutError::Disconnected) => {
                    error!(
                        "[WatcherThread] Debouncer channel for {} disconnected. Exiting.",
                        dir.display()
                    );
                    break;
                }
            }
        }
        debug!("[WatcherThread] Exiting for {}", dir.display());
        // debouncer is dropped here when the thread scope ends, cleaning up watches.
    });
}

/// The path of a debounced event that brought a new file into the directory.
fn created_path(debounced_event: &DebouncedEvent) -> Option<PathBuf> {
    use notify::event::{EventKind, ModifyKind, RenameMode};

    let path = match debounced_event.kind {
        EventKind::Create(_) => debounced_event.paths.first(),
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => debounced_event.paths.first(),
        // A rename within the directory carries [from, to].
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => debounced_event.paths.last(),
        _ => None,
    }?;
    Some(path.clone())
}
