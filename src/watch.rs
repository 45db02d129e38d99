//! # Watch Service - Continuous Filesystem-to-Graph Synchronization
//!
//! The `watch` module provides [`WatchService`], a long-running service that
//! monitors a vault directory and keeps an in-memory document graph
//! synchronized with the file system.
//!
//! ## Overview
//!
//! - **File watching**: detects external document changes via filesystem
//!   notifications (`notify`), recursively under the vault root.
//! - **Write-stability debounce**: a file still being written is not read
//!   until a 100 ms quiet window passes, eliminating truncated reads.
//! - **Batched startup**: the initial scan accumulates discovered files and
//!   emits one aggregate bulk-load event instead of hundreds of per-file
//!   events, with a hard file-count ceiling that refuses oversized vaults.
//! - **Event streaming**: every observation is published as an [`Event`]
//!   through the session's [`Publisher`]; subscribers receive both the
//!   public vault events and incremental graph deltas.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use vaultgraph_core::{event::Event, watch::WatchService};
//! use std::path::PathBuf;
//!
//! let service = WatchService::new()?;
//! let mut subscription = service.subscribe();
//!
//! service.start_watching(&PathBuf::from("/path/to/vault"))?;
//!
//! // Process events in your application
//! while let Ok(event) = subscription.blocking_recv() {
//!     println!("{event}");
//! }
//! # Ok::<(), vaultgraph_core::VaultError>(())
//! ```
//!
//! ## Threading Model
//!
//! `WatchService` owns a tokio runtime. Per watch session:
//!
//! 1. **Setup task**: enumerates the vault (walkdir, bounded depth),
//!    enforces the file ceiling, fans out concurrent reads of the pending
//!    batch, sends the bulk-load message, then attaches the debounced
//!    watcher. Concurrency is confined to these read-only steps.
//! 2. **Debouncer thread** (from `notify-debouncer-full`): filters paths,
//!    waits out in-progress writes, reads changed files with retry, and
//!    feeds normalized messages into the sync stream.
//! 3. **Orchestrator task** ([`SyncOrchestrator`]): the single consumer of
//!    the sync stream and the only place the graph snapshot mutates.
//!
//! ## Lifecycle
//!
//! A session moves from `Uninitialized` to `Ready` once its initial scan
//! settles, and is removed from the service on stop. Re-invoking
//! [`WatchService::start_watching`] for a root that is already watched is
//! an idempotent no-op that re-emits the last-known bulk state rather than
//! rescanning; [`WatchService::stop_watching`] is idempotent and safe to
//! call mid-scan (pending batch state is discarded).
//!
//! ## Error Handling
//!
//! Per-file read failures are retried with linear backoff, then reported as
//! `read_error` notifications without affecting sibling files. Session
//! failures (`start_failed`, `file_limit_exceeded`, `directory_deleted`,
//! `bulk_load_error`) stop the session and are reported once. Every error
//! kind is surfaced as a structured [`VaultEvent::WatchError`]; the service
//! can always start a new session after any of them.

use crate::{
    config::{Position, PositionStore},
    error::VaultError,
    event::{Event, FileRecord, VaultEvent, WatchErrorKind},
    paths::{self, NodeId},
    sync::{Publisher, Subscription, SyncMessage, SyncOrchestrator},
};

use notify_debouncer_full::{
    new_debouncer,
    notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher},
    DebounceEventResult, Debouncer, FileIdMap,
};
use parking_lot::{Mutex, RwLock};
use sha2::{Digest, Sha256};
use std::{
    collections::{BTreeMap, HashMap},
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::{Duration, SystemTime},
};
use tokio::{
    runtime::Runtime,
    sync::mpsc::{unbounded_channel, UnboundedSender},
    task::{JoinHandle, JoinSet},
};
use walkdir::WalkDir;

/// Hard ceiling on the number of documents a vault may contain.
pub const DEFAULT_FILE_LIMIT: usize = 300;

/// Recursion cap for the startup enumeration.
pub const MAX_SCAN_DEPTH: usize = 99;

/// Quiet period with no further write activity before a write counts as
/// complete.
pub const WRITE_STABILITY_WINDOW: Duration = Duration::from_millis(100);

/// Read retry schedule: linear backoff, delay multiplied by attempt number.
pub const READ_RETRY_ATTEMPTS: u32 = 3;
pub const READ_RETRY_BASE_DELAY: Duration = Duration::from_millis(50);

/// Files above this size get an informational progress signal before the
/// blocking read.
pub const LARGE_FILE_BYTES: u64 = 1024 * 1024;

/// A debounced filesystem watcher for one vault.
type VaultWatcher = Debouncer<RecommendedWatcher, FileIdMap>;

/// Per-file content hashes, used to suppress change notifications whose
/// bytes are unchanged.
type ContentHashes = Arc<Mutex<HashMap<PathBuf, [u8; 32]>>>;

/// Lifecycle of one watch session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Session exists but the initial scan has not settled yet.
    Uninitialized,
    /// Bulk load emitted, steady-state watching active.
    Ready,
}

struct WatchSession {
    state: SessionState,
    /// Checked at the top of the debouncer callback; set on stop and on
    /// fatal watcher failure so a torn-down session goes quiet immediately.
    stopped: Arc<AtomicBool>,
    sync_tx: UnboundedSender<SyncMessage>,
    /// The last-known bulk state, re-emitted on idempotent restart and kept
    /// current by the steady-state path.
    last_bulk: Arc<RwLock<Vec<FileRecord>>>,
    positions: BTreeMap<NodeId, Position>,
    /// None until the setup task attaches the watcher.
    debouncer: Option<VaultWatcher>,
    _sync_handle: JoinHandle<()>,
}

type SessionMap = HashMap<PathBuf, WatchSession>;

pub struct WatchService {
    sessions: Arc<Mutex<SessionMap>>,
    publisher: Publisher,
    runtime: Runtime,
    file_limit: usize,
    position_store: Option<Arc<dyn PositionStore>>,
}

impl WatchService {
    pub fn new() -> Result<Self, VaultError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(4)
            .enable_all()
            .build()?;

        Ok(WatchService {
            sessions: Arc::new(Mutex::new(SessionMap::default())),
            publisher: Publisher::new(),
            runtime,
            file_limit: DEFAULT_FILE_LIMIT,
            position_store: None,
        })
    }

    /// Override the file ceiling. Mainly for tests and constrained hosts.
    pub fn with_file_limit(mut self, limit: usize) -> Self {
        self.file_limit = limit;
        self
    }

    /// Attach a position store, loaded once per session start.
    pub fn with_position_store(mut self, store: Arc<dyn PositionStore>) -> Self {
        self.position_store = Some(store);
        self
    }

    pub fn publisher(&self) -> &Publisher {
        &self.publisher
    }

    pub fn subscribe(&self) -> Subscription {
        self.publisher.subscribe()
    }

    /// Display positions loaded for an active session's root, if any.
    pub fn positions(&self, root: &Path) -> Option<BTreeMap<NodeId, Position>> {
        self.sessions
            .lock()
            .get(root)
            .map(|session| session.positions.clone())
    }

    pub fn session_state(&self, root: &Path) -> Option<SessionState> {
        self.sessions.lock().get(root).map(|session| session.state)
    }

    /// Begin watching `root`. Validation failures return an error and
    /// publish `start_failed`; everything after validation (scan, ceiling,
    /// bulk load, watcher attach) runs asynchronously and reports through
    /// the event stream.
    ///
    /// Calling this for a root that is already being watched is a no-op
    /// that re-emits the last-known bulk state instead of rescanning.
    pub fn start_watching(&self, root: &Path) -> Result<(), VaultError> {
        let root = root.to_path_buf();

        {
            let mut sessions = self.sessions.lock();
            if let Some(session) = sessions.get(&root) {
                if session.stopped.load(Ordering::Relaxed) {
                    // A self-stopped session (root deletion) lingers in the
                    // map until someone touches it; clear it and start over.
                    sessions.remove(&root);
                } else {
                    tracing::info!(
                        "[WatchService] already watching {:?}, re-emitting state",
                        root
                    );
                    self.publisher
                        .publish(Event::Vault(VaultEvent::WatchingStarted {
                            root_path: root.clone(),
                            timestamp: SystemTime::now(),
                        }));
                    if session.state == SessionState::Ready {
                        self.publisher.publish(Event::Vault(VaultEvent::BulkLoaded {
                            files: session.last_bulk.read().clone(),
                            root_path: root.clone(),
                        }));
                    }
                    return Ok(());
                }
            }
        }

        match std::fs::metadata(&root) {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => {
                let error = VaultError::Watch(format!("{root:?} is not a directory"));
                self.publisher.publish(Event::Vault(VaultEvent::error(
                    WatchErrorKind::StartFailed,
                    &error,
                    Some(root.clone()),
                )));
                return Err(error);
            }
            Err(e) => {
                let error = VaultError::from(e);
                self.publisher.publish(Event::Vault(VaultEvent::error(
                    WatchErrorKind::StartFailed,
                    &error,
                    Some(root.clone()),
                )));
                return Err(error);
            }
        }

        self.publisher
            .publish(Event::Vault(VaultEvent::WatchingStarted {
                root_path: root.clone(),
                timestamp: SystemTime::now(),
            }));

        // Positions are a UI concern; failure to load them never blocks the
        // session.
        let positions = match &self.position_store {
            Some(store) => store.load(&root).unwrap_or_else(|e| {
                tracing::warn!("[WatchService] position load failed for {:?}: {e}", root);
                BTreeMap::new()
            }),
            None => BTreeMap::new(),
        };

        let (sync_tx, sync_rx) = unbounded_channel::<SyncMessage>();
        let orchestrator = SyncOrchestrator::new(root.clone(), self.publisher.clone());
        let sync_handle = self.runtime.spawn(orchestrator.run(sync_rx));

        let stopped = Arc::new(AtomicBool::new(false));
        let last_bulk = Arc::new(RwLock::new(Vec::new()));

        {
            let mut sessions = self.sessions.lock();
            sessions.insert(
                root.clone(),
                WatchSession {
                    state: SessionState::Uninitialized,
                    stopped: stopped.clone(),
                    sync_tx: sync_tx.clone(),
                    last_bulk: last_bulk.clone(),
                    positions,
                    debouncer: None,
                    _sync_handle: sync_handle,
                },
            );
        }

        let setup = SessionSetup {
            root,
            sessions: self.sessions.clone(),
            sync_tx,
            stopped,
            last_bulk,
            file_limit: self.file_limit,
        };
        self.runtime.spawn(setup.run());

        Ok(())
    }

    /// Stop watching `root`. Idempotent: stopping an unknown or already
    /// stopped root is a no-op. Safe mid-scan; pending batch state is
    /// discarded by the setup task when it notices the session is gone.
    pub fn stop_watching(&self, root: &Path) -> Result<(), VaultError> {
        let session = self.sessions.lock().remove(root);
        if let Some(mut session) = session {
            tracing::info!("[WatchService] stopping watch session for {:?}", root);
            session.stopped.store(true, Ordering::Relaxed);
            if let Some(mut debouncer) = session.debouncer.take() {
                let unwatch_res = debouncer.watcher().unwatch(root);
                tracing::debug!("unwatch(path: {:?}) = {:?}", root, unwatch_res);
            }
            // The orchestrator publishes watching-stopped and exits on this
            // message; no abort needed.
            let _ = session.sync_tx.send(SyncMessage::Stopped);
        }
        Ok(())
    }
}

impl Drop for WatchService {
    fn drop(&mut self) {
        let mut sessions = self.sessions.lock();
        for (root, session) in sessions.drain() {
            tracing::debug!("[WatchService] dropping session for {:?}", root);
            session.stopped.store(true, Ordering::Relaxed);
            let _ = session.sync_tx.send(SyncMessage::Stopped);
        }
    }
}

/// Everything the per-session setup task needs: enumerate, enforce the
/// ceiling, fan out reads, emit the bulk load, attach the watcher.
struct SessionSetup {
    root: PathBuf,
    sessions: Arc<Mutex<SessionMap>>,
    sync_tx: UnboundedSender<SyncMessage>,
    stopped: Arc<AtomicBool>,
    last_bulk: Arc<RwLock<Vec<FileRecord>>>,
    file_limit: usize,
}

impl SessionSetup {
    async fn run(self) {
        let root = self.root.clone();
        let limit = self.file_limit;
        let enumeration = tokio::task::spawn_blocking({
            let root = root.clone();
            move || enumerate_documents(&root, limit)
        })
        .await;

        let pending = match enumeration {
            Ok(Ok(pending)) => pending,
            Ok(Err(message)) => {
                tracing::warn!("[ScanBatcher] {message}");
                self.abort(WatchErrorKind::FileLimitExceeded, message);
                return;
            }
            Err(e) => {
                self.abort(
                    WatchErrorKind::BulkLoadError,
                    format!("Initial enumeration task failed: {e}"),
                );
                return;
            }
        };

        if self.cancelled() {
            tracing::debug!("[ScanBatcher] session cancelled mid-scan, discarding batch");
            return;
        }

        tracing::info!(
            "[ScanBatcher] enumeration settled with {} pending files",
            pending.len()
        );

        let (mut records, join_failures) = read_batch(&root, pending).await;
        if join_failures > 0 {
            self.abort(
                WatchErrorKind::BulkLoadError,
                format!("Bulk read failed for {join_failures} read task(s)"),
            );
            return;
        }
        // JoinSet completion order is arbitrary; make the bulk deterministic.
        records.sort_by(|a, b| a.path.cmp(&b.path));

        if self.cancelled() {
            tracing::debug!("[ScanBatcher] session cancelled mid-read, discarding batch");
            return;
        }

        *self.last_bulk.write() = records.clone();
        if self.sync_tx.send(SyncMessage::Bulk(records)).is_err() {
            tracing::debug!("[ScanBatcher] sync stream closed before bulk load");
            return;
        }

        // Steady state: individual events from here on.
        let debouncer = match attach_watcher(
            &root,
            self.sync_tx.clone(),
            self.stopped.clone(),
            self.last_bulk.clone(),
        ) {
            Ok(debouncer) => debouncer,
            Err(e) => {
                self.abort(WatchErrorKind::StartFailed, e.to_string());
                return;
            }
        };

        let mut sessions = self.sessions.lock();
        match sessions.get_mut(&self.root) {
            Some(session) if !self.cancelled() => {
                session.debouncer = Some(debouncer);
                session.state = SessionState::Ready;
                tracing::info!("[WatchService] session for {:?} is ready", self.root);
            }
            _ => {
                // Stopped while we were attaching; let the watcher drop.
                tracing::debug!("[ScanBatcher] session removed during setup, discarding watcher");
            }
        }
    }

    fn cancelled(&self) -> bool {
        self.stopped.load(Ordering::Relaxed)
    }

    /// Session-level failure: report once, tear the session down, discard
    /// accumulated state.
    fn abort(&self, kind: WatchErrorKind, message: String) {
        let _ = self.sync_tx.send(SyncMessage::Error { kind, message });
        let _ = self.sync_tx.send(SyncMessage::Stopped);
        self.stopped.store(true, Ordering::Relaxed);
        self.sessions.lock().remove(&self.root);
    }
}

/// Enumerate every eligible document under `root`, aborting the moment the
/// pending count would exceed `limit`. Per-entry enumeration errors are
/// logged and skipped; only the ceiling is fatal here.
fn enumerate_documents(root: &Path, limit: usize) -> Result<Vec<PathBuf>, String> {
    let mut pending = Vec::new();
    let walker = WalkDir::new(root)
        .max_depth(MAX_SCAN_DEPTH)
        .into_iter()
        .filter_entry(|entry| {
            if entry.depth() == 0 || !entry.file_type().is_dir() {
                return true;
            }
            entry
                .file_name()
                .to_str()
                .map(|name| !paths::is_ignored_component(name))
                .unwrap_or(false)
        });

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!("[ScanBatcher] skipping unreadable entry: {e}");
                continue;
            }
        };
        if !entry.file_type().is_file() || !paths::is_document_file(entry.path()) {
            continue;
        }
        if pending.len() >= limit {
            return Err(format!(
                "Vault {root:?} exceeds the {limit}-file limit; pick a smaller root"
            ));
        }
        pending.push(entry.into_path());
    }
    Ok(pending)
}

/// Fan-out read of the pending batch. Reads run concurrently because no
/// graph mutation happens until the results are funneled back into the
/// single sync stream. Files that fail to read are dropped from the bulk
/// load and logged; the second return value counts failed read *tasks*
/// (panics), which abort the batch.
async fn read_batch(root: &Path, pending: Vec<PathBuf>) -> (Vec<FileRecord>, usize) {
    let mut set = JoinSet::new();
    for path in pending {
        set.spawn(async move {
            let result = tokio::fs::read_to_string(&path).await;
            (path, result)
        });
    }

    let mut records = Vec::new();
    let mut join_failures = 0;
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((path, Ok(content))) => {
                records.push(FileRecord::from_content(path, root, content));
            }
            Ok((path, Err(e))) => {
                tracing::warn!("[ScanBatcher] dropping {path:?} from bulk load: {e}");
            }
            Err(e) => {
                tracing::error!("[ScanBatcher] bulk read task failed: {e}");
                join_failures += 1;
            }
        }
    }
    (records, join_failures)
}

/// Attach the debounced watcher for steady-state operation.
fn attach_watcher(
    root: &Path,
    sync_tx: UnboundedSender<SyncMessage>,
    stopped: Arc<AtomicBool>,
    last_bulk: Arc<RwLock<Vec<FileRecord>>>,
) -> Result<VaultWatcher, VaultError> {
    let hashes: ContentHashes = Arc::new(Mutex::new(HashMap::new()));
    let callback_root = root.to_path_buf();

    let mut debouncer = new_debouncer(
        WRITE_STABILITY_WINDOW,
        None,
        move |result: DebounceEventResult| {
            if stopped.load(Ordering::Relaxed) {
                tracing::debug!("[Debouncer] session stopped, ignoring events");
                return;
            }

            // The watched root vanishing is fatal: self-stop with a
            // distinguished error kind instead of a stream of read errors.
            if !callback_root.exists() {
                tracing::warn!("[Debouncer] watched root {:?} no longer exists", callback_root);
                stopped.store(true, Ordering::Relaxed);
                let _ = sync_tx.send(SyncMessage::Error {
                    kind: WatchErrorKind::DirectoryDeleted,
                    message: format!("Watched directory {callback_root:?} was deleted"),
                });
                let _ = sync_tx.send(SyncMessage::Stopped);
                return;
            }

            let events = match result {
                Ok(events) => events,
                Err(errors) => {
                    tracing::error!("[Debouncer] notify returned errors: {errors:?}");
                    return;
                }
            };

            for event in events.iter() {
                match event.event.kind {
                    EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_) => {}
                    _ => continue,
                }
                for path in event.paths.iter() {
                    if !paths::is_document_file(path)
                        || paths::has_ignored_ancestor(path, &callback_root)
                    {
                        continue;
                    }
                    handle_document_event(
                        path,
                        &event.event.kind,
                        &callback_root,
                        &sync_tx,
                        &hashes,
                        &last_bulk,
                    );
                }
            }
        },
    )?;

    debouncer.watcher().watch(root, RecursiveMode::Recursive)?;
    Ok(debouncer)
}

/// Normalize one debounced document event into the sync stream.
fn handle_document_event(
    path: &Path,
    kind: &EventKind,
    root: &Path,
    sync_tx: &UnboundedSender<SyncMessage>,
    hashes: &ContentHashes,
    last_bulk: &Arc<RwLock<Vec<FileRecord>>>,
) {
    // A modify or create for a path that is already gone is a delete
    // (covers rename-away, which is observed as new identity elsewhere).
    if matches!(kind, EventKind::Remove(_)) || !path.exists() {
        hashes.lock().remove(path);
        last_bulk.write().retain(|record| record.absolute_path != path);
        tracing::info!("[Debouncer] document removed: {:?}", path);
        let _ = sync_tx.send(SyncMessage::Deleted {
            absolute_path: path.to_path_buf(),
        });
        return;
    }

    if let Ok(meta) = path.metadata() {
        if meta.len() > LARGE_FILE_BYTES {
            tracing::info!(
                "[Debouncer] reading large file ({} bytes): {:?}",
                meta.len(),
                path
            );
        }
    }

    let content = match read_with_retry(path) {
        Ok(content) => content,
        Err(e) => {
            tracing::warn!("[Debouncer] read failed after retries for {:?}: {e}", path);
            let _ = sync_tx.send(SyncMessage::Error {
                kind: WatchErrorKind::ReadError,
                message: format!("Could not read {path:?}: {e}"),
            });
            return;
        }
    };

    let digest: [u8; 32] = Sha256::digest(content.as_bytes()).into();
    {
        let mut hashes = hashes.lock();
        if hashes.get(path) == Some(&digest) {
            tracing::debug!("[Debouncer] content unchanged, suppressing: {:?}", path);
            return;
        }
        hashes.insert(path.to_path_buf(), digest);
    }

    let record = FileRecord::from_content(path.to_path_buf(), root, content);
    {
        let mut bulk = last_bulk.write();
        match bulk.iter_mut().find(|r| r.absolute_path == path) {
            Some(existing) => *existing = record.clone(),
            None => bulk.push(record.clone()),
        }
    }

    let message = match kind {
        EventKind::Create(_) => {
            tracing::info!("[Debouncer] document added: {:?}", path);
            SyncMessage::Added(record)
        }
        _ => {
            tracing::info!("[Debouncer] document changed: {:?}", path);
            SyncMessage::Changed(record)
        }
    };
    let _ = sync_tx.send(message);
}

/// Read a file, retrying with linear backoff. A change notification can
/// race slightly ahead of the writer's flush-to-disk; retry absorbs that.
fn read_with_retry(path: &Path) -> std::io::Result<String> {
    let mut attempt = 1;
    loop {
        match std::fs::read_to_string(path) {
            Ok(content) => return Ok(content),
            Err(e) => {
                if attempt >= READ_RETRY_ATTEMPTS {
                    return Err(e);
                }
                tracing::debug!(
                    "[Debouncer] read attempt {attempt} failed for {:?}: {e}, retrying",
                    path
                );
                std::thread::sleep(READ_RETRY_BASE_DELAY * attempt);
                attempt += 1;
            }
        }
    }
}
