//! The orchestration layer: one serialized stream of sync messages drives
//! all graph mutations, and resulting deltas fan out to subscribers.
//!
//! [`SyncOrchestrator`] is the exclusive owner of the current [`Graph`]
//! snapshot. Every other component either hands it a message or receives a
//! read-only copy; no locking is required because there is no concurrent
//! writer.

use std::path::{Path, PathBuf};

use tokio::sync::{broadcast, mpsc::UnboundedReceiver};

use crate::{
    event::{ChangeEvent, Event, FileRecord, VaultEvent, WatchErrorKind},
    graph::{diff, reduce, Environment, Graph, GraphDelta},
    paths,
};

/// Capacity of the subscriber broadcast channel. A subscriber that lags
/// further than this behind drops old events rather than blocking sync.
pub const SUBSCRIBER_CHANNEL_CAPACITY: usize = 256;

/// Publish/subscribe fan-out for [`Event`]s.
///
/// Dropping a [`Subscription`] unregisters it, and publishing with zero
/// subscribers is always a safe no-op.
#[derive(Debug, Clone)]
pub struct Publisher {
    tx: broadcast::Sender<Event>,
}

pub type Subscription = broadcast::Receiver<Event>;

impl Publisher {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(SUBSCRIBER_CHANNEL_CAPACITY);
        Publisher { tx }
    }

    pub fn subscribe(&self) -> Subscription {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: Event) {
        // SendError here only means there are no subscribers right now.
        if let Err(e) = self.tx.send(event) {
            tracing::trace!("[Publisher] no subscribers for {}", e.0);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for Publisher {
    fn default() -> Self {
        Self::new()
    }
}

/// The single serialized stream that drives graph mutation. Produced by the
/// watch session (scan batcher and debouncer), consumed by exactly one
/// [`SyncOrchestrator`], strictly in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncMessage {
    /// The one aggregate startup event: every successfully read file from
    /// the initial scan.
    Bulk(Vec<FileRecord>),
    Added(FileRecord),
    Changed(FileRecord),
    Deleted { absolute_path: PathBuf },
    Error { kind: WatchErrorKind, message: String },
    Stopped,
}

/// Owns the current graph snapshot; folds sync messages through the reducer
/// and republishes the resulting deltas.
pub struct SyncOrchestrator {
    graph: Graph,
    env: Environment,
    publisher: Publisher,
}

impl SyncOrchestrator {
    pub fn new(root_path: PathBuf, publisher: Publisher) -> Self {
        SyncOrchestrator {
            graph: Graph::default(),
            env: Environment { root_path },
            publisher,
        }
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn root_path(&self) -> &Path {
        &self.env.root_path
    }

    /// Apply one change event and publish the delta. Returns the delta for
    /// callers that fold without a channel (one-shot scans, tests).
    pub fn apply(&mut self, event: &ChangeEvent) -> GraphDelta {
        let next = reduce(&self.graph, event, &self.env);
        let delta = diff(&self.graph, &next);
        self.graph = next;
        if !delta.is_empty() {
            self.publisher.publish(Event::Graph(delta.clone()));
        }
        delta
    }

    /// Fold the whole startup batch into the graph, publishing one
    /// aggregate delta rather than one per file.
    pub fn apply_bulk(&mut self, files: &[FileRecord]) -> GraphDelta {
        let mut next = self.graph.clone();
        for record in files {
            let event = ChangeEvent::added(record.absolute_path.clone(), record.content.clone());
            next = reduce(&next, &event, &self.env);
        }
        let delta = diff(&self.graph, &next);
        self.graph = next;
        if !delta.is_empty() {
            self.publisher.publish(Event::Graph(delta.clone()));
        }
        delta
    }

    /// Consume the sync stream until the session stops. This is the only
    /// place graph mutations happen while a watch session is live.
    pub async fn run(mut self, mut rx: UnboundedReceiver<SyncMessage>) {
        tracing::info!(
            "[SyncOrchestrator] consuming sync stream for {:?}",
            self.env.root_path
        );
        while let Some(message) = rx.recv().await {
            match message {
                SyncMessage::Bulk(files) => {
                    tracing::info!("[SyncOrchestrator] bulk load of {} files", files.len());
                    self.publisher.publish(Event::Vault(VaultEvent::BulkLoaded {
                        files: files.clone(),
                        root_path: self.env.root_path.clone(),
                    }));
                    self.apply_bulk(&files);
                }
                SyncMessage::Added(record) => {
                    let event =
                        ChangeEvent::added(record.absolute_path.clone(), record.content.clone());
                    self.publisher
                        .publish(Event::Vault(VaultEvent::FileAdded(record)));
                    self.apply(&event);
                }
                SyncMessage::Changed(record) => {
                    let event =
                        ChangeEvent::changed(record.absolute_path.clone(), record.content.clone());
                    self.publisher
                        .publish(Event::Vault(VaultEvent::FileChanged(record)));
                    self.apply(&event);
                }
                SyncMessage::Deleted { absolute_path } => {
                    let relative = absolute_path
                        .strip_prefix(&self.env.root_path)
                        .map(paths::os_path_to_string)
                        .unwrap_or_else(|_| paths::os_path_to_string(&absolute_path));
                    self.publisher.publish(Event::Vault(VaultEvent::FileDeleted {
                        path: relative,
                        absolute_path: absolute_path.clone(),
                    }));
                    self.apply(&ChangeEvent::deleted(absolute_path));
                }
                SyncMessage::Error { kind, message } => {
                    tracing::warn!("[SyncOrchestrator] watch error {kind}: {message}");
                    self.publisher.publish(Event::Vault(VaultEvent::WatchError {
                        kind,
                        message,
                        root_path: Some(self.env.root_path.clone()),
                    }));
                }
                SyncMessage::Stopped => {
                    tracing::info!(
                        "[SyncOrchestrator] session for {:?} stopped, clearing graph",
                        self.env.root_path
                    );
                    self.graph = Graph::default();
                    self.publisher
                        .publish(Event::Vault(VaultEvent::WatchingStopped {}));
                    break;
                }
            }
        }
    }
}
