use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::{error::VaultError, graph::GraphDelta, paths};

/// What happened to one document on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeKind {
    Added,
    Changed,
    Deleted,
}

/// One normalized filesystem change, the reducer's input. `content` is
/// present for Added/Changed and absent for Deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub absolute_path: PathBuf,
    pub content: Option<String>,
    pub kind: ChangeKind,
}

impl ChangeEvent {
    pub fn added(absolute_path: PathBuf, content: String) -> Self {
        ChangeEvent {
            absolute_path,
            content: Some(content),
            kind: ChangeKind::Added,
        }
    }

    pub fn changed(absolute_path: PathBuf, content: String) -> Self {
        ChangeEvent {
            absolute_path,
            content: Some(content),
            kind: ChangeKind::Changed,
        }
    }

    pub fn deleted(absolute_path: PathBuf) -> Self {
        ChangeEvent {
            absolute_path,
            content: None,
            kind: ChangeKind::Deleted,
        }
    }
}

/// Subscriber-facing description of one successfully read document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    /// Root-relative path with `/` separators.
    pub path: String,
    pub absolute_path: PathBuf,
    pub content: String,
    pub size: u64,
    pub modified_at: SystemTime,
}

impl FileRecord {
    /// Build a record from an already read file. Metadata failures fall
    /// back to the content length and the current time; the record is for
    /// subscriber display, not correctness.
    pub fn from_content(absolute_path: PathBuf, root: &Path, content: String) -> Self {
        let (size, modified_at) = match std::fs::metadata(&absolute_path) {
            Ok(meta) => (
                meta.len(),
                meta.modified().unwrap_or_else(|_| SystemTime::now()),
            ),
            Err(_) => (content.len() as u64, SystemTime::now()),
        };
        let relative = absolute_path
            .strip_prefix(root)
            .map(paths::os_path_to_string)
            .unwrap_or_else(|_| paths::os_path_to_string(&absolute_path));
        FileRecord {
            path: relative,
            absolute_path,
            content,
            size,
            modified_at,
        }
    }
}

/// Structured error kinds on the subscriber surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatchErrorKind {
    ReadError,
    StartFailed,
    FileLimitExceeded,
    DirectoryDeleted,
    BulkLoadError,
}

impl Display for WatchErrorKind {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            WatchErrorKind::ReadError => write!(f, "read_error"),
            WatchErrorKind::StartFailed => write!(f, "start_failed"),
            WatchErrorKind::FileLimitExceeded => write!(f, "file_limit_exceeded"),
            WatchErrorKind::DirectoryDeleted => write!(f, "directory_deleted"),
            WatchErrorKind::BulkLoadError => write!(f, "bulk_load_error"),
        }
    }
}

/// Events emitted to subscribers over the session lifetime. Serialized
/// adjacently tagged so each wire event is `{ event, payload }` with the
/// payload objects of the public contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all = "kebab-case")]
pub enum VaultEvent {
    WatchingStarted {
        root_path: PathBuf,
        timestamp: SystemTime,
    },
    BulkLoaded {
        files: Vec<FileRecord>,
        root_path: PathBuf,
    },
    FileAdded(FileRecord),
    FileChanged(FileRecord),
    FileDeleted {
        path: String,
        absolute_path: PathBuf,
    },
    WatchError {
        kind: WatchErrorKind,
        message: String,
        root_path: Option<PathBuf>,
    },
    WatchingStopped {},
}

impl VaultEvent {
    pub fn error(kind: WatchErrorKind, error: &VaultError, root_path: Option<PathBuf>) -> Self {
        VaultEvent::WatchError {
            kind,
            message: error.to_string(),
            root_path,
        }
    }
}

impl Display for VaultEvent {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            VaultEvent::WatchingStarted { .. } => write!(f, "watching-started"),
            VaultEvent::BulkLoaded { files, .. } => write!(f, "bulk-loaded ({} files)", files.len()),
            VaultEvent::FileAdded(record) => write!(f, "file-added ({})", record.path),
            VaultEvent::FileChanged(record) => write!(f, "file-changed ({})", record.path),
            VaultEvent::FileDeleted { path, .. } => write!(f, "file-deleted ({path})"),
            VaultEvent::WatchError { kind, .. } => write!(f, "watch-error ({kind})"),
            VaultEvent::WatchingStopped {} => write!(f, "watching-stopped"),
        }
    }
}

/// The envelope every subscriber receives.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    #[default]
    Ping,
    Vault(VaultEvent),
    Graph(GraphDelta),
}

impl Display for Event {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            Event::Ping => write!(f, "ping"),
            Event::Vault(event) => write!(f, "{event}"),
            Event::Graph(delta) => write!(
                f,
                "graph-delta (upserted: {}, removed: {})",
                delta.upserted.len(),
                delta.removed.len()
            ),
        }
    }
}
