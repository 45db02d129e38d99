use std::{fmt, io, path::StripPrefixError};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc::error::SendError as TokioSendError;

#[cfg(feature = "service")]
use notify::{Error as NotifyError, ErrorKind as NotifyErrorKind};

use serde_json::Error as JsonError;
use serde_yaml::Error as YamlError;

use crate::{event::Event, sync::SyncMessage};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
pub enum VaultError {
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Custom error: {0}")]
    Custom(String),
    #[error("File System error: {0}")]
    Io(String),
    #[error("Item Not Found: {0}")]
    NotFound(String),
    #[error("You do not have permission to access this resource")]
    PermissionDenied,
    #[error("(De)Serialization error: {0}")]
    Serialization(String),
    #[error("Watch session error: {0}")]
    Watch(String),
}

impl From<StripPrefixError> for VaultError {
    fn from(src: StripPrefixError) -> VaultError {
        VaultError::NotFound(format!("Strip prefix failed for path. Error: {src}"))
    }
}

impl From<toml::de::Error> for VaultError {
    fn from(src: toml::de::Error) -> VaultError {
        VaultError::Serialization(format!("Toml deserialization error: {src}"))
    }
}

impl From<toml::ser::Error> for VaultError {
    fn from(src: toml::ser::Error) -> VaultError {
        VaultError::Serialization(format!("Toml serialization error: {src}"))
    }
}

impl From<JsonError> for VaultError {
    fn from(src: JsonError) -> VaultError {
        VaultError::Serialization(format!("JSON (de)serialization error: {src}"))
    }
}

impl From<YamlError> for VaultError {
    fn from(src: YamlError) -> VaultError {
        VaultError::Serialization(format!("YAML (de)serialization error: {src}"))
    }
}

impl From<io::Error> for VaultError {
    fn from(x: io::Error) -> Self {
        match x.kind() {
            io::ErrorKind::NotFound => VaultError::NotFound(format!("{x}")),
            io::ErrorKind::PermissionDenied => VaultError::PermissionDenied,
            _ => VaultError::Io(format!("IOError: {}", x.kind())),
        }
    }
}

impl From<fmt::Error> for VaultError {
    fn from(x: fmt::Error) -> Self {
        VaultError::Custom(format!("{x}"))
    }
}

impl From<TokioSendError<Event>> for VaultError {
    fn from(x: TokioSendError<Event>) -> Self {
        VaultError::Io(format!(
            "Channel send error, could not transmit subscriber event {:?}",
            x.0
        ))
    }
}

impl From<TokioSendError<SyncMessage>> for VaultError {
    fn from(x: TokioSendError<SyncMessage>) -> Self {
        VaultError::Io(format!(
            "Channel send error, could not transmit sync message {:?}",
            x.0
        ))
    }
}

#[cfg(feature = "service")]
impl From<NotifyError> for VaultError {
    fn from(notify_error: NotifyError) -> Self {
        match notify_error.kind {
            NotifyErrorKind::Generic(msg) => {
                VaultError::Watch(format!("notify: {}, paths: {:?}", msg, notify_error.paths))
            }
            NotifyErrorKind::Io(io_error) => VaultError::Watch(format!(
                "notify: io error {}, paths: {:?}",
                io_error.kind(),
                notify_error.paths
            )),
            NotifyErrorKind::PathNotFound => VaultError::NotFound(format!(
                "notify: path(s) not found: {:?}",
                notify_error.paths
            )),
            NotifyErrorKind::WatchNotFound => VaultError::NotFound(format!(
                "notify: watch not found, paths: {:?}",
                notify_error.paths
            )),
            NotifyErrorKind::InvalidConfig(_) => {
                VaultError::Watch("notify: invalid watcher config".to_string())
            }
            NotifyErrorKind::MaxFilesWatch => {
                VaultError::Watch("notify: max file watch limit reached".to_string())
            }
        }
    }
}
