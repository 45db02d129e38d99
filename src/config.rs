use crate::{error::VaultError, paths::NodeId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use std::{
    fs::{create_dir_all, read_to_string, write},
    path::{Path, PathBuf},
};

/// Name of the per-root metadata directory.
pub const VAULT_DIR: &str = ".vaultgraph";

/// Root-directory configuration store: remembers which vault the user last
/// pointed the tool at. Constructed once and passed by reference to
/// whatever needs it; there is no process-global provider.
pub trait VaultConfigProvider: Send + Sync {
    fn get_root(&self) -> Result<Option<PathBuf>, VaultError>;
    fn set_root(&self, root: &Path) -> Result<(), VaultError>;
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TomlConfigProvider {
    path: PathBuf,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ConfigFile {
    root: Option<PathBuf>,
}

impl TomlConfigProvider {
    pub fn new(path: PathBuf) -> Self {
        TomlConfigProvider { path }
    }
}

impl VaultConfigProvider for TomlConfigProvider {
    fn get_root(&self) -> Result<Option<PathBuf>, VaultError> {
        tracing::debug!("Attempting to read root from: {:?}", &self.path);
        if !self.path.exists() {
            tracing::debug!("Config file not found, no saved root.");
            return Ok(None);
        }
        let content = read_to_string(&self.path)?;
        let config: ConfigFile = toml::from_str(&content)?;
        Ok(config.root)
    }

    fn set_root(&self, root: &Path) -> Result<(), VaultError> {
        tracing::debug!("Attempting to write root to: {:?}", &self.path);
        let config = ConfigFile {
            root: Some(root.to_path_buf()),
        };
        let toml_string = toml::to_string(&config)?;
        if let Some(parent) = self.path.parent() {
            create_dir_all(parent)?;
        }
        write(&self.path, toml_string)?;
        Ok(())
    }
}

/// A node's display position, owned by the UI layer and persisted per root.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

/// Per-root position store, keyed by NodeId. Loaded once per watch-session
/// start; the engine itself never reads positions.
pub trait PositionStore: Send + Sync {
    fn load(&self, root: &Path) -> Result<BTreeMap<NodeId, Position>, VaultError>;
    fn save(&self, root: &Path, positions: &BTreeMap<NodeId, Position>) -> Result<(), VaultError>;
}

/// Positions stored as JSON under `<root>/.vaultgraph/positions.json`.
#[derive(Debug, Default)]
pub struct JsonPositionStore;

impl JsonPositionStore {
    fn positions_path(root: &Path) -> PathBuf {
        root.join(VAULT_DIR).join("positions.json")
    }
}

impl PositionStore for JsonPositionStore {
    fn load(&self, root: &Path) -> Result<BTreeMap<NodeId, Position>, VaultError> {
        let path = Self::positions_path(root);
        if !path.exists() {
            return Ok(BTreeMap::new());
        }
        let content = read_to_string(&path)?;
        Ok(serde_json::from_str(&content)?)
    }

    fn save(&self, root: &Path, positions: &BTreeMap<NodeId, Position>) -> Result<(), VaultError> {
        let path = Self::positions_path(root);
        if let Some(parent) = path.parent() {
            create_dir_all(parent)?;
        }
        write(&path, serde_json::to_string_pretty(positions)?)?;
        Ok(())
    }
}

/// Best-effort readiness probe for the external conversion/indexing
/// backend. The graph engine never blocks on it.
pub trait BackendReadiness: Send + Sync {
    fn poll(&self) -> bool;
}

/// Poll the backend a fixed number of times with a fixed delay. Returns
/// false when every attempt fails; callers continue without the backend
/// rather than blocking graph sync.
pub async fn await_backend(
    backend: &dyn BackendReadiness,
    attempts: u32,
    delay: Duration,
) -> bool {
    for attempt in 1..=attempts {
        if backend.poll() {
            tracing::debug!("Backend ready after {attempt} attempt(s)");
            return true;
        }
        if attempt < attempts {
            tokio::time::sleep(delay).await;
        }
    }
    tracing::info!("Backend not ready after {attempts} attempts, continuing without it");
    false
}
