//! Inventory persistence behind the load/save seam
//!
//! The core never persists anything on its own; the CLI restores a
//! snapshot at startup and saves one after mutating commands. The file
//! implementation replaces the snapshot atomically through a temp file
//! rename.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

use crate::inventory::InventorySnapshot;
use crate::{OrchestratorError, Result};

/// External persistence seam for the inventory
#[async_trait]
pub trait InventoryStore: Send + Sync {
    /// Load the last saved snapshot, if one exists
    async fn load(&self) -> Result<Option<InventorySnapshot>>;

    /// Persist a snapshot
    async fn save(&self, snapshot: &InventorySnapshot) -> Result<()>;
}

/// JSON file backed inventory store
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl InventoryStore for JsonFileStore {
    async fn load(&self) -> Result<Option<InventorySnapshot>> {
        if !self.path.exists() {
            debug!("No inventory snapshot at {}", self.path.display());
            return Ok(None);
        }

        let content = fs::read_to_string(&self.path).await.map_err(|e| {
            OrchestratorError::Configuration(format!(
                "Failed to read inventory snapshot {}: {e}",
                self.path.display()
            ))
        })?;

        let snapshot: InventorySnapshot = serde_json::from_str(&content)?;

        if snapshot.version > InventorySnapshot::CURRENT_VERSION {
            return Err(OrchestratorError::Configuration(format!(
                "Inventory snapshot version {} is newer than supported version {}",
                snapshot.version,
                InventorySnapshot::CURRENT_VERSION
            )));
        }

        info!(
            "Loaded inventory snapshot from {} ({} host(s), {} cluster(s))",
            self.path.display(),
            snapshot.hosts.len(),
            snapshot.clusters.len()
        );
        Ok(Some(snapshot))
    }

    async fn save(&self, snapshot: &InventorySnapshot) -> Result<()> {
        let temp_path = self.path.with_extension("json.tmp");

        if let Some(parent) = self.path.parent() {
            if !parent.exists() {
                fs::create_dir_all(parent).await.map_err(|e| {
                    OrchestratorError::Configuration(format!(
                        "Failed to create inventory directory {}: {e}",
                        parent.display()
                    ))
                })?;
            }
        }

        let content = serde_json::to_string_pretty(snapshot)?;

        fs::write(&temp_path, content).await.map_err(|e| {
            OrchestratorError::Configuration(format!(
                "Failed to write inventory snapshot: {e}"
            ))
        })?;

        fs::rename(&temp_path, &self.path).await.map_err(|e| {
            OrchestratorError::Configuration(format!(
                "Failed to replace inventory snapshot: {e}"
            ))
        })?;

        debug!("Saved inventory snapshot to {}", self.path.display());
        Ok(())
    }
}
