use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::domain::Position;
use crate::error::{Result, WardenError};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionSnapshot {
    pub taken_at: DateTime<Utc>,
    pub positions: Vec<Position>,
}

/// Periodically overwritten open-positions file used for crash recovery
pub struct PositionSnapshotStore {
    path: PathBuf,
}

impl PositionSnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write via a temp file and rename so readers never see a torn file
    pub async fn save(&self, positions: &[Position]) -> Result<()> {
        let snapshot = PositionSnapshot {
            taken_at: Utc::now(),
            positions: positions.to_vec(),
        };
        let content = serde_json::to_string_pretty(&snapshot)?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, content).await?;
        tokio::fs::rename(&tmp, &self.path).await.map_err(|e| {
            WardenError::Persistence(format!("replace snapshot {}: {}", self.path.display(), e))
        })?;

        debug!(count = positions.len(), path = %self.path.display(), "position snapshot written");
        Ok(())
    }

    /// Last snapshot, or `None` when nothing was saved yet
    pub async fn load(&self) -> Result<Option<PositionSnapshot>> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let snapshot: PositionSnapshot = serde_json::from_str(&content).map_err(|e| {
            WardenError::Persistence(format!("corrupt snapshot {}: {}", self.path.display(), e))
        })?;
        info!(
            count = snapshot.positions.len(),
            taken_at = %snapshot.taken_at,
            "loaded position snapshot"
        );
        Ok(Some(snapshot))
    }
}
