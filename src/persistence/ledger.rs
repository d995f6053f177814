use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::domain::ClosedTradeRecord;
use crate::error::{Result, WardenError};

/// Append-only closed-trade ledger, one JSON record per line
pub struct TradeLedger {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl TradeLedger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record. Records are never rewritten.
    pub async fn append(&self, record: &ClosedTradeRecord) -> Result<()> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| {
                WardenError::Persistence(format!("open ledger {}: {}", self.path.display(), e))
            })?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;

        debug!(
            instrument = %record.instrument,
            record_id = %record.id,
            pnl = %record.realized_pnl,
            "ledger record appended"
        );
        Ok(())
    }

    /// Every readable record in append order. Corrupt lines are skipped.
    pub async fn read_all(&self) -> Result<Vec<ClosedTradeRecord>> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no ledger yet, starting fresh");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };

        let mut records = Vec::new();
        for (n, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<ClosedTradeRecord>(line) {
                Ok(r) => records.push(r),
                Err(e) => warn!(line = n + 1, error = %e, "skipping corrupt ledger line"),
            }
        }
        info!(count = records.len(), "loaded closed-trade ledger");
        Ok(records)
    }

    /// Records closed on `day` (UTC), oldest first
    pub async fn records_on(&self, day: NaiveDate) -> Result<Vec<ClosedTradeRecord>> {
        let mut records: Vec<_> = self
            .read_all()
            .await?
            .into_iter()
            .filter(|r| r.closed_at.date_naive() == day)
            .collect();
        records.sort_by_key(|r| r.closed_at);
        Ok(records)
    }

}
