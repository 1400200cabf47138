//! Optional, asynchronous append-only log of lock events for operator
//! queries (spec §6.5, §6.6). Grounded on the teacher's
//! [`crate::logger`]'s webhook drain: a bounded channel feeds a single
//! background task that owns the I/O, so callers never block on disk.

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::fs::OpenOptions;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc::{channel, Sender};

use crate::lock::LockAction;
use crate::semantic::SemanticTarget;
use crate::utils::DateTime;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub time: DateTime,
    pub action: LockAction,
    pub lock_id: String,
    pub holder: String,
    pub target: SemanticTarget,
}

/// Append-only, asynchronously written log of lock events. No compaction:
/// the file grows without bound (spec §9 Open Question — the source
/// leaves the compaction policy unspecified, so none is implemented).
pub struct AuditStore {
    tx: Sender<AuditEntry>,
    path: PathBuf,
}

impl AuditStore {
    pub fn spawn(path: PathBuf) -> Arc<Self> {
        let (tx, mut rx) = channel::<AuditEntry>(1024);
        let writer_path = path.clone();

        tokio::spawn(async move {
            let file = OpenOptions::new().create(true).append(true).open(&writer_path).await;
            let mut file = match file {
                Ok(file) => file,
                Err(err) => {
                    log::error!("audit store: failed to open {}: {err}", writer_path.display());
                    return;
                }
            };
            while let Some(entry) = rx.recv().await {
                match serde_json::to_vec(&entry) {
                    Ok(mut line) => {
                        line.push(b'\n');
                        if let Err(err) = file.write_all(&line).await {
                            log::warn!("audit store: write failed: {err}");
                        }
                    }
                    Err(err) => log::warn!("audit store: failed to serialize entry: {err}"),
                }
            }
        });

        Arc::new(AuditStore { tx, path })
    }

    /// Enqueues an entry; never blocks the caller. Drops and logs on a
    /// full queue rather than applying backpressure to lock operations.
    pub fn record(&self, entry: AuditEntry) {
        if let Err(err) = self.tx.try_send(entry) {
            log::warn!("audit store: queue full, dropping entry for lock {}", err.into_inner().lock_id);
        }
    }

    /// Sequential read-back of every recorded entry. No index is kept;
    /// this is for operator tooling, not the hot path.
    pub async fn query(&self) -> std::io::Result<Vec<AuditEntry>> {
        let file = match tokio::fs::File::open(&self.path).await {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err),
        };

        let mut lines = BufReader::new(file).lines();
        let mut entries = Vec::new();
        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            if let Ok(entry) = serde_json::from_str(&line) {
                entries.push(entry);
            }
        }
        Ok(entries)
    }
}
