//! Recent-operation journal
//!
//! Small key-value log of submitted operations, persisted to a local JSON
//! file so a crashed or reloaded client can discover which writes were in
//! flight. Entries are pruned once resolved or after a bounded age; the
//! journal is a recovery aid, not a durable ledger.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::domain::{OperationHandle, OperationKind};
use crate::error::Result;

/// One journaled operation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalEntry {
    pub handle: String,
    pub kind: OperationKind,
    pub status: String,
    pub timestamp: DateTime<Utc>,
}

/// File-backed recent-operation log
pub struct OperationJournal {
    path: PathBuf,
    max_age: chrono::Duration,
    entries: Mutex<HashMap<String, JournalEntry>>,
}

impl OperationJournal {
    /// Open (or create) the journal at `path`, pruning stale entries
    pub async fn open(path: impl AsRef<Path>, max_age: Duration) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let max_age = chrono::Duration::from_std(max_age)
            .unwrap_or_else(|_| chrono::Duration::seconds(86_400));

        let mut entries: HashMap<String, JournalEntry> = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|e| {
                warn!("Journal at {} is corrupt, starting fresh: {}", path.display(), e);
                HashMap::new()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(e.into()),
        };

        let cutoff = Utc::now() - max_age;
        let before = entries.len();
        entries.retain(|_, entry| entry.timestamp >= cutoff);
        if before != entries.len() {
            info!("Pruned {} stale journal entries", before - entries.len());
        }

        let journal = Self {
            path,
            max_age,
            entries: Mutex::new(entries),
        };
        journal.persist(&*journal.entries.lock().await).await?;
        Ok(journal)
    }

    /// Record a freshly submitted operation
    pub async fn record(&self, handle: &OperationHandle, kind: OperationKind) -> Result<()> {
        let mut entries = self.entries.lock().await;
        entries.insert(
            handle.as_str().to_string(),
            JournalEntry {
                handle: handle.as_str().to_string(),
                kind,
                status: "pending".to_string(),
                timestamp: Utc::now(),
            },
        );
        debug!("Journaled pending {} operation {}", kind, handle);
        self.persist(&entries).await
    }

    /// Record a terminal status. Confirmed and failed operations are
    /// resolved and removed; a timed-out operation stays journaled because
    /// its real outcome is unknown and worth re-checking after a reload.
    pub async fn mark(&self, handle: &OperationHandle, status: &str) -> Result<()> {
        let mut entries = self.entries.lock().await;
        match status {
            "confirmed" | "failed" => {
                if entries.remove(handle.as_str()).is_some() {
                    debug!("Resolved journal entry {} as {}", handle, status);
                }
            }
            _ => {
                if let Some(entry) = entries.get_mut(handle.as_str()) {
                    entry.status = status.to_string();
                }
            }
        }
        self.persist(&entries).await
    }

    /// Entries whose outcome was never resolved, oldest first
    pub async fn unresolved(&self) -> Vec<JournalEntry> {
        let entries = self.entries.lock().await;
        let mut list: Vec<JournalEntry> = entries.values().cloned().collect();
        list.sort_by_key(|entry| entry.timestamp);
        list
    }

    /// Drop entries older than the configured age; returns how many
    pub async fn prune(&self) -> Result<usize> {
        let mut entries = self.entries.lock().await;
        let cutoff = Utc::now() - self.max_age;
        let before = entries.len();
        entries.retain(|_, entry| entry.timestamp >= cutoff);
        let pruned = before - entries.len();
        if pruned > 0 {
            info!("Pruned {} journal entries", pruned);
            self.persist(&entries).await?;
        }
        Ok(pruned)
    }

    async fn persist(&self, entries: &HashMap<String, JournalEntry>) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(entries)?;
        tokio::fs::write(&self.path, bytes).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(raw: &str) -> OperationHandle {
        OperationHandle::new(raw)
    }

    #[tokio::test]
    async fn test_record_mark_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("journal.json");

        let journal = OperationJournal::open(&path, Duration::from_secs(3600))
            .await
            .unwrap();
        journal
            .record(&handle("0xaaa"), OperationKind::Deposit)
            .await
            .unwrap();
        journal
            .record(&handle("0xbbb"), OperationKind::Grant)
            .await
            .unwrap();
        journal.mark(&handle("0xbbb"), "confirmed").await.unwrap();

        // Resolved entries disappear; pending ones survive a reload
        let reloaded = OperationJournal::open(&path, Duration::from_secs(3600))
            .await
            .unwrap();
        let unresolved = reloaded.unresolved().await;
        assert_eq!(unresolved.len(), 1);
        assert_eq!(unresolved[0].handle, "0xaaa");
        assert_eq!(unresolved[0].status, "pending");
    }

    #[tokio::test]
    async fn test_timed_out_entries_stay_for_recovery() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("journal.json");

        let journal = OperationJournal::open(&path, Duration::from_secs(3600))
            .await
            .unwrap();
        journal
            .record(&handle("0xccc"), OperationKind::WithdrawInitiate)
            .await
            .unwrap();
        journal.mark(&handle("0xccc"), "timed_out").await.unwrap();

        let unresolved = journal.unresolved().await;
        assert_eq!(unresolved.len(), 1);
        assert_eq!(unresolved[0].status, "timed_out");
    }

    #[tokio::test]
    async fn test_prune_by_age() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("journal.json");

        let journal = OperationJournal::open(&path, Duration::from_secs(0))
            .await
            .unwrap();
        journal
            .record(&handle("0xddd"), OperationKind::Redeem)
            .await
            .unwrap();

        // max_age of zero means everything as of "now" is already stale
        tokio::time::sleep(Duration::from_millis(10)).await;
        let pruned = journal.prune().await.unwrap();
        assert_eq!(pruned, 1);
        assert!(journal.unresolved().await.is_empty());
    }
}
