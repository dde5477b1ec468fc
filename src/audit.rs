use std::io;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;
use ulid::Ulid;

use crate::model::AuditRecord;
use crate::wal::Wal;

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("audit journal I/O: {0}")]
    Io(#[from] io::Error),
    #[error("audit trail unavailable: {0}")]
    Unavailable(String),
}

/// Append-only record of status transitions.
#[async_trait]
pub trait AuditTrail: Send + Sync {
    async fn append(&self, record: AuditRecord) -> Result<(), AuditError>;

    /// Records for one appointment, oldest first.
    async fn history(&self, appointment_id: Ulid) -> Vec<AuditRecord>;

    /// Every record, oldest first.
    async fn records(&self) -> Vec<AuditRecord>;
}

#[derive(Default)]
pub struct MemoryAuditTrail {
    records: RwLock<Vec<AuditRecord>>,
}

impl MemoryAuditTrail {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AuditTrail for MemoryAuditTrail {
    async fn append(&self, record: AuditRecord) -> Result<(), AuditError> {
        self.records.write().await.push(record);
        Ok(())
    }

    async fn history(&self, appointment_id: Ulid) -> Vec<AuditRecord> {
        self.records
            .read()
            .await
            .iter()
            .filter(|r| r.appointment_id == appointment_id)
            .cloned()
            .collect()
    }

    async fn records(&self) -> Vec<AuditRecord> {
        self.records.read().await.clone()
    }
}

/// Audit trail persisted to its own log file, cached in memory for reads.
pub struct JournalAuditTrail {
    wal: Arc<Mutex<Wal<AuditRecord>>>,
    cache: MemoryAuditTrail,
}

impl JournalAuditTrail {
    pub fn open(path: &Path) -> io::Result<Self> {
        let (wal, records) = Wal::<AuditRecord>::recover(path)?;
        Ok(Self {
            wal: Arc::new(Mutex::new(wal)),
            cache: MemoryAuditTrail {
                records: RwLock::new(records),
            },
        })
    }
}

#[async_trait]
impl AuditTrail for JournalAuditTrail {
    async fn append(&self, record: AuditRecord) -> Result<(), AuditError> {
        let wal = self.wal.clone();
        let durable = record.clone();
        tokio::task::spawn_blocking(move || {
            let mut wal = wal
                .lock()
                .map_err(|_| AuditError::Unavailable("journal lock poisoned".into()))?;
            wal.append(&durable).map_err(AuditError::from)
        })
        .await
        .map_err(|e| AuditError::Unavailable(e.to_string()))??;
        self.cache.append(record).await
    }

    async fn history(&self, appointment_id: Ulid) -> Vec<AuditRecord> {
        self.cache.history(appointment_id).await
    }

    async fn records(&self) -> Vec<AuditRecord> {
        self.cache.records().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    use crate::model::{Actor, Status};

    fn record(appointment_id: Ulid, to: Status) -> AuditRecord {
        AuditRecord {
            id: Ulid::new(),
            appointment_id,
            previous_status: Status::Pending,
            new_status: to,
            actor: Actor::Shop,
            reason: None,
            metadata: None,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn memory_history_filters_by_appointment() {
        let trail = MemoryAuditTrail::new();
        let a = Ulid::new();
        let b = Ulid::new();
        trail.append(record(a, Status::Confirmed)).await.unwrap();
        trail.append(record(b, Status::Rejected)).await.unwrap();

        let history = trail.history(a).await;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].new_status, Status::Confirmed);
        assert_eq!(trail.records().await.len(), 2);
    }

    #[tokio::test]
    async fn journal_survives_reopen() {
        let dir = std::env::temp_dir().join("turnero_test_audit");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("journal_reopen.wal");
        let _ = std::fs::remove_file(&path);

        let id = Ulid::new();
        {
            let trail = JournalAuditTrail::open(&path).unwrap();
            trail.append(record(id, Status::Cancelled)).await.unwrap();
            trail.append(record(Ulid::new(), Status::Confirmed)).await.unwrap();
        }

        let reopened = JournalAuditTrail::open(&path).unwrap();
        let history = reopened.history(id).await;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].new_status, Status::Cancelled);
        assert_eq!(reopened.records().await.len(), 2);

        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn journal_appends_after_torn_tail_survive() {
        use std::io::Write;

        let dir = std::env::temp_dir().join("turnero_test_audit");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("journal_torn.wal");
        let _ = std::fs::remove_file(&path);

        {
            let trail = JournalAuditTrail::open(&path).unwrap();
            trail.append(record(Ulid::new(), Status::Confirmed)).await.unwrap();
        }
        {
            let mut f = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&[40, 0, 0, 0, 1, 2]).unwrap();
        }
        {
            let trail = JournalAuditTrail::open(&path).unwrap();
            assert_eq!(trail.records().await.len(), 1);
            trail.append(record(Ulid::new(), Status::Rejected)).await.unwrap();
        }

        let reopened = JournalAuditTrail::open(&path).unwrap();
        assert_eq!(reopened.records().await.len(), 2);

        let _ = std::fs::remove_file(&path);
    }
}
