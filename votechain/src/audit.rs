use crate::{Error, Result};
use chrono::{DateTime, Utc};
use std::sync::{PoisonError, RwLock};
use tracing::warn;
use uuid::Uuid;

/// Kind of event being recorded
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    CeremonyStarted,
    CeremonyCompleted,
    CeremonyFailed,
    SharesDistributed,
    PrivateDataDestroyed,
    GenesisCreated,
    BlockSealed,
    ChainValidated,
    ReceiptVerified,
}

impl AuditEventType {
    pub fn label(&self) -> &'static str {
        match self {
            AuditEventType::CeremonyStarted => "CEREMONY_STARTED",
            AuditEventType::CeremonyCompleted => "CEREMONY_COMPLETED",
            AuditEventType::CeremonyFailed => "CEREMONY_FAILED",
            AuditEventType::SharesDistributed => "SHARES_DISTRIBUTED",
            AuditEventType::PrivateDataDestroyed => "PRIVATE_DATA_DESTROYED",
            AuditEventType::GenesisCreated => "GENESIS",
            AuditEventType::BlockSealed => "BLOCK",
            AuditEventType::ChainValidated => "VALIDATE",
            AuditEventType::ReceiptVerified => "RECEIPT",
        }
    }
}

/// An immutable audit entry. Never carries voter identity or key material.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct AuditRecord {
    pub id: Uuid,
    pub event_type: AuditEventType,
    pub election_id: Uuid,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl AuditRecord {
    pub fn new(event_type: AuditEventType, election_id: Uuid, message: impl Into<String>) -> Self {
        AuditRecord {
            id: Uuid::new_v4(),
            event_type,
            election_id,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Append-only audit sink
pub trait AuditLog: Send + Sync {
    fn append(&self, record: AuditRecord) -> Result<()>;

    /// Records for one election, oldest first
    fn records(&self, election_id: Uuid) -> Vec<AuditRecord>;

    /// Append a new record. A failing sink is logged, never propagated.
    fn record(&self, event_type: AuditEventType, election_id: Uuid, message: String) {
        if let Err(e) = self.append(AuditRecord::new(event_type, election_id, message)) {
            warn!(
                event = event_type.label(),
                election = %election_id,
                error = %e,
                "failed to append audit record"
            );
        }
    }

    fn update(&self, _record: AuditRecord) -> Result<()> {
        Err(Error::Forbidden("immutable"))
    }

    fn delete(&self, _id: Uuid) -> Result<()> {
        Err(Error::Forbidden("immutable"))
    }
}

/// In-memory audit log
#[derive(Debug, Default)]
pub struct MemAuditLog {
    records: RwLock<Vec<AuditRecord>>,
}

impl MemAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl AuditLog for MemAuditLog {
    fn append(&self, record: AuditRecord) -> Result<()> {
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        if records.iter().any(|r| r.id == record.id) {
            return Err(Error::Forbidden("immutable"));
        }
        tracing::debug!(
            event = record.event_type.label(),
            election = %record.election_id,
            "audit record appended"
        );
        records.push(record);
        Ok(())
    }

    fn records(&self, election_id: Uuid) -> Vec<AuditRecord> {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|r| r.election_id == election_id)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn appends_and_filters() {
        let log = MemAuditLog::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        log.append(AuditRecord::new(AuditEventType::GenesisCreated, a, "genesis"))
            .unwrap();
        log.append(AuditRecord::new(AuditEventType::GenesisCreated, b, "genesis"))
            .unwrap();
        log.append(AuditRecord::new(AuditEventType::BlockSealed, a, "block 1"))
            .unwrap();

        let records = log.records(a);
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].message, "block 1");
        assert_eq!(log.len(), 3);
    }

    #[test]
    fn records_are_immutable() {
        let log = MemAuditLog::new();
        let record = AuditRecord::new(AuditEventType::ReceiptVerified, Uuid::new_v4(), "receipt");
        log.append(record.clone()).unwrap();

        assert!(matches!(log.append(record.clone()), Err(Error::Forbidden("immutable"))));
        assert!(matches!(log.update(record.clone()), Err(Error::Forbidden("immutable"))));
        assert!(matches!(log.delete(record.id), Err(Error::Forbidden("immutable"))));
        assert_eq!(log.len(), 1);
    }

    struct ClosedLog;

    impl AuditLog for ClosedLog {
        fn append(&self, _record: AuditRecord) -> Result<()> {
            Err(Error::Forbidden("closed"))
        }

        fn records(&self, _election_id: Uuid) -> Vec<AuditRecord> {
            Vec::new()
        }
    }

    #[test]
    fn record_swallows_sink_failures() {
        let log = MemAuditLog::new();
        let election = Uuid::new_v4();
        log.record(AuditEventType::CeremonyStarted, election, "started".into());
        assert_eq!(log.records(election)[0].event_type, AuditEventType::CeremonyStarted);

        ClosedLog.record(AuditEventType::CeremonyStarted, election, "started".into());
    }

    #[test]
    fn thread_safety() {
        let log = Arc::new(MemAuditLog::new());
        let election = Uuid::new_v4();

        let handles: Vec<_> = (0..10)
            .map(|i| {
                let log = log.clone();
                std::thread::spawn(move || {
                    log.append(AuditRecord::new(
                        AuditEventType::BlockSealed,
                        election,
                        format!("block {}", i),
                    ))
                    .unwrap();
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(log.records(election).len(), 10);
    }
}
