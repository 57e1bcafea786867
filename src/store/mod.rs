//! Repository adapters.

mod journal;
mod journaled;
mod memory;

pub use journal::Journal;
pub use journaled::JournalRepository;
pub use memory::InMemoryRepository;

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::RwLock;

use crate::model::*;
use crate::ports::StorageError;

/// One reservation's durable state. `None` while a first save is still being
/// written; readers treat that as absent.
pub(crate) type Slot = Arc<RwLock<Option<ReservationRecord>>>;

/// Optimistic check: `record` must be exactly one version past `found`.
pub(crate) fn check_version(record: &ReservationRecord, found: u64) -> Result<(), StorageError> {
    if found + 1 == record.version {
        Ok(())
    } else {
        Err(StorageError::VersionConflict {
            id: record.id,
            expected: record.version.saturating_sub(1),
            found,
        })
    }
}

/// Copy out every stored record matching `pred`. Each record is read under
/// its own lock, so no torn record is ever returned.
pub(crate) async fn snapshot_where(
    records: &DashMap<ReservationId, Slot>,
    pred: impl Fn(&ReservationRecord) -> bool,
) -> Vec<ReservationRecord> {
    let slots: Vec<Slot> = records.iter().map(|e| e.value().clone()).collect();
    let mut out = Vec::new();
    for slot in slots {
        let guard = slot.read().await;
        if let Some(record) = guard.as_ref()
            && pred(record) {
                out.push(record.clone());
            }
    }
    out
}
