use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::RwLock;

use crate::model::*;
use crate::ports::{Repository, StorageError};

use super::{Slot, check_version, snapshot_where};

/// Repository that keeps every reservation in memory. Each record sits
/// behind its own lock, which is the per-identity writer exclusion.
pub struct InMemoryRepository {
    records: DashMap<ReservationId, Slot>,
}

impl Default for InMemoryRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl Repository for InMemoryRepository {
    async fn save(&self, record: &ReservationRecord) -> Result<(), StorageError> {
        let existing = self.records.get(&record.id).map(|e| e.value().clone());
        let slot = match existing {
            Some(slot) => slot,
            None => {
                check_version(record, 0)?;
                match self.records.entry(record.id) {
                    Entry::Vacant(v) => {
                        v.insert(Arc::new(RwLock::new(Some(record.clone()))));
                        return Ok(());
                    }
                    // Lost a first-save race; fall through to the version check.
                    Entry::Occupied(o) => o.get().clone(),
                }
            }
        };

        let mut guard = slot.write().await;
        let found = guard.as_ref().map_or(0, |r| r.version);
        check_version(record, found)?;
        *guard = Some(record.clone());
        Ok(())
    }

    async fn load(&self, id: ReservationId) -> Result<Option<ReservationRecord>, StorageError> {
        let Some(slot) = self.records.get(&id).map(|e| e.value().clone()) else {
            return Ok(None);
        };
        let guard = slot.read().await;
        Ok(guard.clone())
    }

    async fn find_by_state(
        &self,
        state: ReservationState,
    ) -> Result<Vec<ReservationRecord>, StorageError> {
        Ok(snapshot_where(&self.records, |r| r.state == state).await)
    }

    async fn find_by_room(&self, room: RoomId) -> Result<Vec<ReservationRecord>, StorageError> {
        Ok(snapshot_where(&self.records, |r| r.room == room).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    fn record(id: ReservationId, version: u64, state: ReservationState) -> ReservationRecord {
        ReservationRecord {
            id,
            version,
            contact: "mem@example.org".into(),
            room: Ulid::nil(),
            state,
            pending: None,
            is_signed: true,
            occurrences: Vec::new(),
        }
    }

    #[tokio::test]
    async fn first_save_then_next_version() {
        let repo = InMemoryRepository::new();
        let id = Ulid::new();
        repo.save(&record(id, 1, ReservationState::Unsubmitted)).await.unwrap();
        repo.save(&record(id, 2, ReservationState::AwaitingApproval)).await.unwrap();

        let loaded = repo.load(id).await.unwrap().unwrap();
        assert_eq!(loaded.version, 2);
        assert_eq!(loaded.state, ReservationState::AwaitingApproval);
    }

    #[tokio::test]
    async fn stale_version_rejected() {
        let repo = InMemoryRepository::new();
        let id = Ulid::new();
        repo.save(&record(id, 1, ReservationState::Unsubmitted)).await.unwrap();
        repo.save(&record(id, 2, ReservationState::AwaitingApproval)).await.unwrap();

        let err = repo
            .save(&record(id, 2, ReservationState::AwaitingApproval))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            StorageError::VersionConflict { id, expected: 1, found: 2 }
        );
        let loaded = repo.load(id).await.unwrap().unwrap();
        assert_eq!(loaded.version, 2);
    }

    #[tokio::test]
    async fn update_of_unknown_id_rejected() {
        let repo = InMemoryRepository::new();
        let id = Ulid::new();
        let err = repo.save(&record(id, 4, ReservationState::Accepted)).await.unwrap_err();
        assert!(matches!(err, StorageError::VersionConflict { found: 0, .. }));
        assert!(repo.is_empty());
    }

    #[tokio::test]
    async fn finds_by_state_and_room() {
        let repo = InMemoryRepository::new();
        let a = Ulid::new();
        let b = Ulid::new();
        repo.save(&record(a, 1, ReservationState::Unsubmitted)).await.unwrap();
        repo.save(&record(b, 1, ReservationState::Unsubmitted)).await.unwrap();
        repo.save(&record(b, 2, ReservationState::AwaitingApproval)).await.unwrap();

        let awaiting = repo.find_by_state(ReservationState::AwaitingApproval).await.unwrap();
        assert_eq!(awaiting.len(), 1);
        assert_eq!(awaiting[0].id, b);

        assert_eq!(repo.find_by_room(Ulid::nil()).await.unwrap().len(), 2);
        assert!(repo.find_by_room(Ulid::new()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn load_missing_is_none() {
        let repo = InMemoryRepository::new();
        assert!(repo.load(Ulid::new()).await.unwrap().is_none());
    }
}
