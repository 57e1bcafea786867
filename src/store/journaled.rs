use std::io;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::{RwLock, mpsc, oneshot};

use crate::limits::MAX_JOURNAL_ENTRY_BYTES;
use crate::model::*;
use crate::observability;
use crate::ports::{Repository, StorageError};

use super::journal::Journal;
use super::{Slot, check_version, snapshot_where};

// ── Group-commit journal channel ─────────────────────────

enum JournalCommand {
    Append {
        record: ReservationRecord,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        records: Vec<ReservationRecord>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the journal and batches appends:
/// block for the first append, drain whatever else is already queued, then
/// fsync once and answer every sender with the shared result.
async fn journal_writer_loop(mut journal: Journal, mut rx: mpsc::Receiver<JournalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            JournalCommand::Append { record, response } => {
                let mut batch = vec![(record, response)];
                let mut deferred = None;
                loop {
                    match rx.try_recv() {
                        Ok(JournalCommand::Append { record, response }) => {
                            batch.push((record, response));
                        }
                        Ok(other) => {
                            deferred = Some(other);
                            break;
                        }
                        Err(_) => break,
                    }
                }

                metrics::histogram!(observability::JOURNAL_FLUSH_BATCH_SIZE)
                    .record(batch.len() as f64);
                let flush_start = std::time::Instant::now();
                let result = flush_batch(&mut journal, &batch);
                metrics::histogram!(observability::JOURNAL_FLUSH_DURATION_SECONDS)
                    .record(flush_start.elapsed().as_secs_f64());
                for (_, tx) in batch {
                    let r = match &result {
                        Ok(()) => Ok(()),
                        Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
                    };
                    let _ = tx.send(r);
                }

                if let Some(other) = deferred {
                    handle_other(&mut journal, other);
                }
            }
            other => handle_other(&mut journal, other),
        }
    }
}

fn flush_batch(
    journal: &mut Journal,
    batch: &[(ReservationRecord, oneshot::Sender<io::Result<()>>)],
) -> io::Result<()> {
    let mut append_err = None;
    for (record, _) in batch {
        if let Err(e) = journal.append_buffered(record) {
            append_err = Some(e);
            break;
        }
    }
    // Flush even after an append error so half-buffered bytes don't ride
    // along with the next batch.
    let flush_err = journal.flush_sync().err();
    match (append_err, flush_err) {
        (Some(e), _) | (None, Some(e)) => Err(e),
        (None, None) => Ok(()),
    }
}

fn handle_other(journal: &mut Journal, cmd: JournalCommand) {
    match cmd {
        JournalCommand::Compact { records, response } => {
            let _ = response.send(journal.compact(&records));
        }
        JournalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(journal.appends_since_compact());
        }
        JournalCommand::Append { .. } => unreachable!("appends are batched by the caller"),
    }
}

fn journal_error(e: impl std::fmt::Display) -> StorageError {
    StorageError::Journal(e.to_string())
}

/// Durable repository: every save is one journal entry, fsynced before the
/// in-memory copy changes. Must be opened inside a tokio runtime.
pub struct JournalRepository {
    records: DashMap<ReservationId, Slot>,
    journal_tx: mpsc::Sender<JournalCommand>,
    /// Saves hold this shared; compaction holds it exclusively so no save
    /// lands between the snapshot and the rewrite.
    compaction: RwLock<()>,
}

impl JournalRepository {
    pub fn open(path: &Path, queue_capacity: usize) -> io::Result<Self> {
        let (journal, replayed) = Journal::recover(path)?;
        let (journal_tx, journal_rx) = mpsc::channel(queue_capacity);
        tokio::spawn(journal_writer_loop(journal, journal_rx));

        let records: DashMap<ReservationId, Slot> = DashMap::new();
        // Later entries supersede earlier ones.
        for record in replayed {
            records.insert(record.id, Arc::new(RwLock::new(Some(record))));
        }
        tracing::info!("journal {} replayed: {} reservations", path.display(), records.len());

        Ok(Self {
            records,
            journal_tx,
            compaction: RwLock::new(()),
        })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    async fn journal_append(&self, record: &ReservationRecord) -> Result<(), StorageError> {
        let (tx, rx) = oneshot::channel();
        self.journal_tx
            .send(JournalCommand::Append {
                record: record.clone(),
                response: tx,
            })
            .await
            .map_err(|_| journal_error("journal writer shut down"))?;
        rx.await
            .map_err(|_| journal_error("journal writer dropped response"))?
            .map_err(journal_error)
    }

    /// Rewrite the journal with only the latest record of each reservation.
    pub async fn compact(&self) -> Result<(), StorageError> {
        let _exclusive = self.compaction.write().await;
        let records = snapshot_where(&self.records, |_| true).await;
        let (tx, rx) = oneshot::channel();
        self.journal_tx
            .send(JournalCommand::Compact { records, response: tx })
            .await
            .map_err(|_| journal_error("journal writer shut down"))?;
        rx.await
            .map_err(|_| journal_error("journal writer dropped response"))?
            .map_err(journal_error)
    }

    pub async fn appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .journal_tx
            .send(JournalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

#[async_trait]
impl Repository for JournalRepository {
    async fn save(&self, record: &ReservationRecord) -> Result<(), StorageError> {
        let encoded = bincode::serialized_size(record).map_err(journal_error)?;
        if encoded > MAX_JOURNAL_ENTRY_BYTES as u64 {
            return Err(StorageError::LimitExceeded("reservation too large for one journal entry"));
        }
        let _shared = self.compaction.read().await;

        let existing = self.records.get(&record.id).map(|e| e.value().clone());
        let slot = match existing {
            Some(slot) => slot,
            None => {
                check_version(record, 0)?;
                // Claim the id with an empty slot, write-locked before it is
                // visible, so readers wait for the journal append.
                let slot: Slot = Arc::new(RwLock::new(None));
                let mut guard = slot.clone().write_owned().await;
                let winner = match self.records.entry(record.id) {
                    Entry::Vacant(v) => {
                        v.insert(slot);
                        None
                    }
                    Entry::Occupied(o) => Some(o.get().clone()),
                };
                if let Some(winner) = winner {
                    let found = winner.read().await.as_ref().map_or(0, |r| r.version);
                    return Err(StorageError::VersionConflict {
                        id: record.id,
                        expected: 0,
                        found,
                    });
                }
                if let Err(e) = self.journal_append(record).await {
                    self.records.remove(&record.id);
                    return Err(e);
                }
                *guard = Some(record.clone());
                return Ok(());
            }
        };

        let mut guard = slot.write().await;
        let found = guard.as_ref().map_or(0, |r| r.version);
        check_version(record, found)?;
        self.journal_append(record).await?;
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
