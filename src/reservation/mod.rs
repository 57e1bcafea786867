mod error;
mod operations;

pub use error::{LifecycleError, Step};

use ulid::Ulid;

use crate::model::*;
use crate::occurrence::Occurrence;
use crate::ports::Repository;
use crate::state_machine::StateMachine;

const EDGES: &[(ReservationState, &[ReservationState])] = &[
    (ReservationState::Unsubmitted, &[ReservationState::AwaitingApproval]),
    (
        ReservationState::AwaitingApproval,
        &[
            ReservationState::Accepted,
            ReservationState::Denied,
            ReservationState::Expired,
        ],
    ),
    (
        ReservationState::Accepted,
        &[ReservationState::Canceled, ReservationState::Complete],
    ),
];

pub static RESERVATION_LIFECYCLE: StateMachine<ReservationState> = StateMachine::new(EDGES);

/// A request to use one room over one or more time windows.
///
/// State only moves along `RESERVATION_LIFECYCLE`. Every mutating operation
/// builds the next [`ReservationRecord`] first and copies it into `self` only
/// after the repository accepted it, so the in-memory value never claims a
/// state that is not durable. After a collaborator failure the value is
/// marked stale and must be reloaded.
///
/// A transition with calendar or notifier calls is committed in two writes.
/// The first claims it (`pending` set, state unchanged) and decides any race
/// before a collaborator is touched. The second settles it once every call
/// succeeded. A reservation left with a claim is finished with
/// [`Reservation::resume`] or rolled back with [`Reservation::release_claim`].
#[derive(Debug, Clone)]
pub struct Reservation {
    id: Option<ReservationId>,
    version: u64,
    contact: Contact,
    room: RoomId,
    state: ReservationState,
    pending: Option<ReservationState>,
    is_signed: bool,
    occurrences: Vec<Occurrence>,
    stale: bool,
}

impl Reservation {
    pub fn new(contact: Contact, room: RoomId) -> Self {
        Self {
            id: None,
            version: 0,
            contact,
            room,
            state: ReservationState::Unsubmitted,
            pending: None,
            is_signed: false,
            occurrences: Vec::new(),
            stale: false,
        }
    }

    pub fn from_record(record: &ReservationRecord) -> Self {
        Self {
            id: Some(record.id),
            version: record.version,
            contact: record.contact.clone(),
            room: record.room,
            state: record.state,
            pending: record.pending,
            is_signed: record.is_signed,
            occurrences: record.occurrences.iter().map(Occurrence::from_record).collect(),
            stale: false,
        }
    }

    /// Fetch the durable copy. Callers use this to recover after a
    /// `ConcurrentModification` or any other collaborator failure.
    pub async fn load(
        id: ReservationId,
        repository: &dyn Repository,
    ) -> Result<Option<Self>, LifecycleError> {
        let record = repository
            .load(id)
            .await
            .map_err(|e| LifecycleError::from_storage(id, e))?;
        Ok(record.as_ref().map(Self::from_record))
    }

    // ── Accessors ────────────────────────────────────────────

    pub fn id(&self) -> Option<ReservationId> {
        self.id
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn contact(&self) -> &Contact {
        &self.contact
    }

    pub fn room(&self) -> RoomId {
        self.room
    }

    pub fn state(&self) -> ReservationState {
        self.state
    }

    /// The transition claimed but not yet settled, if any.
    pub fn pending_transition(&self) -> Option<ReservationState> {
        self.pending
    }

    pub fn is_signed(&self) -> bool {
        self.is_signed
    }

    pub fn occurrences(&self) -> &[Occurrence] {
        &self.occurrences
    }

    pub fn is_stale(&self) -> bool {
        self.stale
    }

    pub fn can_transition(&self, target: ReservationState) -> bool {
        RESERVATION_LIFECYCLE.can_transition(self.state, target)
    }

    // ── Draft editing ────────────────────────────────────────

    /// Record the requester's attestation. Required before `submit`.
    pub fn sign(&mut self) -> Result<(), LifecycleError> {
        self.ensure_settled()?;
        if self.state != ReservationState::Unsubmitted {
            return Err(LifecycleError::DraftClosed(self.state));
        }
        self.is_signed = true;
        Ok(())
    }

    /// Append a time window. Windows must be added in chronological order,
    /// and only while the reservation is still a draft.
    pub fn add_occurrence(&mut self, occurrence: Occurrence) -> Result<(), LifecycleError> {
        self.ensure_settled()?;
        if self.state != ReservationState::Unsubmitted {
            return Err(LifecycleError::DraftClosed(self.state));
        }
        if let Some(last) = self.occurrences.last()
            && occurrence.start() < last.start() {
                return Err(LifecycleError::ValidationFailed(
                    "occurrences must be added in chronological order".into(),
                ));
            }
        self.occurrences.push(occurrence);
        Ok(())
    }

    /// Persist the current value without a transition. Mints the id on the
    /// first call.
    pub async fn save(&mut self, repository: &dyn Repository) -> Result<(), LifecycleError> {
        self.ensure_settled()?;
        let id = self.id.unwrap_or_else(Ulid::new);
        let record = self.record_as(id, self.state, None, &self.occurrences);
        self.persist(repository, record).await
    }

    // ── Internals shared with operations.rs ──────────────────

    pub(crate) fn ensure_fresh(&self) -> Result<(), LifecycleError> {
        if self.stale {
            Err(LifecycleError::Stale)
        } else {
            Ok(())
        }
    }

    /// Fresh and with no claimed transition outstanding.
    pub(crate) fn ensure_settled(&self) -> Result<(), LifecycleError> {
        self.ensure_fresh()?;
        match self.pending {
            Some(target) => Err(LifecycleError::TransitionInFlight(target)),
            None => Ok(()),
        }
    }

    /// The record this reservation would have after moving to `state` with
    /// `pending` and `occurrences`. The version is the next one.
    fn record_as(
        &self,
        id: ReservationId,
        state: ReservationState,
        pending: Option<ReservationState>,
        occurrences: &[Occurrence],
    ) -> ReservationRecord {
        ReservationRecord {
            id,
            version: self.version + 1,
            contact: self.contact.clone(),
            room: self.room,
            state,
            pending,
            is_signed: self.is_signed,
            occurrences: occurrences.iter().map(|o| o.to_record()).collect(),
        }
    }

    /// Save `record` and adopt it on success. Any failure marks `self` stale.
    async fn persist(
        &mut self,
        repository: &dyn Repository,
        record: ReservationRecord,
    ) -> Result<(), LifecycleError> {
        match repository.save(&record).await {
            Ok(()) => {
                self.adopt(&record);
                Ok(())
            }
            Err(e) => {
                self.stale = true;
                metrics::counter!(
                    crate::observability::COLLABORATOR_FAILURES_TOTAL,
                    "step" => "persist"
                )
                .increment(1);
                tracing::warn!(reservation = %record.id, version = record.version, "persist failed: {e}");
                Err(LifecycleError::from_storage(record.id, e))
            }
        }
    }

    fn adopt(&mut self, record: &ReservationRecord) {
        self.id = Some(record.id);
        self.version = record.version;
        self.state = record.state;
        self.pending = record.pending;
        self.occurrences = record.occurrences.iter().map(Occurrence::from_record).collect();
    }
}
