use crate::model::*;
use crate::ports::{CalendarError, NotifyError, StorageError};
use crate::state_machine::InvalidTransition;

/// Where a collaborator failure happened, so the caller can pick a
/// compensation. A failed side effect leaves the transition claimed in the
/// store; `resume` or `release_claim` finishes it. A failed persistence either
/// lost the claim, in which case no side effect ran, or failed to settle after
/// every side effect ran. The reloaded `pending_transition` tells them apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    SideEffect,
    Persistence,
}

#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition<ReservationState>),
    #[error("occurrence: {0}")]
    InvalidOccurrenceTransition(#[from] InvalidTransition<OccurrenceState>),
    #[error("validation failed: {0}")]
    ValidationFailed(String),
    #[error("concurrent modification of {id}: expected version {expected}, found {found}")]
    ConcurrentModification {
        id: ReservationId,
        expected: u64,
        found: u64,
    },
    #[error("calendar update for {id} failed: {source}")]
    Calendar {
        id: ReservationId,
        source: CalendarError,
    },
    #[error("{kind:?} notification for {id} failed: {source}")]
    Notify {
        id: ReservationId,
        kind: MessageKind,
        source: NotifyError,
    },
    #[error("persisting {id} failed: {source}")]
    Storage {
        id: ReservationId,
        source: StorageError,
    },
    #[error("validator unavailable: {0}")]
    ValidatorUnavailable(String),
    #[error("reservation is no longer a draft (state {0})")]
    DraftClosed(ReservationState),
    #[error("no occurrence at index {0}")]
    OccurrenceNotFound(usize),
    #[error("reservation failed mid-operation; reload it before reuse")]
    Stale,
    #[error("transition to {0} is still in flight; resume or release it first")]
    TransitionInFlight(ReservationState),
    #[error("no transition is in flight")]
    NoPendingTransition,
}

impl LifecycleError {
    pub(crate) fn from_storage(id: ReservationId, err: StorageError) -> Self {
        match err {
            StorageError::VersionConflict { id, expected, found } => {
                Self::ConcurrentModification { id, expected, found }
            }
            source => Self::Storage { id, source },
        }
    }

    /// The collaborator step that failed, if any.
    pub fn step(&self) -> Option<Step> {
        match self {
            Self::Calendar { .. } | Self::Notify { .. } => Some(Step::SideEffect),
            Self::Storage { .. } | Self::ConcurrentModification { .. } => Some(Step::Persistence),
            _ => None,
        }
    }

    pub fn is_retryable_after_reload(&self) -> bool {
        matches!(self, Self::ConcurrentModification { .. })
    }
}
