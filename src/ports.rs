//! Boundaries to the collaborators a reservation talks to.
//!
//! The lifecycle code only ever sees these traits. `store`, `calendar`,
//! `notify` and `validation` hold in-process adapters for each of them.

use std::sync::Arc;

use async_trait::async_trait;

use crate::model::*;
use crate::reservation::Reservation;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StorageError {
    /// The stored version is not the one the writer started from.
    #[error("version conflict on {id}: expected {expected}, found {found}")]
    VersionConflict { id: ReservationId, expected: u64, found: u64 },
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
    #[error("journal error: {0}")]
    Journal(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CalendarError {
    #[error("calendar unavailable: {0}")]
    Unavailable(String),
    #[error("calendar rejected hold: {0}")]
    Rejected(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NotifyError {
    #[error("notification undeliverable to {contact}: {reason}")]
    Undeliverable { contact: Contact, reason: String },
    #[error("notifier unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("{0}")]
    Rejected(String),
    #[error("validator unavailable: {0}")]
    Unavailable(String),
}

/// Durable home of reservations. `save` must make the reservation state and
/// every occurrence state visible together, and must refuse a record whose
/// `version - 1` does not match what is currently stored.
#[async_trait]
pub trait Repository: Send + Sync {
    async fn save(&self, record: &ReservationRecord) -> Result<(), StorageError>;

    async fn load(&self, id: ReservationId) -> Result<Option<ReservationRecord>, StorageError>;

    async fn find_by_state(
        &self,
        state: ReservationState,
    ) -> Result<Vec<ReservationRecord>, StorageError>;

    async fn find_by_room(&self, room: RoomId) -> Result<Vec<ReservationRecord>, StorageError>;
}

/// Shared calendar. Both calls are idempotent.
#[async_trait]
pub trait Calendar: Send + Sync {
    async fn add_hold(&self, hold: &Hold) -> Result<(), CalendarError>;

    async fn remove_hold(&self, reservation_id: ReservationId) -> Result<(), CalendarError>;
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, notice: &Notice) -> Result<(), NotifyError>;
}

/// Domain checks run by `submit` before the reservation leaves the draft state.
#[async_trait]
pub trait Validator: Send + Sync {
    async fn validate(&self, reservation: &Reservation) -> Result<(), ValidationError>;
}

/// The collaborators a lifecycle operation may call.
#[derive(Clone)]
pub struct Ports {
    pub repository: Arc<dyn Repository>,
    pub calendar: Arc<dyn Calendar>,
    pub notifier: Arc<dyn Notifier>,
    pub validator: Arc<dyn Validator>,
}
