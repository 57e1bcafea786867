use std::sync::Arc;

use async_trait::async_trait;

use crate::model::*;
use crate::ports::{Repository, ValidationError, Validator};
use crate::reservation::Reservation;

/// Rejects a submission whose windows collide with an already accepted
/// reservation of the same room. Pending requests may overlap each other;
/// the approver picks among them.
pub struct RoomConflictValidator {
    repository: Arc<dyn Repository>,
}

impl RoomConflictValidator {
    pub fn new(repository: Arc<dyn Repository>) -> Self {
        Self { repository }
    }
}

#[async_trait]
impl Validator for RoomConflictValidator {
    async fn validate(&self, reservation: &Reservation) -> Result<(), ValidationError> {
        let booked = self
            .repository
            .find_by_room(reservation.room())
            .await
            .map_err(|e| ValidationError::Unavailable(e.to_string()))?;

        for other in booked
            .iter()
            .filter(|r| {
                r.state == ReservationState::Accepted
                    || r.pending == Some(ReservationState::Accepted)
            })
            .filter(|r| Some(r.id) != reservation.id())
        {
            let live = other
                .occurrences
                .iter()
                .filter(|o| o.state != OccurrenceState::Complete);
            for theirs in live {
                if let Some(ours) = reservation
                    .occurrences()
                    .iter()
                    .find(|o| o.span().overlaps(&theirs.span))
                {
                    return Err(ValidationError::Rejected(format!(
                        "window {}..{} conflicts with accepted reservation {}",
                        ours.start(),
                        ours.end(),
                        other.id
                    )));
                }
            }
        }
        Ok(())
    }
}
