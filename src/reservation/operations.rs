use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::occurrence::Occurrence;
use crate::observability;
use crate::ports::{Ports, Repository, ValidationError};

use super::{LifecycleError, RESERVATION_LIFECYCLE, Reservation};

/// Collaborator call made between claiming a transition and settling it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Effect {
    AddHold,
    RemoveHold,
    Notify(MessageKind),
}

impl Effect {
    fn label(&self) -> &'static str {
        match self {
            Effect::AddHold => "add_hold",
            Effect::RemoveHold => "remove_hold",
            Effect::Notify(_) => "notify",
        }
    }
}

// Order within each list is the order the collaborators see.
const ON_SUBMIT: &[Effect] = &[Effect::AddHold];
const ON_APPROVE: &[Effect] = &[Effect::Notify(MessageKind::Approval)];
const ON_DENY: &[Effect] = &[Effect::RemoveHold, Effect::Notify(MessageKind::Denial)];
const ON_EXPIRE: &[Effect] = &[Effect::Notify(MessageKind::Expiration), Effect::RemoveHold];
const ON_CANCEL: &[Effect] = &[Effect::Notify(MessageKind::Cancellation), Effect::RemoveHold];
const ON_COMPLETE: &[Effect] = &[];

fn effects_for(target: ReservationState) -> &'static [Effect] {
    match target {
        ReservationState::Unsubmitted => &[],
        ReservationState::AwaitingApproval => ON_SUBMIT,
        ReservationState::Accepted => ON_APPROVE,
        ReservationState::Denied => ON_DENY,
        ReservationState::Expired => ON_EXPIRE,
        ReservationState::Canceled => ON_CANCEL,
        ReservationState::Complete => ON_COMPLETE,
    }
}

impl Reservation {
    /// UNSUBMITTED → AWAITING_APPROVAL, placing a tentative calendar hold for
    /// every occurrence.
    pub async fn submit(&mut self, ports: &Ports) -> Result<(), LifecycleError> {
        let next = self.begin(ReservationState::AwaitingApproval)?;
        self.check_submittable()?;
        match ports.validator.validate(self).await {
            Ok(()) => {}
            Err(ValidationError::Rejected(reason)) => {
                return Err(LifecycleError::ValidationFailed(reason));
            }
            Err(ValidationError::Unavailable(reason)) => {
                return Err(LifecycleError::ValidatorUnavailable(reason));
            }
        }
        self.commit(ports, next).await
    }

    /// AWAITING_APPROVAL → ACCEPTED.
    pub async fn approve(&mut self, ports: &Ports) -> Result<(), LifecycleError> {
        let next = self.begin(ReservationState::Accepted)?;
        self.commit(ports, next).await
    }

    /// AWAITING_APPROVAL → DENIED. Holds are released before the requester
    /// is told.
    pub async fn deny(&mut self, ports: &Ports) -> Result<(), LifecycleError> {
        let next = self.begin(ReservationState::Denied)?;
        self.commit(ports, next).await
    }

    /// AWAITING_APPROVAL → EXPIRED. The notice goes out while the holds are
    /// still on the calendar.
    pub async fn expire(&mut self, ports: &Ports) -> Result<(), LifecycleError> {
        let next = self.begin(ReservationState::Expired)?;
        self.commit(ports, next).await
    }

    /// ACCEPTED → CANCELED. Occurrences already running keep their own state.
    pub async fn cancel(&mut self, ports: &Ports) -> Result<(), LifecycleError> {
        let next = self.begin(ReservationState::Canceled)?;
        self.commit(ports, next).await
    }

    /// ACCEPTED → COMPLETE.
    pub async fn complete(&mut self, ports: &Ports) -> Result<(), LifecycleError> {
        let next = self.begin(ReservationState::Complete)?;
        self.commit(ports, next).await
    }

    /// Finish a claimed transition: repeat its calendar and notifier calls,
    /// then settle it. Calendar calls are idempotent; a notice may go out
    /// a second time.
    pub async fn resume(&mut self, ports: &Ports) -> Result<(), LifecycleError> {
        self.ensure_fresh()?;
        let (Some(next), Some(id)) = (self.pending, self.id) else {
            return Err(LifecycleError::NoPendingTransition);
        };
        let from = self.state;
        info!(reservation = %id, "resuming {from} -> {next}");
        self.run_effects(ports, id, next, effects_for(next)).await?;
        self.settle(ports.repository.as_ref(), id, next).await
    }

    /// Abandon a claimed transition. The calendar is put back the way the
    /// unchanged state wants it; a notice already sent stays sent.
    pub async fn release_claim(&mut self, ports: &Ports) -> Result<(), LifecycleError> {
        self.ensure_fresh()?;
        let (Some(abandoned), Some(id)) = (self.pending, self.id) else {
            return Err(LifecycleError::NoPendingTransition);
        };
        let restore = if self.state.holds_calendar() {
            Effect::AddHold
        } else {
            Effect::RemoveHold
        };
        self.run_effects(ports, id, self.state, &[restore]).await?;

        let record = self.record_as(id, self.state, None, &self.occurrences);
        self.persist(ports.repository.as_ref(), record).await?;
        metrics::counter!(
            observability::TRANSITIONS_TOTAL,
            "entity" => "reservation",
            "to" => abandoned.as_str(),
            "status" => "released"
        )
        .increment(1);
        info!(reservation = %id, version = self.version, "released claim {} -> {abandoned}", self.state);
        Ok(())
    }

    /// PENDING → IN_PROGRESS for the occurrence at `index`. Only accepted
    /// reservations start occurrences.
    pub async fn start_occurrence(
        &mut self,
        index: usize,
        repository: &dyn Repository,
    ) -> Result<(), LifecycleError> {
        self.ensure_settled()?;
        if self.state != ReservationState::Accepted {
            return Err(LifecycleError::ValidationFailed(format!(
                "occurrences only start on an ACCEPTED reservation (state {})",
                self.state
            )));
        }
        self.drive_occurrence(index, OccurrenceState::InProgress, repository)
            .await
    }

    /// IN_PROGRESS → COMPLETE for the occurrence at `index`, whatever the
    /// reservation state.
    pub async fn finish_occurrence(
        &mut self,
        index: usize,
        repository: &dyn Repository,
    ) -> Result<(), LifecycleError> {
        self.ensure_settled()?;
        self.drive_occurrence(index, OccurrenceState::Complete, repository)
            .await
    }

    // ── Protocol ─────────────────────────────────────────────

    fn begin(&self, target: ReservationState) -> Result<ReservationState, LifecycleError> {
        self.ensure_settled()?;
        RESERVATION_LIFECYCLE
            .transition(self.state, target)
            .map_err(|e| {
                metrics::counter!(
                    observability::TRANSITIONS_TOTAL,
                    "entity" => "reservation",
                    "to" => target.as_str(),
                    "status" => "rejected"
                )
                .increment(1);
                LifecycleError::from(e)
            })
    }

    /// Move to `next`. Without collaborator calls this is one save. Otherwise
    /// the transition is claimed first, so a losing racer fails on the
    /// version check before the calendar or the notifier hears of it, and a
    /// first submit has its id stored before a hold names it.
    async fn commit(
        &mut self,
        ports: &Ports,
        next: ReservationState,
    ) -> Result<(), LifecycleError> {
        let effects = effects_for(next);
        let id = self.id.unwrap_or_else(Ulid::new);
        let repository = ports.repository.as_ref();

        if !effects.is_empty() {
            let claim = self.record_as(id, self.state, Some(next), &self.occurrences);
            self.persist(repository, claim).await?;
            debug!(reservation = %id, version = self.version, "claimed {} -> {next}", self.state);
            self.run_effects(ports, id, next, effects).await?;
        }
        self.settle(repository, id, next).await
    }

    /// Run `effects` in order. The first failure leaves `self` stale with the
    /// claim still stored.
    async fn run_effects(
        &mut self,
        ports: &Ports,
        id: ReservationId,
        next: ReservationState,
        effects: &[Effect],
    ) -> Result<(), LifecycleError> {
        for &effect in effects {
            if let Err(e) = self.perform(ports, id, effect).await {
                self.stale = true;
                metrics::counter!(
                    observability::COLLABORATOR_FAILURES_TOTAL,
                    "step" => effect.label()
                )
                .increment(1);
                warn!(reservation = %id, from = %self.state, to = %next, "{} failed: {e}", effect.label());
                return Err(e);
            }
        }
        Ok(())
    }

    async fn settle(
        &mut self,
        repository: &dyn Repository,
        id: ReservationId,
        next: ReservationState,
    ) -> Result<(), LifecycleError> {
        let from = self.state;
        let record = self.record_as(id, next, None, &self.occurrences);
        self.persist(repository, record).await?;

        metrics::counter!(
            observability::TRANSITIONS_TOTAL,
            "entity" => "reservation",
            "to" => next.as_str(),
            "status" => "committed"
        )
        .increment(1);
        info!(reservation = %id, version = self.version, "{from} -> {next}");
        Ok(())
    }

    async fn perform(
        &self,
        ports: &Ports,
        id: ReservationId,
        effect: Effect,
    ) -> Result<(), LifecycleError> {
        match effect {
            Effect::AddHold => {
                let hold = Hold {
                    reservation_id: id,
                    room: self.room,
                    spans: self.occurrences.iter().map(Occurrence::span).collect(),
                };
                ports
                    .calendar
                    .add_hold(&hold)
                    .await
                    .map_err(|source| LifecycleError::Calendar { id, source })
            }
            Effect::RemoveHold => ports
                .calendar
                .remove_hold(id)
                .await
                .map_err(|source| LifecycleError::Calendar { id, source }),
            Effect::Notify(kind) => {
                let notice = Notice {
                    reservation_id: id,
                    contact: self.contact.clone(),
                    kind,
                };
                ports
                    .notifier
                    .send(&notice)
                    .await
                    .map_err(|source| LifecycleError::Notify { id, kind, source })
            }
        }
    }

    async fn drive_occurrence(
        &mut self,
        index: usize,
        target: OccurrenceState,
        repository: &dyn Repository,
    ) -> Result<(), LifecycleError> {
        let current = self
            .occurrences
            .get(index)
            .ok_or(LifecycleError::OccurrenceNotFound(index))?;
        let from = current.state();
        let next = current.transitioned(target)?;

        let Some(id) = self.id else {
            return Err(LifecycleError::ValidationFailed(
                "reservation has never been saved".into(),
            ));
        };

        let mut occurrences = self.occurrences.clone();
        occurrences[index] = next;
        let record = self.record_as(id, self.state, None, &occurrences);
        self.persist(repository, record).await?;

        metrics::counter!(
            observability::TRANSITIONS_TOTAL,
            "entity" => "occurrence",
            "to" => target.as_str(),
            "status" => "committed"
        )
        .increment(1);
        info!(reservation = %id, occurrence = index, "{from} -> {target}");
        Ok(())
    }

    /// Checks that need nothing outside the reservation itself.
    fn check_submittable(&self) -> Result<(), LifecycleError> {
        let fail = |msg: &str| Err(LifecycleError::ValidationFailed(msg.to_string()));

        if !self.is_signed {
            return fail("reservation must be signed before submission");
        }
        if self.occurrences.is_empty() {
            return fail("reservation has no occurrences");
        }
        if self.occurrences.len() > MAX_OCCURRENCES_PER_RESERVATION {
            return fail("too many occurrences");
        }
        if self.contact.0.is_empty() || self.contact.0.len() > MAX_CONTACT_LEN {
            return fail(&format!("contact must be between 1 and {MAX_CONTACT_LEN} bytes"));
        }
        for occ in &self.occurrences {
            let span = occ.span();
            if span.start >= span.end {
                return fail("occurrence ends before it starts");
            }
            if span.start < MIN_VALID_TIMESTAMP_MS || span.end > MAX_VALID_TIMESTAMP_MS {
                return fail("occurrence timestamp out of range");
            }
            if span.duration_ms() > MAX_OCCURRENCE_DURATION_MS {
                return fail("occurrence too long");
            }
        }

        let mut spans: Vec<Span> = self.occurrences.iter().map(Occurrence::span).collect();
        spans.sort_by_key(|s| s.start);
        if spans.windows(2).any(|w| w[0].overlaps(&w[1])) {
            return fail("occurrences overlap each other");
        }
        Ok(())
    }
}
