use tracing::{debug, info, warn};

use crate::model::*;
use crate::observability;
use crate::ports::{Ports, StorageError};
use crate::reservation::{LifecycleError, Reservation};

/// Outcome of one expiration pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub expired: Vec<ReservationId>,
    /// Decided by someone else between the scan and the expire, or with
    /// another transition still in flight.
    pub skipped: Vec<ReservationId>,
    pub failed: Vec<(ReservationId, String)>,
}

pub fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as Ms
}

/// Expire every reservation still awaiting approval whose first occurrence
/// started at or before `now`. An expiration an earlier pass claimed but
/// could not finish is resumed. One reservation failing does not stop the
/// pass; only failing to list candidates does.
pub async fn expire_overdue(ports: &Ports, now: Ms) -> Result<SweepReport, StorageError> {
    let candidates = ports
        .repository
        .find_by_state(ReservationState::AwaitingApproval)
        .await?;

    let mut report = SweepReport::default();
    for record in candidates {
        if record.first_start().is_none_or(|start| start > now) {
            continue;
        }
        let id = record.id;
        let mut reservation = Reservation::from_record(&record);
        let outcome = if record.pending == Some(ReservationState::Expired) {
            reservation.resume(ports).await
        } else {
            reservation.expire(ports).await
        };
        match outcome {
            Ok(()) => {
                info!("expired overdue reservation {id}");
                metrics::counter!(observability::SWEEP_RESERVATIONS_TOTAL, "outcome" => "expired")
                    .increment(1);
                report.expired.push(id);
            }
            Err(
                e @ (LifecycleError::ConcurrentModification { .. }
                | LifecycleError::TransitionInFlight(_)),
            ) => {
                debug!("sweep skip {id}: {e}");
                metrics::counter!(observability::SWEEP_RESERVATIONS_TOTAL, "outcome" => "skipped")
                    .increment(1);
                report.skipped.push(id);
            }
            Err(e) => {
                warn!("sweep failed to expire {id}: {e}");
                metrics::counter!(observability::SWEEP_RESERVATIONS_TOTAL, "outcome" => "failed")
                    .increment(1);
                report.failed.push((id, e.to_string()));
            }
        }
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::HoldBook;
    use crate::notify::NotifyHub;
    use crate::occurrence::Occurrence;
    use crate::ports::{Notifier, NotifyError, Repository, Validator, ValidationError};
    use crate::store::InMemoryRepository;
    use async_trait::async_trait;
    use std::sync::Arc;
    use ulid::Ulid;

    const H: Ms = 3_600_000;
    const NOW: Ms = 1_900_000_000_000;

    struct AcceptAll;

    #[async_trait]
    impl Validator for AcceptAll {
        async fn validate(&self, _: &Reservation) -> Result<(), ValidationError> {
            Ok(())
        }
    }

    struct Unreachable;

    #[async_trait]
    impl Notifier for Unreachable {
        async fn send(&self, _: &Notice) -> Result<(), NotifyError> {
            Err(NotifyError::Unavailable("smtp down".into()))
        }
    }

    fn ports(repo: Arc<InMemoryRepository>) -> Ports {
        Ports {
            repository: repo,
            calendar: Arc::new(HoldBook::new()),
            notifier: Arc::new(NotifyHub::new(16)),
            validator: Arc::new(AcceptAll),
        }
    }

    fn awaiting(start: Ms) -> ReservationRecord {
        ReservationRecord {
            id: Ulid::new(),
            version: 1,
            contact: "sweep@example.org".into(),
            room: Ulid::new(),
            state: ReservationState::AwaitingApproval,
            pending: None,
            is_signed: true,
            occurrences: vec![OccurrenceRecord {
                span: Span::new(start, start + H),
                state: OccurrenceState::Pending,
            }],
        }
    }

    #[tokio::test]
    async fn expires_only_started_requests() {
        let repo = Arc::new(InMemoryRepository::new());
        let overdue = awaiting(NOW - H);
        let starting_now = awaiting(NOW);
        let future = awaiting(NOW + H);
        for r in [&overdue, &starting_now, &future] {
            repo.save(r).await.unwrap();
        }

        let report = expire_overdue(&ports(repo.clone()), NOW).await.unwrap();
        let mut expired = report.expired.clone();
        expired.sort();
        let mut want = vec![overdue.id, starting_now.id];
        want.sort();
        assert_eq!(expired, want);
        assert!(report.skipped.is_empty() && report.failed.is_empty());

        let stored = repo.load(overdue.id).await.unwrap().unwrap();
        assert_eq!(stored.state, ReservationState::Expired);
        assert_eq!(stored.pending, None);
        assert_eq!(stored.version, 3);
        let untouched = repo.load(future.id).await.unwrap().unwrap();
        assert_eq!(untouched.state, ReservationState::AwaitingApproval);
    }

    #[tokio::test]
    async fn accepted_reservations_are_left_alone() {
        let repo = Arc::new(InMemoryRepository::new());
        let mut accepted = awaiting(NOW - H);
        accepted.state = ReservationState::Accepted;
        repo.save(&accepted).await.unwrap();

        let report = expire_overdue(&ports(repo.clone()), NOW).await.unwrap();
        assert_eq!(report, SweepReport::default());
    }

    #[tokio::test]
    async fn notifier_failure_is_reported_not_fatal() {
        let repo = Arc::new(InMemoryRepository::new());
        let a = awaiting(NOW - H);
        repo.save(&a).await.unwrap();

        let mut p = ports(repo.clone());
        p.notifier = Arc::new(Unreachable);
        let report = expire_overdue(&p, NOW).await.unwrap();
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, a.id);

        // Claimed but not settled: still awaiting a decision.
        let stored = repo.load(a.id).await.unwrap().unwrap();
        assert_eq!(stored.state, ReservationState::AwaitingApproval);
        assert_eq!(stored.pending, Some(ReservationState::Expired));

        // The next pass with a working notifier finishes the job.
        let report = expire_overdue(&ports(repo.clone()), NOW).await.unwrap();
        assert_eq!(report.expired, vec![a.id]);
        let stored = repo.load(a.id).await.unwrap().unwrap();
        assert_eq!(stored.state, ReservationState::Expired);
        assert_eq!(stored.pending, None);
    }

    #[tokio::test]
    async fn approval_in_flight_is_skipped() {
        let repo = Arc::new(InMemoryRepository::new());
        let mut a = awaiting(NOW - H);
        a.pending = Some(ReservationState::Accepted);
        repo.save(&a).await.unwrap();

        let report = expire_overdue(&ports(repo.clone()), NOW).await.unwrap();
        assert_eq!(report.skipped, vec![a.id]);
        let stored = repo.load(a.id).await.unwrap().unwrap();
        assert_eq!(stored.version, 1);
        assert_eq!(stored.pending, Some(ReservationState::Accepted));
    }

    /// Serves a candidate list captured before the reservations moved on.
    struct EarlierScan {
        inner: Arc<InMemoryRepository>,
        scan: Vec<ReservationRecord>,
    }

    #[async_trait]
    impl Repository for EarlierScan {
        async fn save(&self, record: &ReservationRecord) -> Result<(), StorageError> {
            self.inner.save(record).await
        }
        async fn load(&self, id: ReservationId) -> Result<Option<ReservationRecord>, StorageError> {
            self.inner.load(id).await
        }
        async fn find_by_state(
            &self,
            _: ReservationState,
        ) -> Result<Vec<ReservationRecord>, StorageError> {
            Ok(self.scan.clone())
        }
        async fn find_by_room(&self, room: RoomId) -> Result<Vec<ReservationRecord>, StorageError> {
            self.inner.find_by_room(room).await
        }
    }

    #[tokio::test]
    async fn sweep_losing_to_approval_leaves_no_trace() {
        let repo = Arc::new(InMemoryRepository::new());
        let calendar = Arc::new(HoldBook::new());
        let hub = Arc::new(NotifyHub::new(16));
        let live = Ports {
            repository: repo.clone(),
            calendar: calendar.clone(),
            notifier: hub.clone(),
            validator: Arc::new(AcceptAll),
        };
        let contact: Contact = "sweep@example.org".into();
        let mut inbox = hub.subscribe(&contact);

        let mut r = Reservation::new(contact.clone(), Ulid::new());
        r.add_occurrence(Occurrence::new(Span::new(NOW - H, NOW))).unwrap();
        r.sign().unwrap();
        r.submit(&live).await.unwrap();
        let id = r.id().unwrap();

        let scan = repo.find_by_state(ReservationState::AwaitingApproval).await.unwrap();
        r.approve(&live).await.unwrap();
        assert_eq!(inbox.recv().await.unwrap().kind, MessageKind::Approval);

        let sweeping = Ports {
            repository: Arc::new(EarlierScan { inner: repo.clone(), scan }),
            ..live.clone()
        };
        let report = expire_overdue(&sweeping, NOW).await.unwrap();
        assert_eq!(report.skipped, vec![id]);
        assert!(report.expired.is_empty());

        assert!(calendar.is_held(id));
        assert!(inbox.try_recv().is_err());
        let stored = repo.load(id).await.unwrap().unwrap();
        assert_eq!(stored.state, ReservationState::Accepted);
        assert_eq!(stored.version, 4);
    }
}
