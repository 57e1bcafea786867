use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds, the only time type.
pub type Ms = i64;

/// Assigned when a reservation is first persisted.
pub type ReservationId = Ulid;

/// Opaque identity of the room or resource being reserved.
pub type RoomId = Ulid;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    /// Unchecked. An empty or inverted span is representable so that
    /// `submit` can reject it as a validation failure.
    pub fn new(start: Ms, end: Ms) -> Self {
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }
}

/// Requester identity. Opaque to the core; usually an email address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Contact(pub String);

impl fmt::Display for Contact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Contact {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

// ── States ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReservationState {
    Unsubmitted,
    AwaitingApproval,
    Accepted,
    Denied,
    Expired,
    Canceled,
    Complete,
}

impl ReservationState {
    pub const ALL: [ReservationState; 7] = [
        Self::Unsubmitted,
        Self::AwaitingApproval,
        Self::Accepted,
        Self::Denied,
        Self::Expired,
        Self::Canceled,
        Self::Complete,
    ];

    /// States whose reservation keeps its windows on the shared calendar.
    pub fn holds_calendar(&self) -> bool {
        matches!(self, Self::AwaitingApproval | Self::Accepted)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unsubmitted => "UNSUBMITTED",
            Self::AwaitingApproval => "AWAITING_APPROVAL",
            Self::Accepted => "ACCEPTED",
            Self::Denied => "DENIED",
            Self::Expired => "EXPIRED",
            Self::Canceled => "CANCELED",
            Self::Complete => "COMPLETE",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OccurrenceState {
    Pending,
    InProgress,
    Complete,
}

impl OccurrenceState {
    pub const ALL: [OccurrenceState; 3] = [Self::Pending, Self::InProgress, Self::Complete];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::InProgress => "IN_PROGRESS",
            Self::Complete => "COMPLETE",
        }
    }
}

impl fmt::Display for ReservationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for OccurrenceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a persisted token names no known state.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown state token: {0}")]
pub struct UnknownState(pub String);

impl FromStr for ReservationState {
    type Err = UnknownState;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| UnknownState(s.to_string()))
    }
}

impl FromStr for OccurrenceState {
    type Err = UnknownState;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| UnknownState(s.to_string()))
    }
}

// ── Collaborator payloads ────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageKind {
    Approval,
    Denial,
    Expiration,
    Cancellation,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approval => "approval",
            Self::Denial => "denial",
            Self::Expiration => "expiration",
            Self::Cancellation => "cancellation",
        }
    }
}

/// A notification addressed to the requester of a reservation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub reservation_id: ReservationId,
    pub contact: Contact,
    pub kind: MessageKind,
}

/// Tentative calendar hold covering every occurrence of one reservation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hold {
    pub reservation_id: ReservationId,
    pub room: RoomId,
    pub spans: Vec<Span>,
}

// ── Persisted representation ─────────────────────────────────────

/// The unit the repository stores: a reservation together with all of its
/// occurrences. `version` is 1 on first persistence and increments by one on
/// every save.
///
/// `pending` is set while a transition out of `state` has been claimed but
/// its calendar and notifier calls are not all confirmed yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationRecord {
    pub id: ReservationId,
    pub version: u64,
    pub contact: Contact,
    pub room: RoomId,
    pub state: ReservationState,
    pub pending: Option<ReservationState>,
    pub is_signed: bool,
    pub occurrences: Vec<OccurrenceRecord>,
}

impl ReservationRecord {
    /// Start of the earliest occurrence, if any.
    pub fn first_start(&self) -> Option<Ms> {
        self.occurrences.iter().map(|o| o.span.start).min()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OccurrenceRecord {
    pub span: Span,
    pub state: OccurrenceState,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn span_basics() {
        let s = Span::new(100, 200);
        assert_eq!(s.duration_ms(), 100);
    }

    #[test]
    fn span_overlap() {
        let a = Span::new(100, 200);
        let b = Span::new(150, 250);
        let c = Span::new(200, 300);
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c)); // adjacent, not overlapping
    }

    #[test]
    fn state_tokens_are_stable() {
        assert_eq!(
            serde_json::to_string(&ReservationState::AwaitingApproval).unwrap(),
            "\"AWAITING_APPROVAL\""
        );
        assert_eq!(
            serde_json::to_string(&OccurrenceState::InProgress).unwrap(),
            "\"IN_PROGRESS\""
        );
        for state in ReservationState::ALL {
            let json = serde_json::to_string(&state).unwrap();
            assert_eq!(json, format!("\"{state}\""));
        }
    }

    #[test]
    fn state_tokens_parse_back() {
        for state in ReservationState::ALL {
            assert_eq!(state.as_str().parse::<ReservationState>().unwrap(), state);
        }
        for state in OccurrenceState::ALL {
            assert_eq!(state.as_str().parse::<OccurrenceState>().unwrap(), state);
        }
        assert!("PENDING".parse::<ReservationState>().is_err());
    }

    #[test]
    fn first_start_picks_earliest() {
        let record = ReservationRecord {
            id: Ulid::new(),
            version: 1,
            contact: "a@example.org".into(),
            room: Ulid::new(),
            state: ReservationState::AwaitingApproval,
            pending: None,
            is_signed: true,
            occurrences: vec![
                OccurrenceRecord { span: Span::new(500, 600), state: OccurrenceState::Pending },
                OccurrenceRecord { span: Span::new(100, 200), state: OccurrenceState::Pending },
            ],
        };
        assert_eq!(record.first_start(), Some(100));
    }

    #[test]
    fn record_bincode_roundtrip() {
        let record = ReservationRecord {
            id: Ulid::new(),
            version: 3,
            contact: "b@example.org".into(),
            room: Ulid::new(),
            state: ReservationState::Accepted,
            pending: Some(ReservationState::Complete),
            is_signed: true,
            occurrences: vec![OccurrenceRecord {
                span: Span::new(1000, 2000),
                state: OccurrenceState::InProgress,
            }],
        };
        let bytes = bincode::serialize(&record).unwrap();
        let decoded: ReservationRecord = bincode::deserialize(&bytes).unwrap();
        assert_eq!(record, decoded);
    }
}
