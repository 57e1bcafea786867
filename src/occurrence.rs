use crate::model::*;
use crate::state_machine::{InvalidTransition, StateMachine};

const EDGES: &[(OccurrenceState, &[OccurrenceState])] = &[
    (OccurrenceState::Pending, &[OccurrenceState::InProgress]),
    (OccurrenceState::InProgress, &[OccurrenceState::Complete]),
];

pub static OCCURRENCE_LIFECYCLE: StateMachine<OccurrenceState> = StateMachine::new(EDGES);

/// One time window of a reservation. Has no identity of its own; the owning
/// reservation addresses it by position and persists it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Occurrence {
    span: Span,
    state: OccurrenceState,
}

impl Occurrence {
    pub fn new(span: Span) -> Self {
        Self {
            span,
            state: OccurrenceState::Pending,
        }
    }

    pub(crate) fn from_record(record: &OccurrenceRecord) -> Self {
        Self {
            span: record.span,
            state: record.state,
        }
    }

    pub(crate) fn to_record(self) -> OccurrenceRecord {
        OccurrenceRecord {
            span: self.span,
            state: self.state,
        }
    }

    pub fn span(&self) -> Span {
        self.span
    }

    pub fn start(&self) -> Ms {
        self.span.start
    }

    pub fn end(&self) -> Ms {
        self.span.end
    }

    pub fn state(&self) -> OccurrenceState {
        self.state
    }

    pub fn can_transition(&self, target: OccurrenceState) -> bool {
        OCCURRENCE_LIFECYCLE.can_transition(self.state, target)
    }

    /// Returns a copy in `target` state; `self` is left untouched so the owner
    /// can decide whether to keep the change after persisting it.
    pub(crate) fn transitioned(
        &self,
        target: OccurrenceState,
    ) -> Result<Self, InvalidTransition<OccurrenceState>> {
        let state = OCCURRENCE_LIFECYCLE.transition(self.state, target)?;
        Ok(Self { span: self.span, state })
    }
}
