// ── Lifecycle metrics ───────────────────────────────────────────

/// Counter: state transitions attempted. Labels: entity, to, status.
pub const TRANSITIONS_TOTAL: &str = "roombook_transitions_total";

/// Counter: calendar, notifier or repository calls that failed mid-operation.
/// Labels: step.
pub const COLLABORATOR_FAILURES_TOTAL: &str = "roombook_collaborator_failures_total";

/// Counter: notices handed to subscribers. Labels: kind.
pub const NOTICES_SENT_TOTAL: &str = "roombook_notices_sent_total";

/// Counter: reservations moved to EXPIRED by the sweep. Labels: outcome.
pub const SWEEP_RESERVATIONS_TOTAL: &str = "roombook_sweep_reservations_total";

// ── Storage metrics ─────────────────────────────────────────────

/// Histogram: journal group-commit flush duration in seconds.
pub const JOURNAL_FLUSH_DURATION_SECONDS: &str = "roombook_journal_flush_duration_seconds";

/// Histogram: journal group-commit batch size (records per flush).
pub const JOURNAL_FLUSH_BATCH_SIZE: &str = "roombook_journal_flush_batch_size";
