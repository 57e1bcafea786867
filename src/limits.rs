use crate::model::Ms;

pub const MAX_OCCURRENCES_PER_RESERVATION: usize = 512;
pub const MAX_CONTACT_LEN: usize = 320;

/// 2000-01-01T00:00:00Z
pub const MIN_VALID_TIMESTAMP_MS: Ms = 946_684_800_000;
/// 2100-01-01T00:00:00Z
pub const MAX_VALID_TIMESTAMP_MS: Ms = 4_102_444_800_000;

/// A single occurrence may not run longer than one week.
pub const MAX_OCCURRENCE_DURATION_MS: Ms = 7 * 24 * 3_600_000;

/// Journal entries larger than this are treated as corrupt on replay.
pub const MAX_JOURNAL_ENTRY_BYTES: usize = 4 * 1024 * 1024;
