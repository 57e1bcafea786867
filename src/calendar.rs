//! In-process shared calendar.
//!
//! Keeps, per room, the tentative holds placed by submitted reservations,
//! sorted by start so overlap queries can stop early.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::RwLock;

use crate::model::*;
use crate::ports::{Calendar, CalendarError};

/// One held window on a room's calendar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CalendarEntry {
    pub reservation_id: ReservationId,
    pub span: Span,
}

#[derive(Debug, Clone, Default)]
pub struct RoomCalendar {
    /// Sorted by `span.start`.
    entries: Vec<CalendarEntry>,
}

impl RoomCalendar {
    pub fn insert(&mut self, entry: CalendarEntry) {
        let pos = self
            .entries
            .partition_point(|e| e.span.start <= entry.span.start);
        self.entries.insert(pos, entry);
    }

    /// Drop every entry of `reservation_id`; returns how many were removed.
    pub fn remove_reservation(&mut self, reservation_id: ReservationId) -> usize {
        let before = self.entries.len();
        self.entries.retain(|e| e.reservation_id != reservation_id);
        before - self.entries.len()
    }

    /// Entries whose span overlaps `query`. Entries starting at or after
    /// `query.end` are never looked at.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &CalendarEntry> {
        let right_bound = self.entries.partition_point(|e| e.span.start < query.end);
        self.entries[..right_bound]
            .iter()
            .filter(move |e| e.span.end > query.start)
    }
}

/// Calendar adapter holding every room's entries in memory.
pub struct HoldBook {
    rooms: DashMap<RoomId, Arc<RwLock<RoomCalendar>>>,
    /// Reverse lookup: reservation → room it holds.
    held_in: DashMap<ReservationId, RoomId>,
}

impl Default for HoldBook {
    fn default() -> Self {
        Self::new()
    }
}

impl HoldBook {
    pub fn new() -> Self {
        Self {
            rooms: DashMap::new(),
            held_in: DashMap::new(),
        }
    }

    /// Rebuild from stored reservations: every AWAITING_APPROVAL or ACCEPTED
    /// reservation holds all of its windows.
    pub fn from_records(records: &[ReservationRecord]) -> Self {
        let mut rooms: HashMap<RoomId, RoomCalendar> = HashMap::new();
        let held_in = DashMap::new();
        for record in records {
            if !record.state.holds_calendar() {
                continue;
            }
            let calendar = rooms.entry(record.room).or_default();
            for occ in &record.occurrences {
                calendar.insert(CalendarEntry {
                    reservation_id: record.id,
                    span: occ.span,
                });
            }
            held_in.insert(record.id, record.room);
        }
        Self {
            rooms: rooms
                .into_iter()
                .map(|(room, cal)| (room, Arc::new(RwLock::new(cal))))
                .collect(),
            held_in,
        }
    }

    fn room(&self, room: RoomId) -> Arc<RwLock<RoomCalendar>> {
        self.rooms.entry(room).or_default().value().clone()
    }

    /// Entries on `room` overlapping `window`.
    pub async fn entries(&self, room: RoomId, window: Span) -> Vec<CalendarEntry> {
        let Some(cal) = self.rooms.get(&room).map(|e| e.value().clone()) else {
            return Vec::new();
        };
        let guard = cal.read().await;
        guard.overlapping(&window).copied().collect()
    }

    pub fn is_held(&self, reservation_id: ReservationId) -> bool {
        self.held_in.contains_key(&reservation_id)
    }
}

#[async_trait]
impl Calendar for HoldBook {
    async fn add_hold(&self, hold: &Hold) -> Result<(), CalendarError> {
        if let Some(previous) = self.held_in.get(&hold.reservation_id).map(|e| *e.value())
            && previous != hold.room {
                return Err(CalendarError::Rejected(format!(
                    "reservation {} already holds room {previous}",
                    hold.reservation_id
                )));
            }
        let cal = self.room(hold.room);
        let mut guard = cal.write().await;
        // Re-adding replaces, so a retried submit leaves one copy.
        guard.remove_reservation(hold.reservation_id);
        for span in &hold.spans {
            guard.insert(CalendarEntry {
                reservation_id: hold.reservation_id,
                span: *span,
            });
        }
        self.held_in.insert(hold.reservation_id, hold.room);
        tracing::debug!(
            "hold for {} on room {}: {} windows",
            hold.reservation_id,
            hold.room,
            hold.spans.len()
        );
        Ok(())
    }

    async fn remove_hold(&self, reservation_id: ReservationId) -> Result<(), CalendarError> {
        let Some((_, room)) = self.held_in.remove(&reservation_id) else {
            return Ok(());
        };
        let cal = self.room(room);
        let removed = cal.write().await.remove_reservation(reservation_id);
        tracing::debug!("released {removed} windows of {reservation_id} on room {room}");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    fn entry(start: Ms, end: Ms) -> CalendarEntry {
        CalendarEntry {
            reservation_id: Ulid::new(),
            span: Span::new(start, end),
        }
    }

    #[test]
    fn room_calendar_keeps_order() {
        let mut cal = RoomCalendar::default();
        cal.insert(entry(300, 400));
        cal.insert(entry(100, 200));
        cal.insert(entry(200, 300));
        let starts: Vec<Ms> = cal.entries.iter().map(|e| e.span.start).collect();
        assert_eq!(starts, vec![100, 200, 300]);
    }

    #[test]
    fn overlapping_is_half_open() {
        let mut cal = RoomCalendar::default();
        cal.insert(entry(100, 200));
        cal.insert(entry(450, 600));
        cal.insert(entry(1000, 1100));

        let hits: Vec<_> = cal.overlapping(&Span::new(500, 800)).collect();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].span, Span::new(450, 600));

        // ends exactly at query start: not an overlap
        assert_eq!(cal.overlapping(&Span::new(200, 300)).count(), 0);
    }

    #[tokio::test]
    async fn add_then_remove_hold() {
        let book = HoldBook::new();
        let room = Ulid::new();
        let id = Ulid::new();
        let hold = Hold {
            reservation_id: id,
            room,
            spans: vec![Span::new(100, 200), Span::new(300, 400)],
        };
        book.add_hold(&hold).await.unwrap();
        assert!(book.is_held(id));
        assert_eq!(book.entries(room, Span::new(0, 1000)).await.len(), 2);

        book.remove_hold(id).await.unwrap();
        assert!(!book.is_held(id));
        assert!(book.entries(room, Span::new(0, 1000)).await.is_empty());
    }

    #[tokio::test]
    async fn add_hold_is_idempotent() {
        let book = HoldBook::new();
        let room = Ulid::new();
        let hold = Hold {
            reservation_id: Ulid::new(),
            room,
            spans: vec![Span::new(100, 200)],
        };
        book.add_hold(&hold).await.unwrap();
        book.add_hold(&hold).await.unwrap();
        assert_eq!(book.entries(room, Span::new(0, 1000)).await.len(), 1);
    }

    #[tokio::test]
    async fn remove_unknown_hold_is_noop() {
        let book = HoldBook::new();
        book.remove_hold(Ulid::new()).await.unwrap();
    }

    #[tokio::test]
    async fn rebuild_only_holds_live_reservations() {
        let room = Ulid::new();
        let live = Ulid::new();
        let make = |id, state| ReservationRecord {
            id,
            version: 2,
            contact: "x@example.org".into(),
            room,
            state,
            pending: None,
            is_signed: true,
            occurrences: vec![OccurrenceRecord {
                span: Span::new(100, 200),
                state: OccurrenceState::Pending,
            }],
        };
        let records = vec![
            make(live, ReservationState::AwaitingApproval),
            make(Ulid::new(), ReservationState::Denied),
            make(Ulid::new(), ReservationState::Unsubmitted),
        ];
        let book = HoldBook::from_records(&records);
        let entries = book.entries(room, Span::new(0, 1000)).await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].reservation_id, live);
    }
}
