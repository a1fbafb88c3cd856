use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::slot::SlotCode;

/// Unix milliseconds — the only time type.
pub type Ms = i64;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    /// Half-open overlap: `[a,b)` and `[c,d)` overlap iff `a < d && c < b`.
    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_instant(&self, t: Ms) -> bool {
        self.start <= t && t < self.end
    }
}

/// Type tag of a bookable resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    MeetingRoom,
    Desk,
    VrKit,
    AiServer,
}

/// The contended entity: one half-day booking of one resource.
///
/// Cancelled rows stay in the list with `is_active = false` (history);
/// a reservation is never moved to a different slot, only cancelled and
/// recreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Ulid,
    pub resource_id: Ulid,
    pub owner_id: String,
    /// Materialized `[start_utc, end_utc)` bounds of the slot.
    pub span: Span,
    pub slot: SlotCode,
    /// Calendar date the slot was booked for, `YYYY-MM-DD`.
    pub date: String,
    pub is_active: bool,
    pub created_at: Ms,
    pub cancelled_at: Option<Ms>,
}

#[derive(Debug, Clone)]
pub struct ResourceState {
    pub id: Ulid,
    pub name: String,
    pub kind: ResourceKind,
    /// Advisory capacity (seats, headsets, ...). Not a concurrency limit.
    pub capacity_hint: u32,
    /// All reservation rows (active + retained history), sorted by `span.start`.
    pub reservations: Vec<Reservation>,
}

impl ResourceState {
    pub fn new(id: Ulid, name: String, kind: ResourceKind, capacity_hint: u32) -> Self {
        Self {
            id,
            name,
            kind,
            capacity_hint,
            reservations: Vec::new(),
        }
    }

    /// Insert a reservation maintaining sort order by span.start.
    pub fn insert_reservation(&mut self, reservation: Reservation) {
        let pos = self
            .reservations
            .binary_search_by_key(&reservation.span.start, |r| r.span.start)
            .unwrap_or_else(|e| e);
        self.reservations.insert(pos, reservation);
    }

    pub fn remove_reservation(&mut self, id: Ulid) -> Option<Reservation> {
        let pos = self.reservations.iter().position(|r| r.id == id)?;
        Some(self.reservations.remove(pos))
    }

    pub fn find(&self, id: Ulid) -> Option<&Reservation> {
        self.reservations.iter().find(|r| r.id == id)
    }

    pub fn find_mut(&mut self, id: Ulid) -> Option<&mut Reservation> {
        self.reservations.iter_mut().find(|r| r.id == id)
    }

    /// Reservations whose span overlaps the query window, active or not.
    /// Binary search skips everything starting at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Reservation> {
        let right_bound = self
            .reservations
            .partition_point(|r| r.span.start < query.end);
        self.reservations[..right_bound]
            .iter()
            .filter(move |r| r.span.end > query.start)
    }
}

/// WAL record — every committed state transition, flat, no nesting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    ResourceRegistered {
        id: Ulid,
        name: String,
        kind: ResourceKind,
        capacity_hint: u32,
    },
    ResourceRemoved {
        id: Ulid,
    },
    ReservationCreated {
        reservation: Reservation,
    },
    /// Full-row administrative overwrite.
    ReservationUpdated {
        reservation: Reservation,
    },
    ReservationCancelled {
        id: Ulid,
        resource_id: Ulid,
        at: Ms,
    },
    ReservationDeleted {
        id: Ulid,
        resource_id: Ulid,
    },
}

/// Extract the resource id an event belongs to, if any.
pub fn event_resource_id(event: &Event) -> Option<Ulid> {
    match event {
        Event::ReservationCreated { reservation } | Event::ReservationUpdated { reservation } => {
            Some(reservation.resource_id)
        }
        Event::ReservationCancelled { resource_id, .. }
        | Event::ReservationDeleted { resource_id, .. } => Some(*resource_id),
        Event::ResourceRegistered { .. } | Event::ResourceRemoved { .. } => None,
    }
}

// ── Change propagation ───────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Created,
    Updated,
    Cancelled,
    Deleted,
}

/// Ephemeral wire message emitted once per committed reservation
/// transition. Not persisted, no replay: a client that misses one
/// self-heals through its periodic resync.
///
/// The snapshot carries `resource_id`, so a per-resource subscription
/// filter can later be added on the receiving side without changing
/// this envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub reservation: Reservation,
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceInfo {
    pub id: Ulid,
    pub name: String,
    pub kind: ResourceKind,
    pub capacity_hint: u32,
}

/// Per-day occupancy of a resource's two slots.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaySlots {
    pub morning_taken: bool,
    pub afternoon_taken: bool,
}
