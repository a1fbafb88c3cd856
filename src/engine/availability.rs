use crate::model::{DaySlots, Reservation, ResourceState, Span};
use crate::slot::{self, SlotCode};

// ── Availability Predicate ────────────────────────────────────────
//
// One predicate, two callers: the write path (conflict check inside
// `create`) and the read path (`availability` query) both go through
// `first_conflict`. They must never use different overlap logic, or
// the two paths disagree under load.

/// First active reservation whose span overlaps the candidate, if any.
pub fn first_conflict<'a>(rs: &'a ResourceState, candidate: &Span) -> Option<&'a Reservation> {
    rs.overlapping(candidate).find(|r| r.is_active)
}

/// True iff no active reservation of this resource overlaps the candidate.
pub fn is_available(rs: &ResourceState, candidate: &Span) -> bool {
    first_conflict(rs, candidate).is_none()
}

/// Occupancy of both half-day slots of one calendar day. Bulk-view
/// helper; each slot uses the same predicate as the single-slot query.
pub fn day_slots(rs: &ResourceState, date: &str) -> Result<DaySlots, slot::SlotError> {
    let morning = slot::to_span(date, SlotCode::Morning)?;
    let afternoon = slot::to_span(date, SlotCode::Afternoon)?;
    Ok(DaySlots {
        morning_taken: !is_available(rs, &morning),
        afternoon_taken: !is_available(rs, &afternoon),
    })
}
