use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};

use crate::model::{Ms, Span};

/// The platform books in one fixed local timezone (UTC+1). Not configurable.
pub const LOCAL_UTC_OFFSET_HOURS: i64 = 1;

/// Morning slot: 08:00–12:00 local.
pub const MORNING_START_HOUR: i64 = 8;
pub const MORNING_END_HOUR: i64 = 12;

/// Afternoon slot: 12:00–16:00 local.
pub const AFTERNOON_START_HOUR: i64 = 12;
pub const AFTERNOON_END_HOUR: i64 = 16;

const HOUR_MS: Ms = 3_600_000;

/// One of the two fixed half-day windows of a calendar day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SlotCode {
    Morning,
    Afternoon,
}

impl SlotCode {
    pub fn parse(s: &str) -> Result<Self, SlotError> {
        match s {
            "morning" => Ok(SlotCode::Morning),
            "afternoon" => Ok(SlotCode::Afternoon),
            other => Err(SlotError::InvalidCode(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SlotCode::Morning => "morning",
            SlotCode::Afternoon => "afternoon",
        }
    }

    fn local_hours(&self) -> (i64, i64) {
        match self {
            SlotCode::Morning => (MORNING_START_HOUR, MORNING_END_HOUR),
            SlotCode::Afternoon => (AFTERNOON_START_HOUR, AFTERNOON_END_HOUR),
        }
    }
}

impl std::fmt::Display for SlotCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotError {
    InvalidDate(String),
    InvalidCode(String),
}

impl std::fmt::Display for SlotError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SlotError::InvalidDate(d) => write!(f, "invalid date: {d} (expected YYYY-MM-DD)"),
            SlotError::InvalidCode(c) => {
                write!(f, "invalid slot code: {c} (expected morning or afternoon)")
            }
        }
    }
}

impl std::error::Error for SlotError {}

/// Convert a calendar date plus slot code to its `[start_utc, end_utc)` span.
///
/// Pure and total over valid inputs. The two slots of one day share the
/// 12:00 boundary: the instant belongs to the afternoon span only, so
/// adjacent slots never overlap and never leave a gap.
pub fn to_span(date: &str, code: SlotCode) -> Result<Span, SlotError> {
    let day = NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .map_err(|_| SlotError::InvalidDate(date.to_string()))?;
    let midnight_utc_ms = day.and_time(NaiveTime::MIN).and_utc().timestamp_millis();
    let (start_hour, end_hour) = code.local_hours();
    Ok(Span::new(
        midnight_utc_ms + (start_hour - LOCAL_UTC_OFFSET_HOURS) * HOUR_MS,
        midnight_utc_ms + (end_hour - LOCAL_UTC_OFFSET_HOURS) * HOUR_MS,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn morning_converts_to_utc() {
        // 08:00 local (UTC+1) is 07:00Z.
        let span = to_span("2025-03-10", SlotCode::Morning).unwrap();
        let expect_start = chrono::DateTime::parse_from_rfc3339("2025-03-10T07:00:00Z")
            .unwrap()
            .timestamp_millis();
        assert_eq!(span.start, expect_start);
        assert_eq!(span.end, expect_start + 4 * HOUR_MS);
    }

    #[test]
    fn afternoon_converts_to_utc() {
        let span = to_span("2025-03-10", SlotCode::Afternoon).unwrap();
        let expect_start = chrono::DateTime::parse_from_rfc3339("2025-03-10T11:00:00Z")
            .unwrap()
            .timestamp_millis();
        assert_eq!(span.start, expect_start);
        assert_eq!(span.duration_ms(), 4 * HOUR_MS);
    }

    #[test]
    fn adjacent_slots_share_boundary_without_overlap_or_gap() {
        let am = to_span("2025-03-10", SlotCode::Morning).unwrap();
        let pm = to_span("2025-03-10", SlotCode::Afternoon).unwrap();
        assert_eq!(am.end, pm.start);
        assert!(!am.overlaps(&pm));
    }

    #[test]
    fn noon_belongs_to_afternoon_only() {
        let am = to_span("2025-03-10", SlotCode::Morning).unwrap();
        let pm = to_span("2025-03-10", SlotCode::Afternoon).unwrap();
        let noon = am.end; // 12:00 local as UTC ms
        assert!(!am.contains_instant(noon));
        assert!(pm.contains_instant(noon));
    }

    #[test]
    fn bad_date_rejected() {
        assert!(matches!(
            to_span("2025-13-40", SlotCode::Morning),
            Err(SlotError::InvalidDate(_))
        ));
        assert!(matches!(
            to_span("not-a-date", SlotCode::Morning),
            Err(SlotError::InvalidDate(_))
        ));
    }

    #[test]
    fn bad_code_rejected() {
        assert!(matches!(
            SlotCode::parse("evening"),
            Err(SlotError::InvalidCode(_))
        ));
        assert_eq!(SlotCode::parse("morning").unwrap(), SlotCode::Morning);
        assert_eq!(SlotCode::parse("afternoon").unwrap(), SlotCode::Afternoon);
    }

    #[test]
    fn code_roundtrips_through_display() {
        for code in [SlotCode::Morning, SlotCode::Afternoon] {
            assert_eq!(SlotCode::parse(code.as_str()).unwrap(), code);
        }
    }
}
