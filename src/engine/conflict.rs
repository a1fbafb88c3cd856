use ulid::Ulid;

use crate::model::{Ms, Reservation};

/// Bounded re-attempt budget for `create`.
pub const MAX_CREATE_ATTEMPTS: u32 = 3;

/// Backoff before attempt n+1 is `RETRY_BACKOFF_MS * n`.
pub const RETRY_BACKOFF_MS: u64 = 100;

pub(crate) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_millis() as Ms
}

/// Outcome of one check-then-insert attempt. The conflict case is a
/// typed result carrying the blocking reservation — never inferred
/// from error message text.
pub(super) enum Attempt {
    Committed(Reservation),
    /// The slot was occupied when checked; retrying re-reads current
    /// state, since the occupant may be cancelled between attempts.
    Conflicted { holder: Ulid },
    /// The store failed to commit; transient, shares the retry budget.
    StoreFailed(String),
}

pub(super) fn backoff(attempt: u32) -> std::time::Duration {
    std::time::Duration::from_millis(RETRY_BACKOFF_MS * u64::from(attempt))
}
