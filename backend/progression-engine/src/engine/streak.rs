//! Daily-engagement streak rules.
//!
//! Two paths exist. The XP path runs when an event grants XP and may start,
//! increment or reset the streak. The passive path runs on plain visits and
//! can only reset it.

use chrono::{DateTime, Duration, Utc};

use crate::models::{StreakOutcome, UserProgressionState};
use crate::utils::time::elapsed_since;

/// Gap after which the streak is broken.
pub fn reset_after() -> Duration {
    Duration::hours(24)
}

/// 80% of a day. From here on a new XP gain counts as the next streak day.
pub fn increment_after() -> Duration {
    Duration::milliseconds(19 * 3_600_000 + 12 * 60_000)
}

/// Streak update for an XP-granting event. Also stamps `last_xp_gained_at`.
pub fn record_xp_gain(state: &mut UserProgressionState, now: DateTime<Utc>) -> StreakOutcome {
    let outcome = match state.last_xp_gained_at {
        None => {
            state.current_streak = 1;
            StreakOutcome::Started
        }
        Some(last) => {
            let elapsed = elapsed_since(now, last);
            if elapsed >= reset_after() {
                state.current_streak = 1;
                StreakOutcome::Reset
            } else if elapsed >= increment_after() {
                state.current_streak = state.current_streak.saturating_add(1);
                StreakOutcome::Incremented
            } else {
                StreakOutcome::Unchanged
            }
        }
    };

    state.longest_streak = state.longest_streak.max(state.current_streak);
    state.last_xp_gained_at = Some(now);
    state.last_active_at = now;
    outcome
}

/// Streak check for a visit that grants no XP.
pub fn record_passive_visit(state: &mut UserProgressionState, now: DateTime<Utc>) -> StreakOutcome {
    let outcome = match state.last_xp_gained_at {
        Some(last) if elapsed_since(now, last) >= reset_after() && state.current_streak != 1 => {
            state.current_streak = 1;
            StreakOutcome::Reset
        }
        _ => StreakOutcome::Unchanged,
    };

    state.longest_streak = state.longest_streak.max(state.current_streak);
    state.last_active_at = now;
    outcome
}
