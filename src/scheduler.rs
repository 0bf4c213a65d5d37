//! Review interval scheduling.
//!
//! Adaptive cards follow a SuperMemo 2 variant. Grades run 0-5:
//! - 0: complete blackout, review again as soon as possible
//! - 1-2: incorrect, review tomorrow
//! - 3-5: correct, interval grows with the ease factor
//!
//! Fixed-interval cards are simply pushed out by a multiple of days, weeks,
//! months (30 days) or years (365 days).

use chrono::{Duration, NaiveDate};

use crate::error::Result;
use crate::models::{AdaptiveState, FixedState, Grade, Schedule, Session};

/// Minimum ease factor allowed
pub const MIN_EASE_FACTOR: f64 = 1.3;

/// Apply one graded review to an adaptive state.
pub fn supermemo(state: &AdaptiveState, grade: Grade) -> AdaptiveState {
    let q = grade.value() as u32;

    let (interval, repetitions) = if q == 0 {
        (0, 0)
    } else if q < 3 {
        (1, 0)
    } else {
        match state.repetitions {
            0 => (1, 1),
            1 => (6, 2),
            _ => {
                let next = state.interval as f64 * state.ease_factor * (q as f64 / 5.0);
                (next.round() as u32, state.repetitions + 1)
            }
        }
    };

    // EF' = EF + (0.1 - (5-q) * (0.08 + (5-q) * 0.02))
    let miss = (5 - q) as f64;
    let ease_factor = (state.ease_factor + (0.1 - miss * (0.08 + miss * 0.02))).max(MIN_EASE_FACTOR);

    AdaptiveState {
        interval,
        repetitions,
        ease_factor,
    }
}

/// Due date for a fixed-interval card reviewed on `today`.
pub fn fixed_due_date(state: &FixedState, today: NaiveDate) -> NaiveDate {
    let days = state.interval_multiplier as i64 * state.interval_multiplier_type.days();
    today + Duration::days(days)
}

/// Compute the session produced by grading a card reviewed on `today`.
///
/// `previous` is the schedule of the card's latest session (or a default
/// schedule for a card that has never been reviewed). Grades outside 0-5 are
/// rejected before anything is computed.
pub fn compute_next(previous: &Schedule, grade: i64, today: NaiveDate) -> Result<Session> {
    let grade = Grade::new(grade)?;

    let session = match previous {
        Schedule::Adaptive(state) => {
            let next = supermemo(state, grade);
            Session {
                date_created: today,
                grade: Some(grade),
                next_due_date: Some(today + Duration::days(next.interval as i64)),
                schedule: Schedule::Adaptive(next),
            }
        }
        Schedule::Fixed(state) => Session {
            date_created: today,
            grade: Some(grade),
            next_due_date: Some(fixed_due_date(state, today)),
            schedule: Schedule::Fixed(*state),
        },
    };

    Ok(session)
}

/// Intervals the user-facing grades (forgot, hard, good, perfect) would give.
pub fn preview_intervals(state: &AdaptiveState) -> [u32; 4] {
    [Grade::FORGOT, Grade::HARD, Grade::GOOD, Grade::PERFECT].map(|g| supermemo(state, g).interval)
}
