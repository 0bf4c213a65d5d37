//! Practice history stored in the outline.
//!
//! ```text
//! data
//! └── ((card-uid))
//!     ├── [[January 7th, 2024]] 🔵      <- newest session first
//!     │   ├── reviewMode:: SPACED_INTERVAL
//!     │   ├── grade:: 4
//!     │   ├── repetitions:: 2
//!     │   ├── interval:: 6
//!     │   ├── eFactor:: 2.5
//!     │   └── nextDueDate:: [[January 13th, 2024]]
//!     └── [[January 1st, 2024]] 🟢
//!         └── ...
//! ```

use std::collections::HashMap;

use chrono::{Datelike, NaiveDate};
use tracing::{debug, warn};

use crate::error::{MemoError, Result};
use crate::models::{
    AdaptiveState, CardId, FixedState, Grade, IntervalMultiplierType, Records, ReviewMode,
    Schedule, Session,
};
use crate::outline::{self, between, block_ref, parse_attribute, Block, Outline, APPEND};

const MONTHS: [&str; 12] = [
    "January",
    "February",
    "March",
    "April",
    "May",
    "June",
    "July",
    "August",
    "September",
    "October",
    "November",
    "December",
];

fn ordinal_suffix(day: u32) -> &'static str {
    match (day % 10, day % 100) {
        (_, 11..=13) => "th",
        (1, _) => "st",
        (2, _) => "nd",
        (3, _) => "rd",
        _ => "th",
    }
}

/// Daily page title for a date, e.g. `January 7th, 2024`.
pub fn date_to_page_title(date: NaiveDate) -> String {
    format!(
        "{} {}{}, {}",
        MONTHS[date.month0() as usize],
        date.day(),
        ordinal_suffix(date.day()),
        date.year()
    )
}

pub fn parse_page_title(title: &str) -> Option<NaiveDate> {
    let mut parts = title.split_whitespace();
    let month = parts.next()?;
    let day = parts.next()?.trim_end_matches(',');
    let year = parts.next()?;
    if parts.next().is_some() {
        return None;
    }

    let month = MONTHS.iter().position(|m| *m == month)? as u32 + 1;
    let day: u32 = day.trim_end_matches(|c: char| c.is_ascii_alphabetic()).parse().ok()?;
    let year: i32 = year.parse().ok()?;

    NaiveDate::from_ymd_opt(year, month, day)
}

fn date_link(date: NaiveDate) -> String {
    format!("[[{}]]", date_to_page_title(date))
}

fn heading(session: &Session) -> String {
    let emoji = session.grade.map(Grade::emoji).unwrap_or("🟢");
    format!("{} {}", date_link(session.date_created), emoji)
}

/// The `key:: value` lines stored under a session heading.
pub fn session_attributes(session: &Session) -> Vec<String> {
    let mut lines = vec![format!("reviewMode:: {}", session.review_mode().as_str())];

    if let Some(grade) = session.grade {
        lines.push(format!("grade:: {}", grade.value()));
    }

    match &session.schedule {
        Schedule::Adaptive(state) => {
            lines.push(format!("repetitions:: {}", state.repetitions));
            lines.push(format!("interval:: {}", state.interval));
            lines.push(format!("eFactor:: {}", state.ease_factor));
        }
        Schedule::Fixed(state) => {
            lines.push(format!("intervalMultiplier:: {}", state.interval_multiplier));
            lines.push(format!(
                "intervalMultiplierType:: {}",
                state.interval_multiplier_type.as_str()
            ));
        }
    }

    if let Some(due) = session.next_due_date {
        lines.push(format!("nextDueDate:: {}", date_link(due)));
    }

    lines
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| MemoError::Parse(format!("{} is not a number: '{}'", key, value)))
}

/// Rebuild a session from its heading block.
pub fn parse_session(block: &Block) -> Result<Session> {
    let date_created = between(&block.text, "[[", "]]")
        .and_then(parse_page_title)
        .ok_or_else(|| MemoError::Parse(format!("bad session heading '{}'", block.text)))?;

    let fields: HashMap<&str, &str> = block
        .children
        .iter()
        .filter_map(|child| parse_attribute(&child.text))
        .collect();

    // A heading whose attribute lines never got written.
    if !["reviewMode", "interval", "intervalMultiplier"]
        .iter()
        .any(|key| fields.contains_key(key))
    {
        return Err(MemoError::Parse(format!(
            "session '{}' has no schedule fields",
            block.text
        )));
    }

    let review_mode = match fields.get("reviewMode") {
        Some(mode) => ReviewMode::from_str(mode)
            .ok_or_else(|| MemoError::Parse(format!("unknown review mode '{}'", mode)))?,
        None => ReviewMode::AdaptiveInterval,
    };

    let grade = match fields.get("grade") {
        Some(v) => Some(Grade::new(parse_number("grade", v)?)?),
        None => None,
    };

    let next_due_date = match fields.get("nextDueDate") {
        Some(v) => Some(
            between(v, "[[", "]]")
                .and_then(parse_page_title)
                .ok_or_else(|| MemoError::Parse(format!("bad due date '{}'", v)))?,
        ),
        None => None,
    };

    let schedule = match review_mode {
        ReviewMode::AdaptiveInterval => {
            let defaults = AdaptiveState::default();
            Schedule::Adaptive(AdaptiveState {
                interval: match fields.get("interval") {
                    Some(v) => parse_number("interval", v)?,
                    None => defaults.interval,
                },
                repetitions: match fields.get("repetitions") {
                    Some(v) => parse_number("repetitions", v)?,
                    None => defaults.repetitions,
                },
                ease_factor: match fields.get("eFactor") {
                    Some(v) => parse_number("eFactor", v)?,
                    None => defaults.ease_factor,
                },
            })
        }
        ReviewMode::FixedInterval => {
            let defaults = FixedState::default();
            Schedule::Fixed(FixedState {
                interval_multiplier: match fields.get("intervalMultiplier") {
                    Some(v) => parse_number("intervalMultiplier", v)?,
                    None => defaults.interval_multiplier,
                },
                interval_multiplier_type: match fields.get("intervalMultiplierType") {
                    Some(v) => IntervalMultiplierType::from_str(v).ok_or_else(|| {
                        MemoError::Parse(format!("unknown interval unit '{}'", v))
                    })?,
                    None => defaults.interval_multiplier_type,
                },
            })
        }
    };

    Ok(Session {
        date_created,
        grade,
        next_due_date,
        schedule,
    })
}

fn card_uid(block: &Block) -> Option<&str> {
    let inner = block.text.strip_prefix("((")?.strip_suffix("))")?;
    if inner.is_empty() || inner.contains("((") || inner.contains("))") {
        return None;
    }
    Some(inner)
}

/// Append a new session as the newest entry of a card's history.
pub fn save_session<O: Outline + ?Sized>(
    outline: &O,
    page_title: &str,
    uid: &str,
    session: &Session,
) -> Result<()> {
    let data = outline::data_block(outline, page_title)?;
    let card = outline::get_or_create_child(outline, data, &block_ref(uid), 0)?;
    let session_block = outline.create_child(card, &heading(session), 0)?;

    for line in session_attributes(session) {
        outline.create_child(session_block, &line, APPEND)?;
    }

    debug!(uid, date = %session.date_created, "saved practice session");
    Ok(())
}

/// Every card's history, newest session first. Sessions that cannot be
/// parsed are skipped with a warning.
pub fn load_records<O: Outline + ?Sized>(outline: &O, page_title: &str) -> Result<Records> {
    let data = outline::data_block(outline, page_title)?;
    let mut records = Records::new();

    for block in outline.get_children(data)? {
        let Some(uid) = card_uid(&block) else {
            continue;
        };

        let mut sessions = Vec::with_capacity(block.children.len());
        for child in &block.children {
            match parse_session(child) {
                Ok(session) => sessions.push(session),
                Err(e) => warn!(uid, error = %e, "skipping unreadable session"),
            }
        }
        records.insert(uid.to_string(), sessions);
    }

    Ok(records)
}

/// Only the newest session of each reviewed card.
pub fn load_latest<O: Outline + ?Sized>(
    outline: &O,
    page_title: &str,
) -> Result<HashMap<CardId, Session>> {
    Ok(load_records(outline, page_title)?
        .into_iter()
        .filter_map(|(uid, sessions)| sessions.into_iter().next().map(|s| (uid, s)))
        .collect())
}

/// Remove a card's whole history. Returns false if it had none.
pub fn delete_history<O: Outline + ?Sized>(outline: &O, page_title: &str, uid: &str) -> Result<bool> {
    let data = outline::data_block(outline, page_title)?;
    let target = block_ref(uid);
    match outline
        .get_children(data)?
        .into_iter()
        .find(|b| b.text == target)
    {
        Some(block) => {
            outline.delete_block(block.id)?;
            Ok(true)
        }
        None => Ok(false),
    }
}
