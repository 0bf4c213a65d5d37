use std::collections::HashMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::{MemoError, Result};

/// Opaque card identifier (the uid of the block that holds the card).
pub type CardId = String;

/// Every known session per card, newest first.
pub type Records = HashMap<CardId, Vec<Session>>;

pub const DEFAULT_EASE_FACTOR: f64 = 2.5;

// Recall quality for a single review, 0 (blackout) to 5 (perfect)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "u8")]
pub struct Grade(u8);

impl Grade {
    pub const FORGOT: Grade = Grade(0);
    pub const HARD: Grade = Grade(2);
    pub const GOOD: Grade = Grade(4);
    pub const PERFECT: Grade = Grade(5);

    pub fn new(value: i64) -> Result<Self> {
        if (0..=5).contains(&value) {
            Ok(Grade(value as u8))
        } else {
            Err(MemoError::InvalidGrade(value))
        }
    }

    pub fn value(self) -> u8 {
        self.0
    }

    pub fn emoji(self) -> &'static str {
        match self.0 {
            5 => "🟢",
            4 => "🔵",
            3 | 2 => "🟠",
            0 => "🔴",
            _ => "🟢",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "forgot" | "again" | "f" => Some(Grade::FORGOT),
            "hard" | "h" => Some(Grade::HARD),
            "good" | "g" => Some(Grade::GOOD),
            "perfect" | "easy" | "p" => Some(Grade::PERFECT),
            other => other.parse::<i64>().ok().and_then(|v| Grade::new(v).ok()),
        }
    }
}

impl TryFrom<i64> for Grade {
    type Error = MemoError;

    fn try_from(value: i64) -> Result<Self> {
        Grade::new(value)
    }
}

impl From<Grade> for u8 {
    fn from(grade: Grade) -> u8 {
        grade.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReviewMode {
    AdaptiveInterval,
    FixedInterval,
}

impl ReviewMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewMode::AdaptiveInterval => "SPACED_INTERVAL",
            ReviewMode::FixedInterval => "FIXED_INTERVAL",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim() {
            "SPACED_INTERVAL" => Some(ReviewMode::AdaptiveInterval),
            "FIXED_INTERVAL" => Some(ReviewMode::FixedInterval),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IntervalMultiplierType {
    Days,
    Weeks,
    Months,
    Years,
}

impl IntervalMultiplierType {
    /// Length of one unit in days. Months and years are flat 30 and 365 day
    /// blocks, not calendar arithmetic.
    pub fn days(&self) -> i64 {
        match self {
            IntervalMultiplierType::Days => 1,
            IntervalMultiplierType::Weeks => 7,
            IntervalMultiplierType::Months => 30,
            IntervalMultiplierType::Years => 365,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            IntervalMultiplierType::Days => "Days",
            IntervalMultiplierType::Weeks => "Weeks",
            IntervalMultiplierType::Months => "Months",
            IntervalMultiplierType::Years => "Years",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "days" | "day" | "d" => Some(IntervalMultiplierType::Days),
            "weeks" | "week" | "w" => Some(IntervalMultiplierType::Weeks),
            "months" | "month" | "m" => Some(IntervalMultiplierType::Months),
            "years" | "year" | "y" => Some(IntervalMultiplierType::Years),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdaptiveState {
    pub interval: u32,
    pub repetitions: u32,
    pub ease_factor: f64,
}

impl Default for AdaptiveState {
    fn default() -> Self {
        Self {
            interval: 0,
            repetitions: 0,
            ease_factor: DEFAULT_EASE_FACTOR,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FixedState {
    pub interval_multiplier: u32,
    pub interval_multiplier_type: IntervalMultiplierType,
}

impl Default for FixedState {
    fn default() -> Self {
        Self {
            interval_multiplier: 3,
            interval_multiplier_type: IntervalMultiplierType::Days,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reviewMode", rename_all = "camelCase")]
pub enum Schedule {
    Adaptive(AdaptiveState),
    Fixed(FixedState),
}

impl Schedule {
    pub fn review_mode(&self) -> ReviewMode {
        match self {
            Schedule::Adaptive(_) => ReviewMode::AdaptiveInterval,
            Schedule::Fixed(_) => ReviewMode::FixedInterval,
        }
    }
}

// One practice session of a card. Sessions are never rewritten once stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub date_created: NaiveDate,
    pub grade: Option<Grade>,
    pub next_due_date: Option<NaiveDate>,
    pub schedule: Schedule,
}

impl Session {
    pub fn review_mode(&self) -> ReviewMode {
        self.schedule.review_mode()
    }

    pub fn is_due(&self, today: NaiveDate) -> bool {
        match self.next_due_date {
            Some(due) => due <= today,
            None => true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tag {
    pub name: String,
    pub card_count: i64,
}

// JSON output wrapper for CLI
#[derive(Debug, Serialize)]
pub struct JsonOutput<T: Serialize> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T: Serialize> JsonOutput<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn err(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}
