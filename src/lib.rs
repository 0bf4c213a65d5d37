//! Spaced-repetition scheduling with a shared card priority ranking.
//!
//! - [`scheduler`]: next review interval from a grade (SM-2 or fixed interval)
//! - [`ranking`]: the global priority order and batched rank changes
//! - [`queue`]: today's due/new cards, limited fairly across tags
//! - [`practice`]: grading cards and running a review session
//! - [`records`] / [`outline`] / [`db`]: how it all is stored

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod outline;
pub mod practice;
pub mod queue;
pub mod ranking;
pub mod records;
pub mod scheduler;

pub use error::{MemoError, Result};
