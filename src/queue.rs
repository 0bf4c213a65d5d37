//! Today's review queue.
//!
//! Cards of each tag are split into due and new lists ordered by priority,
//! then a daily limit is spread over the tags round-robin while keeping
//! roughly a quarter of the picks for new cards.

use std::collections::HashSet;

use chrono::NaiveDate;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::Serialize;

use crate::models::{CardId, Records};
use crate::ranking::rank;

/// Share of the daily limit reserved for new cards.
pub const NEW_CARDS_RATIO: f64 = 0.25;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum TodayStatus {
    NotStarted,
    Partial,
    Finished,
}

impl TodayStatus {
    pub fn label(&self) -> &'static str {
        match self {
            TodayStatus::NotStarted => "not started",
            TodayStatus::Partial => "in progress",
            TodayStatus::Finished => "finished",
        }
    }

    fn from_counts(remaining: usize, completed: usize) -> Self {
        if remaining == 0 {
            TodayStatus::Finished
        } else if completed > 0 {
            TodayStatus::Partial
        } else {
            TodayStatus::NotStarted
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TagQueue {
    pub tag: String,
    pub due_uids: Vec<CardId>,
    pub new_uids: Vec<CardId>,
    pub completed_due_uids: Vec<CardId>,
    pub completed_new_uids: Vec<CardId>,
    pub due: usize,
    pub new: usize,
    pub completed_due: usize,
    pub completed_new: usize,
    pub status: TodayStatus,
}

impl TagQueue {
    pub fn new(
        tag: impl Into<String>,
        due_uids: Vec<CardId>,
        new_uids: Vec<CardId>,
        completed_due_uids: Vec<CardId>,
        completed_new_uids: Vec<CardId>,
    ) -> Self {
        let mut queue = Self {
            tag: tag.into(),
            due_uids,
            new_uids,
            completed_due_uids,
            completed_new_uids,
            due: 0,
            new: 0,
            completed_due: 0,
            completed_new: 0,
            status: TodayStatus::NotStarted,
        };
        queue.recount();
        queue
    }

    fn recount(&mut self) {
        self.due = self.due_uids.len();
        self.new = self.new_uids.len();
        self.completed_due = self.completed_due_uids.len();
        self.completed_new = self.completed_new_uids.len();
        self.status =
            TodayStatus::from_counts(self.due + self.new, self.completed_due + self.completed_new);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CombinedCounts {
    pub due: usize,
    pub new: usize,
    pub completed_due: usize,
    pub completed_new: usize,
    pub status: TodayStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TodayQueue {
    pub tags: Vec<TagQueue>,
    pub combined: CombinedCounts,
}

impl TodayQueue {
    pub fn new(tags: Vec<TagQueue>) -> Self {
        let mut today = Self {
            tags,
            combined: CombinedCounts {
                due: 0,
                new: 0,
                completed_due: 0,
                completed_new: 0,
                status: TodayStatus::NotStarted,
            },
        };
        today.recount();
        today
    }

    fn recount(&mut self) {
        let mut combined = CombinedCounts {
            due: 0,
            new: 0,
            completed_due: 0,
            completed_new: 0,
            status: TodayStatus::NotStarted,
        };
        for tag in &mut self.tags {
            tag.recount();
            combined.due += tag.due;
            combined.new += tag.new;
            combined.completed_due += tag.completed_due;
            combined.completed_new += tag.completed_new;
        }
        combined.status = TodayStatus::from_counts(
            combined.due + combined.new,
            combined.completed_due + combined.completed_new,
        );
        self.combined = combined;
    }

    pub fn tag(&self, name: &str) -> Option<&TagQueue> {
        self.tags.iter().find(|t| t.tag == name)
    }

    /// Every remaining card in presentation order: tag by tag, due cards
    /// before new ones. A card shared by several tags appears once.
    pub fn flatten(&self) -> Vec<CardId> {
        let mut seen = HashSet::new();
        self.tags
            .iter()
            .flat_map(|t| t.due_uids.iter().chain(t.new_uids.iter()))
            .filter(|uid| seen.insert(uid.as_str()))
            .cloned()
            .collect()
    }
}

/// Split one tag's cards into due, new and completed-today lists.
///
/// Due cards are ordered by rank, then by due date; new cards by rank.
/// When cramming every reviewed card counts as due.
pub fn classify_tag(
    tag: &str,
    card_uids: &[CardId],
    records: &Records,
    priority_order: &[CardId],
    today: NaiveDate,
    cramming: bool,
) -> TagQueue {
    let mut due = Vec::new();
    let mut new = Vec::new();
    let mut completed_due = Vec::new();
    let mut completed_new = Vec::new();
    let mut seen = HashSet::new();

    for uid in card_uids {
        if !seen.insert(uid.as_str()) {
            continue;
        }

        let latest = records.get(uid).and_then(|sessions| sessions.first());
        let Some(latest) = latest else {
            new.push(uid.clone());
            continue;
        };

        if !cramming && latest.date_created == today {
            let only_session = records.get(uid).map(Vec::len) == Some(1);
            if only_session {
                completed_new.push(uid.clone());
            } else {
                completed_due.push(uid.clone());
            }
            continue;
        }

        if cramming || latest.is_due(today) {
            due.push((uid.clone(), latest.next_due_date));
        }
    }

    due.sort_by(|(a, a_due), (b, b_due)| {
        rank(a, priority_order)
            .cmp(&rank(b, priority_order))
            .then_with(|| a_due.cmp(b_due))
    });
    new.sort_by_key(|uid| rank(uid, priority_order));

    TagQueue::new(
        tag,
        due.into_iter().map(|(uid, _)| uid).collect(),
        new,
        completed_due,
        completed_new,
    )
}

/// Randomize the order new cards are introduced in.
pub fn shuffle_new_cards<R: Rng + ?Sized>(queue: &mut TagQueue, rng: &mut R) {
    queue.new_uids.shuffle(rng);
}

/// How many of `daily_limit` picks go to new cards and how many to due cards.
pub fn daily_targets(daily_limit: usize) -> (usize, usize) {
    let target_new = if daily_limit == 1 {
        0
    } else {
        ((daily_limit as f64 * NEW_CARDS_RATIO).floor() as usize).max(1)
    };
    (target_new, daily_limit - target_new.min(daily_limit))
}

#[derive(Default)]
struct Selection {
    due: Vec<CardId>,
    new: Vec<CardId>,
}

/// Cut today's queue down to `daily_limit` cards.
///
/// Cards already completed today are put back in front of each tag's pool
/// so the round-robin distribution is the same all day, then taken out of
/// the selection again. Nothing is limited when `daily_limit` is zero, when
/// there are no cards, or when cramming.
pub fn limit_today(today: &mut TodayQueue, daily_limit: usize, cramming: bool) {
    let total_cards = today.combined.due + today.combined.new;
    if daily_limit == 0 || total_cards == 0 || cramming {
        return;
    }

    // Pools as they were at the start of the day.
    let pools: Vec<Selection> = today
        .tags
        .iter()
        .map(|t| Selection {
            due: t.completed_due_uids.iter().chain(&t.due_uids).cloned().collect(),
            new: t.completed_new_uids.iter().chain(&t.new_uids).cloned().collect(),
        })
        .collect();
    let total_due: usize = pools.iter().map(|p| p.due.len()).sum();
    let total_new: usize = pools.iter().map(|p| p.new.len()).sum();

    let (target_new, target_due) = daily_targets(daily_limit);
    let mut selected: Vec<Selection> = pools.iter().map(|_| Selection::default()).collect();
    let mut new_added = 0;
    let mut due_added = 0;

    'round_robin: loop {
        let mut picked = false;

        for (pool, chosen) in pools.iter().zip(selected.iter_mut()) {
            if new_added + due_added >= daily_limit {
                break 'round_robin;
            }

            let next_new = pool.new.get(chosen.new.len());
            let next_due = pool.due.get(chosen.due.len());

            let still_need_new = new_added < target_new;
            let still_need_due = due_added < target_due;
            let still_have_due = next_due.is_some() || due_added < total_due;
            let still_have_new = next_new.is_some() || new_added < total_new;

            if let Some(uid) = next_new {
                if still_need_new || !still_have_due {
                    chosen.new.push(uid.clone());
                    new_added += 1;
                    picked = true;
                    continue;
                }
            }

            if let Some(uid) = next_due {
                if still_need_due || !still_have_new {
                    chosen.due.push(uid.clone());
                    due_added += 1;
                    picked = true;
                }
            }
        }

        if !picked {
            break;
        }
    }

    for (tag, chosen) in today.tags.iter_mut().zip(selected) {
        tag.due_uids = remaining(chosen.due, &tag.completed_due_uids);
        tag.new_uids = remaining(chosen.new, &tag.completed_new_uids);
    }

    today.recount();
}

// Drop completed cards from a selection and shorten it by the number
// completed, keeping the front.
fn remaining(selected: Vec<CardId>, completed: &[CardId]) -> Vec<CardId> {
    let keep = selected.len().saturating_sub(completed.len());
    let done: HashSet<&str> = completed.iter().map(String::as_str).collect();
    selected
        .into_iter()
        .filter(|uid| !done.contains(uid.as_str()))
        .take(keep)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AdaptiveState, Grade, Schedule, Session};

    fn ids(prefix: &str, n: usize) -> Vec<CardId> {
        (0..n).map(|i| format!("{}{}", prefix, i)).collect()
    }

    fn list(items: &[&str]) -> Vec<CardId> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn session(created: NaiveDate, due: NaiveDate) -> Session {
        Session {
            date_created: created,
            grade: Some(Grade::GOOD),
            next_due_date: Some(due),
            schedule: Schedule::Adaptive(AdaptiveState::default()),
        }
    }

    fn tag(name: &str, due: Vec<CardId>, new: Vec<CardId>) -> TagQueue {
        TagQueue::new(name, due, new, vec![], vec![])
    }

    mod target_tests {
        use super::*;

        #[test]
        fn limit_of_one_is_all_due() {
            assert_eq!(daily_targets(1), (0, 1));
        }

        #[test]
        fn small_limits_keep_one_new() {
            assert_eq!(daily_targets(2), (1, 1));
            assert_eq!(daily_targets(3), (1, 2));
            assert_eq!(daily_targets(4), (1, 3));
        }

        #[test]
        fn quarter_of_larger_limits() {
            assert_eq!(daily_targets(20), (5, 15));
            assert_eq!(daily_targets(10), (2, 8));
        }
    }

    mod limit_tests {
        use super::*;

        #[test]
        fn due_only_and_new_only_tags() {
            let mut today = TodayQueue::new(vec![
                tag("A", ids("a", 10), vec![]),
                tag("B", vec![], ids("b", 10)),
            ]);
            limit_today(&mut today, 4, false);

            let a = today.tag("A").unwrap();
            let b = today.tag("B").unwrap();
            assert_eq!(a.due_uids, list(&["a0", "a1", "a2"]));
            assert!(a.new_uids.is_empty());
            assert_eq!(b.new_uids, list(&["b0"]));
            assert!(b.due_uids.is_empty());
            assert_eq!(today.combined.due, 3);
            assert_eq!(today.combined.new, 1);
        }

        #[test]
        fn no_limit_leaves_queue_untouched() {
            let mut today = TodayQueue::new(vec![tag("A", ids("a", 5), ids("n", 5))]);
            let before = today.clone();
            limit_today(&mut today, 0, false);
            assert_eq!(today, before);
        }

        #[test]
        fn cramming_leaves_queue_untouched() {
            let mut today = TodayQueue::new(vec![tag("A", ids("a", 5), ids("n", 5))]);
            let before = today.clone();
            limit_today(&mut today, 2, true);
            assert_eq!(today, before);
        }

        #[test]
        fn empty_queue_is_noop() {
            let mut today = TodayQueue::new(vec![tag("A", vec![], vec![])]);
            limit_today(&mut today, 10, false);
            assert_eq!(today.combined.due + today.combined.new, 0);
        }

        #[test]
        fn round_robin_spreads_across_tags() {
            let mut today = TodayQueue::new(vec![
                tag("A", ids("a", 10), ids("an", 10)),
                tag("B", ids("b", 10), ids("bn", 10)),
                tag("C", ids("c", 10), ids("cn", 10)),
            ]);
            limit_today(&mut today, 12, false);

            assert_eq!(today.combined.due + today.combined.new, 12);
            assert_eq!(today.combined.new, 3);
            for t in &today.tags {
                assert_eq!(t.due + t.new, 4, "tag {}", t.tag);
            }
        }

        #[test]
        fn limit_smaller_than_tag_count() {
            let mut today = TodayQueue::new(vec![
                tag("A", ids("a", 3), vec![]),
                tag("B", ids("b", 3), vec![]),
                tag("C", ids("c", 3), vec![]),
            ]);
            limit_today(&mut today, 2, false);

            // No new cards anywhere, so both picks go to due cards.
            assert_eq!(today.tag("A").unwrap().due_uids, list(&["a0"]));
            assert_eq!(today.tag("B").unwrap().due_uids, list(&["b0"]));
            assert!(today.tag("C").unwrap().due_uids.is_empty());
        }

        #[test]
        fn new_cards_fill_when_due_runs_out() {
            let mut today = TodayQueue::new(vec![tag("A", ids("a", 1), ids("n", 10))]);
            limit_today(&mut today, 8, false);

            let a = today.tag("A").unwrap();
            assert_eq!(a.due, 1);
            assert_eq!(a.new, 7);
        }

        #[test]
        fn fewer_cards_than_limit_terminates() {
            let mut today = TodayQueue::new(vec![
                tag("A", ids("a", 2), vec![]),
                tag("B", vec![], vec![]),
                tag("C", vec![], ids("c", 1)),
            ]);
            limit_today(&mut today, 50, false);

            assert_eq!(today.combined.due, 2);
            assert_eq!(today.combined.new, 1);
            assert_eq!(today.tag("B").unwrap().status, TodayStatus::Finished);
        }

        #[test]
        fn completed_cards_keep_distribution_stable() {
            // Start of day: A has 4 due, B has 4 new, limit 4 -> 3 due, 1 new.
            let mut start = TodayQueue::new(vec![
                tag("A", ids("a", 4), vec![]),
                tag("B", vec![], ids("b", 4)),
            ]);
            limit_today(&mut start, 4, false);
            assert_eq!(start.tag("A").unwrap().due, 3);

            // Later: two of A's due cards were reviewed and left the due pool.
            let mut later = TodayQueue::new(vec![
                TagQueue::new("A", list(&["a2", "a3"]), vec![], list(&["a0", "a1"]), vec![]),
                tag("B", vec![], ids("b", 4)),
            ]);
            limit_today(&mut later, 4, false);

            let a = later.tag("A").unwrap();
            assert_eq!(a.due_uids, list(&["a2"]));
            assert_eq!(a.completed_due, 2);
            assert_eq!(a.status, TodayStatus::Partial);
            assert_eq!(later.tag("B").unwrap().new_uids, list(&["b0"]));
        }

        #[test]
        fn fully_completed_tag_is_finished() {
            let mut today = TodayQueue::new(vec![TagQueue::new(
                "A",
                ids("a", 5),
                vec![],
                list(&["x", "y"]),
                vec![],
            )]);
            limit_today(&mut today, 2, false);

            let a = today.tag("A").unwrap();
            assert!(a.due_uids.is_empty());
            assert_eq!(a.status, TodayStatus::Finished);
            assert_eq!(today.combined.status, TodayStatus::Finished);
        }
    }

    mod classify_tests {
        use super::*;

        #[test]
        fn splits_new_due_and_not_due() {
            let today = date(2024, 5, 10);
            let mut records = Records::new();
            records.insert("due".into(), vec![session(date(2024, 5, 1), date(2024, 5, 9))]);
            records.insert("later".into(), vec![session(date(2024, 5, 1), date(2024, 6, 1))]);

            let queue = classify_tag(
                "memo",
                &list(&["due", "later", "fresh"]),
                &records,
                &[],
                today,
                false,
            );
            assert_eq!(queue.due_uids, list(&["due"]));
            assert_eq!(queue.new_uids, list(&["fresh"]));
        }

        #[test]
        fn orders_by_priority_rank() {
            let today = date(2024, 5, 10);
            let mut records = Records::new();
            for uid in ["d1", "d2", "d3"] {
                records.insert(uid.into(), vec![session(date(2024, 5, 1), date(2024, 5, 2))]);
            }
            let order = list(&["n2", "d3", "d1", "n1", "d2"]);

            let queue = classify_tag(
                "memo",
                &list(&["d1", "d2", "d3", "n1", "n2"]),
                &records,
                &order,
                today,
                false,
            );
            assert_eq!(queue.due_uids, list(&["d3", "d1", "d2"]));
            assert_eq!(queue.new_uids, list(&["n2", "n1"]));
        }

        #[test]
        fn unranked_due_cards_fall_back_to_due_date() {
            let today = date(2024, 5, 10);
            let mut records = Records::new();
            records.insert("late".into(), vec![session(date(2024, 5, 1), date(2024, 5, 8))]);
            records.insert("early".into(), vec![session(date(2024, 5, 1), date(2024, 5, 3))]);

            let queue = classify_tag("memo", &list(&["late", "early"]), &records, &[], today, false);
            assert_eq!(queue.due_uids, list(&["early", "late"]));
        }

        #[test]
        fn reviewed_today_counts_as_completed() {
            let today = date(2024, 5, 10);
            let mut records = Records::new();
            records.insert("first".into(), vec![session(today, date(2024, 5, 11))]);
            records.insert(
                "again".into(),
                vec![
                    session(today, date(2024, 5, 16)),
                    session(date(2024, 5, 4), date(2024, 5, 10)),
                ],
            );

            let queue =
                classify_tag("memo", &list(&["first", "again"]), &records, &[], today, false);
            assert_eq!(queue.completed_new_uids, list(&["first"]));
            assert_eq!(queue.completed_due_uids, list(&["again"]));
            assert!(queue.due_uids.is_empty());
            assert_eq!(queue.status, TodayStatus::Finished);
        }

        #[test]
        fn cramming_makes_everything_due() {
            let today = date(2024, 5, 10);
            let mut records = Records::new();
            records.insert("later".into(), vec![session(date(2024, 5, 1), date(2024, 9, 1))]);
            records.insert("today".into(), vec![session(today, date(2024, 5, 11))]);

            let queue =
                classify_tag("memo", &list(&["later", "today"]), &records, &[], today, true);
            assert_eq!(queue.due, 2);
            assert_eq!(queue.completed_due + queue.completed_new, 0);
        }

        #[test]
        fn duplicate_uids_counted_once() {
            let queue = classify_tag(
                "memo",
                &list(&["a", "a", "b"]),
                &Records::new(),
                &[],
                date(2024, 1, 1),
                false,
            );
            assert_eq!(queue.new, 2);
        }

        #[test]
        fn shuffle_keeps_same_cards() {
            let mut queue = tag("A", vec![], ids("n", 20));
            let mut rng = rand::thread_rng();
            shuffle_new_cards(&mut queue, &mut rng);

            let mut sorted = queue.new_uids.clone();
            sorted.sort();
            let mut expected = ids("n", 20);
            expected.sort();
            assert_eq!(sorted, expected);
        }
    }

    #[test]
    fn flatten_orders_due_before_new_and_dedupes() {
        let today = TodayQueue::new(vec![
            tag("A", list(&["a1"]), list(&["shared"])),
            tag("B", list(&["b1"]), list(&["shared", "b2"])),
        ]);
        assert_eq!(today.flatten(), list(&["a1", "shared", "b1", "b2"]));
    }
}
