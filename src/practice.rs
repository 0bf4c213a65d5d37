//! Practice flow: grading cards, building today's queue, and driving a
//! review session from start to finish.

use std::collections::VecDeque;
use std::time::Duration;

use chrono::NaiveDate;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::db::Database;
use crate::error::Result;
use crate::models::{AdaptiveState, CardId, Records, Schedule, Session};
use crate::outline::Outline;
use crate::queue::{classify_tag, limit_today, shuffle_new_cards, TodayQueue};
use crate::ranking::{rank, rank_for_priority, PriorityStore, RankChangeBuffer};
use crate::records::{load_records, save_session};
use crate::scheduler::compute_next;

#[derive(Debug, Clone, Copy, Default)]
pub struct PracticeOptions {
    /// Review without scheduling: nothing is saved.
    pub cramming: bool,
    /// Compute the result without saving it.
    pub dry_run: bool,
}

/// Schedule the card's latest session is continued from. Cards that were
/// never reviewed start as fresh adaptive cards.
pub fn latest_schedule(records: &Records, uid: &str) -> Schedule {
    records
        .get(uid)
        .and_then(|sessions| sessions.first())
        .map(|s| s.schedule)
        .unwrap_or(Schedule::Adaptive(AdaptiveState::default()))
}

/// Grade a card and store the resulting session.
pub fn practice<O: Outline + ?Sized>(
    outline: &O,
    page_title: &str,
    uid: &str,
    previous: &Schedule,
    grade: i64,
    today: NaiveDate,
    options: PracticeOptions,
) -> Result<Session> {
    let session = compute_next(previous, grade, today)?;

    if options.cramming {
        debug!(uid, "cramming, session not saved");
    } else if options.dry_run {
        debug!(uid, "dry run, session not saved");
    } else {
        save_session(outline, page_title, uid, &session)?;
    }

    Ok(session)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PracticeData {
    pub today: TodayQueue,
    #[serde(skip)]
    pub records: Records,
    pub priority_order: Vec<CardId>,
    pub all_card_uids: Vec<CardId>,
}

/// Build today's queue for the configured tags.
///
/// Newly discovered cards are inserted into the priority ranking first so
/// they are ordered along with everything else. A ranking that cannot be
/// updated or read does not stop the queue from being built.
pub fn prepare_today(
    db: &Database,
    store: &mut PriorityStore<'_, Database>,
    settings: &Settings,
    today: NaiveDate,
    cramming: bool,
) -> Result<PracticeData> {
    let records = load_records(db, &settings.data_page_title)?;

    let mut cards_by_tag = Vec::with_capacity(settings.tags.len());
    for tag in &settings.tags {
        cards_by_tag.push((tag.clone(), db.cards_for_tag(tag)?));
    }
    let all_card_uids = db.all_card_ids(&settings.tags)?;

    if let Err(e) = store.insert_missing(&all_card_uids, settings.default_priority) {
        warn!(error = %e, "could not add new cards to the priority ranking");
    }
    let priority_order = store.load();

    let mut rng = rand::thread_rng();
    let tags = cards_by_tag
        .iter()
        .map(|(tag, uids)| {
            let mut queue = classify_tag(tag, uids, &records, &priority_order, today, cramming);
            if settings.shuffle_cards {
                shuffle_new_cards(&mut queue, &mut rng);
            }
            queue
        })
        .collect();

    let mut queue = TodayQueue::new(tags);
    limit_today(&mut queue, settings.daily_limit, cramming);

    info!(
        due = queue.combined.due,
        new = queue.combined.new,
        cards = all_card_uids.len(),
        "prepared today's queue"
    );

    Ok(PracticeData {
        today: queue,
        records,
        priority_order,
        all_card_uids,
    })
}

/// One review session over today's queue.
///
/// Rank changes made while reviewing are held in memory and written as a
/// single batch when the queue runs out (or [`finish`](Self::finish) is
/// called). If the process dies first they are lost.
pub struct ReviewSession<'a> {
    db: &'a Database,
    store: PriorityStore<'a, Database>,
    settings: Settings,
    today: NaiveDate,
    options: PracticeOptions,
    data: PracticeData,
    queue: VecDeque<CardId>,
    rank_changes: RankChangeBuffer,
}

impl<'a> ReviewSession<'a> {
    pub fn start(
        db: &'a Database,
        settings: Settings,
        today: NaiveDate,
        options: PracticeOptions,
    ) -> Result<Self> {
        settings.validate()?;
        let mut store = PriorityStore::new(db, settings.data_page_title.clone())
            .with_debounce(Duration::from_millis(settings.debounce_ms));
        let data = prepare_today(db, &mut store, &settings, today, options.cramming)?;
        let queue = data.today.flatten().into();

        Ok(Self {
            db,
            store,
            settings,
            today,
            options,
            data,
            queue,
            rank_changes: RankChangeBuffer::new(),
        })
    }

    pub fn data(&self) -> &PracticeData {
        &self.data
    }

    pub fn current(&self) -> Option<&str> {
        self.queue.front().map(String::as_str)
    }

    pub fn remaining(&self) -> usize {
        self.queue.len()
    }

    pub fn pending_rank_changes(&self) -> usize {
        self.rank_changes.len()
    }

    /// Rank shown for the current card: a pending change if there is one,
    /// otherwise its place in the ranking.
    pub fn current_rank(&self) -> Option<usize> {
        let total = self.data.all_card_uids.len().max(1);
        self.current().map(|uid| {
            if let Some(pending) = self.rank_changes.get(uid) {
                return pending;
            }
            if self.data.priority_order.iter().any(|u| u == uid) {
                rank(uid, &self.data.priority_order)
            } else {
                rank_for_priority(self.settings.default_priority, total)
            }
        })
    }

    pub fn set_rank(&mut self, target_rank: usize) {
        if let Some(uid) = self.queue.front().cloned() {
            self.rank_changes.add(uid, target_rank);
        }
    }

    /// Grade the current card and move on. Returns `None` when the queue is
    /// already empty.
    pub fn grade(&mut self, grade: i64) -> Result<Option<Session>> {
        let Some(uid) = self.queue.front().cloned() else {
            return Ok(None);
        };

        let previous = latest_schedule(&self.data.records, &uid);
        let session = practice(
            self.db,
            &self.settings.data_page_title,
            &uid,
            &previous,
            grade,
            self.today,
            self.options,
        )?;

        if !self.options.cramming && !self.options.dry_run {
            self.data
                .records
                .entry(uid.clone())
                .or_default()
                .insert(0, session.clone());
        }

        self.advance()?;
        Ok(Some(session))
    }

    /// Move past the current card without grading it.
    pub fn skip(&mut self) -> Result<()> {
        if self.queue.is_empty() {
            return Ok(());
        }
        self.advance()
    }

    fn advance(&mut self) -> Result<()> {
        self.queue.pop_front();
        if self.queue.is_empty() {
            self.finish()?;
        }
        Ok(())
    }

    /// Write pending rank changes. Safe to call more than once.
    pub fn finish(&mut self) -> Result<()> {
        if let Some(order) = self
            .rank_changes
            .flush(&self.store, &self.data.all_card_uids)?
        {
            self.data.priority_order = order;
        }
        Ok(())
    }

    /// End the session without writing pending rank changes.
    pub fn abandon(&mut self) {
        self.rank_changes.discard();
        self.queue.clear();
    }
}
