//! Shared priority ranking over all cards.
//!
//! One global list of card uids, rank 1 first. It is stored as a single
//! `priority-ranking:: ((uid1)),((uid2)),...` line under the data block and
//! rewritten in place. Writes go through a compare-and-swap on that line so
//! two sessions racing on the list retry instead of overwriting each other.

use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, HashSet};
use std::hash::{Hash, Hasher};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{MemoError, Result};
use crate::models::CardId;
use crate::outline::{self, BlockId, Outline, APPEND};

pub const RANKING_PREFIX: &str = "priority-ranking::";

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(1000);

const MAX_WRITE_ATTEMPTS: usize = 5;

/// Serialize an order into its storage line.
pub fn encode_ranking(order: &[CardId]) -> String {
    let refs: Vec<String> = order.iter().map(|uid| outline::block_ref(uid)).collect();
    format!("{} {}", RANKING_PREFIX, refs.join(","))
}

/// Parse a storage line. Returns `None` if the line is not a ranking line.
/// Duplicate uids keep their first (highest) position.
pub fn decode_ranking(text: &str) -> Option<Vec<CardId>> {
    let body = text.strip_prefix(RANKING_PREFIX)?.trim();
    let mut seen = HashSet::new();
    let mut order = Vec::new();

    for part in body.split(',') {
        let part = part.trim();
        let uid = part
            .strip_prefix("((")
            .and_then(|p| p.strip_suffix("))"))
            .unwrap_or(part);
        if uid.is_empty() {
            continue;
        }
        if seen.insert(uid) {
            order.push(uid.to_string());
        } else {
            warn!(uid, "duplicate uid in priority ranking, keeping first position");
        }
    }

    Some(order)
}

/// 1-based position of a card. Cards not in the list rank just after the
/// last one.
pub fn rank(id: &str, order: &[CardId]) -> usize {
    order
        .iter()
        .position(|uid| uid == id)
        .map(|i| i + 1)
        .unwrap_or(order.len() + 1)
}

/// Rank that a priority percentage maps to in a list of `total` cards.
/// 100% is rank 1, 0% is the last rank.
pub fn rank_for_priority(priority: f64, total: usize) -> usize {
    let raw = (total as f64 * (100.0 - priority) / 100.0).ceil();
    (raw.max(1.0)) as usize
}

/// Priority percentage of a rank, the inverse of [`rank_for_priority`].
pub fn priority_for_rank(rank: usize, total: usize) -> u32 {
    if total == 0 {
        return 100;
    }
    let pct = 100.0 * (total as f64 - rank as f64) / total as f64;
    pct.round().clamp(0.0, 100.0) as u32
}

/// Where a block of `missing` newly discovered cards is spliced into an
/// order of `existing` cards for the given default priority.
pub fn insertion_index(existing: usize, missing: usize, default_priority: f64) -> usize {
    let total_after = (existing + missing) as f64;
    let index = (total_after * (100.0 - default_priority) / 100.0).ceil() - 1.0;
    (index.max(0.0) as usize).min(existing)
}

/// Add every id of `all_known` not yet in `order`, as one contiguous block.
/// The block is reversed so the most recently discovered card comes first.
pub fn with_missing(order: &[CardId], all_known: &[CardId], default_priority: f64) -> Vec<CardId> {
    let present: HashSet<&str> = order.iter().map(String::as_str).collect();
    let mut seen = HashSet::new();
    let mut missing: Vec<CardId> = all_known
        .iter()
        .filter(|uid| !present.contains(uid.as_str()) && seen.insert(uid.as_str()))
        .cloned()
        .collect();

    if missing.is_empty() {
        return order.to_vec();
    }

    missing.reverse();
    let index = insertion_index(order.len(), missing.len(), default_priority);

    let mut updated = order.to_vec();
    updated.splice(index..index, missing);
    updated
}

/// Apply rank changes in ascending target rank. Each card is removed and
/// re-inserted at `target - 1`, clamped to the list length. Ties on target
/// rank resolve by uid so the result never depends on input order.
pub fn reorder(order: &[CardId], changes: &[(CardId, usize)]) -> Vec<CardId> {
    let mut sorted = changes.to_vec();
    sorted.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));

    let mut updated = order.to_vec();
    for (uid, target) in sorted {
        updated.retain(|u| *u != uid);
        let index = target.saturating_sub(1).min(updated.len());
        updated.insert(index, uid);
    }
    updated
}

fn fingerprint(ids: &[CardId]) -> u64 {
    let mut sorted: Vec<&str> = ids.iter().map(String::as_str).collect();
    sorted.sort_unstable();
    sorted.dedup();
    let mut hasher = DefaultHasher::new();
    sorted.hash(&mut hasher);
    hasher.finish()
}

struct Snapshot {
    block: Option<(BlockId, String)>,
    order: Vec<CardId>,
}

pub struct PriorityStore<'a, O: Outline + ?Sized> {
    outline: &'a O,
    page_title: String,
    debounce: Duration,
    last_insert: Option<(Instant, u64)>,
}

impl<'a, O: Outline + ?Sized> PriorityStore<'a, O> {
    pub fn new(outline: &'a O, page_title: impl Into<String>) -> Self {
        Self {
            outline,
            page_title: page_title.into(),
            debounce: DEFAULT_DEBOUNCE,
            last_insert: None,
        }
    }

    pub fn with_debounce(mut self, window: Duration) -> Self {
        self.debounce = window;
        self
    }

    fn snapshot(&self) -> Result<Snapshot> {
        let data = outline::find_data_block(self.outline, &self.page_title)
            .map_err(|e| MemoError::PersistenceRead(e.to_string()))?;
        let Some(data) = data else {
            return Ok(Snapshot {
                block: None,
                order: Vec::new(),
            });
        };

        let found = self
            .ranking_lines(data)
            .map_err(|e| MemoError::PersistenceRead(e.to_string()))?
            .into_iter()
            .next();

        Ok(match found {
            Some((id, text)) => Snapshot {
                order: decode_ranking(&text).unwrap_or_default(),
                block: Some((id, text)),
            },
            None => Snapshot {
                block: None,
                order: Vec::new(),
            },
        })
    }

    // Every ranking line under the data block, first one wins.
    fn ranking_lines(&self, data: BlockId) -> Result<Vec<(BlockId, String)>> {
        Ok(self
            .outline
            .get_direct_children(data)?
            .into_iter()
            .filter(|b| b.text.starts_with(RANKING_PREFIX))
            .map(|b| (b.id, b.text))
            .collect())
    }

    // Returns false when the line changed since `snapshot` was taken.
    fn commit(&self, snapshot: &Snapshot, order: &[CardId]) -> Result<bool> {
        let text = encode_ranking(order);
        let written = match &snapshot.block {
            Some((id, expected)) => self.outline.replace_text(*id, expected, &text),
            None => self.create_line(&text),
        };
        written.map_err(|e| MemoError::PersistenceWrite(e.to_string()))
    }

    // Another writer may create the line at the same time. Whoever's line
    // comes first keeps it; the other removes its own and retries.
    fn create_line(&self, text: &str) -> Result<bool> {
        let data = outline::data_block(self.outline, &self.page_title)?;
        let ours = self.outline.create_child(data, text, APPEND)?;

        let first = self.ranking_lines(data)?.first().map(|(id, _)| *id);
        if first == Some(ours) {
            return Ok(true);
        }

        debug!("priority ranking created concurrently, dropping ours");
        self.outline.delete_block(ours)?;
        Ok(false)
    }

    fn read_modify_write<F>(&self, mut update: F) -> Result<Vec<CardId>>
    where
        F: FnMut(&[CardId]) -> Option<Vec<CardId>>,
    {
        for attempt in 1..=MAX_WRITE_ATTEMPTS {
            let snapshot = self.snapshot()?;
            let Some(order) = update(&snapshot.order) else {
                return Ok(snapshot.order);
            };
            if self.commit(&snapshot, &order)? {
                return Ok(order);
            }
            debug!(attempt, "priority ranking changed underneath us, retrying");
        }

        Err(MemoError::PersistenceWrite(format!(
            "priority ranking kept changing after {} attempts",
            MAX_WRITE_ATTEMPTS
        )))
    }

    /// Current order, or empty if there is none yet or it cannot be read.
    pub fn load(&self) -> Vec<CardId> {
        match self.snapshot() {
            Ok(snapshot) => snapshot.order,
            Err(e) => {
                warn!(error = %e, "failed to read priority ranking, using empty order");
                Vec::new()
            }
        }
    }

    /// Overwrite the stored order.
    pub fn save(&self, order: &[CardId]) -> Result<()> {
        self.read_modify_write(|_| Some(order.to_vec()))?;
        Ok(())
    }

    /// Insert every known card missing from the order.
    ///
    /// Repeated calls with the same card set inside the debounce window are
    /// collapsed into the first one. A call with a different card set always
    /// runs, so newly discovered cards are never skipped.
    pub fn insert_missing(
        &mut self,
        all_known: &[CardId],
        default_priority: f64,
    ) -> Result<Vec<CardId>> {
        if !(0.0..=100.0).contains(&default_priority) {
            return Err(MemoError::InvalidPriority(default_priority));
        }

        let now = Instant::now();
        let print = fingerprint(all_known);
        if let Some((last, last_print)) = self.last_insert {
            if last_print == print && now.duration_since(last) < self.debounce {
                debug!("insert_missing debounced");
                return Ok(self.load());
            }
        }

        let order = self.read_modify_write(|current| {
            let updated = with_missing(current, all_known, default_priority);
            if updated.len() == current.len() {
                return None;
            }
            debug!(
                inserted = updated.len() - current.len(),
                "inserting new cards into priority ranking"
            );
            Some(updated)
        })?;

        self.last_insert = Some((now, print));
        Ok(order)
    }

    /// Apply a batch of rank changes and persist the result once.
    ///
    /// Starts from the stored order, or from `fallback` when nothing is
    /// stored yet. Cards unknown to both are still placed at their target.
    pub fn apply_rank_changes(
        &self,
        changes: &HashMap<CardId, usize>,
        fallback: &[CardId],
    ) -> Result<Vec<CardId>> {
        if changes.is_empty() {
            return Ok(self.load());
        }

        let batch: Vec<(CardId, usize)> = changes.iter().map(|(k, v)| (k.clone(), *v)).collect();

        let order = self.read_modify_write(|current| {
            let base = if current.is_empty() { fallback } else { current };
            for (uid, target) in &batch {
                if !base.contains(uid) {
                    warn!(uid = uid.as_str(), target, "rank change for unknown card, inserting it");
                }
            }
            Some(reorder(base, &batch))
        })?;

        info!(changes = batch.len(), "applied priority ranking changes");
        Ok(order)
    }
}

/// Rank changes collected during a review session, flushed as one batch.
#[derive(Debug, Default, Clone)]
pub struct RankChangeBuffer {
    pending: HashMap<CardId, usize>,
}

impl RankChangeBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a target rank, replacing any earlier one for the same card.
    pub fn add(&mut self, uid: impl Into<CardId>, target_rank: usize) {
        self.pending.insert(uid.into(), target_rank.max(1));
    }

    pub fn get(&self, uid: &str) -> Option<usize> {
        self.pending.get(uid).copied()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Write all pending changes. They are kept if the write fails so the
    /// caller can retry or [`discard`](Self::discard) them.
    pub fn flush<O: Outline + ?Sized>(
        &mut self,
        store: &PriorityStore<'_, O>,
        fallback: &[CardId],
    ) -> Result<Option<Vec<CardId>>> {
        if self.pending.is_empty() {
            return Ok(None);
        }
        let order = store.apply_rank_changes(&self.pending, fallback)?;
        self.pending.clear();
        Ok(Some(order))
    }

    pub fn discard(&mut self) {
        self.pending.clear();
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeckPriority {
    pub tag: String,
    pub card_count: usize,
    pub median_priority: u32,
}

/// Card count and median priority of a deck.
pub fn deck_priority(tag: &str, tag_cards: &[CardId], order: &[CardId]) -> DeckPriority {
    let total = order.len();
    let mut priorities: Vec<u32> = tag_cards
        .iter()
        .map(|uid| priority_for_rank(rank(uid, order), total))
        .collect();
    priorities.sort_unstable();

    let median_priority = match priorities.len() {
        0 => 0,
        n if n % 2 == 1 => priorities[n / 2],
        n => ((priorities[n / 2 - 1] + priorities[n / 2]) as f64 / 2.0).round() as u32,
    };

    DeckPriority {
        tag: tag.to_string(),
        card_count: tag_cards.len(),
        median_priority,
    }
}

/// Rank changes that shift every card of a deck by `offset` percentage
/// points, clamped to 0-100.
pub fn deck_offset_changes(
    tag_cards: &[CardId],
    order: &[CardId],
    offset: i32,
) -> HashMap<CardId, usize> {
    let total = order.len().max(tag_cards.len());
    tag_cards
        .iter()
        .map(|uid| {
            let current = priority_for_rank(rank(uid, order), total) as i32;
            let target = (current + offset).clamp(0, 100) as f64;
            (uid.clone(), rank_for_priority(target, total))
        })
        .collect()
}
