//! Due-queue building and the in-memory review queue.

use std::collections::{BTreeSet, HashSet, VecDeque};

use serde::{Deserialize, Serialize};

use crate::model::{CardId, DeckId, Progress, Rating, Timestamp};

/// A card considered for the queue, in card insertion order.
#[derive(Debug, Clone)]
pub struct QueueCandidate {
    pub deck_id: DeckId,
    pub card_id: CardId,
    pub progress: Option<Progress>,
    /// Per-deck hide flag tracked outside the progress record.
    pub hidden: bool,
}

/// A card ready for review.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueItem {
    pub deck_id: DeckId,
    pub card_id: CardId,
    pub progress: Progress,
    /// Position of the candidate in its input sequence.
    pub seq: usize,
}

/// Build the ordered list of due cards.
///
/// A candidate is included iff its deck is active, it has progress, neither
/// the candidate nor its progress is hidden, and it is due at `now`. A card
/// reachable through several active decks appears once, under the first deck
/// that offered it. Output is sorted by `due`, then by input order.
pub fn build_queue<'a>(
    active: &BTreeSet<DeckId>,
    candidates: impl IntoIterator<Item = &'a QueueCandidate>,
    now: Timestamp,
) -> Vec<QueueItem> {
    let mut seen: HashSet<&str> = HashSet::new();
    let mut items: Vec<QueueItem> = candidates
        .into_iter()
        .enumerate()
        .filter_map(|(seq, c)| {
            if !active.contains(&c.deck_id) || c.hidden {
                return None;
            }
            let progress = c.progress?;
            if progress.hidden || !progress.is_due(now) {
                return None;
            }
            if !seen.insert(c.card_id.as_str()) {
                return None;
            }
            Some(QueueItem {
                deck_id: c.deck_id,
                card_id: c.card_id.clone(),
                progress,
                seq,
            })
        })
        .collect();
    items.sort_by_key(|item| (item.progress.due, item.seq));
    items
}

/// Observable state of a [`ReviewQueue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueStatus {
    /// No build has happened yet.
    NotLoaded,
    /// Built, and nothing is due.
    Empty,
    /// Built, with this many cards waiting.
    Ready(usize),
}

/// The queue a session reviews from.
#[derive(Debug, Clone, Default)]
pub struct ReviewQueue {
    items: VecDeque<QueueItem>,
    loaded: bool,
}

impl ReviewQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the contents with a freshly built queue.
    pub fn load(&mut self, items: Vec<QueueItem>) {
        self.items = items.into();
        self.loaded = true;
    }

    /// Forget the contents and return to the not-loaded state.
    pub fn reset(&mut self) {
        self.items.clear();
        self.loaded = false;
    }

    pub fn status(&self) -> QueueStatus {
        match (self.loaded, self.items.len()) {
            (false, _) => QueueStatus::NotLoaded,
            (true, 0) => QueueStatus::Empty,
            (true, n) => QueueStatus::Ready(n),
        }
    }

    pub fn current(&self) -> Option<&QueueItem> {
        self.items.front()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &QueueItem> {
        self.items.iter()
    }

    /// Update the queue after `card_id` was rated.
    ///
    /// Hard moves the item to the back with its new progress; easy and normal
    /// drop it until the next rebuild.
    pub fn after_rating(&mut self, card_id: &str, rating: Rating, updated: Progress) {
        let Some(pos) = self.items.iter().position(|i| i.card_id == card_id) else {
            return;
        };
        let Some(mut item) = self.items.remove(pos) else {
            return;
        };
        if rating == Rating::Hard {
            item.progress = updated;
            self.items.push_back(item);
        }
    }

    /// Drop every occurrence of `card_id`.
    pub fn remove_card(&mut self, card_id: &str) {
        self.items.retain(|i| i.card_id != card_id);
    }
}
