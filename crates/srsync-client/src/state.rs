//! The two locally cached blobs of a profile.
//!
//! `LocalState` holds the progress cache and deck activation; `Registry`
//! mirrors deck metadata and card content. Both are plain data; the
//! `Session` decides when they change and when they are written.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::debug;

use srsync_core::merge::{merge, MergeOutcome};
use srsync_core::model::{CardId, DeckId, Progress, Rating, ReviewEvent, Scope, Timestamp, UserId};
use srsync_core::wire::{DueCard, ProgressMap, SaveRecord};

/// Progress cache, activation and hide flags of one profile.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LocalState {
    /// `deckId -> true` for decks the learner reviews.
    #[serde(default)]
    pub active: BTreeMap<DeckId, bool>,
    #[serde(default)]
    pub decks: BTreeMap<DeckId, BTreeMap<CardId, Progress>>,
    #[serde(default)]
    pub hidden: BTreeMap<DeckId, BTreeMap<CardId, bool>>,
    /// Snapshots not yet acknowledged by the server, latest per card.
    #[serde(default)]
    pub pending: BTreeMap<CardId, SaveRecord>,
    /// Ratings not yet reported, oldest first.
    #[serde(default)]
    pub reviews: Vec<ReviewEvent>,
}

/// Outcome of overlaying the server's progress onto the local cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OverlayReport {
    /// Local entries replaced or created from the server copy.
    pub adopted: usize,
    /// Local entries more advanced than the server; they stay pending.
    pub kept_local: usize,
}

impl LocalState {
    pub fn active_decks(&self) -> BTreeSet<DeckId> {
        self.active
            .iter()
            .filter(|(_, on)| **on)
            .map(|(id, _)| *id)
            .collect()
    }

    pub fn activate(&mut self, deck_id: DeckId) -> bool {
        self.active.insert(deck_id, true) != Some(true)
    }

    pub fn deactivate(&mut self, deck_id: DeckId) {
        self.active.remove(&deck_id);
    }

    pub fn progress(&self, deck_id: DeckId, card_id: &str) -> Option<&Progress> {
        self.decks.get(&deck_id).and_then(|cards| cards.get(card_id))
    }

    /// The most advanced local copy of a card across decks.
    pub fn best_progress(&self, card_id: &str) -> Option<Progress> {
        let mut best: Option<Progress> = None;
        for cards in self.decks.values() {
            if let Some(p) = cards.get(card_id) {
                best = Some(merge(best.as_ref(), p).0);
            }
        }
        best
    }

    /// Store `progress` for the card in `deck_id` and every other deck holding the same card.
    pub fn set_progress(&mut self, deck_id: DeckId, card_id: &str, progress: Progress) {
        for (id, cards) in self.decks.iter_mut() {
            if *id != deck_id {
                if let Some(p) = cards.get_mut(card_id) {
                    *p = progress;
                }
            }
        }
        self.decks
            .entry(deck_id)
            .or_default()
            .insert(card_id.to_string(), progress);
    }

    /// Record a snapshot for the next push.
    pub fn queue_save(&mut self, deck_id: DeckId, card_id: &str, progress: Progress) {
        self.pending
            .insert(card_id.to_string(), SaveRecord::new(deck_id, card_id, progress));
    }

    pub fn log_review(&mut self, deck_id: DeckId, card_id: &str, rating: Rating, now: Timestamp) {
        self.reviews.push(ReviewEvent {
            deck_id,
            card_id: card_id.to_string(),
            rating,
            observed_at: now,
        });
    }

    /// Drop the `count` oldest review events once the server has them.
    pub fn acknowledge_reviews(&mut self, count: usize) {
        self.reviews.drain(..count.min(self.reviews.len()));
    }

    /// Drop acknowledged snapshots, unless the card changed again since they were sent.
    pub fn acknowledge(&mut self, sent: &[SaveRecord]) -> usize {
        let mut cleared = 0;
        for record in sent {
            if self.pending.get(&record.card_id) == Some(record) {
                self.pending.remove(&record.card_id);
                cleared += 1;
            }
        }
        cleared
    }

    pub fn is_hidden(&self, deck_id: DeckId, card_id: &str) -> bool {
        self.hidden
            .get(&deck_id)
            .and_then(|cards| cards.get(card_id))
            .copied()
            .unwrap_or(false)
    }

    /// Hide a card for this profile.
    ///
    /// The flag lands on every cached copy and on a queued snapshot, so a
    /// later push carries it instead of reviving the card on the server.
    pub fn hide(&mut self, deck_id: DeckId, card_id: &str) {
        self.hidden
            .entry(deck_id)
            .or_default()
            .insert(card_id.to_string(), true);
        for cards in self.decks.values_mut() {
            if let Some(p) = cards.get_mut(card_id) {
                p.hidden = true;
            }
        }
        if let Some(record) = self.pending.get_mut(card_id) {
            record.progress.hidden = true;
        }
    }

    /// Remove every local trace of a card in one deck.
    pub fn forget(&mut self, deck_id: DeckId, card_id: &str) {
        if let Some(cards) = self.decks.get_mut(&deck_id) {
            cards.remove(card_id);
        }
        if let Some(cards) = self.hidden.get_mut(&deck_id) {
            cards.remove(card_id);
        }
        if self.pending.get(card_id).is_some_and(|r| r.deck_id == deck_id) {
            self.pending.remove(card_id);
        }
    }

    /// Overlay the server's map using the merge comparator, server winning ties.
    ///
    /// Every local copy of a card (in any deck) is reconciled against the
    /// server record for that card. A local copy more advanced than the
    /// server is kept and queued for the next push.
    pub fn overlay(&mut self, server: &ProgressMap) -> OverlayReport {
        let mut report = OverlayReport::default();
        for (deck_id, cards) in server {
            for (card_id, server_progress) in cards {
                let mut targets: Vec<DeckId> = self
                    .decks
                    .iter()
                    .filter(|(_, local)| local.contains_key(card_id))
                    .map(|(id, _)| *id)
                    .collect();
                if !targets.contains(deck_id) {
                    targets.push(*deck_id);
                }

                for target in targets {
                    let slot = self.decks.entry(target).or_default();
                    let (winner, outcome) = match slot.get(card_id) {
                        None => (*server_progress, MergeOutcome::Inserted),
                        Some(local) => match merge(Some(server_progress), local) {
                            (p, MergeOutcome::Replaced) => (p, MergeOutcome::Replaced),
                            (p, _) => (p, MergeOutcome::KeptExisting),
                        },
                    };
                    slot.insert(card_id.clone(), winner);
                    if outcome == MergeOutcome::Replaced {
                        report.kept_local += 1;
                        self.pending
                            .entry(card_id.clone())
                            .or_insert_with(|| SaveRecord::new(target, card_id.clone(), winner));
                    } else {
                        report.adopted += 1;
                    }
                }
            }
        }
        debug!(
            adopted = report.adopted,
            kept_local = report.kept_local,
            "overlaid server progress"
        );
        report
    }

    /// Give every registry card without local progress its initial progress.
    pub fn ensure_progress(&mut self, registry: &Registry, now: Timestamp) -> usize {
        let mut created = 0;
        for deck in registry.decks.values() {
            for card in &deck.cards {
                let cards = self.decks.entry(deck.id).or_default();
                if !cards.contains_key(&card.card_id) {
                    cards.insert(card.card_id.clone(), Progress::new(now));
                    created += 1;
                }
            }
        }
        created
    }
}

/// Mirror of one card's content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardEntry {
    pub card_id: CardId,
    #[serde(default)]
    pub scope: Scope,
    #[serde(default)]
    pub owner_id: Option<UserId>,
    #[serde(default)]
    pub payload: serde_json::Value,
    /// Position in the registry's insertion order, assigned on first insert.
    #[serde(default)]
    pub seq: u64,
}

impl CardEntry {
    pub fn new(
        card_id: impl Into<CardId>,
        scope: Scope,
        owner_id: Option<UserId>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            card_id: card_id.into(),
            scope,
            owner_id,
            payload,
            seq: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeckEntry {
    pub id: DeckId,
    pub title: String,
    /// Cards in insertion order.
    #[serde(default)]
    pub cards: Vec<CardEntry>,
}

impl DeckEntry {
    pub fn card(&self, card_id: &str) -> Option<&CardEntry> {
        self.cards.iter().find(|c| c.card_id == card_id)
    }
}

/// Deck metadata and card content mirror of one profile.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Registry {
    #[serde(default)]
    pub decks: BTreeMap<DeckId, DeckEntry>,
    #[serde(default)]
    next_seq: u64,
}

impl Registry {
    pub fn deck_mut(&mut self, deck_id: DeckId) -> &mut DeckEntry {
        self.decks.entry(deck_id).or_insert_with(|| DeckEntry {
            id: deck_id,
            title: format!("Deck {deck_id}"),
            cards: Vec::new(),
        })
    }

    /// Insert a card at the end of its deck, or update its content in place.
    ///
    /// A new card takes the next registry sequence number; an update keeps
    /// the one the card already had.
    pub fn upsert_card(&mut self, deck_id: DeckId, mut entry: CardEntry) -> bool {
        let seq = self.next_seq;
        let deck = self.deck_mut(deck_id);
        match deck.cards.iter_mut().find(|c| c.card_id == entry.card_id) {
            Some(existing) => {
                entry.seq = existing.seq;
                *existing = entry;
                false
            }
            None => {
                entry.seq = seq;
                deck.cards.push(entry);
                self.next_seq += 1;
                true
            }
        }
    }

    /// Merge due cards from the server. Nothing is ever removed. Returns how many cards were new.
    ///
    /// New cards enter the registry in the server's insertion order.
    pub fn merge_due_cards(&mut self, due: &[DueCard]) -> usize {
        let mut ordered: Vec<&DueCard> = due.iter().collect();
        ordered.sort_by_key(|d| d.seq);
        ordered
            .into_iter()
            .filter(|d| {
                self.upsert_card(
                    d.deck_id,
                    CardEntry::new(d.card_id.clone(), d.scope, d.owner_id, d.payload.clone()),
                )
            })
            .count()
    }

    /// Every card with its deck, in registry insertion order.
    pub fn cards_in_order(&self) -> Vec<(DeckId, &CardEntry)> {
        let mut cards: Vec<(DeckId, &CardEntry)> = self
            .decks
            .values()
            .flat_map(|deck| deck.cards.iter().map(move |card| (deck.id, card)))
            .collect();
        cards.sort_by_key(|(_, card)| card.seq);
        cards
    }

    pub fn remove_card(&mut self, deck_id: DeckId, card_id: &str) -> bool {
        match self.decks.get_mut(&deck_id) {
            Some(deck) => {
                let before = deck.cards.len();
                deck.cards.retain(|c| c.card_id != card_id);
                deck.cards.len() != before
            }
            None => false,
        }
    }

    pub fn card(&self, deck_id: DeckId, card_id: &str) -> Option<&CardEntry> {
        self.decks.get(&deck_id).and_then(|d| d.card(card_id))
    }

    /// Decks holding at least one card.
    pub fn non_empty_decks(&self) -> impl Iterator<Item = DeckId> + '_ {
        self.decks
            .values()
            .filter(|d| !d.cards.is_empty())
            .map(|d| d.id)
    }

    pub fn card_count(&self) -> usize {
        self.decks.values().map(|d| d.cards.len()).sum()
    }
}
