//! Core trait definitions for progress storage and sync transports.
//!
//! `ProgressStore` is implemented by `srsync-server`; `SyncTransport` is
//! implemented over HTTP and in-process by `srsync-client` and
//! `srsync-server` respectively.

use async_trait::async_trait;

use crate::error::{StoreError, TransportError};
use crate::model::{Card, CardDraft, Deck, DeckId, NewDeck, ProgressKey, ProgressRow, UserId};
use crate::stats::UserStats;
use crate::wire::{
    DeleteOutcome, DueCard, ProgressMap, SaveReport, SaveRequest, UpsertRequest, UpsertResponse,
};

// ---------------------------------------------------------------------------
// Progress store trait
// ---------------------------------------------------------------------------

/// Before and after values of a progress slot touched by `modify_progress`.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressChange {
    pub before: Option<ProgressRow>,
    pub after: Option<ProgressRow>,
}

impl ProgressChange {
    pub fn created(&self) -> bool {
        self.before.is_none() && self.after.is_some()
    }

    pub fn changed(&self) -> bool {
        self.before != self.after
    }
}

/// Durable storage for decks, cards, progress and statistics.
///
/// Progress is keyed on `(user_id, card_id)` only. `modify_progress` is the
/// single write path for progress and must be atomic per key: concurrent
/// calls for the same key are serialized, calls for different keys are not.
#[async_trait]
pub trait ProgressStore: Send + Sync {
    /// Every progress record of one user.
    async fn progress_for_user(&self, user_id: UserId) -> Result<Vec<ProgressRow>, StoreError>;

    async fn get_progress(&self, key: &ProgressKey) -> Result<Option<ProgressRow>, StoreError>;

    /// Atomic read-compute-write of one progress slot.
    ///
    /// `update` sees the current value and returns the new one; `None`
    /// leaves the slot untouched.
    async fn modify_progress(
        &self,
        key: &ProgressKey,
        update: &(dyn for<'r> Fn(Option<&'r ProgressRow>) -> Option<ProgressRow> + Send + Sync),
    ) -> Result<ProgressChange, StoreError>;

    /// Remove the progress of every user for `card_id`. Returns how many rows went.
    async fn delete_progress_for_card(&self, card_id: &str) -> Result<usize, StoreError>;

    /// Point every progress row recorded against deck `from` at deck `to`.
    async fn repoint_progress(&self, from: DeckId, to: DeckId) -> Result<usize, StoreError>;

    /// All decks, in creation order.
    async fn list_decks(&self) -> Result<Vec<Deck>, StoreError>;

    async fn get_deck(&self, deck_id: DeckId) -> Result<Option<Deck>, StoreError>;

    async fn insert_deck(&self, deck: NewDeck) -> Result<Deck, StoreError>;

    /// Delete an empty deck. Fails with `Conflict` if it still holds cards.
    async fn delete_deck(&self, deck_id: DeckId) -> Result<bool, StoreError>;

    async fn get_card(&self, deck_id: DeckId, card_id: &str) -> Result<Option<Card>, StoreError>;

    /// Cards of one deck in insertion order.
    async fn cards_in_deck(&self, deck_id: DeckId) -> Result<Vec<Card>, StoreError>;

    /// Insert or update a card. The flag is `true` when the card is new.
    async fn put_card(&self, draft: CardDraft) -> Result<(Card, bool), StoreError>;

    async fn remove_card(&self, deck_id: DeckId, card_id: &str) -> Result<Option<Card>, StoreError>;

    /// Move a card between decks. Returns `false` without moving if the
    /// destination already has a card with this id.
    async fn move_card(&self, from: DeckId, card_id: &str, to: DeckId) -> Result<bool, StoreError>;

    async fn stats(&self, user_id: UserId) -> Result<UserStats, StoreError>;

    /// Apply `update` to the user's statistics and return the new value.
    async fn update_stats(
        &self,
        user_id: UserId,
        update: &(dyn for<'r> Fn(&'r mut UserStats) + Send + Sync),
    ) -> Result<UserStats, StoreError>;
}

// ---------------------------------------------------------------------------
// Sync transport trait
// ---------------------------------------------------------------------------

/// The client's view of the sync server, bound to one authenticated user.
#[async_trait]
pub trait SyncTransport: Send + Sync {
    /// Human-readable transport name (e.g. "http").
    fn name(&self) -> &str;

    /// Full progress map of the user.
    async fn fetch(&self) -> Result<ProgressMap, TransportError>;

    /// Submit a batch of progress snapshots.
    async fn save(&self, request: &SaveRequest) -> Result<SaveReport, TransportError>;

    /// Cards due now for the user, at most `limit`.
    async fn get_due_cards(&self, limit: usize) -> Result<Vec<DueCard>, TransportError>;

    async fn delete_card(
        &self,
        deck_id: DeckId,
        card_id: &str,
    ) -> Result<DeleteOutcome, TransportError>;

    /// Create or update a card authored by the user.
    async fn upsert_card(&self, request: &UpsertRequest) -> Result<UpsertResponse, TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Progress;

    fn row(step: u8) -> ProgressRow {
        ProgressRow {
            user_id: 1,
            deck_id: 2,
            card_id: "a".into(),
            progress: Progress {
                step,
                ..Progress::new(0)
            },
        }
    }

    #[test]
    fn change_flags() {
        let created = ProgressChange {
            before: None,
            after: Some(row(0)),
        };
        assert!(created.created());
        assert!(created.changed());

        let untouched = ProgressChange {
            before: Some(row(1)),
            after: Some(row(1)),
        };
        assert!(!untouched.created());
        assert!(!untouched.changed());

        let advanced = ProgressChange {
            before: Some(row(1)),
            after: Some(row(2)),
        };
        assert!(advanced.changed());
    }
}
