//! Canonical deck resolution and duplicate deck repair.
//!
//! Self-authored private cards live in one ownerless private deck per
//! installation. Two concurrent first writes may both create it, and older
//! layouts kept one such deck per user; `consolidate` folds every such deck
//! into the earliest ownerless one. Running it again is a no-op.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use srsync_core::error::StoreError;
use srsync_core::model::{Deck, NewDeck, Scope, Timestamp, UserId};
use srsync_core::traits::ProgressStore;

/// What a consolidation pass changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsolidationReport {
    pub decks_removed: usize,
    pub cards_moved: usize,
    /// Cards dropped because the canonical deck already had the same id.
    pub cards_dropped: usize,
    pub progress_repointed: usize,
}

impl ConsolidationReport {
    pub fn is_noop(&self) -> bool {
        *self == Self::default()
    }
}

#[derive(Debug, Clone)]
pub struct IdentityResolver {
    title: String,
}

impl IdentityResolver {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
        }
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    fn is_candidate(&self, deck: &Deck) -> bool {
        deck.scope == Scope::Private && deck.title == self.title
    }

    /// The earliest-created ownerless deck with the canonical title, if any.
    pub async fn find_canonical(
        &self,
        store: &dyn ProgressStore,
    ) -> Result<Option<Deck>, StoreError> {
        Ok(store
            .list_decks()
            .await?
            .into_iter()
            .filter(|d| self.is_candidate(d) && d.owner_id.is_none())
            .min_by_key(|d| (d.created_at, d.id)))
    }

    /// Find or create the canonical deck.
    #[instrument(skip(self, store), fields(title = %self.title))]
    pub async fn canonical_deck(
        &self,
        store: &dyn ProgressStore,
        user_id: UserId,
        now: Timestamp,
    ) -> Result<Deck, StoreError> {
        if let Some(deck) = self.find_canonical(store).await? {
            return Ok(deck);
        }
        let deck = store
            .insert_deck(NewDeck {
                title: self.title.clone(),
                scope: Scope::Private,
                owner_id: None,
                created_by: user_id,
                created_at: now,
            })
            .await?;
        info!(deck_id = deck.id, "created canonical deck");
        Ok(deck)
    }

    /// Merge every duplicate of the canonical deck into it.
    #[instrument(skip(self, store), fields(title = %self.title))]
    pub async fn consolidate(
        &self,
        store: &dyn ProgressStore,
    ) -> Result<ConsolidationReport, StoreError> {
        let mut report = ConsolidationReport::default();
        let Some(canonical) = self.find_canonical(store).await? else {
            return Ok(report);
        };

        let duplicates: Vec<Deck> = store
            .list_decks()
            .await?
            .into_iter()
            .filter(|d| self.is_candidate(d) && d.id != canonical.id)
            .collect();

        for dup in duplicates {
            for card in store.cards_in_deck(dup.id).await? {
                if store.move_card(dup.id, &card.card_id, canonical.id).await? {
                    report.cards_moved += 1;
                } else {
                    debug!(card_id = %card.card_id, deck_id = dup.id, "dropping duplicate card");
                    store.remove_card(dup.id, &card.card_id).await?;
                    report.cards_dropped += 1;
                }
            }
            report.progress_repointed += store.repoint_progress(dup.id, canonical.id).await?;
            if store.delete_deck(dup.id).await? {
                report.decks_removed += 1;
            }
            info!(
                duplicate = dup.id,
                canonical = canonical.id,
                "consolidated duplicate deck"
            );
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use srsync_core::model::{CardDraft, Progress, ProgressKey, ProgressRow};

    fn deck(title: &str, owner_id: Option<UserId>, created_at: Timestamp) -> NewDeck {
        NewDeck {
            title: title.into(),
            scope: Scope::Private,
            owner_id,
            created_by: 1,
            created_at,
        }
    }

    async fn add_card(store: &MemoryStore, deck_id: i64, card_id: &str, owner: UserId) {
        store
            .put_card(CardDraft {
                deck_id,
                card_id: card_id.into(),
                scope: Scope::Private,
                owner_id: Some(owner),
                payload: serde_json::Value::Null,
                now: 0,
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn canonical_deck_is_created_once() {
        let store = MemoryStore::new();
        let resolver = IdentityResolver::new("My cards");
        let first = resolver.canonical_deck(&store, 5, 100).await.unwrap();
        let second = resolver.canonical_deck(&store, 6, 200).await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(first.owner_id, None);
        assert_eq!(store.list_decks().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn earliest_ownerless_deck_wins() {
        let store = MemoryStore::new();
        store.insert_deck(deck("My cards", None, 50)).await.unwrap();
        let early = store.insert_deck(deck("My cards", None, 10)).await.unwrap();
        store.insert_deck(deck("My cards", Some(3), 1)).await.unwrap();
        let resolver = IdentityResolver::new("My cards");
        assert_eq!(resolver.canonical_deck(&store, 1, 0).await.unwrap().id, early.id);
    }

    #[tokio::test]
    async fn consolidation_moves_cards_and_progress() {
        let store = MemoryStore::new();
        let canonical = store.insert_deck(deck("My cards", None, 10)).await.unwrap();
        let racing = store.insert_deck(deck("My cards", None, 11)).await.unwrap();
        let legacy = store.insert_deck(deck("My cards", Some(7), 5)).await.unwrap();
        let other = store.insert_deck(deck("Verbs", Some(7), 5)).await.unwrap();

        add_card(&store, canonical.id, "shared-id", 7).await;
        add_card(&store, racing.id, "r1", 8).await;
        add_card(&store, legacy.id, "l1", 7).await;
        add_card(&store, legacy.id, "shared-id", 7).await;
        add_card(&store, other.id, "v1", 7).await;

        store
            .modify_progress(&ProgressKey::new(7, "l1"), &|_| {
                Some(ProgressRow {
                    user_id: 7,
                    deck_id: 3,
                    card_id: "l1".into(),
                    progress: Progress::new(0),
                })
            })
            .await
            .unwrap();

        let resolver = IdentityResolver::new("My cards");
        let report = resolver.consolidate(&store).await.unwrap();
        assert_eq!(report.decks_removed, 2);
        assert_eq!(report.cards_moved, 2);
        assert_eq!(report.cards_dropped, 1);
        assert_eq!(report.progress_repointed, 1);

        let ids: Vec<_> = store
            .cards_in_deck(canonical.id)
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.card_id)
            .collect();
        assert_eq!(ids, vec!["shared-id", "r1", "l1"]);
        assert!(store.get_deck(other.id).await.unwrap().is_some());
        let row = store
            .get_progress(&ProgressKey::new(7, "l1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.deck_id, canonical.id);

        let again = resolver.consolidate(&store).await.unwrap();
        assert!(again.is_noop());
    }

    #[tokio::test]
    async fn nothing_to_do_without_canonical_deck() {
        let store = MemoryStore::new();
        store.insert_deck(deck("My cards", Some(2), 0)).await.unwrap();
        let report = IdentityResolver::new("My cards").consolidate(&store).await.unwrap();
        assert!(report.is_noop());
    }
}
