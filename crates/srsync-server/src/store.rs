//! In-memory `ProgressStore` persisted as a JSON snapshot.
//!
//! Each `(user, card)` progress slot sits behind its own mutex, so writes to
//! one slot are serialized while unrelated slots proceed in parallel. The
//! map of slots is only write-locked to add a new slot.

use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use srsync_core::error::StoreError;
use srsync_core::merge::{merge, MergeOutcome};
use srsync_core::model::{
    Card, CardDraft, CardId, Deck, DeckId, NewDeck, ProgressKey, ProgressRow, UserId,
};
use srsync_core::stats::UserStats;
use srsync_core::traits::{ProgressChange, ProgressStore};

type Slot = Arc<Mutex<Option<ProgressRow>>>;

#[derive(Debug, Default)]
struct Catalog {
    decks: BTreeMap<DeckId, Deck>,
    cards: BTreeMap<(DeckId, CardId), Card>,
    next_deck_id: DeckId,
    next_seq: u64,
}

/// On-disk form of a [`MemoryStore`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreSnapshot {
    #[serde(default)]
    pub decks: Vec<Deck>,
    #[serde(default)]
    pub cards: Vec<Card>,
    #[serde(default)]
    pub progress: Vec<ProgressRow>,
    #[serde(default)]
    pub stats: BTreeMap<UserId, UserStats>,
}

/// The authoritative store.
#[derive(Debug)]
pub struct MemoryStore {
    progress: RwLock<HashMap<ProgressKey, Slot>>,
    catalog: RwLock<Catalog>,
    stats: Mutex<HashMap<UserId, UserStats>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned<T>(_: PoisonError<T>) -> StoreError {
    StoreError::Io("store lock poisoned".into())
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            progress: RwLock::new(HashMap::new()),
            catalog: RwLock::new(Catalog {
                next_deck_id: 1,
                ..Catalog::default()
            }),
            stats: Mutex::new(HashMap::new()),
        }
    }

    /// Build a store from a snapshot.
    ///
    /// Snapshots written by older layouts may hold several progress rows for
    /// one `(user, card)`; they are folded with the merge comparator.
    pub fn from_snapshot(snapshot: StoreSnapshot) -> Self {
        let mut rows: HashMap<ProgressKey, ProgressRow> = HashMap::new();
        let mut duplicates = 0usize;
        for row in snapshot.progress {
            match rows.entry(row.key()) {
                Entry::Vacant(slot) => {
                    slot.insert(row);
                }
                Entry::Occupied(mut slot) => {
                    duplicates += 1;
                    let existing = slot.get_mut();
                    let (merged, outcome) = merge(Some(&existing.progress), &row.progress);
                    if outcome == MergeOutcome::Replaced {
                        existing.deck_id = row.deck_id;
                        existing.progress = merged;
                    }
                }
            }
        }
        if duplicates > 0 {
            info!(duplicates, "merged duplicate progress rows from snapshot");
        }

        let next_deck_id = snapshot.decks.iter().map(|d| d.id).max().unwrap_or(0) + 1;
        let next_seq = snapshot.cards.iter().map(|c| c.seq + 1).max().unwrap_or(0);
        let catalog = Catalog {
            decks: snapshot.decks.into_iter().map(|d| (d.id, d)).collect(),
            cards: snapshot
                .cards
                .into_iter()
                .map(|c| ((c.deck_id, c.card_id.clone()), c))
                .collect(),
            next_deck_id,
            next_seq,
        };

        Self {
            progress: RwLock::new(
                rows.into_iter()
                    .map(|(k, v)| (k, Arc::new(Mutex::new(Some(v)))))
                    .collect(),
            ),
            catalog: RwLock::new(catalog),
            stats: Mutex::new(snapshot.stats.into_iter().collect()),
        }
    }

    /// Capture the current contents.
    pub fn snapshot(&self) -> Result<StoreSnapshot, StoreError> {
        let mut progress = Vec::new();
        for slot in self.progress.read().map_err(poisoned)?.values() {
            if let Some(row) = slot.lock().map_err(poisoned)?.clone() {
                progress.push(row);
            }
        }
        progress.sort_by(|a, b| (a.user_id, &a.card_id).cmp(&(b.user_id, &b.card_id)));

        let catalog = self.catalog.read().map_err(poisoned)?;
        let mut cards: Vec<Card> = catalog.cards.values().cloned().collect();
        cards.sort_by_key(|c| c.seq);

        Ok(StoreSnapshot {
            decks: catalog.decks.values().cloned().collect(),
            cards,
            progress,
            stats: self
                .stats
                .lock()
                .map_err(poisoned)?
                .iter()
                .map(|(k, v)| (*k, v.clone()))
                .collect(),
        })
    }

    /// Load a snapshot file, or start empty if it does not exist yet.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "no store snapshot, starting empty");
            return Ok(Self::new());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read store: {}", path.display()))?;
        let snapshot: StoreSnapshot = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse store: {}", path.display()))?;
        Ok(Self::from_snapshot(snapshot))
    }

    /// Write the snapshot atomically next to `path`, then rename over it.
    pub fn save(&self, path: &Path) -> Result<()> {
        let snapshot = self.snapshot()?;
        let json = serde_json::to_string_pretty(&snapshot)?;
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        std::io::Write::write_all(&mut tmp, json.as_bytes())?;
        tmp.persist(path)
            .with_context(|| format!("failed to write store: {}", path.display()))?;
        debug!(path = %path.display(), "store saved");
        Ok(())
    }

    fn slot(&self, key: &ProgressKey) -> Result<Slot, StoreError> {
        if let Some(slot) = self.progress.read().map_err(poisoned)?.get(key) {
            return Ok(Arc::clone(slot));
        }
        let mut map = self.progress.write().map_err(poisoned)?;
        Ok(Arc::clone(map.entry(key.clone()).or_default()))
    }

    fn all_slots(&self) -> Result<Vec<Slot>, StoreError> {
        Ok(self
            .progress
            .read()
            .map_err(poisoned)?
            .values()
            .cloned()
            .collect())
    }
}

#[async_trait]
impl ProgressStore for MemoryStore {
    async fn progress_for_user(&self, user_id: UserId) -> Result<Vec<ProgressRow>, StoreError> {
        let slots: Vec<Slot> = self
            .progress
            .read()
            .map_err(poisoned)?
            .iter()
            .filter(|(k, _)| k.user_id == user_id)
            .map(|(_, s)| Arc::clone(s))
            .collect();
        let mut rows = Vec::with_capacity(slots.len());
        for slot in slots {
            if let Some(row) = slot.lock().map_err(poisoned)?.clone() {
                rows.push(row);
            }
        }
        rows.sort_by(|a, b| (a.deck_id, &a.card_id).cmp(&(b.deck_id, &b.card_id)));
        Ok(rows)
    }

    async fn get_progress(&self, key: &ProgressKey) -> Result<Option<ProgressRow>, StoreError> {
        let slot = self.progress.read().map_err(poisoned)?.get(key).cloned();
        match slot {
            Some(slot) => Ok(slot.lock().map_err(poisoned)?.clone()),
            None => Ok(None),
        }
    }

    async fn modify_progress(
        &self,
        key: &ProgressKey,
        update: &(dyn for<'r> Fn(Option<&'r ProgressRow>) -> Option<ProgressRow> + Send + Sync),
    ) -> Result<ProgressChange, StoreError> {
        let slot = self.slot(key)?;
        let mut current = slot.lock().map_err(poisoned)?;
        let before = current.clone();
        if let Some(next) = update(before.as_ref()) {
            if next.user_id != key.user_id || next.card_id != key.card_id {
                return Err(StoreError::Invalid(format!(
                    "update for {}/{} produced a row for {}/{}",
                    key.user_id, key.card_id, next.user_id, next.card_id
                )));
            }
            *current = Some(next);
        }
        Ok(ProgressChange {
            before,
            after: current.clone(),
        })
    }

    async fn delete_progress_for_card(&self, card_id: &str) -> Result<usize, StoreError> {
        let slots: Vec<Slot> = self
            .progress
            .read()
            .map_err(poisoned)?
            .iter()
            .filter(|(k, _)| k.card_id == card_id)
            .map(|(_, s)| Arc::clone(s))
            .collect();
        let mut removed = 0;
        for slot in slots {
            if slot.lock().map_err(poisoned)?.take().is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn repoint_progress(&self, from: DeckId, to: DeckId) -> Result<usize, StoreError> {
        let mut moved = 0;
        for slot in self.all_slots()? {
            let mut guard = slot.lock().map_err(poisoned)?;
            if let Some(row) = guard.as_mut().filter(|r| r.deck_id == from) {
                row.deck_id = to;
                moved += 1;
            }
        }
        Ok(moved)
    }

    async fn list_decks(&self) -> Result<Vec<Deck>, StoreError> {
        let mut decks: Vec<Deck> = self
            .catalog
            .read()
            .map_err(poisoned)?
            .decks
            .values()
            .cloned()
            .collect();
        decks.sort_by_key(|d| (d.created_at, d.id));
        Ok(decks)
    }

    async fn get_deck(&self, deck_id: DeckId) -> Result<Option<Deck>, StoreError> {
        Ok(self
            .catalog
            .read()
            .map_err(poisoned)?
            .decks
            .get(&deck_id)
            .cloned())
    }

    async fn insert_deck(&self, deck: NewDeck) -> Result<Deck, StoreError> {
        let mut catalog = self.catalog.write().map_err(poisoned)?;
        let id = catalog.next_deck_id;
        catalog.next_deck_id += 1;
        let deck = Deck {
            id,
            title: deck.title,
            scope: deck.scope,
            owner_id: deck.owner_id,
            created_by: deck.created_by,
            created_at: deck.created_at,
        };
        catalog.decks.insert(id, deck.clone());
        Ok(deck)
    }

    async fn delete_deck(&self, deck_id: DeckId) -> Result<bool, StoreError> {
        let mut catalog = self.catalog.write().map_err(poisoned)?;
        if catalog.cards.keys().any(|(d, _)| *d == deck_id) {
            return Err(StoreError::Conflict(format!("deck {deck_id} still has cards")));
        }
        Ok(catalog.decks.remove(&deck_id).is_some())
    }

    async fn get_card(&self, deck_id: DeckId, card_id: &str) -> Result<Option<Card>, StoreError> {
        Ok(self
            .catalog
            .read()
            .map_err(poisoned)?
            .cards
            .get(&(deck_id, card_id.to_string()))
            .cloned())
    }

    async fn cards_in_deck(&self, deck_id: DeckId) -> Result<Vec<Card>, StoreError> {
        let catalog = self.catalog.read().map_err(poisoned)?;
        let mut cards: Vec<Card> = catalog
            .cards
            .range((deck_id, String::new())..)
            .take_while(|((d, _), _)| *d == deck_id)
            .map(|(_, c)| c.clone())
            .collect();
        cards.sort_by_key(|c| c.seq);
        Ok(cards)
    }

    async fn put_card(&self, draft: CardDraft) -> Result<(Card, bool), StoreError> {
        let mut catalog = self.catalog.write().map_err(poisoned)?;
        if !catalog.decks.contains_key(&draft.deck_id) {
            return Err(StoreError::not_found("deck", draft.deck_id));
        }
        let key = (draft.deck_id, draft.card_id.clone());
        if let Some(card) = catalog.cards.get_mut(&key) {
            card.scope = draft.scope;
            card.owner_id = draft.owner_id;
            card.payload = draft.payload;
            card.updated_at = draft.now;
            return Ok((card.clone(), false));
        }
        let seq = catalog.next_seq;
        catalog.next_seq += 1;
        let card = Card {
            deck_id: draft.deck_id,
            card_id: draft.card_id,
            scope: draft.scope,
            owner_id: draft.owner_id,
            payload: draft.payload,
            seq,
            created_at: draft.now,
            updated_at: draft.now,
        };
        catalog.cards.insert(key, card.clone());
        Ok((card, true))
    }

    async fn remove_card(
        &self,
        deck_id: DeckId,
        card_id: &str,
    ) -> Result<Option<Card>, StoreError> {
        Ok(self
            .catalog
            .write()
            .map_err(poisoned)?
            .cards
            .remove(&(deck_id, card_id.to_string())))
    }

    async fn move_card(&self, from: DeckId, card_id: &str, to: DeckId) -> Result<bool, StoreError> {
        let mut catalog = self.catalog.write().map_err(poisoned)?;
        if !catalog.decks.contains_key(&to) {
            return Err(StoreError::not_found("deck", to));
        }
        if catalog.cards.contains_key(&(to, card_id.to_string())) {
            return Ok(false);
        }
        let mut card = catalog
            .cards
            .remove(&(from, card_id.to_string()))
            .ok_or_else(|| StoreError::not_found("card", format!("{from}/{card_id}")))?;
        card.deck_id = to;
        catalog.cards.insert((to, card.card_id.clone()), card);
        Ok(true)
    }

    async fn stats(&self, user_id: UserId) -> Result<UserStats, StoreError> {
        Ok(self
            .stats
            .lock()
            .map_err(poisoned)?
            .get(&user_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn update_stats(
        &self,
        user_id: UserId,
        update: &(dyn for<'r> Fn(&'r mut UserStats) + Send + Sync),
    ) -> Result<UserStats, StoreError> {
        let mut all = self.stats.lock().map_err(poisoned)?;
        let stats = all.entry(user_id).or_default();
        update(stats);
        Ok(stats.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use srsync_core::model::{Progress, Scope};

    fn row(user_id: UserId, deck_id: DeckId, card_id: &str, step: u8, last_at: i64) -> ProgressRow {
        ProgressRow {
            user_id,
            deck_id,
            card_id: card_id.into(),
            progress: Progress {
                step,
                due: last_at + 1,
                added_at: 1,
                last_at,
                hidden: false,
            },
        }
    }

    fn new_deck(title: &str) -> NewDeck {
        NewDeck {
            title: title.into(),
            scope: Scope::Private,
            owner_id: None,
            created_by: 1,
            created_at: 10,
        }
    }

    fn draft(deck_id: DeckId, card_id: &str) -> CardDraft {
        CardDraft {
            deck_id,
            card_id: card_id.into(),
            scope: Scope::Shared,
            owner_id: None,
            payload: serde_json::json!({"front": card_id}),
            now: 100,
        }
    }

    #[tokio::test]
    async fn modify_inserts_and_reports_change() {
        let store = MemoryStore::new();
        let key = ProgressKey::new(1, "a");
        let change = store
            .modify_progress(&key, &|cur| {
                assert!(cur.is_none());
                Some(row(1, 5, "a", 0, 0))
            })
            .await
            .unwrap();
        assert!(change.created());

        let unchanged = store.modify_progress(&key, &|_| None).await.unwrap();
        assert!(!unchanged.changed());
        assert_eq!(store.get_progress(&key).await.unwrap().unwrap().deck_id, 5);
    }

    #[tokio::test]
    async fn modify_rejects_key_change() {
        let store = MemoryStore::new();
        let err = store
            .modify_progress(&ProgressKey::new(1, "a"), &|_| Some(row(2, 5, "a", 0, 0)))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Invalid(_)));
    }

    #[tokio::test]
    async fn updates_may_borrow_caller_locals() {
        let store = MemoryStore::new();
        let card_id = String::from("borrowed");
        let template = row(4, 2, &card_id, 3, 70);
        let key = ProgressKey::new(4, card_id.as_str());
        store
            .modify_progress(&key, &|cur| match cur {
                Some(existing) => Some(existing.clone()),
                None => Some(template.clone()),
            })
            .await
            .unwrap();
        assert_eq!(store.get_progress(&key).await.unwrap(), Some(template.clone()));

        let created_at = template.progress.last_at;
        let stats = store
            .update_stats(4, &|s| s.record_card_created(created_at))
            .await
            .unwrap();
        assert_eq!(stats.cards_created, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_writes_to_one_key_are_serialized() {
        let store = Arc::new(MemoryStore::new());
        let key = ProgressKey::new(1, "hot");
        let tasks: Vec<_> = (0..64)
            .map(|_| {
                let store = Arc::clone(&store);
                let key = key.clone();
                tokio::spawn(async move {
                    store
                        .modify_progress(&key, &|cur| {
                            let last = cur.map_or(0, |r| r.progress.last_at);
                            Some(row(1, 1, "hot", 1, last + 1))
                        })
                        .await
                })
            })
            .collect();
        for result in futures::future::join_all(tasks).await {
            result.unwrap().unwrap();
        }
        let stored = store.get_progress(&key).await.unwrap().unwrap();
        assert_eq!(stored.progress.last_at, 64);
    }

    #[tokio::test]
    async fn progress_is_scoped_per_user() {
        let store = MemoryStore::new();
        for (user, card) in [(1, "a"), (1, "b"), (2, "a")] {
            store
                .modify_progress(&ProgressKey::new(user, card), &|_| Some(row(user, 1, card, 0, 0)))
                .await
                .unwrap();
        }
        assert_eq!(store.progress_for_user(1).await.unwrap().len(), 2);
        assert_eq!(store.progress_for_user(2).await.unwrap().len(), 1);

        assert_eq!(store.delete_progress_for_card("a").await.unwrap(), 2);
        assert_eq!(store.progress_for_user(1).await.unwrap().len(), 1);
        assert!(store.progress_for_user(2).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn cards_keep_insertion_order_and_identity() {
        let store = MemoryStore::new();
        let deck = store.insert_deck(new_deck("Animals")).await.unwrap();
        for id in ["zebra", "ant", "moose"] {
            let (_, created) = store.put_card(draft(deck.id, id)).await.unwrap();
            assert!(created);
        }
        let (updated, created) = store
            .put_card(CardDraft {
                now: 500,
                ..draft(deck.id, "ant")
            })
            .await
            .unwrap();
        assert!(!created);
        assert_eq!(updated.created_at, 100);
        assert_eq!(updated.updated_at, 500);

        let ids: Vec<_> = store
            .cards_in_deck(deck.id)
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.card_id)
            .collect();
        assert_eq!(ids, vec!["zebra", "ant", "moose"]);

        let err = store.put_card(draft(999, "x")).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound { kind: "deck", .. }));
    }

    #[tokio::test]
    async fn move_card_refuses_duplicates() {
        let store = MemoryStore::new();
        let a = store.insert_deck(new_deck("A")).await.unwrap();
        let b = store.insert_deck(new_deck("B")).await.unwrap();
        store.put_card(draft(a.id, "x")).await.unwrap();
        store.put_card(draft(a.id, "y")).await.unwrap();
        store.put_card(draft(b.id, "y")).await.unwrap();

        assert!(store.move_card(a.id, "x", b.id).await.unwrap());
        assert!(!store.move_card(a.id, "y", b.id).await.unwrap());
        assert!(store.get_card(b.id, "x").await.unwrap().is_some());

        let err = store.delete_deck(a.id).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
        store.remove_card(a.id, "y").await.unwrap();
        assert!(store.delete_deck(a.id).await.unwrap());
    }

    #[tokio::test]
    async fn repoint_moves_rows_between_decks() {
        let store = MemoryStore::new();
        store
            .modify_progress(&ProgressKey::new(1, "a"), &|_| Some(row(1, 7, "a", 2, 5)))
            .await
            .unwrap();
        store
            .modify_progress(&ProgressKey::new(2, "b"), &|_| Some(row(2, 8, "b", 2, 5)))
            .await
            .unwrap();
        assert_eq!(store.repoint_progress(7, 3).await.unwrap(), 1);
        let moved = store.get_progress(&ProgressKey::new(1, "a")).await.unwrap().unwrap();
        assert_eq!(moved.deck_id, 3);
    }

    #[tokio::test]
    async fn snapshot_roundtrip_merges_duplicate_rows() {
        let snapshot = StoreSnapshot {
            decks: vec![],
            cards: vec![],
            progress: vec![
                row(1, 1, "a", 2, 900),
                row(1, 2, "a", 3, 500),
                row(1, 1, "a", 3, 400),
            ],
            stats: BTreeMap::new(),
        };
        let store = MemoryStore::from_snapshot(snapshot);
        let merged = store.get_progress(&ProgressKey::new(1, "a")).await.unwrap().unwrap();
        assert_eq!(merged.progress.step, 3);
        assert_eq!(merged.progress.last_at, 500);
        assert_eq!(merged.deck_id, 2);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        store
            .update_stats(1, &|s| s.record_card_created(0))
            .await
            .unwrap();
        store.save(&path).unwrap();

        let reloaded = MemoryStore::load(&path).unwrap();
        assert_eq!(reloaded.progress_for_user(1).await.unwrap().len(), 1);
        assert_eq!(reloaded.stats(1).await.unwrap().cards_created, 1);
    }

    #[tokio::test]
    async fn missing_snapshot_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryStore::load(&dir.path().join("nope.json")).unwrap();
        assert!(store.list_decks().await.unwrap().is_empty());
        let deck = store.insert_deck(new_deck("First")).await.unwrap();
        assert_eq!(deck.id, 1);
    }
}
