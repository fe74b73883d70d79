//! The sync service: every server operation a client can call.
//!
//! Operations take the caller's user id and the current time explicitly.
//! All progress writes go through `ProgressStore::modify_progress`, so each
//! `(user, card)` is read, compared and written as one atomic step.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use srsync_core::config::SrsyncConfig;
use srsync_core::error::StoreError;
use srsync_core::merge::merge;
use srsync_core::model::{
    normalize_card_id, Card, CardDraft, Deck, DeckId, NewDeck, Progress, ProgressKey,
    ProgressRow, Rating, Scope, Timestamp, UserId,
};
use srsync_core::queue::{build_queue, QueueCandidate};
use srsync_core::review::rate;
use srsync_core::schedule::ScheduleConfig;
use srsync_core::stats::{Dashboard, UserStats};
use srsync_core::traits::ProgressStore;
use srsync_core::wire::{
    DeleteOutcome, DueCard, ProgressMap, SaveReport, SaveRequest, UpsertRequest, UpsertResponse,
};

use crate::resolver::{ConsolidationReport, IdentityResolver};

/// A card of a deck together with the caller's progress on it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeckCard {
    pub card: Card,
    pub progress: Progress,
}

pub struct SyncService {
    store: Arc<dyn ProgressStore>,
    schedule: ScheduleConfig,
    resolver: IdentityResolver,
    due_limit: usize,
}

impl SyncService {
    pub fn new(store: Arc<dyn ProgressStore>, schedule: ScheduleConfig) -> Self {
        Self {
            store,
            schedule,
            resolver: IdentityResolver::new("My cards"),
            due_limit: 1000,
        }
    }

    pub fn from_config(store: Arc<dyn ProgressStore>, config: &SrsyncConfig) -> Self {
        Self::new(store, config.schedule)
            .with_canonical_title(config.server.canonical_deck_title.clone())
            .with_due_limit(config.server.due_limit)
    }

    pub fn with_canonical_title(mut self, title: impl Into<String>) -> Self {
        self.resolver = IdentityResolver::new(title);
        self
    }

    pub fn with_due_limit(mut self, limit: usize) -> Self {
        self.due_limit = limit.max(1);
        self
    }

    pub fn store(&self) -> &dyn ProgressStore {
        self.store.as_ref()
    }

    pub fn schedule(&self) -> &ScheduleConfig {
        &self.schedule
    }

    pub fn due_limit(&self) -> usize {
        self.due_limit
    }

    pub fn resolver(&self) -> &IdentityResolver {
        &self.resolver
    }

    // -----------------------------------------------------------------------
    // Progress sync
    // -----------------------------------------------------------------------

    /// Full progress map of the user, grouped by the deck each row was last saved through.
    #[instrument(skip(self))]
    pub async fn fetch(&self, user_id: UserId) -> Result<ProgressMap, StoreError> {
        let mut map = ProgressMap::new();
        for row in self.store.progress_for_user(user_id).await? {
            map.entry(row.deck_id)
                .or_default()
                .insert(row.card_id, row.progress);
        }
        Ok(map)
    }

    /// Apply a batch of progress snapshots in submission order.
    ///
    /// Each valid record is merged into the stored one with the comparator;
    /// a stale snapshot never regresses a more advanced record. Invalid
    /// records are skipped and counted.
    #[instrument(skip(self, request), fields(records = request.records.len()))]
    pub async fn save(
        &self,
        user_id: UserId,
        request: &SaveRequest,
    ) -> Result<SaveReport, StoreError> {
        let mut report = SaveReport::default();
        for (index, parsed) in request.parse().into_iter().enumerate() {
            let record = match parsed {
                Ok(record) => record,
                Err(e) => {
                    warn!(index, error = %e, "skipping malformed record");
                    report.skipped += 1;
                    continue;
                }
            };

            let key = ProgressKey::new(user_id, record.card_id.clone());
            let change = self
                .store
                .modify_progress(&key, &|current| {
                    let (merged, outcome) = merge(current.map(|r| &r.progress), &record.progress);
                    outcome.changed().then(|| ProgressRow {
                        user_id,
                        deck_id: record.deck_id,
                        card_id: record.card_id.clone(),
                        progress: merged,
                    })
                })
                .await?;

            if change.created() {
                report.inserted += 1;
            } else if change.changed() {
                report.replaced += 1;
            } else {
                report.kept += 1;
            }
            debug!(
                card_id = %record.card_id,
                created = change.created(),
                changed = change.changed(),
                "merged record"
            );
        }

        for event in &request.events {
            self.store
                .update_stats(user_id, &|s| s.record_review(event.rating, event.observed_at))
                .await?;
            report.reviews += 1;
        }
        Ok(report)
    }

    /// Cards due for the user at `now`, across every deck visible to them.
    #[instrument(skip(self))]
    pub async fn get_due_cards(
        &self,
        user_id: UserId,
        now: Timestamp,
        limit: Option<usize>,
    ) -> Result<Vec<DueCard>, StoreError> {
        let limit = limit.unwrap_or(self.due_limit).min(self.due_limit);

        let progress: HashMap<String, Progress> = self
            .store
            .progress_for_user(user_id)
            .await?
            .into_iter()
            .map(|r| (r.card_id, r.progress))
            .collect();

        let mut active = BTreeSet::new();
        let mut cards: Vec<Card> = Vec::new();
        for deck in self.store.list_decks().await? {
            if !deck.is_visible_to(user_id) {
                continue;
            }
            active.insert(deck.id);
            cards.extend(
                self.store
                    .cards_in_deck(deck.id)
                    .await?
                    .into_iter()
                    .filter(|c| c.is_visible_to(user_id)),
            );
        }
        cards.sort_by_key(|c| c.seq);

        let candidates: Vec<QueueCandidate> = cards
            .iter()
            .map(|c| QueueCandidate {
                deck_id: c.deck_id,
                card_id: c.card_id.clone(),
                progress: progress.get(&c.card_id).copied(),
                hidden: false,
            })
            .collect();

        Ok(build_queue(&active, &candidates, now)
            .into_iter()
            .take(limit)
            .map(|item| {
                let card = &cards[item.seq];
                DueCard {
                    deck_id: item.deck_id,
                    card_id: item.card_id,
                    scope: card.scope,
                    owner_id: card.owner_id,
                    payload: card.payload.clone(),
                    progress: item.progress,
                    seq: card.seq,
                }
            })
            .collect())
    }

    /// Delete an owned private card for everyone, or hide any other card for the caller.
    #[instrument(skip(self))]
    pub async fn delete_card(
        &self,
        user_id: UserId,
        deck_id: DeckId,
        card_id: &str,
        now: Timestamp,
    ) -> Result<DeleteOutcome, StoreError> {
        let card = self
            .store
            .get_card(deck_id, card_id)
            .await?
            .ok_or_else(|| StoreError::not_found("card", format!("{deck_id}/{card_id}")))?;

        if card.is_owned_by(user_id) {
            self.store.remove_card(deck_id, card_id).await?;
            let progress_removed = self.store.delete_progress_for_card(card_id).await?;
            self.store
                .update_stats(user_id, &|s| s.record_card_deleted())
                .await?;
            info!(card_id, progress_removed, "deleted card");
            return Ok(DeleteOutcome::Deleted { progress_removed });
        }

        if !card.is_visible_to(user_id) {
            return Err(StoreError::AccessDenied(format!(
                "card {card_id} belongs to another user"
            )));
        }

        let key = ProgressKey::new(user_id, card_id);
        self.store
            .modify_progress(&key, &|current| {
                let mut row = current.cloned().unwrap_or_else(|| ProgressRow {
                    user_id,
                    deck_id,
                    card_id: card_id.to_string(),
                    progress: Progress::new(now),
                });
                row.progress.hidden = true;
                Some(row)
            })
            .await?;
        info!(card_id, "hid card for user");
        Ok(DeleteOutcome::Hidden)
    }

    // -----------------------------------------------------------------------
    // Cards and reviews
    // -----------------------------------------------------------------------

    /// Create or update a card authored by the user.
    #[instrument(skip(self, request), fields(card_id = %request.card_id))]
    pub async fn upsert_card(
        &self,
        user_id: UserId,
        request: &UpsertRequest,
        now: Timestamp,
    ) -> Result<UpsertResponse, StoreError> {
        let card_id = normalize_card_id(&request.card_id);
        let deck = match request.deck_id {
            Some(id) => self
                .store
                .get_deck(id)
                .await?
                .ok_or_else(|| StoreError::not_found("deck", id))?,
            None => self.resolver.canonical_deck(self.store(), user_id, now).await?,
        };
        if deck.scope == Scope::Private && deck.owner_id.is_some_and(|o| o != user_id) {
            return Err(StoreError::AccessDenied(format!(
                "deck {} belongs to another user",
                deck.id
            )));
        }
        if let Some(existing) = self.store.get_card(deck.id, &card_id).await? {
            if existing.scope == Scope::Private && existing.owner_id.is_some_and(|o| o != user_id) {
                return Err(StoreError::AccessDenied(format!(
                    "card {card_id} belongs to another user"
                )));
            }
        }

        let owner_id = (request.scope == Scope::Private).then_some(user_id);
        let (card, created) = self
            .store
            .put_card(CardDraft {
                deck_id: deck.id,
                card_id,
                scope: request.scope,
                owner_id,
                payload: request.payload.clone(),
                now,
            })
            .await?;

        if self.ensure_progress(user_id, card.deck_id, &card.card_id, now).await? {
            self.store
                .update_stats(user_id, &|s| s.record_card_created(now))
                .await?;
        }
        debug!(deck_id = card.deck_id, created, "upserted card");
        Ok(UpsertResponse {
            deck_id: card.deck_id,
            card_id: card.card_id,
            created,
            owner_id: card.owner_id,
        })
    }

    /// Create the initial progress for `(user, card)` if it has none. Returns `true` if created.
    pub async fn ensure_progress(
        &self,
        user_id: UserId,
        deck_id: DeckId,
        card_id: &str,
        now: Timestamp,
    ) -> Result<bool, StoreError> {
        let change = self
            .store
            .modify_progress(&ProgressKey::new(user_id, card_id), &|current| {
                current.is_none().then(|| ProgressRow {
                    user_id,
                    deck_id,
                    card_id: card_id.to_string(),
                    progress: Progress::new(now),
                })
            })
            .await?;
        Ok(change.created())
    }

    /// Apply one rating on the server.
    #[instrument(skip(self))]
    pub async fn review_card(
        &self,
        user_id: UserId,
        deck_id: DeckId,
        card_id: &str,
        rating: Rating,
        now: Timestamp,
    ) -> Result<Progress, StoreError> {
        let card = self
            .store
            .get_card(deck_id, card_id)
            .await?
            .ok_or_else(|| StoreError::not_found("card", format!("{deck_id}/{card_id}")))?;
        if !card.is_visible_to(user_id) {
            return Err(StoreError::AccessDenied(format!(
                "card {card_id} belongs to another user"
            )));
        }

        let schedule = self.schedule;
        let change = self
            .store
            .modify_progress(&ProgressKey::new(user_id, card_id), &|current| {
                let base = current.map_or_else(|| Progress::new(now), |r| r.progress);
                Some(ProgressRow {
                    user_id,
                    deck_id,
                    card_id: card_id.to_string(),
                    progress: rate(&base, rating, now, &schedule),
                })
            })
            .await?;
        let progress = change
            .after
            .map(|r| r.progress)
            .ok_or_else(|| StoreError::Conflict(format!("progress for {card_id} vanished")))?;

        self.store
            .update_stats(user_id, &|s| s.record_review(rating, now))
            .await?;
        debug!(step = progress.step, due = progress.due, "reviewed card");
        Ok(progress)
    }

    // -----------------------------------------------------------------------
    // Decks
    // -----------------------------------------------------------------------

    /// Decks visible to the user, sorted by title.
    pub async fn list_decks(&self, user_id: UserId) -> Result<Vec<Deck>, StoreError> {
        let mut decks: Vec<Deck> = self
            .store
            .list_decks()
            .await?
            .into_iter()
            .filter(|d| d.is_visible_to(user_id))
            .collect();
        decks.sort_by(|a, b| a.title.cmp(&b.title).then(a.id.cmp(&b.id)));
        Ok(decks)
    }

    /// Create a deck. Private decks are owned by their creator.
    #[instrument(skip(self))]
    pub async fn create_deck(
        &self,
        user_id: UserId,
        title: &str,
        scope: Scope,
        now: Timestamp,
    ) -> Result<Deck, StoreError> {
        let title = title.trim();
        if title.is_empty() {
            return Err(StoreError::Invalid("deck title must not be empty".into()));
        }
        self.store
            .insert_deck(NewDeck {
                title: title.to_string(),
                scope,
                owner_id: (scope == Scope::Private).then_some(user_id),
                created_by: user_id,
                created_at: now,
            })
            .await
    }

    /// Visible cards of one deck with the caller's progress, creating missing progress.
    pub async fn deck_cards(
        &self,
        user_id: UserId,
        deck_id: DeckId,
        now: Timestamp,
    ) -> Result<Vec<DeckCard>, StoreError> {
        let deck = self
            .store
            .get_deck(deck_id)
            .await?
            .ok_or_else(|| StoreError::not_found("deck", deck_id))?;
        if !deck.is_visible_to(user_id) {
            return Err(StoreError::AccessDenied(format!(
                "deck {deck_id} belongs to another user"
            )));
        }

        let mut out = Vec::new();
        for card in self.store.cards_in_deck(deck_id).await? {
            if !card.is_visible_to(user_id) {
                continue;
            }
            self.ensure_progress(user_id, deck_id, &card.card_id, now).await?;
            let progress = self
                .store
                .get_progress(&ProgressKey::new(user_id, card.card_id.clone()))
                .await?
                .map_or_else(|| Progress::new(now), |r| r.progress);
            out.push(DeckCard { card, progress });
        }
        Ok(out)
    }

    // -----------------------------------------------------------------------
    // Statistics and repair
    // -----------------------------------------------------------------------

    pub async fn stats(&self, user_id: UserId) -> Result<UserStats, StoreError> {
        self.store.stats(user_id).await
    }

    pub async fn dashboard(
        &self,
        user_id: UserId,
        now: Timestamp,
    ) -> Result<Dashboard, StoreError> {
        let stats = self.store.stats(user_id).await?;
        let rows = self.store.progress_for_user(user_id).await?;
        Ok(Dashboard::build(&stats, rows.iter().map(|r| &r.progress), now))
    }

    /// Stage distribution of one user's progress, keyed by step.
    pub async fn stage_counts(&self, user_id: UserId) -> Result<BTreeMap<u8, usize>, StoreError> {
        let mut counts = BTreeMap::new();
        for row in self.store.progress_for_user(user_id).await? {
            if !row.progress.hidden {
                *counts.entry(row.progress.step).or_default() += 1;
            }
        }
        Ok(counts)
    }

    /// Consolidate duplicate canonical decks. Safe to call on every startup.
    pub async fn repair(&self) -> Result<ConsolidationReport, StoreError> {
        let report = self.resolver.consolidate(self.store()).await?;
        if !report.is_noop() {
            info!(
                decks_removed = report.decks_removed,
                cards_moved = report.cards_moved,
                "repaired duplicate decks"
            );
        }
        Ok(report)
    }
}
