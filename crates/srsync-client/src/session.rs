//! The review session of one client profile.
//!
//! A session has an explicit lifecycle: [`Session::load`] reads the local
//! blobs and builds the queue, rating and card edits mutate the cached state
//! synchronously, [`Session::persist`] writes the blobs back, and
//! [`Session::teardown`] persists and drops the in-memory queue. Nothing
//! here touches the network; see [`crate::sync::SyncClient`].

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, info};

use srsync_core::clock::Clock;
use srsync_core::config::ClientConfig;
use srsync_core::model::{DeckId, Progress, Rating, ReviewEvent, Timestamp};
use srsync_core::queue::{build_queue, QueueCandidate, QueueItem, QueueStatus, ReviewQueue};
use srsync_core::review::{preview_intervals, rate, IntervalPreview};
use srsync_core::schedule::ScheduleConfig;
use srsync_core::wire::{DueCard, ProgressMap, SaveRecord};

use crate::state::{CardEntry, LocalState, Registry};
use crate::storage::{registry_key, state_key, LocalStorage};
use crate::sync::PullReport;

pub struct Session {
    storage: LocalStorage,
    profile: String,
    schedule: ScheduleConfig,
    clock: Arc<dyn Clock>,
    state: LocalState,
    registry: Registry,
    queue: ReviewQueue,
    cache_wiped: bool,
}

impl Session {
    /// Open the profile's blobs under `config.data_dir` and build the queue.
    pub fn load(
        config: &ClientConfig,
        schedule: ScheduleConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let (storage, cache_wiped) = LocalStorage::open(&config.data_dir, &config.cache_version)
            .context("failed to open local storage")?;
        let state: LocalState = storage
            .get(&state_key(&config.profile))?
            .unwrap_or_default();
        let registry: Registry = storage
            .get(&registry_key(&config.profile))?
            .unwrap_or_default();

        let mut session = Self {
            storage,
            profile: config.profile.clone(),
            schedule,
            clock,
            state,
            registry,
            queue: ReviewQueue::new(),
            cache_wiped,
        };
        let status = session.rebuild_queue();
        info!(
            profile = %session.profile,
            cards = session.registry.card_count(),
            pending = session.state.pending.len(),
            ?status,
            "session loaded"
        );
        Ok(session)
    }

    pub fn profile(&self) -> &str {
        &self.profile
    }

    pub fn state(&self) -> &LocalState {
        &self.state
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn queue(&self) -> &ReviewQueue {
        &self.queue
    }

    pub fn schedule(&self) -> &ScheduleConfig {
        &self.schedule
    }

    /// Whether opening the storage wiped a cache written by another version.
    pub fn cache_wiped(&self) -> bool {
        self.cache_wiped
    }

    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    // -----------------------------------------------------------------------
    // Queue
    // -----------------------------------------------------------------------

    /// Registry cards in insertion order, with their cached progress.
    fn candidates(&self) -> Vec<QueueCandidate> {
        self.registry
            .cards_in_order()
            .into_iter()
            .map(|(deck_id, card)| QueueCandidate {
                deck_id,
                card_id: card.card_id.clone(),
                progress: self.state.progress(deck_id, &card.card_id).copied(),
                hidden: self.state.is_hidden(deck_id, &card.card_id),
            })
            .collect()
    }

    /// Rebuild the queue from the registry and the progress cache.
    pub fn rebuild_queue(&mut self) -> QueueStatus {
        let items = build_queue(&self.state.active_decks(), &self.candidates(), self.clock.now());
        self.queue.load(items);
        self.queue.status()
    }

    pub fn queue_status(&self) -> QueueStatus {
        self.queue.status()
    }

    pub fn current(&self) -> Option<&QueueItem> {
        self.queue.current()
    }

    /// Content of the card at the head of the queue.
    pub fn current_card(&self) -> Option<&CardEntry> {
        let item = self.queue.current()?;
        self.registry.card(item.deck_id, &item.card_id)
    }

    pub fn preview(&self, deck_id: DeckId, card_id: &str) -> IntervalPreview {
        let progress = self.progress_or_new(deck_id, card_id);
        preview_intervals(&progress, self.clock.now(), &self.schedule)
    }

    // -----------------------------------------------------------------------
    // Mutations
    // -----------------------------------------------------------------------

    fn progress_or_new(&self, deck_id: DeckId, card_id: &str) -> Progress {
        self.state
            .progress(deck_id, card_id)
            .copied()
            .or_else(|| self.state.best_progress(card_id))
            .unwrap_or_else(|| Progress::new(self.clock.now()))
    }

    /// Rate the card at the head of the queue. `None` if the queue is empty.
    pub fn rate_current(&mut self, rating: Rating) -> Option<Progress> {
        let item = self.queue.current()?.clone();
        Some(self.rate_card(item.deck_id, &item.card_id, rating))
    }

    /// Apply a rating locally and queue the snapshot for the next push.
    pub fn rate_card(&mut self, deck_id: DeckId, card_id: &str, rating: Rating) -> Progress {
        let now = self.clock.now();
        let before = self.progress_or_new(deck_id, card_id);
        let after = rate(&before, rating, now, &self.schedule);
        debug!(
            deck_id,
            card_id,
            %rating,
            from = before.step,
            to = after.step,
            due = after.due,
            "rated"
        );

        self.state.set_progress(deck_id, card_id, after);
        self.state.queue_save(deck_id, card_id, after);
        self.state.log_review(deck_id, card_id, rating, now);
        self.queue.after_rating(card_id, rating, after);
        after
    }

    /// Mirror a card locally, activate its deck and give it initial progress.
    pub fn add_card(&mut self, deck_id: DeckId, entry: CardEntry) -> QueueStatus {
        let card_id = entry.card_id.clone();
        self.registry.upsert_card(deck_id, entry);
        if self.state.progress(deck_id, &card_id).is_none() {
            let progress = self.progress_or_new(deck_id, &card_id);
            self.state.set_progress(deck_id, &card_id, progress);
        }
        self.state.activate(deck_id);
        self.rebuild_queue()
    }

    /// Drop every local trace of a card in one deck and rebuild the queue.
    pub fn delete_card(&mut self, deck_id: DeckId, card_id: &str) -> QueueStatus {
        self.registry.remove_card(deck_id, card_id);
        self.state.forget(deck_id, card_id);
        self.queue.remove_card(card_id);
        self.rebuild_queue()
    }

    /// Hide a card for this profile without deleting it.
    pub fn hide_card(&mut self, deck_id: DeckId, card_id: &str) {
        self.state.hide(deck_id, card_id);
        self.queue.remove_card(card_id);
    }

    pub fn activate_deck(&mut self, deck_id: DeckId) -> QueueStatus {
        self.state.activate(deck_id);
        self.rebuild_queue()
    }

    pub fn deactivate_deck(&mut self, deck_id: DeckId) -> QueueStatus {
        self.state.deactivate(deck_id);
        self.rebuild_queue()
    }

    // -----------------------------------------------------------------------
    // Sync hooks
    // -----------------------------------------------------------------------

    /// Snapshots waiting to be pushed, in card id order.
    pub fn pending_records(&self) -> Vec<SaveRecord> {
        self.state.pending.values().cloned().collect()
    }

    /// Review events waiting to be reported, oldest first.
    pub fn pending_reviews(&self) -> Vec<ReviewEvent> {
        self.state.reviews.clone()
    }

    /// Clear the outbox entries and review events the server accepted.
    pub fn acknowledge(&mut self, sent: &[SaveRecord], reviews_sent: usize) -> usize {
        self.state.acknowledge_reviews(reviews_sent);
        self.state.acknowledge(sent)
    }

    /// Fold a pull into the local state and rebuild the queue.
    pub fn apply_pull(&mut self, progress: &ProgressMap, due: &[DueCard]) -> PullReport {
        let overlay = self.state.overlay(progress);
        let new_cards = self.registry.merge_due_cards(due);

        let mut activated = 0;
        let non_empty: Vec<DeckId> = self.registry.non_empty_decks().collect();
        for deck_id in non_empty {
            if self.state.activate(deck_id) {
                activated += 1;
            }
        }
        let initialized = self.state.ensure_progress(&self.registry, self.clock.now());

        let queued = match self.rebuild_queue() {
            QueueStatus::Ready(n) => n,
            QueueStatus::Empty | QueueStatus::NotLoaded => 0,
        };
        PullReport {
            adopted: overlay.adopted,
            kept_local: overlay.kept_local,
            new_cards,
            activated,
            initialized,
            queued,
        }
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Write both blobs.
    pub fn persist(&self) -> Result<()> {
        self.storage
            .put(&state_key(&self.profile), &self.state)
            .context("failed to persist state")?;
        self.storage
            .put(&registry_key(&self.profile), &self.registry)
            .context("failed to persist registry")?;
        debug!(profile = %self.profile, "session persisted");
        Ok(())
    }

    /// Persist and release the session.
    pub fn teardown(mut self) -> Result<()> {
        self.persist()?;
        self.queue.reset();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use srsync_core::clock::FixedClock;
    use srsync_core::model::Scope;
    use tempfile::TempDir;

    fn config(dir: &TempDir) -> ClientConfig {
        ClientConfig {
            data_dir: dir.path().to_path_buf(),
            ..ClientConfig::default()
        }
    }

    fn entry(card_id: &str) -> CardEntry {
        CardEntry::new(card_id, Scope::Private, Some(1), serde_json::json!({"front": card_id}))
    }

    fn session(dir: &TempDir, clock: Arc<FixedClock>) -> Session {
        Session::load(&config(dir), ScheduleConfig::normalized(), clock).unwrap()
    }

    #[test]
    fn fresh_profile_has_empty_queue() {
        let dir = TempDir::new().unwrap();
        let s = session(&dir, Arc::new(FixedClock::new(1000)));
        assert_eq!(s.queue_status(), QueueStatus::Empty);
        assert!(s.cache_wiped());
        assert!(s.current().is_none());
    }

    #[test]
    fn added_cards_are_due_in_insertion_order() {
        let dir = TempDir::new().unwrap();
        let mut s = session(&dir, Arc::new(FixedClock::new(1000)));
        s.add_card(1, entry("b"));
        let status = s.add_card(1, entry("a"));
        assert_eq!(status, QueueStatus::Ready(2));
        assert_eq!(s.current().unwrap().card_id, "b");
        assert_eq!(s.current_card().unwrap().payload["front"], "b");
    }

    #[test]
    fn easy_then_normal_scenario() {
        let dir = TempDir::new().unwrap();
        let clock = Arc::new(FixedClock::new(1000));
        let mut s = session(&dir, Arc::clone(&clock));
        s.add_card(1, entry("x"));

        let first = s.rate_current(Rating::Easy).unwrap();
        assert_eq!((first.step, first.due), (1, 1001));
        assert_eq!(s.queue_status(), QueueStatus::Empty);

        clock.set(2000);
        s.rebuild_queue();
        let second = s.rate_current(Rating::Normal).unwrap();
        assert_eq!((second.step, second.due), (2, 2001));
        assert_eq!(s.pending_records()[0].progress, second);
        let ratings: Vec<Rating> = s.pending_reviews().iter().map(|e| e.rating).collect();
        assert_eq!(ratings, vec![Rating::Easy, Rating::Normal]);
    }

    #[test]
    fn ties_keep_insertion_order_across_decks() {
        let dir = TempDir::new().unwrap();
        let clock = Arc::new(FixedClock::new(300));
        let mut s = session(&dir, Arc::clone(&clock));
        s.add_card(2, entry("first"));
        s.add_card(1, entry("second"));
        let order: Vec<_> = s.queue().iter().map(|i| i.card_id.as_str()).collect();
        assert_eq!(order, vec!["first", "second"]);

        s.teardown().unwrap();
        let s = session(&dir, clock);
        let order: Vec<_> = s.queue().iter().map(|i| i.card_id.as_str()).collect();
        assert_eq!(order, vec!["first", "second"]);
    }

    #[test]
    fn hard_cycles_card_to_the_back() {
        let dir = TempDir::new().unwrap();
        let mut s = session(&dir, Arc::new(FixedClock::new(50)));
        s.add_card(1, entry("a"));
        s.add_card(1, entry("b"));
        let after = s.rate_current(Rating::Hard).unwrap();
        assert_eq!(after.step, 0);
        assert!(after.due > 50);
        let order: Vec<_> = s.queue().iter().map(|i| i.card_id.as_str()).collect();
        assert_eq!(order, vec!["b", "a"]);
    }

    #[test]
    fn rating_fans_out_to_every_deck_copy() {
        let dir = TempDir::new().unwrap();
        let mut s = session(&dir, Arc::new(FixedClock::new(10)));
        s.add_card(1, entry("shared-word"));
        s.add_card(2, entry("shared-word"));
        assert_eq!(s.queue().len(), 1);

        s.rate_card(2, "shared-word", Rating::Easy);
        assert_eq!(s.state().progress(1, "shared-word").unwrap().step, 1);
        assert_eq!(s.pending_records().len(), 1);
    }

    #[test]
    fn delete_and_hide_drop_cards_from_queue() {
        let dir = TempDir::new().unwrap();
        let mut s = session(&dir, Arc::new(FixedClock::new(10)));
        s.add_card(1, entry("a"));
        s.add_card(1, entry("b"));
        s.rate_card(1, "a", Rating::Hard);

        assert_eq!(s.delete_card(1, "a"), QueueStatus::Ready(1));
        assert!(s.registry().card(1, "a").is_none());
        assert!(s.pending_records().is_empty());

        s.hide_card(1, "b");
        assert!(s.state().progress(1, "b").unwrap().hidden);
        assert_eq!(s.rebuild_queue(), QueueStatus::Empty);
    }

    #[test]
    fn persist_and_reload() {
        let dir = TempDir::new().unwrap();
        let clock = Arc::new(FixedClock::new(10));
        let mut s = session(&dir, Arc::clone(&clock));
        s.add_card(4, entry("a"));
        s.rate_card(4, "a", Rating::Easy);
        s.teardown().unwrap();

        clock.set(1_000_000);
        let s = session(&dir, clock);
        assert!(!s.cache_wiped());
        assert_eq!(s.state().progress(4, "a").unwrap().step, 1);
        assert_eq!(s.pending_records().len(), 1);
        assert_eq!(s.queue_status(), QueueStatus::Ready(1));
    }

    #[test]
    fn version_bump_discards_local_state() {
        let dir = TempDir::new().unwrap();
        let mut s = session(&dir, Arc::new(FixedClock::new(10)));
        s.add_card(4, entry("a"));
        s.persist().unwrap();

        let bumped = ClientConfig {
            cache_version: "7".into(),
            ..config(&dir)
        };
        let s = Session::load(&bumped, ScheduleConfig::normalized(), Arc::new(FixedClock::new(10)))
            .unwrap();
        assert!(s.cache_wiped());
        assert_eq!(s.registry().card_count(), 0);
    }

    #[test]
    fn profiles_are_isolated() {
        let dir = TempDir::new().unwrap();
        let mut anna = session(&dir, Arc::new(FixedClock::new(10)));
        anna.add_card(1, entry("a"));
        anna.persist().unwrap();

        let bo = ClientConfig {
            profile: "bo".into(),
            ..config(&dir)
        };
        let bo = Session::load(&bo, ScheduleConfig::normalized(), Arc::new(FixedClock::new(10)))
            .unwrap();
        assert_eq!(bo.registry().card_count(), 0);
    }

    #[test]
    fn pull_activates_decks_and_initializes_progress() {
        let dir = TempDir::new().unwrap();
        let mut s = session(&dir, Arc::new(FixedClock::new(100)));
        let due = vec![DueCard {
            deck_id: 9,
            card_id: "hund".into(),
            scope: Scope::Shared,
            owner_id: None,
            payload: serde_json::json!({"front": "hund"}),
            progress: Progress::new(5),
            seq: 0,
        }];
        let mut map = ProgressMap::new();
        map.entry(9).or_default().insert("hund".into(), Progress::new(5));

        let report = s.apply_pull(&map, &due);
        assert_eq!(report.new_cards, 1);
        assert_eq!(report.activated, 1);
        assert_eq!(report.initialized, 0);
        assert_eq!(report.queued, 1);
        assert_eq!(s.state().progress(9, "hund").unwrap().added_at, 5);
    }

    #[test]
    fn preview_matches_rating() {
        let dir = TempDir::new().unwrap();
        let mut s = session(&dir, Arc::new(FixedClock::new(1000)));
        s.add_card(1, entry("a"));
        let preview = s.preview(1, "a");
        let rated = s.rate_card(1, "a", Rating::Easy);
        assert_eq!(preview.easy, rated.due);
    }
}
