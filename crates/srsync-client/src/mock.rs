//! Scriptable transport for testing sync behaviour without a server.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use srsync_core::error::TransportError;
use srsync_core::merge::{merge, MergeOutcome};
use srsync_core::model::{normalize_card_id, DeckId, Scope, UserId};
use srsync_core::traits::SyncTransport;
use srsync_core::wire::{
    DeleteOutcome, DueCard, ProgressMap, SaveRecord, SaveReport, SaveRequest, UpsertRequest,
    UpsertResponse,
};

const DEFAULT_DECK: DeckId = 1;
/// The user every mock call acts as.
const MOCK_USER: UserId = 1;

/// An in-memory stand-in for the sync server.
///
/// Saves are merged into a progress map with the same comparator the server
/// uses. Failures can be queued with [`MockTransport::fail_next`]; each call
/// consumes at most one.
pub struct MockTransport {
    progress: Mutex<ProgressMap>,
    due_cards: Mutex<Vec<DueCard>>,
    saved: Mutex<Vec<SaveRecord>>,
    failures: Mutex<VecDeque<TransportError>>,
    delete_outcome: Mutex<Option<DeleteOutcome>>,
    deny_writes: AtomicBool,
    call_count: AtomicU32,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            progress: Mutex::new(BTreeMap::new()),
            due_cards: Mutex::new(Vec::new()),
            saved: Mutex::new(Vec::new()),
            failures: Mutex::new(VecDeque::new()),
            delete_outcome: Mutex::new(None),
            deny_writes: AtomicBool::new(false),
            call_count: AtomicU32::new(0),
        }
    }

    /// Queue an error for the next call.
    pub fn fail_next(&self, error: TransportError) {
        lock(&self.failures).push_back(error);
    }

    /// Reject every write with `AccessDenied`.
    pub fn set_deny_writes(&self, deny: bool) {
        self.deny_writes.store(deny, Ordering::Relaxed);
    }

    pub fn set_due_cards(&self, cards: Vec<DueCard>) {
        *lock(&self.due_cards) = cards;
    }

    pub fn set_progress(&self, progress: ProgressMap) {
        *lock(&self.progress) = progress;
    }

    /// Override what `delete_card` reports. Defaults to a delete of one row.
    pub fn set_delete_outcome(&self, outcome: DeleteOutcome) {
        *lock(&self.delete_outcome) = Some(outcome);
    }

    /// Number of calls made, failed ones included.
    pub fn call_count(&self) -> u32 {
        self.call_count.load(Ordering::Relaxed)
    }

    /// Every record accepted by `save`, in arrival order.
    pub fn saved_records(&self) -> Vec<SaveRecord> {
        lock(&self.saved).clone()
    }

    pub fn progress(&self) -> ProgressMap {
        lock(&self.progress).clone()
    }

    fn enter(&self, write: bool) -> Result<(), TransportError> {
        self.call_count.fetch_add(1, Ordering::Relaxed);
        if let Some(err) = lock(&self.failures).pop_front() {
            return Err(err);
        }
        if write && self.deny_writes.load(Ordering::Relaxed) {
            return Err(TransportError::AccessDenied("writes disabled".into()));
        }
        Ok(())
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SyncTransport for MockTransport {
    fn name(&self) -> &str {
        "mock"
    }

    async fn fetch(&self) -> Result<ProgressMap, TransportError> {
        self.enter(false)?;
        Ok(self.progress())
    }

    async fn save(&self, request: &SaveRequest) -> Result<SaveReport, TransportError> {
        self.enter(true)?;
        let mut report = SaveReport::default();
        let mut progress = lock(&self.progress);
        for parsed in request.parse() {
            let Ok(record) = parsed else {
                report.skipped += 1;
                continue;
            };
            let slot = progress.entry(record.deck_id).or_default();
            let (winner, outcome) = merge(slot.get(&record.card_id), &record.progress);
            match outcome {
                MergeOutcome::Inserted => report.inserted += 1,
                MergeOutcome::Replaced => report.replaced += 1,
                MergeOutcome::KeptExisting => report.kept += 1,
            }
            slot.insert(record.card_id.clone(), winner);
            lock(&self.saved).push(record);
        }
        report.reviews = request.events.len();
        Ok(report)
    }

    async fn get_due_cards(&self, limit: usize) -> Result<Vec<DueCard>, TransportError> {
        self.enter(false)?;
        Ok(lock(&self.due_cards).iter().take(limit).cloned().collect())
    }

    async fn delete_card(
        &self,
        deck_id: DeckId,
        card_id: &str,
    ) -> Result<DeleteOutcome, TransportError> {
        self.enter(true)?;
        if let Some(outcome) = *lock(&self.delete_outcome) {
            return Ok(outcome);
        }
        let removed = lock(&self.progress)
            .get_mut(&deck_id)
            .and_then(|cards| cards.remove(card_id))
            .map_or(0, |_| 1);
        lock(&self.due_cards).retain(|c| !(c.deck_id == deck_id && c.card_id == card_id));
        Ok(DeleteOutcome::Deleted {
            progress_removed: removed,
        })
    }

    async fn upsert_card(&self, request: &UpsertRequest) -> Result<UpsertResponse, TransportError> {
        self.enter(true)?;
        let deck_id = request.deck_id.unwrap_or(DEFAULT_DECK);
        let card_id = normalize_card_id(&request.card_id);
        let created = !lock(&self.progress)
            .get(&deck_id)
            .is_some_and(|cards| cards.contains_key(&card_id));
        Ok(UpsertResponse {
            deck_id,
            card_id,
            created,
            owner_id: (request.scope == Scope::Private).then_some(MOCK_USER),
        })
    }
}
