//! In-process `SyncTransport` that calls a `SyncService` directly.
//!
//! Used by the CLI (which owns the store) and by tests that run several
//! clients against one server. `set_offline` simulates a network outage.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::instrument;

use srsync_core::clock::Clock;
use srsync_core::error::TransportError;
use srsync_core::model::{DeckId, UserId};
use srsync_core::traits::SyncTransport;
use srsync_core::wire::{
    DeleteOutcome, DueCard, ProgressMap, SaveReport, SaveRequest, UpsertRequest, UpsertResponse,
};

use crate::service::SyncService;

pub struct ServiceTransport {
    service: Arc<SyncService>,
    user_id: UserId,
    clock: Arc<dyn Clock>,
    offline: AtomicBool,
}

impl ServiceTransport {
    pub fn new(service: Arc<SyncService>, user_id: UserId, clock: Arc<dyn Clock>) -> Self {
        Self {
            service,
            user_id,
            clock,
            offline: AtomicBool::new(false),
        }
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    /// While offline every call fails with a network error.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn check_online(&self) -> Result<(), TransportError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(TransportError::Network("server unreachable".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl SyncTransport for ServiceTransport {
    fn name(&self) -> &str {
        "local"
    }

    #[instrument(skip(self), fields(user_id = self.user_id))]
    async fn fetch(&self) -> Result<ProgressMap, TransportError> {
        self.check_online()?;
        Ok(self.service.fetch(self.user_id).await?)
    }

    #[instrument(
        skip(self, request),
        fields(user_id = self.user_id, records = request.records.len())
    )]
    async fn save(&self, request: &SaveRequest) -> Result<SaveReport, TransportError> {
        self.check_online()?;
        Ok(self.service.save(self.user_id, request).await?)
    }

    #[instrument(skip(self), fields(user_id = self.user_id))]
    async fn get_due_cards(&self, limit: usize) -> Result<Vec<DueCard>, TransportError> {
        self.check_online()?;
        Ok(self
            .service
            .get_due_cards(self.user_id, self.clock.now(), Some(limit))
            .await?)
    }

    #[instrument(skip(self), fields(user_id = self.user_id))]
    async fn delete_card(
        &self,
        deck_id: DeckId,
        card_id: &str,
    ) -> Result<DeleteOutcome, TransportError> {
        self.check_online()?;
        Ok(self
            .service
            .delete_card(self.user_id, deck_id, card_id, self.clock.now())
            .await?)
    }

    #[instrument(skip(self, request), fields(user_id = self.user_id))]
    async fn upsert_card(&self, request: &UpsertRequest) -> Result<UpsertResponse, TransportError> {
        self.check_online()?;
        Ok(self
            .service
            .upsert_card(self.user_id, request, self.clock.now())
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use srsync_core::clock::FixedClock;
    use srsync_core::model::Scope;
    use srsync_core::schedule::ScheduleConfig;

    fn transport(user_id: UserId) -> ServiceTransport {
        let service = Arc::new(SyncService::new(
            Arc::new(MemoryStore::new()),
            ScheduleConfig::normalized(),
        ));
        ServiceTransport::new(service, user_id, Arc::new(FixedClock::new(500)))
    }

    #[tokio::test]
    async fn round_trip_through_service() {
        let t = transport(3);
        let created = t
            .upsert_card(&UpsertRequest {
                card_id: "katt".into(),
                scope: Scope::Private,
                ..UpsertRequest::default()
            })
            .await
            .unwrap();
        assert!(created.created);

        let map = t.fetch().await.unwrap();
        assert_eq!(map[&created.deck_id]["katt"].due, 500);

        let due = t.get_due_cards(10).await.unwrap();
        assert_eq!(due.len(), 1);

        let outcome = t.delete_card(created.deck_id, "katt").await.unwrap();
        assert!(matches!(outcome, DeleteOutcome::Deleted { .. }));
    }

    #[tokio::test]
    async fn offline_fails_transiently() {
        let t = transport(3);
        t.set_offline(true);
        let err = t.fetch().await.unwrap_err();
        assert!(err.is_transient());
        t.set_offline(false);
        assert!(t.fetch().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn access_errors_are_not_transient() {
        let t = transport(3);
        let other = ServiceTransport::new(Arc::clone(&t.service), 4, Arc::new(FixedClock::new(0)));
        let card = t
            .upsert_card(&UpsertRequest {
                card_id: "mine".into(),
                ..UpsertRequest::default()
            })
            .await
            .unwrap();
        let err = other.delete_card(card.deck_id, "mine").await.unwrap_err();
        assert!(matches!(err, TransportError::AccessDenied(_)));
        assert!(!err.is_transient());
    }
}
