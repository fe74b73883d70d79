//! Push/pull synchronization between a [`Session`] and a [`SyncTransport`].
//!
//! The session's cache is authoritative for the UI. A push that fails
//! transiently leaves the snapshots in the outbox for the next cycle; an
//! access failure is returned to the caller.

use std::sync::Arc;

use tracing::{info, instrument, warn};

use srsync_core::error::TransportError;
use srsync_core::model::{normalize_card_id, DeckId, Scope};
use srsync_core::traits::SyncTransport;
use srsync_core::wire::{
    progress_count, DeleteOutcome, SaveReport, SaveRequest, UpsertRequest, UpsertResponse,
};

use crate::session::Session;
use crate::state::CardEntry;

/// Outcome of a push.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncStatus {
    /// Nothing was waiting.
    UpToDate,
    Pushed(SaveReport),
    /// The server could not be reached; the records stay queued.
    Pending { records: usize, reason: String },
}

impl SyncStatus {
    pub fn is_pending(&self) -> bool {
        matches!(self, SyncStatus::Pending { .. })
    }
}

/// What a pull changed locally.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PullReport {
    /// Local entries taken from the server.
    pub adopted: usize,
    /// Local entries ahead of the server, queued for the next push.
    pub kept_local: usize,
    /// Cards new to the registry.
    pub new_cards: usize,
    /// Decks activated because they gained cards.
    pub activated: usize,
    /// Registry cards given initial progress.
    pub initialized: usize,
    /// Queue length after the rebuild.
    pub queued: usize,
}

pub struct SyncClient {
    transport: Arc<dyn SyncTransport>,
    due_limit: usize,
}

impl SyncClient {
    pub fn new(transport: Arc<dyn SyncTransport>, due_limit: usize) -> Self {
        Self { transport, due_limit }
    }

    pub fn transport_name(&self) -> &str {
        self.transport.name()
    }

    /// Send the outbox. Transient failures become [`SyncStatus::Pending`].
    #[instrument(
        skip(self, session),
        fields(transport = self.transport.name(), profile = session.profile())
    )]
    pub async fn push(&self, session: &mut Session) -> Result<SyncStatus, TransportError> {
        let records = session.pending_records();
        let reviews = session.pending_reviews();
        if records.is_empty() && reviews.is_empty() {
            return Ok(SyncStatus::UpToDate);
        }

        let reviews_sent = reviews.len();
        let request = SaveRequest::from_records(&records).with_events(reviews);
        match self.transport.save(&request).await {
            Ok(report) => {
                let cleared = session.acknowledge(&records, reviews_sent);
                if report.skipped > 0 {
                    warn!(skipped = report.skipped, "server skipped records");
                }
                info!(sent = records.len(), cleared, replaced = report.replaced, "pushed progress");
                Ok(SyncStatus::Pushed(report))
            }
            Err(e) if e.is_transient() => {
                warn!(error = %e, records = records.len(), "push failed, will retry");
                Ok(SyncStatus::Pending {
                    records: records.len(),
                    reason: e.to_string(),
                })
            }
            Err(e) => Err(e),
        }
    }

    /// Fetch the progress map and due cards and fold them into the session.
    #[instrument(
        skip(self, session),
        fields(transport = self.transport.name(), profile = session.profile())
    )]
    pub async fn pull(&self, session: &mut Session) -> Result<PullReport, TransportError> {
        let progress = self.transport.fetch().await?;
        let due = self.transport.get_due_cards(self.due_limit).await?;
        let report = session.apply_pull(&progress, &due);
        info!(
            records = progress_count(&progress),
            due = due.len(),
            adopted = report.adopted,
            kept_local = report.kept_local,
            queued = report.queued,
            "pulled progress"
        );
        Ok(report)
    }

    /// Push, then pull. A transient failure on either leg is reported, not raised.
    pub async fn sync(
        &self,
        session: &mut Session,
    ) -> Result<(SyncStatus, Option<PullReport>), TransportError> {
        let status = self.push(session).await?;
        if status.is_pending() {
            return Ok((status, None));
        }
        match self.pull(session).await {
            Ok(report) => Ok((status, Some(report))),
            Err(e) if e.is_transient() => {
                warn!(error = %e, "pull failed, keeping local cache");
                Ok((status, None))
            }
            Err(e) => Err(e),
        }
    }

    /// Create or update a card on the server, then mirror it locally.
    ///
    /// Access failures are returned as errors and nothing is mirrored.
    pub async fn upsert_card(
        &self,
        session: &mut Session,
        deck_id: Option<DeckId>,
        card_id: &str,
        scope: Scope,
        payload: serde_json::Value,
    ) -> Result<UpsertResponse, TransportError> {
        let request = UpsertRequest {
            deck_id,
            card_id: normalize_card_id(card_id),
            scope,
            payload: payload.clone(),
        };
        let response = self.transport.upsert_card(&request).await?;
        session.add_card(
            response.deck_id,
            CardEntry::new(response.card_id.clone(), scope, response.owner_id, payload),
        );
        Ok(response)
    }

    /// Delete on the server, then mirror the outcome locally.
    pub async fn delete_card(
        &self,
        session: &mut Session,
        deck_id: DeckId,
        card_id: &str,
    ) -> Result<DeleteOutcome, TransportError> {
        let outcome = self.transport.delete_card(deck_id, card_id).await?;
        match outcome {
            DeleteOutcome::Deleted { .. } => {
                session.delete_card(deck_id, card_id);
            }
            DeleteOutcome::Hidden => session.hide_card(deck_id, card_id),
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockTransport;
    use srsync_core::clock::FixedClock;
    use srsync_core::config::ClientConfig;
    use srsync_core::model::{Progress, Rating};
    use srsync_core::schedule::ScheduleConfig;
    use srsync_core::wire::DueCard;
    use tempfile::TempDir;

    fn session(dir: &TempDir) -> Session {
        let config = ClientConfig {
            data_dir: dir.path().to_path_buf(),
            ..ClientConfig::default()
        };
        Session::load(
            &config,
            ScheduleConfig::normalized(),
            Arc::new(FixedClock::new(1000)),
        )
        .unwrap()
    }

    fn due_card(deck_id: DeckId, card_id: &str) -> DueCard {
        DueCard {
            deck_id,
            card_id: card_id.into(),
            scope: Scope::Shared,
            owner_id: None,
            payload: serde_json::json!({"front": card_id}),
            progress: Progress::new(0),
            seq: 0,
        }
    }

    #[tokio::test]
    async fn empty_outbox_is_up_to_date() {
        let dir = TempDir::new().unwrap();
        let mut s = session(&dir);
        let mock = Arc::new(MockTransport::new());
        let client = SyncClient::new(mock.clone(), 100);
        assert_eq!(client.push(&mut s).await.unwrap(), SyncStatus::UpToDate);
        assert_eq!(mock.call_count(), 0);
    }

    #[tokio::test]
    async fn push_clears_outbox() {
        let dir = TempDir::new().unwrap();
        let mut s = session(&dir);
        s.rate_card(1, "a", Rating::Easy);
        let mock = Arc::new(MockTransport::new());
        let client = SyncClient::new(mock.clone(), 100);

        let status = client.push(&mut s).await.unwrap();
        assert!(matches!(status, SyncStatus::Pushed(r) if r.inserted == 1 && r.reviews == 1));
        assert!(s.pending_records().is_empty());
        assert!(s.pending_reviews().is_empty());
        assert_eq!(mock.saved_records().len(), 1);
    }

    #[tokio::test]
    async fn transient_failure_keeps_outbox() {
        let dir = TempDir::new().unwrap();
        let mut s = session(&dir);
        s.rate_card(1, "a", Rating::Easy);
        let mock = Arc::new(MockTransport::new());
        mock.fail_next(TransportError::Timeout(30));
        let client = SyncClient::new(mock.clone(), 100);

        let status = client.push(&mut s).await.unwrap();
        assert!(matches!(status, SyncStatus::Pending { records: 1, .. }));
        assert_eq!(s.pending_records().len(), 1);

        assert!(matches!(client.push(&mut s).await.unwrap(), SyncStatus::Pushed(_)));
        assert!(s.pending_records().is_empty());
    }

    #[tokio::test]
    async fn access_denied_is_a_hard_error() {
        let dir = TempDir::new().unwrap();
        let mut s = session(&dir);
        s.rate_card(1, "a", Rating::Easy);
        let mock = Arc::new(MockTransport::new());
        mock.set_deny_writes(true);
        let client = SyncClient::new(mock, 100);

        let err = client.push(&mut s).await.unwrap_err();
        assert!(matches!(err, TransportError::AccessDenied(_)));
        assert_eq!(s.pending_records().len(), 1);

        let err = client
            .upsert_card(&mut s, None, "new", Scope::Private, serde_json::Value::Null)
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::AccessDenied(_)));
        assert_eq!(s.registry().card_count(), 0);
    }

    #[tokio::test]
    async fn sync_skips_pull_while_offline() {
        let dir = TempDir::new().unwrap();
        let mut s = session(&dir);
        s.rate_card(1, "a", Rating::Easy);
        let mock = Arc::new(MockTransport::new());
        mock.fail_next(TransportError::Network("down".into()));
        let client = SyncClient::new(mock.clone(), 100);

        let (status, pulled) = client.sync(&mut s).await.unwrap();
        assert!(status.is_pending());
        assert!(pulled.is_none());
        assert_eq!(mock.call_count(), 1);
    }

    #[tokio::test]
    async fn pull_fills_registry_and_queue() {
        let dir = TempDir::new().unwrap();
        let mut s = session(&dir);
        let mock = Arc::new(MockTransport::new());
        mock.set_due_cards(vec![due_card(3, "hund"), due_card(3, "katt")]);
        let client = SyncClient::new(mock, 100);

        let report = client.pull(&mut s).await.unwrap();
        assert_eq!(report.new_cards, 2);
        assert_eq!(report.activated, 1);
        assert_eq!(report.initialized, 2);
        assert_eq!(report.queued, 2);
        assert_eq!(s.current().unwrap().card_id, "hund");
    }

    #[tokio::test]
    async fn pull_respects_due_limit() {
        let dir = TempDir::new().unwrap();
        let mut s = session(&dir);
        let mock = Arc::new(MockTransport::new());
        mock.set_due_cards(vec![due_card(1, "a"), due_card(1, "b"), due_card(1, "c")]);
        let client = SyncClient::new(mock, 2);
        assert_eq!(client.pull(&mut s).await.unwrap().new_cards, 2);
    }

    #[tokio::test]
    async fn delete_outcomes_are_mirrored() {
        let dir = TempDir::new().unwrap();
        let mut s = session(&dir);
        let mock = Arc::new(MockTransport::new());
        let client = SyncClient::new(mock.clone(), 100);

        let created = client
            .upsert_card(
                &mut s,
                Some(5),
                " my word ",
                Scope::Private,
                serde_json::json!({"front": "w"}),
            )
            .await
            .unwrap();
        assert_eq!(created.card_id, "my-word");
        assert_eq!(s.registry().card(5, "my-word").unwrap().owner_id, Some(1));

        client.delete_card(&mut s, 5, "my-word").await.unwrap();
        assert!(s.registry().card(5, "my-word").is_none());

        s.add_card(
            6,
            CardEntry::new("shared", Scope::Shared, None, serde_json::Value::Null),
        );
        mock.set_delete_outcome(DeleteOutcome::Hidden);
        client.delete_card(&mut s, 6, "shared").await.unwrap();
        assert!(s.state().is_hidden(6, "shared"));
        assert!(s.registry().card(6, "shared").is_some());
    }
}
