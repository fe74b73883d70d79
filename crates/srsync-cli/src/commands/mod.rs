pub mod add;
pub mod decks;
pub mod delete;
pub mod due;
pub mod init;
pub mod rate;
pub mod repair;
pub mod review;
pub mod stats;
pub mod sync;
pub mod validate;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};

use srsync_client::{HttpTransport, Session, SyncClient};
use srsync_core::clock::{Clock, FixedClock, SystemClock};
use srsync_core::config::{load_config_from, SrsyncConfig};
use srsync_core::model::{Timestamp, UserId};
use srsync_core::traits::SyncTransport;
use srsync_server::{ConsolidationReport, MemoryStore, ServiceTransport, SyncService};

use crate::GlobalOpts;

/// Config with the command-line overrides applied.
pub fn resolve_config(global: &GlobalOpts) -> Result<SrsyncConfig> {
    let mut config = load_config_from(global.config.as_deref())?;
    if let Some(store) = &global.store {
        config.server.store_path = store.clone();
    }
    if let Some(dir) = &global.data_dir {
        config.client.data_dir = dir.clone();
    }
    if let Some(profile) = &global.profile {
        config.client.profile = profile.clone();
    }
    config.validate()?;
    Ok(config)
}

/// Everything a command needs: the store, the service over it, and the caller.
pub struct Env {
    pub config: SrsyncConfig,
    pub user_id: UserId,
    store_path: PathBuf,
    store: Arc<MemoryStore>,
    pub service: Arc<SyncService>,
    /// What the startup repair pass changed.
    pub repaired: ConsolidationReport,
    clock: Arc<dyn Clock>,
}

impl Env {
    /// Load the store and run the startup repair pass.
    pub async fn open(global: &GlobalOpts) -> Result<Self> {
        let config = resolve_config(global)?;
        let store_path = config.server.store_path.clone();
        let store = Arc::new(MemoryStore::load(&store_path)?);
        let service = Arc::new(SyncService::from_config(store.clone(), &config));
        let repaired = service.repair().await.context("failed to repair decks")?;

        let clock: Arc<dyn Clock> = match global.now {
            Some(ts) => Arc::new(FixedClock::new(ts)),
            None => Arc::new(SystemClock),
        };
        Ok(Self {
            config,
            user_id: global.user,
            store_path,
            store,
            service,
            repaired,
            clock,
        })
    }

    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    pub fn session(&self) -> Result<Session> {
        Session::load(&self.config.client, self.config.schedule, Arc::clone(&self.clock))
    }

    /// HTTP when `client.base_url` is set, otherwise straight into the local store.
    pub fn sync_client(&self) -> Result<SyncClient> {
        let transport: Arc<dyn SyncTransport> = match &self.config.client.base_url {
            Some(_) => Arc::new(HttpTransport::from_config(&self.config.client)?),
            None => Arc::new(ServiceTransport::new(
                Arc::clone(&self.service),
                self.user_id,
                Arc::clone(&self.clock),
            )),
        };
        Ok(SyncClient::new(transport, self.config.server.due_limit))
    }

    pub fn save_store(&self) -> Result<()> {
        self.store.save(&self.store_path)
    }
}

/// Render a timestamp as UTC date and time.
pub fn format_ts(ts: Timestamp) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}

/// The `front` field of a card payload, or the payload itself.
pub fn front_of(payload: &serde_json::Value) -> String {
    match payload.get("front").and_then(|v| v.as_str()) {
        Some(front) => front.to_string(),
        None if payload.is_null() => String::new(),
        None => payload.to_string(),
    }
}
