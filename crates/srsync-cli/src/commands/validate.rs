//! The `srsync validate` command.

use anyhow::{Context, Result};

use srsync_server::MemoryStore;

use crate::commands::resolve_config;
use crate::GlobalOpts;

pub fn execute(global: &GlobalOpts) -> Result<()> {
    let config = resolve_config(global)?;
    println!(
        "Schedule: unit {}s, ceiling {} units, hard {} unit(s)",
        config.schedule.unit_secs, config.schedule.ceiling_units, config.schedule.hard_units
    );
    println!("Profile: {} ({})", config.client.profile, config.client.data_dir.display());

    let path = &config.server.store_path;
    if path.exists() {
        let store = MemoryStore::load(path)
            .with_context(|| format!("store snapshot is invalid: {}", path.display()))?;
        let snapshot = store.snapshot()?;
        println!(
            "Store: {} ({} decks, {} cards, {} progress rows)",
            path.display(),
            snapshot.decks.len(),
            snapshot.cards.len(),
            snapshot.progress.len()
        );
    } else {
        println!("Store: {} (not created yet)", path.display());
    }

    println!("Configuration valid.");
    Ok(())
}
