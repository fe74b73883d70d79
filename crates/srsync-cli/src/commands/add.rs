//! The `srsync add` command.

use anyhow::Result;
use serde_json::json;

use srsync_core::model::{DeckId, Scope};

use crate::commands::Env;

pub async fn execute(
    env: &Env,
    card: String,
    front: String,
    back: String,
    deck: Option<DeckId>,
    scope: Scope,
) -> Result<()> {
    anyhow::ensure!(!front.trim().is_empty(), "--front must not be empty");

    let mut session = env.session()?;
    let client = env.sync_client()?;
    let payload = json!({"front": front, "back": back});
    let response = client
        .upsert_card(&mut session, deck, &card, scope, payload)
        .await?;
    session.teardown()?;

    let verb = if response.created { "Added" } else { "Updated" };
    println!("{verb} card {} in deck {}", response.card_id, response.deck_id);
    Ok(())
}
