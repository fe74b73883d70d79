//! The `srsync rate` command.

use anyhow::Result;

use srsync_client::SyncStatus;
use srsync_core::model::{DeckId, Rating};

use crate::commands::{format_ts, Env};

pub async fn execute(env: &Env, rating: Rating, target: Option<(DeckId, String)>) -> Result<()> {
    let mut session = env.session()?;
    let (deck_id, card_id) = match target {
        Some((deck_id, card_id)) => {
            anyhow::ensure!(
                session.registry().card(deck_id, &card_id).is_some(),
                "card {card_id} not found in deck {deck_id}; run `srsync due` to refresh"
            );
            (deck_id, card_id)
        }
        None => match session.current() {
            Some(item) => (item.deck_id, item.card_id.clone()),
            None => {
                println!("Nothing due.");
                return Ok(());
            }
        },
    };

    let progress = session.rate_card(deck_id, &card_id, rating);
    println!(
        "Rated {card_id} {rating}: step {}, next due {}",
        progress.step,
        format_ts(progress.due)
    );
    // The rating is kept locally even if the push below is refused.
    session.persist()?;

    let client = env.sync_client()?;
    let pushed = client.push(&mut session).await;
    session.teardown()?;
    if let SyncStatus::Pending { reason, .. } = pushed? {
        println!("Not yet synced: {reason}");
    }
    Ok(())
}
