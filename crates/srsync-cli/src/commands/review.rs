//! The `srsync review` command.

use anyhow::Result;

use srsync_core::model::Rating;

use crate::commands::{format_ts, front_of, Env};

pub fn execute(env: &Env) -> Result<()> {
    let session = env.session()?;
    let Some(item) = session.current() else {
        println!("Nothing due.");
        return Ok(());
    };

    let payload = session
        .current_card()
        .map(|c| c.payload.clone())
        .unwrap_or_default();
    println!("Card {} (deck {}, step {})", item.card_id, item.deck_id, item.progress.step);
    println!("  Front: {}", front_of(&payload));
    if let Some(back) = payload.get("back").and_then(|v| v.as_str()) {
        println!("  Back:  {back}");
    }

    let preview = session.preview(item.deck_id, &item.card_id);
    for rating in Rating::ALL {
        println!("  {:<6} -> {}", rating.to_string(), format_ts(preview.get(rating)));
    }
    println!("{} card(s) in queue", session.queue().len());
    Ok(())
}
