//! The `srsync due` command.

use anyhow::Result;
use comfy_table::{Cell, Table};

use crate::commands::{format_ts, front_of, Env};

pub async fn execute(env: &Env, json: bool) -> Result<()> {
    let mut session = env.session()?;
    let client = env.sync_client()?;
    match client.pull(&mut session).await {
        Ok(_) => {}
        Err(e) if e.is_transient() => {
            eprintln!("Warning: could not reach server, showing local cache ({e})")
        }
        Err(e) => return Err(e.into()),
    }

    if json {
        let items: Vec<_> = session.queue().iter().collect();
        println!("{}", serde_json::to_string_pretty(&items)?);
    } else if session.queue().is_empty() {
        println!("Nothing due.");
    } else {
        let mut table = Table::new();
        table.set_header(vec!["#", "Deck", "Card", "Step", "Due", "Front"]);
        for (i, item) in session.queue().iter().enumerate() {
            let front = session
                .registry()
                .card(item.deck_id, &item.card_id)
                .map(|c| front_of(&c.payload))
                .unwrap_or_default();
            table.add_row(vec![
                Cell::new(i + 1),
                Cell::new(item.deck_id),
                Cell::new(&item.card_id),
                Cell::new(item.progress.step),
                Cell::new(format_ts(item.progress.due)),
                Cell::new(front),
            ]);
        }
        println!("{table}");
        println!("{} card(s) due", session.queue().len());
    }

    session.teardown()
}
