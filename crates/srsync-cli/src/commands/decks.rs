//! The `srsync decks` command.

use anyhow::Result;
use comfy_table::{Cell, Table};

use srsync_core::model::Scope;

use crate::commands::Env;

pub async fn execute(env: &Env, create: Option<String>, scope: Scope) -> Result<()> {
    if let Some(title) = create {
        let deck = env
            .service
            .create_deck(env.user_id, &title, scope, env.now())
            .await?;
        println!("Created deck {}: {}", deck.id, deck.title);
    }

    let decks = env.service.list_decks(env.user_id).await?;
    if decks.is_empty() {
        println!("No decks yet. Run `srsync add` to create your first card.");
        return Ok(());
    }

    let mut table = Table::new();
    table.set_header(vec!["ID", "Title", "Scope", "Owner", "Cards"]);
    for deck in &decks {
        let cards = env.service.store().cards_in_deck(deck.id).await?;
        let visible = cards.iter().filter(|c| c.is_visible_to(env.user_id)).count();
        table.add_row(vec![
            Cell::new(deck.id),
            Cell::new(&deck.title),
            Cell::new(deck.scope),
            Cell::new(deck.owner_id.map_or_else(|| "-".to_string(), |o| o.to_string())),
            Cell::new(visible),
        ]);
    }
    println!("{table}");
    Ok(())
}
