//! The `srsync delete` command.

use anyhow::Result;

use srsync_core::model::DeckId;
use srsync_core::wire::DeleteOutcome;

use crate::commands::Env;

pub async fn execute(env: &Env, deck: DeckId, card: String) -> Result<()> {
    let mut session = env.session()?;
    let client = env.sync_client()?;
    match client.delete_card(&mut session, deck, &card).await? {
        DeleteOutcome::Deleted { progress_removed } => {
            println!("Deleted card {card} ({progress_removed} progress record(s) removed)");
        }
        DeleteOutcome::Hidden => println!("Hid card {card}"),
    }
    session.teardown()
}
