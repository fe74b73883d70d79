//! The `srsync repair` command.

use anyhow::Result;

use crate::commands::Env;

/// Report what the startup pass in [`Env::open`] merged.
pub fn execute(env: &Env) -> Result<()> {
    let report = env.repaired;
    if report.is_noop() {
        println!("Decks are consistent.");
    } else {
        println!(
            "Merged {} duplicate deck(s): {} card(s) moved, {} dropped, {} progress row(s) \
             repointed",
            report.decks_removed,
            report.cards_moved,
            report.cards_dropped,
            report.progress_repointed
        );
    }
    Ok(())
}
