//! The `srsync sync` command.

use anyhow::Result;

use srsync_client::SyncStatus;

use crate::commands::Env;

pub async fn execute(env: &Env) -> Result<()> {
    let mut session = env.session()?;
    let client = env.sync_client()?;
    let result = client.sync(&mut session).await;
    session.teardown()?;
    let (status, pulled) = result?;

    match status {
        SyncStatus::UpToDate => println!("Nothing to push."),
        SyncStatus::Pushed(report) => println!(
            "Pushed {} record(s): {} inserted, {} replaced, {} kept, {} skipped",
            report.applied() + report.skipped,
            report.inserted,
            report.replaced,
            report.kept,
            report.skipped
        ),
        SyncStatus::Pending { records, reason } => {
            println!("Not yet synced: {records} record(s) pending ({reason})")
        }
    }
    if let Some(report) = pulled {
        println!(
            "Pulled: {} updated locally, {} new card(s), {} due",
            report.adopted, report.new_cards, report.queued
        );
    }
    Ok(())
}
