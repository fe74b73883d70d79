//! The `srsync stats` command.

use anyhow::Result;
use comfy_table::{Cell, Table};

use crate::commands::{format_ts, Env};

pub async fn execute(env: &Env, json: bool) -> Result<()> {
    let dashboard = env.service.dashboard(env.user_id, env.now()).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&dashboard)?);
        return Ok(());
    }

    let stats = &dashboard.stats;
    println!("Cards: {} ({} due now)", dashboard.total_cards, dashboard.due_now);
    println!(
        "Reviews: {} (easy {}, normal {}, hard {})",
        stats.total_reviews, stats.easy_count, stats.normal_count, stats.hard_count
    );
    println!("Cards created: {}", stats.cards_created);
    println!(
        "Streak: {} day(s), longest {}",
        stats.current_streak, stats.longest_streak
    );
    if let Some(last) = stats.last_study {
        println!("Last study: {}", format_ts(last));
    }

    let mut stages = Table::new();
    stages.set_header(vec!["Step", "Cards"]);
    for (step, count) in dashboard.stage_distribution.iter().enumerate() {
        stages.add_row(vec![Cell::new(step), Cell::new(count)]);
    }
    println!("\n{stages}");

    let mut activity = Table::new();
    activity.set_header(vec!["Day", "Reviews", "Created"]);
    for day in &dashboard.activity {
        activity.add_row(vec![
            Cell::new(day.date),
            Cell::new(day.reviews),
            Cell::new(day.cards_created),
        ]);
    }
    println!("\n{activity}");
    Ok(())
}
