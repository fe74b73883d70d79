//! The `srsync init` command.

use anyhow::Result;

pub fn execute() -> Result<()> {
    if std::path::Path::new("srsync.toml").exists() {
        println!("srsync.toml already exists, skipping.");
    } else {
        std::fs::write("srsync.toml", SAMPLE_CONFIG)?;
        println!("Created srsync.toml");
    }

    println!("\nNext steps:");
    println!("  1. Run: srsync add --front \"hund\" --back \"dog\"");
    println!("  2. Run: srsync review");
    println!("  3. Run: srsync rate easy");

    Ok(())
}

const SAMPLE_CONFIG: &str = r#"# srsync configuration

[schedule]
# Length of one interval unit in seconds.
unit_secs = 86400
ceiling_units = 512
hard_units = 1

[server]
store_path = "./srsync-store.json"
canonical_deck_title = "My cards"
due_limit = 1000

[client]
# base_url = "${SRSYNC_SERVER_URL}"
profile = "Guest"
data_dir = "./srsync-data"
cache_version = "6"
timeout_secs = 30
"#;
