//! srsync CLI: review and sync flashcards against a local store.

use std::path::PathBuf;
use std::process;

use clap::{Args, Parser, Subcommand};

use srsync_core::model::{DeckId, Rating, Scope, Timestamp, UserId};

mod commands;

#[derive(Parser)]
#[command(name = "srsync", version, about = "Spaced-repetition scheduling and progress sync")]
struct Cli {
    #[command(flatten)]
    global: GlobalOpts,

    #[command(subcommand)]
    command: Commands,
}

/// Options shared by every command.
#[derive(Args, Debug, Clone)]
pub struct GlobalOpts {
    /// Config file path
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Store snapshot file (overrides server.store_path)
    #[arg(long, global = true)]
    pub store: Option<PathBuf>,

    /// Local profile directory (overrides client.data_dir)
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Profile name (overrides client.profile)
    #[arg(long, global = true)]
    pub profile: Option<String>,

    /// User id the commands act as
    #[arg(long, global = true, default_value = "1")]
    pub user: UserId,

    /// Pin the clock to this Unix timestamp
    #[arg(long, global = true, hide = true)]
    pub now: Option<Timestamp>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a starter srsync.toml
    Init,

    /// Add or update a card
    Add {
        /// Card id (normalized; generated when empty)
        #[arg(long, default_value = "")]
        card: String,

        /// Front side
        #[arg(long)]
        front: String,

        /// Back side
        #[arg(long, default_value = "")]
        back: String,

        /// Target deck; defaults to the canonical private deck
        #[arg(long)]
        deck: Option<DeckId>,

        /// Scope: private or shared
        #[arg(long, default_value = "private")]
        scope: Scope,
    },

    /// List decks, or create one
    Decks {
        /// Create a deck with this title
        #[arg(long)]
        create: Option<String>,

        /// Scope of the created deck
        #[arg(long, default_value = "private")]
        scope: Scope,
    },

    /// Pull from the store and list the due queue
    Due {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Show the card at the head of the queue with its interval preview
    Review,

    /// Rate a card (the head of the queue unless --deck/--card are given)
    Rate {
        /// hard, normal or easy
        rating: Rating,

        #[arg(long, requires = "card")]
        deck: Option<DeckId>,

        #[arg(long, requires = "deck")]
        card: Option<String>,
    },

    /// Delete an owned card, or hide someone else's
    Delete {
        #[arg(long)]
        deck: DeckId,

        #[arg(long)]
        card: String,
    },

    /// Push pending progress, then pull
    Sync,

    /// Merge duplicate canonical decks
    Repair,

    /// Show the dashboard
    Stats {
        /// Print JSON instead of tables
        #[arg(long)]
        json: bool,
    },

    /// Check the configuration and store snapshot
    Validate,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("srsync=info")),
        )
        .init();

    let cli = Cli::parse();
    let global = cli.global;

    let result = match cli.command {
        Commands::Init => commands::init::execute(),
        Commands::Validate => commands::validate::execute(&global),
        command => run(&global, command).await,
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

async fn run(global: &GlobalOpts, command: Commands) -> anyhow::Result<()> {
    let env = commands::Env::open(global).await?;
    let result = match command {
        Commands::Add {
            card,
            front,
            back,
            deck,
            scope,
        } => commands::add::execute(&env, card, front, back, deck, scope).await,
        Commands::Decks { create, scope } => commands::decks::execute(&env, create, scope).await,
        Commands::Due { json } => commands::due::execute(&env, json).await,
        Commands::Review => commands::review::execute(&env),
        Commands::Rate { rating, deck, card } => {
            commands::rate::execute(&env, rating, deck.zip(card)).await
        }
        Commands::Delete { deck, card } => commands::delete::execute(&env, deck, card).await,
        Commands::Sync => commands::sync::execute(&env).await,
        Commands::Repair => commands::repair::execute(&env),
        Commands::Stats { json } => commands::stats::execute(&env, json).await,
        // Handled before the store is opened.
        Commands::Init | Commands::Validate => Ok(()),
    };
    env.save_store()?;
    result
}
