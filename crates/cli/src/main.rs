//! Parley CLI: the main entry point.
//!
//! Commands:
//! - `onboard`      Initialize config
//! - `chat`         Interactive chat or single-message mode
//! - `summary`      List conversations
//! - `new`, `switch`, `delete`  Manage conversations
//! - `compress`, `merge`, `consolidate`, `knowledge`  Maintenance
//! - `remember`, `prefs`  Preferences

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "parley",
    about = "Parley: many conversations, one assistant",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// User the command acts for
    #[arg(short, long, global = true, env = "PARLEY_USER", default_value = "local")]
    user: String,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize configuration
    Onboard,

    /// Chat with the assistant
    Chat {
        /// Send a single message instead of entering interactive mode
        #[arg(short, long)]
        message: Option<String>,
    },

    /// List conversations with their summaries
    Summary,

    /// Start a new conversation and switch to it
    New {
        /// System prompt for the new conversation
        #[arg(short, long)]
        system: Option<String>,
    },

    /// Switch to a conversation by its number in `summary`
    Switch { index: usize },

    /// Delete a conversation by its number in `summary`
    Delete { index: usize },

    /// Compress every conversation that has grown too long
    Compress,

    /// Merge conversation `b` into `a`, or let the assistant find similar pairs
    Merge {
        #[arg(required_unless_present = "similar")]
        a: Option<usize>,
        #[arg(required_unless_present = "similar")]
        b: Option<usize>,
        /// Merge every pair the assistant considers similar
        #[arg(long, conflicts_with_all = ["a", "b"])]
        similar: bool,
    },

    /// Rebuild the knowledge digest now
    Consolidate,

    /// Show the knowledge digest
    Knowledge,

    /// Remember facts from a sentence ("call me Ada, I live in Paris")
    Remember { text: String },

    /// Manage stored preferences
    Prefs {
        #[command(subcommand)]
        action: commands::prefs::PrefsAction,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    let user = parley_core::UserId::new(cli.user);

    match cli.command {
        Commands::Onboard => commands::onboard::run().await?,
        Commands::Chat { message } => commands::chat::run(&user, message).await?,
        Commands::Summary => commands::conversations::summary(&user).await?,
        Commands::New { system } => commands::conversations::new(&user, system).await?,
        Commands::Switch { index } => commands::conversations::switch(&user, index).await?,
        Commands::Delete { index } => commands::conversations::delete(&user, index).await?,
        Commands::Compress => commands::maintenance::compress(&user).await?,
        Commands::Merge { a, b, similar } => match (a, b) {
            (Some(a), Some(b)) if !similar => commands::maintenance::merge(&user, a, b).await?,
            _ => commands::maintenance::merge_similar(&user).await?,
        },
        Commands::Consolidate => commands::maintenance::consolidate(&user).await?,
        Commands::Knowledge => commands::maintenance::knowledge(&user).await?,
        Commands::Remember { text } => commands::prefs::remember(&user, &text).await?,
        Commands::Prefs { action } => commands::prefs::run(&user, action).await?,
    }

    Ok(())
}
