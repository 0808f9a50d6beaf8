//! featcat: feature catalog client.
//!
//! # Usage
//!
//! ```text
//! featcat list [--json]
//! featcat show <id>
//! featcat search <query> [--limit N] [--json]
//! featcat suggest <query> [--limit N]
//! featcat create --name <name> --summary <text> [--owner <o>] [--tag <t>]...
//! featcat update <id> [--name ..] [--summary ..] [--owner ..] [--tag ..]...
//! featcat delete <id>
//! featcat local add --name <name> --summary <text> [--owner <o>] [--tag <t>]...
//! featcat local list [--json]
//! featcat sync [--prefer-local] [--force-remote] [--dry-run]
//! featcat pending [--json]
//! featcat whoami
//! ```

mod commands;

use anyhow::Result;
use clap::{ArgAction, Parser, Subcommand};

use commands::{
    catalog::{CreateArgs, DeleteArgs, ListArgs, SearchArgs, ShowArgs, SuggestArgs, UpdateArgs},
    local::LocalCommand,
    pending::PendingArgs,
    sync::SyncArgs,
    whoami::WhoamiArgs,
};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "featcat",
    version,
    about = "Browse and propose changes to a GitLab-hosted feature catalog",
    long_about = None,
)]
struct Cli {
    /// Log more (-v info, -vv debug). `RUST_LOG` takes precedence.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List every feature in the catalog.
    List(ListArgs),

    /// Show one catalog feature.
    Show(ShowArgs),

    /// Rank catalog features matching a query.
    Search(SearchArgs),

    /// Complete a feature id or name prefix.
    Suggest(SuggestArgs),

    /// Propose a new feature as a merge request.
    Create(CreateArgs),

    /// Propose changes to an existing feature.
    Update(UpdateArgs),

    /// Propose removing a feature.
    Delete(DeleteArgs),

    /// Work with the local replica without touching the remote.
    Local {
        #[command(subcommand)]
        command: LocalCommand,
    },

    /// Reconcile the local replica with the catalog.
    Sync(SyncArgs),

    /// List proposals awaiting review.
    Pending(PendingArgs),

    /// Show the authenticated user and their project role.
    Whoami(WhoamiArgs),
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn init_tracing(verbose: u8) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    match cli.command {
        Commands::List(args) => args.run(),
        Commands::Show(args) => args.run(),
        Commands::Search(args) => args.run(),
        Commands::Suggest(args) => args.run(),
        Commands::Create(args) => args.run(),
        Commands::Update(args) => args.run(),
        Commands::Delete(args) => args.run(),
        Commands::Local { command } => commands::local::run(command),
        Commands::Sync(args) => args.run(),
        Commands::Pending(args) => args.run(),
        Commands::Whoami(args) => args.run(),
    }
}
