use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use fnf_launcher_store::config::Paths;
use fnf_launcher_store::{App, Config};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "fnf-store")]
#[command(
    author,
    version = fnf_launcher_store::APP_VERSION,
    about = "Inspect and migrate the FNF launcher mod store"
)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Database file to use for this invocation
    #[arg(long)]
    db: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Bring the store schema up to date and list applied migrations
    Migrate,

    /// Manage mods
    Mod {
        #[command(subcommand)]
        action: ModCommands,
    },

    /// Manage folders
    Folder {
        #[command(subcommand)]
        action: FolderCommands,
    },

    /// Show store status
    Status,
}

#[derive(Subcommand)]
enum ModCommands {
    /// List mods in display order
    List,
    /// Show one mod and its profiles
    Info { id: String },
    /// Delete a mod and its profiles
    Remove { id: String },
    /// Move a mod into a folder (omit --folder to take it out)
    Move {
        id: String,
        #[arg(long)]
        folder: Option<String>,
    },
}

#[derive(Subcommand)]
enum FolderCommands {
    /// List folders with their mod counts
    List,
    /// Create a folder
    Create {
        name: String,
        #[arg(long, default_value = "#FF0088")]
        color: String,
    },
    /// Delete a folder, keeping its mods
    Delete { id: String },
}

fn setup_logging(verbosity: u8, paths: &Paths) -> Result<()> {
    let filter = match verbosity {
        0 => "fnf_launcher_store=info",
        1 => "fnf_launcher_store=debug",
        2 => "fnf_launcher_store=trace",
        _ => "trace",
    };

    let log_file = paths.log_file();
    if let Some(parent) = log_file.parent() {
        std::fs::create_dir_all(parent).context("Failed to create log directory")?;
    }
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_file)
        .with_context(|| format!("Failed to open log file {}", log_file.display()))?;

    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into());
    let file_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_ansi(false)
        .with_writer(std::sync::Arc::new(file));

    // Only echo to the terminal when asked for more detail
    if verbosity > 0 {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(file_layer)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(file_layer)
            .init();
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = Config::load().await?;
    setup_logging(cli.verbose, &config.paths)?;

    if let Some(db) = cli.db.as_deref() {
        let trimmed = db.trim();
        if trimmed.is_empty() {
            anyhow::bail!("--db cannot be empty");
        }
        config.database_file_override = Some(trimmed.to_string());
    }

    // Initialize app (opens and migrates the store)
    let app = App::new(config).await?;

    match cli.command {
        Some(Commands::Migrate) => app.cmd_migrate().await?,
        Some(Commands::Mod { action }) => match action {
            ModCommands::List => app.cmd_mod_list().await?,
            ModCommands::Info { id } => app.cmd_mod_info(&id).await?,
            ModCommands::Remove { id } => app.cmd_mod_remove(&id).await?,
            ModCommands::Move { id, folder } => app.cmd_mod_move(&id, folder.as_deref()).await?,
        },
        Some(Commands::Folder { action }) => match action {
            FolderCommands::List => app.cmd_folder_list().await?,
            FolderCommands::Create { name, color } => {
                app.cmd_folder_create(&name, &color).await?
            }
            FolderCommands::Delete { id } => app.cmd_folder_delete(&id).await?,
        },
        Some(Commands::Status) | None => app.cmd_status().await?,
    }

    app.shutdown().await
}
