//! Chanhost CLI - inspect and manage installed chan extensions.
//!
//! Every invocation builds the registry from the configured extension
//! directories, so what `list` shows is exactly what a host process would
//! load right now.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use chanhost_extensions::ExtensionRegistry;
use clap::{Parser, Subcommand};

mod commands;
mod config_bridge;
mod formatter;
mod theme;

use commands::{archives, list, order, trust, watch};
use formatter::OutputFormat;

/// Chanhost - extension registry for chan boards
#[derive(Parser)]
#[command(name = "chanhost")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output format: pretty (default) or json
    #[arg(long, global = true, default_value = "pretty")]
    format: String,

    /// Chanhost home directory (defaults to `$CHANHOST_HOME` or `~/.chanhost`)
    #[arg(long, global = true)]
    home: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List installed extensions in display order
    List,

    /// Trust an extension and load its code
    Trust {
        /// Extension name
        name: String,
    },

    /// Reject an extension until it is reinstalled or the host restarts
    Discard {
        /// Extension name
        name: String,
    },

    /// Set the display order of extensions
    Order {
        /// Extension names, first shown first
        #[arg(required = true)]
        names: Vec<String>,
    },

    /// Show which extensions can archive threads of a board
    Archives {
        /// Extension name
        name: String,
    },

    /// Keep the registry running and print changes until Ctrl-C
    Watch,
}

/// How long one-shot commands wait for trusted extensions to finish loading.
const LOAD_WAIT: Duration = Duration::from_secs(10);

async fn wait_for_loads(registry: &ExtensionRegistry) -> Result<()> {
    match tokio::time::timeout(LOAD_WAIT, registry.settled()).await {
        Ok(result) => result.context("extension registry stopped"),
        Err(_) => {
            tracing::warn!(timeout = ?LOAD_WAIT, "Some extensions are still loading");
            Ok(())
        },
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let resolved = chanhost_config::Config::load(cli.home.as_deref())
        .context("failed to load configuration")?;

    let mut log_config = config_bridge::to_log_config(&resolved.config);
    if cli.verbose {
        "debug".clone_into(&mut log_config.level);
    }
    if let Err(e) = chanhost_telemetry::setup_logging(&log_config) {
        eprintln!("Failed to initialize logging: {e}");
    }
    tracing::debug!(
        home = %resolved.home.display(),
        files = ?resolved.loaded_files,
        "Configuration loaded"
    );

    let output_format = match cli.format.as_str() {
        "json" => OutputFormat::Json,
        _ => OutputFormat::Pretty,
    };

    let (registry, watcher) = config_bridge::build_registry(&resolved)?;
    let lifecycle = tokio::spawn(watcher.run());
    if !matches!(cli.command, Commands::Watch) {
        wait_for_loads(&registry).await?;
    }

    match cli.command {
        Commands::List => list::list_extensions(&registry, output_format)?,
        Commands::Trust { name } => trust::decide(&registry, &name, true).await?,
        Commands::Discard { name } => trust::decide(&registry, &name, false).await?,
        Commands::Order { names } => order::set_order(&registry, names).await?,
        Commands::Archives { name } => archives::show_archives(&registry, &name, output_format)?,
        Commands::Watch => watch::run_watch(registry, &resolved.config, output_format).await?,
    }

    lifecycle.abort();
    Ok(())
}
