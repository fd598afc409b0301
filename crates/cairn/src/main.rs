// SPDX-FileCopyrightText: 2026 Cairn Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Cairn - a version-controlled knowledge store for AI agent memory.
//!
//! This binary triggers the maintenance operations that run outside an agent
//! session: migrations, health checks, and the lifecycle policies.

mod doctor;
mod maintenance;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use cairn_config::CairnConfig;

/// Cairn - a version-controlled knowledge store for AI agent memory.
#[derive(Parser, Debug)]
#[command(name = "cairn", version, about, long_about = None)]
struct Cli {
    /// Configuration file to load instead of the standard search path.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Create or upgrade the database schema.
    Migrate,
    /// Check configuration and storage health.
    Doctor,
    /// Archive merged and inactive branches.
    AutoArchive {
        /// Days without activity before an active branch is archived.
        #[arg(long)]
        inactive_days: Option<u32>,
        /// Leave merged branches alone.
        #[arg(long)]
        keep_merged: bool,
        /// Report candidates without archiving them.
        #[arg(long)]
        dry_run: bool,
    },
    /// List branches past their time-to-live.
    Ttl,
    /// Print the branch hierarchy.
    Topology {
        /// Branch to start from.
        #[arg(long, default_value = "main")]
        root: String,
        /// Maximum depth below the root.
        #[arg(long, default_value_t = 10)]
        depth: usize,
        /// Include archived branches.
        #[arg(long)]
        all: bool,
    },
    /// Print record statistics for one branch, or every live branch.
    Stats {
        #[arg(long)]
        branch: Option<String>,
    },
    /// Check a branch name against the naming conventions.
    ValidateName { name: String },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(errors) => {
            cairn_config::render_errors(&errors);
            std::process::exit(1);
        }
    };
    init_tracing(&config.logging.level);

    let result = match cli.command {
        Commands::Migrate => maintenance::run_migrate(&config).await,
        Commands::Doctor => doctor::run_doctor(&config).await,
        Commands::AutoArchive {
            inactive_days,
            keep_merged,
            dry_run,
        } => maintenance::run_auto_archive(&config, inactive_days, keep_merged, dry_run).await,
        Commands::Ttl => maintenance::run_ttl(&config).await,
        Commands::Topology { root, depth, all } => {
            maintenance::run_topology(&config, &root, depth, all).await
        }
        Commands::Stats { branch } => maintenance::run_stats(&config, branch.as_deref()).await,
        Commands::ValidateName { name } => maintenance::run_validate_name(&name),
    };

    if let Err(e) = result {
        eprintln!("cairn: {e}");
        std::process::exit(1);
    }
}

fn load_config(
    path: Option<&std::path::Path>,
) -> Result<CairnConfig, Vec<cairn_config::ConfigError>> {
    let Some(path) = path else {
        return cairn_config::load_and_validate();
    };
    let config = cairn_config::load_config_from_path(path).map_err(|err| {
        let sources: Vec<(String, String)> = std::fs::read_to_string(path)
            .map(|content| vec![(path.display().to_string(), content)])
            .unwrap_or_default();
        cairn_config::diagnostic::figment_to_config_errors(err, &sources)
    })?;
    cairn_config::validation::validate_config(&config)?;
    Ok(config)
}

/// Initializes the tracing subscriber with the given log level.
fn init_tracing(log_level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("cairn={log_level},warn")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}
