//! Versa CLI - multi-version documentation site builder.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

mod commands;
mod config;

use config::Overrides;

#[derive(Parser)]
#[command(name = "versa")]
#[command(about = "Multi-version documentation site builder")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to versa.toml config file
    #[arg(short, long, default_value = "versa.toml", global = true)]
    config: PathBuf,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the documentation site
    Build {
        #[command(flatten)]
        overrides: Overrides,

        /// Keep rebuilding and serve the output, same as `dev`
        #[arg(short, long)]
        watch: bool,

        /// Do not open browser in watch mode
        #[arg(long)]
        no_open: bool,
    },

    /// Build, then serve with live reload and rebuild on change
    Dev {
        #[command(flatten)]
        overrides: Overrides,

        /// Do not open browser
        #[arg(long)]
        no_open: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    fmt().with_env_filter(filter).with_target(false).init();

    let file = config::load(&cli.config)?;

    match cli.command {
        Commands::Build {
            overrides,
            watch: false,
            ..
        } => {
            let config = file.into_build_config(&overrides, false);
            commands::build::run(config).await?;
        }
        Commands::Build {
            overrides, no_open, ..
        }
        | Commands::Dev { overrides, no_open } => {
            let config = file.into_build_config(&overrides, true);
            commands::dev::run(config, !no_open).await?;
        }
    }

    Ok(())
}
