//! # formwise CLI
//!
//! Command-line tools for formwise schemas: lint a schema file or validate
//! a values file against one without a running form.

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "formwise")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check a schema for structural problems
    Lint {
        /// Schema file (YAML, or JSON by extension)
        schema: PathBuf,

        /// Emit JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Validate a values file against a schema
    Validate {
        /// Schema file (YAML, or JSON by extension)
        schema: PathBuf,

        /// Values file mapping field ids to values
        #[arg(long)]
        values: PathBuf,

        /// Engine configuration file
        #[arg(long, env = "FORMWISE_CONFIG")]
        config: Option<PathBuf>,

        /// Emit JSON instead of text
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let subscriber = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(if cli.verbose {
                tracing::Level::DEBUG.into()
            } else {
                tracing::Level::INFO.into()
            }),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Lint { schema, json } => commands::lint_schema(&schema, json),
        Commands::Validate {
            schema,
            values,
            config,
            json,
        } => commands::validate_values(&schema, &values, config.as_deref(), json).await,
    }
}
