mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "assay-cli")]
#[command(about = "Assay CLI - Fingerprint code, cross-check submissions, replay integrity checks", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the MinHash sketch of a source file as JSON
    Fingerprint {
        /// Source file to fingerprint
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Compare two source files with both similarity measures
    Compare {
        #[arg(short, long)]
        left: PathBuf,

        #[arg(short, long)]
        right: PathBuf,
    },

    /// Run the integrity pipeline offline over a JSON bundle
    Integrity {
        /// Bundle with `evaluation`, `questions`, `answers` and optional `peers`
        #[arg(short, long)]
        input: PathBuf,
    },

    /// List the languages allowed in the sandbox
    ListLangs {
        /// Path to languages.json
        #[arg(short, long, default_value = "config/languages.json")]
        config: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Fingerprint { file } => commands::fingerprint(&file)?,
        Commands::Compare { left, right } => commands::compare(&left, &right)?,
        Commands::Integrity { input } => commands::integrity(&input)?,
        Commands::ListLangs { config } => commands::list_languages(&config)?,
    }

    Ok(())
}
