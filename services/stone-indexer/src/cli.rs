use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "stone-indexer", about = "Off-chain indexer for Stone Finance lending markets")]
pub struct Cli {
    /// Path to a config file (TOML/YAML/JSON, sniffed by extension).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Overrides the configured log level.
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the indexer loop (default).
    Run,
    /// Apply pending Postgres migrations and exit.
    Migrate,
}

impl Cli {
    pub fn command(&self) -> Command {
        match &self.command {
            Some(Command::Run) | None => Command::Run,
            Some(Command::Migrate) => Command::Migrate,
        }
    }
}
