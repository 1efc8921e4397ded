mod index;
mod worker;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub use index::IndexArgs;
pub use worker::WorkerArgs;

#[derive(Parser)]
#[command(
    name = "fanout",
    version,
    about = "Index a source tree with parallel worker processes",
    long_about = "Fanout splits a source tree into work items, analyzes them in parallel worker \
                  processes that share a command queue, and merges every partial graph into one \
                  persistent store."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Index a project directory into a store
    #[command(
        long_about = "Discovers analyzable files under the project, indexes them with worker \
                      processes (or threads with --in-process), and saves the merged store. \
                      By default, the store lives in ~/.fanout/stores/."
    )]
    Index(IndexArgs),
    /// Internal: run one worker of an indexing run
    #[command(hide = true)]
    Worker(WorkerArgs),
}

impl Cli {
    fn log_component(&self) -> String {
        match &self.command {
            Commands::Index(_) => "cli".to_string(),
            Commands::Worker(args) => format!("worker-{}", args.worker_id),
        }
    }
}

pub fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Workers share the coordinator's terminal, so they only log to file.
    let to_stderr = matches!(cli.command, Commands::Index(_));
    let _guard = fanout_core::logging::init_logging(&cli.log_component(), to_stderr);

    match cli.command {
        Commands::Index(args) => {
            let rt = tokio::runtime::Runtime::new()?;
            index::run(args, &rt)
        }
        Commands::Worker(args) => worker::run(args),
    }
}

/// Parsed arguments for tests and embedders that build their own argv.
pub fn parse_from<I, T>(args: I) -> Result<Cli, clap::Error>
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
{
    Cli::try_parse_from(args)
}

pub fn default_project_path() -> PathBuf {
    std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
}
