use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;
use fanout_core::analyzer::DeclarationScanner;
use fanout_core::config::IndexerConfig;
use fanout_core::runtime::run_worker;
use fanout_ipc::{InstanceId, WorkerId};
use tracing::info;

#[derive(Args, Debug, Clone)]
pub struct WorkerArgs {
    /// Instance id naming the shared segments of the run
    #[arg(long)]
    pub instance: String,

    #[arg(long)]
    pub worker_id: WorkerId,

    /// Directory holding the shared segments
    #[arg(long)]
    pub runtime_dir: PathBuf,

    /// Config file written by the coordinator
    #[arg(long)]
    pub config: PathBuf,
}

pub fn run(args: WorkerArgs) -> anyhow::Result<()> {
    let instance = InstanceId::parse(&args.instance)
        .ok_or_else(|| anyhow::anyhow!("invalid instance id '{}'", args.instance))?;
    let config = IndexerConfig::from_file(&args.config)?;

    info!(
        "Worker {} attached to instance {} in {}",
        args.worker_id,
        instance,
        args.runtime_dir.display()
    );
    let summary = run_worker(
        &instance,
        args.worker_id,
        &args.runtime_dir,
        &config,
        Arc::new(DeclarationScanner::new()),
    )?;
    info!(
        "Worker {} done: {} files, interrupted: {}",
        summary.worker, summary.processed, summary.interrupted
    );
    Ok(())
}
