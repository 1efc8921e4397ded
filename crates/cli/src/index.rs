use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::Args;
use fanout_core::analyzer::{Analyzer, DeclarationScanner};
use fanout_core::config::IndexerConfig;
use fanout_core::indexing::{DiscoveryOptions, collect_work_items};
use fanout_core::model::{StoreId, WorkItem};
use fanout_core::runtime::{
    Coordinator, IndexTask, IndexerChannels, IndexingReport, LocalIndexTask, ProcessLauncher,
};
use fanout_core::store::{CanonicalStore, StoreSet};
use fanout_ingest::{InterruptSignal, Task, TaskContext, TaskRunner, forward_ctrl_c, run_blocking};
use fanout_ipc::InstanceId;
use tokio::runtime::Runtime;
use tracing::{info, warn};

#[derive(Args, Debug, Clone)]
pub struct IndexArgs {
    /// Path to the project root directory to index. Defaults to current directory.
    #[arg(value_name = "PROJECT_PATH")]
    pub path: Option<PathBuf>,

    /// Number of workers (overrides config and FANOUT_WORKERS)
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Store file to merge into
    #[arg(short, long)]
    pub store: Option<PathBuf>,

    /// JSON config file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Use threads of this process instead of worker processes
    #[arg(long)]
    pub in_process: bool,

    /// Run crashed files again in a second pass
    #[arg(long)]
    pub retry_crashed: bool,

    /// Glob of files to index on the coordinator thread (repeatable)
    #[arg(long = "serial", value_name = "GLOB")]
    pub serial_globs: Vec<String>,

    /// Print the report as JSON
    #[arg(long)]
    pub json: bool,
}

impl IndexArgs {
    fn resolve_config(&self) -> anyhow::Result<IndexerConfig> {
        let mut config = IndexerConfig::load(self.config.as_deref())?;
        if let Some(workers) = self.workers {
            config.worker_count = workers;
        }
        if let Some(store) = &self.store {
            config.store_path = Some(store.clone());
        }
        config.serial_globs.extend(self.serial_globs.iter().cloned());
        config.validate()?;
        Ok(config)
    }
}

pub fn run(args: IndexArgs, rt: &Runtime) -> anyhow::Result<()> {
    let root = args.path.clone().unwrap_or_else(crate::default_project_path);
    let config = args.resolve_config()?;
    let store_path = config.resolve_store_path(&root);

    info!("Indexing project at: {}...", root.display());
    let items = collect_work_items(
        &root,
        &DiscoveryOptions {
            target_store: StoreId::PRIMARY,
            flags: config.analysis_flags.clone(),
            serial_globs: config.serial_globs.clone(),
        },
    )?;
    if items.is_empty() {
        info!("Nothing to index under {}", root.display());
        return Ok(());
    }

    let stores = StoreSet::single(
        CanonicalStore::open(&store_path)
            .with_context(|| format!("opening store {}", store_path.display()))?,
    );
    let analyzer: Arc<dyn Analyzer> = Arc::new(DeclarationScanner::new());

    let interrupt = InterruptSignal::new();
    let _ctrl_c = {
        let _enter = rt.enter();
        forward_ctrl_c(interrupt.clone())
    };
    let ctx = TaskContext::new(interrupt);
    let runner = TaskRunner::new(&config.flow_control());

    let stores = if args.in_process {
        let task = LocalIndexTask::new(analyzer, config.worker_count, stores, items.clone());
        let task = rt.block_on(index_passes(task, &items, &args, runner, &ctx))?;
        let (stores, _) = task.into_parts();
        stores
    } else {
        let instance = InstanceId::generate();
        let channels = IndexerChannels::open(&config.runtime_dir, &instance, &config)?;
        let task = IndexTask::new(
            Coordinator::new(channels),
            Box::new(ProcessLauncher::current_exe()?),
            analyzer,
            config.clone(),
            stores,
            items.clone(),
        );
        let task = rt.block_on(index_passes(task, &items, &args, runner, &ctx))?;
        let (stores, _, coordinator) = task.into_parts();
        if let Err(err) = coordinator.into_channels().remove_segments() {
            warn!("Failed to remove shared segments: {}", err);
        }
        stores
    };

    stores.save_all()?;
    info!("Saved store to {}", store_path.display());
    Ok(())
}

/// Access shared by both task flavours.
trait IndexingTask: Task + 'static {
    fn report(&self) -> &IndexingReport;
    fn set_items(&mut self, items: Vec<WorkItem>);
}

impl IndexingTask for IndexTask {
    fn report(&self) -> &IndexingReport {
        IndexTask::report(self)
    }

    fn set_items(&mut self, items: Vec<WorkItem>) {
        IndexTask::set_items(self, items)
    }
}

impl IndexingTask for LocalIndexTask {
    fn report(&self) -> &IndexingReport {
        LocalIndexTask::report(self)
    }

    fn set_items(&mut self, items: Vec<WorkItem>) {
        LocalIndexTask::set_items(self, items)
    }
}

/// Run the task once, then once more over crashed files if asked to.
async fn index_passes<T: IndexingTask>(
    task: T,
    items: &[WorkItem],
    args: &IndexArgs,
    runner: TaskRunner,
    ctx: &TaskContext,
) -> anyhow::Result<T> {
    let (mut task, _) = run_blocking(runner.clone(), task, ctx.clone()).await?;
    print_report(task.report(), args.json)?;

    let report = task.report();
    let retry = report.crashed_items(items);
    if !args.retry_crashed || retry.is_empty() || report.interrupted {
        return Ok(task);
    }

    info!("Retrying {} crashed files", retry.len());
    task.reset(ctx)?;
    task.set_items(retry);
    let (task, _) = run_blocking(runner, task, ctx.clone()).await?;
    print_report(task.report(), args.json)?;
    Ok(task)
}

fn print_report(report: &IndexingReport, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    println!("Indexing complete!");
    println!(
        "Files: {} merged of {} ({} serial)",
        report.files_merged, report.files_queued, report.serial_files
    );
    println!(
        "Entities: {} applied, {} dropped",
        report.merge.applied(),
        report.merge.dropped
    );
    println!("Elapsed: {:.2?}", report.elapsed);
    if report.worker_restarts > 0 {
        println!("Workers relaunched: {}", report.worker_restarts);
    }
    if report.interrupted {
        println!("Interrupted with {} items left", report.remaining);
    }
    if !report.crashed_files.is_empty() {
        println!("\nCrashed files:");
        for path in &report.crashed_files {
            println!(" - {}", display_path(path));
        }
    }
    Ok(())
}

fn display_path(path: &Path) -> String {
    path.display().to_string()
}
