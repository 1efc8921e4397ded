use std::path::{Path, PathBuf};

use fanout_ingest::FlowControlConfig;
use fanout_ipc::{DEFAULT_CRASH_LOG_LIMIT, SegmentOptions};
use serde::{Deserialize, Serialize};
use tracing::debug;
use xxhash_rust::xxh3::xxh3_64;

use crate::error::{FanoutError, Result};

pub const WORKERS_ENV: &str = "FANOUT_WORKERS";
pub const RUNTIME_DIR_ENV: &str = "FANOUT_RUNTIME_DIR";
pub const STORE_ENV: &str = "FANOUT_STORE";

pub const DEFAULT_STORE_DIR: &str = ".fanout/stores";

/// Settings shared by the coordinator and every worker of a run.
///
/// Workers launched as processes receive the coordinator's resolved copy as a
/// JSON file, so both sides always agree on segment sizes and flow control.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexerConfig {
    pub worker_count: usize,
    /// Directory holding the backing files of the shared segments.
    pub runtime_dir: PathBuf,
    pub store_path: Option<PathBuf>,
    pub initial_segment_bytes: u64,
    pub max_segment_bytes: u64,
    pub result_backlog_limit: usize,
    pub backpressure_sleep_ms: u64,
    pub interrupt_poll_ms: u64,
    pub idle_sleep_ms: u64,
    pub crash_log_limit: usize,
    pub worker_exit_timeout_secs: u64,
    /// Files matching any of these globs run on the coordinator thread.
    pub serial_globs: Vec<String>,
    pub analysis_flags: Vec<String>,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        let flow = FlowControlConfig::default();
        let segment = SegmentOptions::default();
        Self {
            worker_count: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            runtime_dir: std::env::temp_dir().join("fanout"),
            store_path: None,
            initial_segment_bytes: segment.initial_bytes,
            max_segment_bytes: segment.max_bytes,
            result_backlog_limit: flow.result_backlog_limit,
            backpressure_sleep_ms: flow.backpressure_sleep_ms,
            interrupt_poll_ms: flow.interrupt_poll_ms,
            idle_sleep_ms: flow.idle_sleep_ms,
            crash_log_limit: DEFAULT_CRASH_LOG_LIMIT,
            worker_exit_timeout_secs: 30,
            serial_globs: Vec::new(),
            analysis_flags: Vec::new(),
        }
    }
}

impl IndexerConfig {
    /// Defaults, then the JSON file (if any), then environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config = serde_json::from_str(&raw)?;
        debug!("Loaded indexer config from {}", path.display());
        Ok(config)
    }

    pub fn write_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_vec_pretty(self)?)?;
        Ok(())
    }

    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(raw) = lookup(WORKERS_ENV) {
            self.worker_count = raw.trim().parse().map_err(|_| {
                FanoutError::Config(format!("{WORKERS_ENV} must be a positive integer, got '{raw}'"))
            })?;
        }
        if let Some(dir) = lookup(RUNTIME_DIR_ENV) {
            self.runtime_dir = PathBuf::from(dir);
        }
        if let Some(store) = lookup(STORE_ENV) {
            self.store_path = Some(PathBuf::from(store));
        }
        self.validate()
    }

    pub fn validate(&self) -> Result<()> {
        if self.worker_count == 0 {
            return Err(FanoutError::Config("worker_count must be at least 1".into()));
        }
        if self.initial_segment_bytes > self.max_segment_bytes {
            return Err(FanoutError::Config(format!(
                "initial_segment_bytes ({}) exceeds max_segment_bytes ({})",
                self.initial_segment_bytes, self.max_segment_bytes
            )));
        }
        Ok(())
    }

    pub fn segment_options(&self) -> SegmentOptions {
        SegmentOptions {
            initial_bytes: self.initial_segment_bytes,
            max_bytes: self.max_segment_bytes,
        }
    }

    pub fn flow_control(&self) -> FlowControlConfig {
        FlowControlConfig {
            result_backlog_limit: self.result_backlog_limit,
            backpressure_sleep_ms: self.backpressure_sleep_ms,
            interrupt_poll_ms: self.interrupt_poll_ms,
            idle_sleep_ms: self.idle_sleep_ms,
        }
    }

    /// The configured store, or one derived from the project root.
    pub fn resolve_store_path(&self, project_root: &Path) -> PathBuf {
        self.store_path
            .clone()
            .unwrap_or_else(|| default_store_path(project_root))
    }
}

/// `~/.fanout/stores/<hash of the canonical root>.bin`
pub fn default_store_path(project_root: &Path) -> PathBuf {
    let base = dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(DEFAULT_STORE_DIR);
    let abs_path = project_root
        .canonicalize()
        .unwrap_or_else(|_| project_root.to_path_buf());
    let hash = xxh3_64(abs_path.to_string_lossy().as_bytes());
    base.join(format!("{:016x}.bin", hash))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn env_overrides_file_values() {
        let env: HashMap<&str, &str> = [(WORKERS_ENV, "3"), (STORE_ENV, "/tmp/idx.store")]
            .into_iter()
            .collect();
        let mut config = IndexerConfig {
            worker_count: 8,
            ..IndexerConfig::default()
        };

        config
            .apply_env(|key| env.get(key).map(|v| v.to_string()))
            .expect("overrides should apply");

        assert_eq!(config.worker_count, 3);
        assert_eq!(config.store_path, Some(PathBuf::from("/tmp/idx.store")));
    }

    #[test]
    fn zero_workers_is_rejected() {
        let mut config = IndexerConfig::default();
        let err = config
            .apply_env(|key| (key == WORKERS_ENV).then(|| "0".to_string()))
            .expect_err("zero workers must fail");
        assert!(matches!(err, FanoutError::Config(_)));
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let dir = tempfile::tempdir().expect("tempdir should work");
        let path = dir.path().join("fanout.json");
        std::fs::write(&path, r#"{ "worker_count": 2, "serial_globs": ["*.pch"] }"#)
            .expect("write should work");

        let config = IndexerConfig::from_file(&path).expect("load should work");

        assert_eq!(config.worker_count, 2);
        assert_eq!(config.serial_globs, vec!["*.pch".to_string()]);
        assert_eq!(config.result_backlog_limit, 2);
    }

    #[test]
    fn store_path_defaults_per_project() {
        let config = IndexerConfig::default();
        let a = config.resolve_store_path(Path::new("/work/a"));
        let b = config.resolve_store_path(Path::new("/work/b"));
        assert_ne!(a, b);
        assert!(a.parent().is_some_and(|dir| dir.ends_with(DEFAULT_STORE_DIR)));
        assert_eq!(a.extension().and_then(|e| e.to_str()), Some("bin"));

        let pinned = IndexerConfig {
            store_path: Some(PathBuf::from("/tmp/pinned.bin")),
            ..IndexerConfig::default()
        };
        assert_eq!(
            pinned.resolve_store_path(Path::new("/work/a")),
            PathBuf::from("/tmp/pinned.bin")
        );
    }
}
