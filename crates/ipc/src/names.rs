use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use xxhash_rust::xxh3::xxh3_64;

pub const COMMAND_QUEUE_PREFIX: &str = "cmdq";
pub const STATUS_PREFIX: &str = "status";
pub const INTERRUPT_PREFIX: &str = "interrupt";
pub const RESULT_PREFIX: &str = "results";

/// Run-scoped identifier shared by every segment of one indexing run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstanceId(String);

impl InstanceId {
    /// Derive a fresh id from the current process and wall clock.
    pub fn generate() -> Self {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        let seed = format!("{}:{}", std::process::id(), nanos);
        Self(format!("{:016x}", xxh3_64(seed.as_bytes())))
    }

    /// Accepts ids handed to worker processes on the command line.
    pub fn parse(raw: &str) -> Option<Self> {
        let valid = !raw.is_empty()
            && raw.len() <= 64
            && raw
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        valid.then(|| Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn segment_name(&self, prefix: &str) -> String {
        format!("{prefix}_{}", self.0)
    }

    pub fn segment_names(&self) -> [String; 4] {
        [
            self.segment_name(COMMAND_QUEUE_PREFIX),
            self.segment_name(STATUS_PREFIX),
            self.segment_name(INTERRUPT_PREFIX),
            self.segment_name(RESULT_PREFIX),
        ]
    }
}

impl std::fmt::Display for InstanceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segment_names_are_prefixed_per_channel() {
        let id = InstanceId::parse("abc123").unwrap();
        assert_eq!(id.segment_name(COMMAND_QUEUE_PREFIX), "cmdq_abc123");
        assert_eq!(id.segment_names()[3], "results_abc123");
    }

    #[test]
    fn parse_rejects_path_like_ids() {
        assert!(InstanceId::parse("../etc").is_none());
        assert!(InstanceId::parse("").is_none());
    }

    #[test]
    fn generated_ids_differ_between_runs() {
        let a = InstanceId::generate();
        std::thread::sleep(std::time::Duration::from_millis(1));
        let b = InstanceId::generate();
        assert_ne!(a, b);
    }
}
