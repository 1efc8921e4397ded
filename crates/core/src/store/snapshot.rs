use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{FanoutError, Result};
use crate::model::GraphTables;

pub const CURRENT_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct Snapshot {
    version: u32,
    tables: GraphTables,
}

pub(super) fn encode(tables: &GraphTables) -> Result<Vec<u8>> {
    #[derive(Serialize)]
    struct SnapshotRef<'a> {
        version: u32,
        tables: &'a GraphTables,
    }

    let bytes = rmp_serde::to_vec(&SnapshotRef {
        version: CURRENT_VERSION,
        tables,
    })
    .map_err(|e| FanoutError::Store(format!("MSGPACK error: {}", e)))?;

    zstd::encode_all(&bytes[..], 0)
        .map_err(|e| FanoutError::Store(format!("Zstd compression failed: {}", e)))
}

fn decode(bytes: &[u8]) -> Result<Snapshot> {
    let decompressed = zstd::decode_all(bytes)
        .map_err(|e| FanoutError::Store(format!("Zstd decompression failed: {}", e)))?;
    rmp_serde::from_slice(&decompressed)
        .map_err(|e| FanoutError::Store(format!("MSGPACK error: {}", e)))
}

/// `Ok(None)` when there is nothing usable on disk; a stale or unreadable
/// snapshot is logged and ignored so the caller starts from scratch.
pub(super) fn load(path: &Path) -> Result<Option<GraphTables>> {
    if !path.exists() {
        return Ok(None);
    }

    let bytes = std::fs::read(path)?;
    match decode(&bytes) {
        Ok(snapshot) if snapshot.version == CURRENT_VERSION => {
            info!("Loaded store from {}", path.display());
            Ok(Some(snapshot.tables))
        }
        Ok(snapshot) => {
            warn!(
                "Store version mismatch at {} (found {}, expected {}). Will rebuild.",
                path.display(),
                snapshot.version,
                CURRENT_VERSION
            );
            Ok(None)
        }
        Err(e) => {
            warn!(
                "Failed to parse store at {}: {}. Will rebuild.",
                path.display(),
                e
            );
            Ok(None)
        }
    }
}

pub(super) fn save(tables: &GraphTables, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let bytes = encode(tables)?;

    // Write to a sibling temp file, then rename over the target
    let temp_path = path.with_extension("tmp");
    std::fs::write(&temp_path, bytes)?;
    std::fs::rename(temp_path, path)?;

    info!("Saved store to {}", path.display());
    Ok(())
}
