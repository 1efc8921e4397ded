use std::path::{Path, PathBuf};

use ignore::WalkBuilder;
use ignore::overrides::{Override, OverrideBuilder};
use tracing::{debug, info};

use crate::analyzer::SUPPORTED_EXTENSIONS;
use crate::error::{FanoutError, Result};
use crate::model::{StoreId, WorkItem};

#[derive(Debug, Clone, Default)]
pub struct DiscoveryOptions {
    pub target_store: StoreId,
    pub flags: Vec<String>,
    /// Globs (relative to the root) of files that must run in isolation.
    pub serial_globs: Vec<String>,
}

pub fn is_relevant_path(path: &Path) -> bool {
    if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
        if name.starts_with('.') {
            return false;
        }
        if name == "target" || name == "build" || name == "node_modules" {
            return false;
        }
    }
    true
}

fn has_supported_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| SUPPORTED_EXTENSIONS.contains(&ext))
}

fn serial_matcher(root: &Path, globs: &[String]) -> Result<Option<Override>> {
    if globs.is_empty() {
        return Ok(None);
    }
    let mut builder = OverrideBuilder::new(root);
    for glob in globs {
        builder
            .add(glob)
            .map_err(|e| FanoutError::Config(format!("invalid serial glob '{glob}': {e}")))?;
    }
    let matcher = builder
        .build()
        .map_err(|e| FanoutError::Config(format!("invalid serial globs: {e}")))?;
    Ok(Some(matcher))
}

/// Walk `root` (honouring `.gitignore`) and turn every analyzable file into a
/// work item, in path order.
pub fn collect_work_items(root: &Path, options: &DiscoveryOptions) -> Result<Vec<WorkItem>> {
    if !root.is_dir() {
        return Err(FanoutError::Config(format!(
            "{} is not a directory",
            root.display()
        )));
    }
    let serial = serial_matcher(root, &options.serial_globs)?;

    let mut paths: Vec<PathBuf> = WalkBuilder::new(root)
        .filter_entry(|entry| entry.depth() == 0 || is_relevant_path(entry.path()))
        .build()
        .filter_map(|entry| {
            let entry = entry.ok()?;
            let path = entry.path();
            if path.is_file() && has_supported_extension(path) {
                return Some(path.to_path_buf());
            }
            None
        })
        .collect();
    paths.sort();

    let items: Vec<WorkItem> = paths
        .into_iter()
        .map(|path| {
            let isolated = serial
                .as_ref()
                .is_some_and(|m| m.matched(&path, false).is_whitelist());
            let mut item = WorkItem::new(path)
                .with_flags(options.flags.clone())
                .for_store(options.target_store);
            if isolated {
                debug!("{} will run in isolation", item.path.display());
                let target = item.path.to_string_lossy().into_owned();
                item = item.isolated(target);
            }
            item
        })
        .collect();

    info!(
        "Discovered {} files under {} ({} isolated)",
        items.len(),
        root.display(),
        items.iter().filter(|i| i.run_in_isolation).count()
    );
    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn discovery_skips_hidden_and_build_dirs() {
        let dir = tempfile::tempdir().expect("tempdir should work");
        let root = dir.path();
        fs::create_dir_all(root.join("src")).expect("mkdir should work");
        fs::create_dir_all(root.join("target")).expect("mkdir should work");
        fs::create_dir_all(root.join(".cache")).expect("mkdir should work");
        fs::write(root.join("src/b.rs"), "fn b() {}").expect("write should work");
        fs::write(root.join("src/a.rs"), "fn a() {}").expect("write should work");
        fs::write(root.join("src/notes.txt"), "hi").expect("write should work");
        fs::write(root.join("target/gen.rs"), "fn g() {}").expect("write should work");
        fs::write(root.join(".cache/c.rs"), "fn c() {}").expect("write should work");

        let items = collect_work_items(root, &DiscoveryOptions::default())
            .expect("discovery should work");

        let names: Vec<_> = items
            .iter()
            .map(|i| i.path.strip_prefix(root).map(Path::to_path_buf))
            .collect::<std::result::Result<_, _>>()
            .expect("paths are under root");
        assert_eq!(names, vec![PathBuf::from("src/a.rs"), PathBuf::from("src/b.rs")]);
    }

    #[test]
    fn serial_globs_mark_items_isolated() {
        let dir = tempfile::tempdir().expect("tempdir should work");
        let root = dir.path();
        fs::write(root.join("big.cpp"), "").expect("write should work");
        fs::write(root.join("small.cpp"), "").expect("write should work");

        let options = DiscoveryOptions {
            serial_globs: vec!["big.*".to_string()],
            ..DiscoveryOptions::default()
        };
        let items = collect_work_items(root, &options).expect("discovery should work");

        let isolated: Vec<bool> = items.iter().map(|i| i.run_in_isolation).collect();
        assert_eq!(isolated, vec![true, false]);
    }
}
