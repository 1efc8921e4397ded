mod scanner;

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::model::{PartialGraph, WorkItem};

pub use scanner::DeclarationScanner;

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("cannot read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("{} is not valid UTF-8", path.display())]
    Encoding { path: PathBuf },
    #[error("analysis of {} failed: {message}", path.display())]
    Failed { path: PathBuf, message: String },
}

/// Turns one work item into a self-contained partial graph.
pub trait Analyzer: Send + Sync {
    fn analyze(&self, item: &WorkItem) -> Result<PartialGraph, AnalysisError>;
}

/// Analyze `item`, folding a failure into an error graph for that file.
pub fn analyze_or_record(analyzer: &dyn Analyzer, item: &WorkItem) -> PartialGraph {
    match analyzer.analyze(item) {
        Ok(graph) => graph,
        Err(err) => {
            tracing::warn!("{}", err);
            PartialGraph::from_failure(item, &err.to_string())
        }
    }
}

pub const SUPPORTED_EXTENSIONS: &[&str] = &[
    "rs", "java", "kt", "py", "go", "ts", "js", "c", "cc", "cpp", "h", "hpp", "swift",
];

pub fn language_for(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()).unwrap_or("") {
        "rs" => "rust",
        "java" => "java",
        "kt" => "kotlin",
        "py" => "python",
        "go" => "go",
        "ts" => "typescript",
        "js" => "javascript",
        "c" | "h" => "c",
        "cc" | "cpp" | "hpp" => "cpp",
        "swift" => "swift",
        _ => "text",
    }
}
