use std::collections::BTreeMap;
use std::path::Path;
use std::sync::OnceLock;
use std::time::SystemTime;

use regex::{Captures, Regex};

use super::{AnalysisError, Analyzer, language_for};
use crate::model::{
    AccessKind, ComponentKind, DefinitionKind, EdgeKind, ErrorRecord, Id, LocationKind, NO_ID,
    NodeKind, PartialGraph, Span, WorkItem,
};

/// Skips `let`/`var` bindings when present in the item's flags.
pub const NO_LOCALS_FLAG: &str = "no-locals";

/// Regexes shared by every scan.
struct Patterns {
    declaration: Regex,
    implementation: Regex,
    supertypes: Regex,
    local: Regex,
    deprecated: Regex,
}

impl Patterns {
    fn compile() -> Result<Self, regex::Error> {
        Ok(Self {
            declaration: Regex::new(
                r"^\s*(?:(pub(?:\([^)]*\))?|public|private|protected|internal)\s+)?(?:(?:static|async|abstract|final|export|unsafe|const|override|open|data|sealed)\s+)*(fn|struct|enum|trait|class|interface|def|func)\s+([A-Za-z_][A-Za-z0-9_]*)",
            )?,
            implementation: Regex::new(
                r"^\s*impl(?:<[^>]*>)?\s+([A-Za-z_][A-Za-z0-9_]*)(?:<[^>]*>)?(?:\s+for\s+([A-Za-z_][A-Za-z0-9_]*))?",
            )?,
            supertypes: Regex::new(
                r"\b(?:extends|implements)\s+([A-Za-z_][\w.]*(?:\s*,\s*[A-Za-z_][\w.]*)*)",
            )?,
            local: Regex::new(r"\b(?:let|var)\s+(?:mut\s+)?([A-Za-z_][A-Za-z0-9_]*)")?,
            deprecated: Regex::new(r"(?i)(?:#\[deprecated|@deprecated)")?,
        })
    }

    /// Compiled once per process; a compile error is returned to every caller.
    fn shared() -> Result<&'static Self, regex::Error> {
        static PATTERNS: OnceLock<Result<Patterns, regex::Error>> = OnceLock::new();
        PATTERNS
            .get_or_init(Self::compile)
            .as_ref()
            .map_err(Clone::clone)
    }
}

/// Line-based declaration scanner used when no language analyzer is plugged in.
///
/// Recognizes `fn`, `struct`, `enum`, `trait`, `class`, `interface`, `def` and
/// `func` declarations with their access modifiers, Rust `impl` blocks,
/// `extends`/`implements` clauses and `let`/`var` locals. Members are
/// qualified by their enclosing type (`Type::member`).
#[derive(Debug, Default, Clone, Copy)]
pub struct DeclarationScanner;

impl DeclarationScanner {
    pub fn new() -> Self {
        Self
    }

    pub fn scan_source(
        &self,
        item: &WorkItem,
        source: &str,
        modification_time: u64,
    ) -> Result<PartialGraph, AnalysisError> {
        let patterns = Patterns::shared().map_err(|err| AnalysisError::Failed {
            path: item.path.clone(),
            message: format!("declaration patterns do not compile: {err}"),
        })?;
        let mut scan = FileScan::new(item, patterns, modification_time);
        for (index, line) in source.lines().enumerate() {
            scan.line(index as u32 + 1, line);
        }
        Ok(scan.finish(source))
    }
}

impl Analyzer for DeclarationScanner {
    fn analyze(&self, item: &WorkItem) -> Result<PartialGraph, AnalysisError> {
        let bytes = std::fs::read(&item.path).map_err(|source| AnalysisError::Read {
            path: item.path.clone(),
            source,
        })?;
        let source = String::from_utf8(bytes).map_err(|_| AnalysisError::Encoding {
            path: item.path.clone(),
        })?;
        self.scan_source(item, &source, modification_time(&item.path))
    }
}

fn modification_time(path: &Path) -> u64 {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|t| t.duration_since(SystemTime::UNIX_EPOCH).ok())
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

struct Scope {
    node: Id,
    name: String,
    indent: usize,
}

struct FileScan<'a> {
    item: &'a WorkItem,
    patterns: &'static Patterns,
    graph: PartialGraph,
    file: Id,
    file_key: String,
    with_locals: bool,
    scope: Option<Scope>,
    deprecated_pending: bool,
    declared_at: BTreeMap<String, Vec<u32>>,
}

impl<'a> FileScan<'a> {
    fn new(item: &'a WorkItem, patterns: &'static Patterns, modification_time: u64) -> Self {
        let mut graph = PartialGraph::new();
        let file = graph.add_file_node(
            &item.path,
            language_for(&item.path),
            modification_time,
            true,
        );
        Self {
            item,
            patterns,
            graph,
            file,
            file_key: item.path.to_string_lossy().into_owned(),
            with_locals: !item.params.flags.iter().any(|f| f == NO_LOCALS_FLAG),
            scope: None,
            deprecated_pending: false,
            declared_at: BTreeMap::new(),
        }
    }

    fn line(&mut self, number: u32, line: &str) {
        let trimmed = line.trim_start();
        if trimmed.is_empty() {
            return;
        }
        let indent = line.len() - trimmed.len();
        let leaves_scope = self
            .scope
            .as_ref()
            .is_some_and(|s| indent <= s.indent && !trimmed.starts_with('}'));
        if leaves_scope {
            self.scope = None;
        }

        if self.patterns.deprecated.is_match(line) {
            self.deprecated_pending = true;
        }

        if let Some(caps) = self.patterns.implementation.captures(line) {
            self.impl_block(number, indent, &caps);
        } else if let Some(caps) = self.patterns.declaration.captures(line) {
            self.declaration(number, indent, line, &caps);
        } else if self.with_locals {
            if let Some(caps) = self.patterns.local.captures(line) {
                self.local(number, &caps);
            }
        }
    }

    fn declaration(&mut self, number: u32, indent: usize, line: &str, caps: &Captures<'_>) {
        let (Some(keyword), Some(name)) = (caps.get(2), caps.get(3)) else {
            return;
        };
        let in_type = self.scope.as_ref().filter(|s| indent > s.indent);
        let kind = match keyword.as_str() {
            "struct" => NodeKind::Struct,
            "enum" => NodeKind::Enum,
            "trait" => NodeKind::Trait,
            "class" => NodeKind::Class,
            "interface" => NodeKind::Interface,
            _ if in_type.is_some() => NodeKind::Method,
            _ => NodeKind::Function,
        };
        let (qualified, parent) = match in_type {
            Some(scope) => (format!("{}::{}", scope.name, name.as_str()), Some(scope.node)),
            None => (name.as_str().to_string(), None),
        };

        let node = self.graph.add_node(kind, &qualified);
        self.graph.add_symbol(node, DefinitionKind::Explicit);
        let span = Span::on_line(number, name.start() as u32 + 1, name.end() as u32);
        let location = self.graph.add_location(self.file, span, LocationKind::Token);
        self.graph.add_occurrence(node, location);

        if let Some(parent) = parent {
            self.graph.add_edge(EdgeKind::Member, parent, node);
        }
        if let Some(modifier) = caps.get(1) {
            self.graph
                .add_component_access(node, access_for(modifier.as_str()));
        }
        if std::mem::take(&mut self.deprecated_pending) {
            self.graph
                .add_element_component(node, ComponentKind::Deprecated, "");
        }
        self.declared_at
            .entry(qualified.clone())
            .or_default()
            .push(number);

        if kind.is_type() {
            for clause in self.patterns.supertypes.captures_iter(line) {
                let Some(list) = clause.get(1) else {
                    continue;
                };
                for supertype in list.as_str().split(',') {
                    self.inherit(node, supertype.trim());
                }
            }
            self.scope = Some(Scope {
                node,
                name: qualified,
                indent,
            });
        }
    }

    fn impl_block(&mut self, number: u32, indent: usize, caps: &Captures<'_>) {
        let Some(first) = caps.get(1) else {
            return;
        };
        // `impl Trait for Type` or `impl Type`
        let (target, implemented) = match caps.get(2) {
            Some(target) => (target, Some(first)),
            None => (first, None),
        };

        let node = self.graph.add_node(NodeKind::Unknown, target.as_str());
        self.graph.add_symbol(node, DefinitionKind::Implicit);
        let span = Span::on_line(number, target.start() as u32 + 1, target.end() as u32);
        let location = self.graph.add_location(self.file, span, LocationKind::Token);
        self.graph.add_occurrence(node, location);

        if let Some(implemented) = implemented {
            self.inherit(node, implemented.as_str());
        }
        self.scope = Some(Scope {
            node,
            name: target.as_str().to_string(),
            indent,
        });
    }

    fn inherit(&mut self, node: Id, supertype: &str) {
        if supertype.is_empty() {
            return;
        }
        let parent = self.graph.add_node(NodeKind::Unknown, supertype);
        self.graph.add_symbol(parent, DefinitionKind::Implicit);
        self.graph.add_edge(EdgeKind::Inheritance, node, parent);
    }

    fn local(&mut self, number: u32, caps: &Captures<'_>) {
        let Some(name) = caps.get(1) else {
            return;
        };
        let qualified = format!("{}:{}:{}", self.file_key, number, name.as_str());
        let local = self.graph.add_local_symbol(&qualified);
        let span = Span::on_line(number, name.start() as u32 + 1, name.end() as u32);
        let location = self
            .graph
            .add_location(self.file, span, LocationKind::LocalSymbol);
        self.graph.add_occurrence(local, location);
    }

    fn finish(mut self, source: &str) -> PartialGraph {
        for (name, lines) in &self.declared_at {
            if lines.len() < 2 {
                continue;
            }
            let Some(node) = self.graph.node_by_name(name).map(|n| n.id) else {
                continue;
            };
            let data = lines
                .iter()
                .map(u32::to_string)
                .collect::<Vec<_>>()
                .join(",");
            self.graph
                .add_element_component(node, ComponentKind::Ambiguous, &data);
        }

        let opening = source.matches('{').count();
        let closing = source.matches('}').count();
        if opening != closing {
            self.graph.add_error(&ErrorRecord {
                id: NO_ID,
                message: format!("unbalanced braces ({opening} opening, {closing} closing)"),
                file: self.item.path.clone(),
                line: source.lines().count() as u32,
                column: 0,
                translation_unit: self.item.path.clone(),
                fatal: false,
                indexed: true,
            });
        }

        self.graph
    }
}

fn access_for(modifier: &str) -> AccessKind {
    match modifier {
        "pub" | "public" => AccessKind::Public,
        "protected" => AccessKind::Protected,
        "private" => AccessKind::Private,
        // pub(crate), pub(super), internal
        _ => AccessKind::Package,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scan(path: &str, source: &str) -> PartialGraph {
        DeclarationScanner::new()
            .scan_source(&WorkItem::new(path), source, 7)
            .expect("scan should work")
    }

    #[test]
    fn every_pattern_compiles() {
        let patterns = Patterns::compile().expect("patterns should compile");
        assert!(patterns.declaration.is_match("pub fn run() {"));
        assert!(patterns.deprecated.is_match("    @Deprecated"));
        assert!(Patterns::shared().is_ok());
    }

    fn kind_of(graph: &PartialGraph, name: &str) -> Option<NodeKind> {
        graph.node_by_name(name).map(|n| n.kind)
    }

    #[test]
    fn rust_impl_members_are_qualified() {
        let graph = scan(
            "src/shape.rs",
            "pub struct Circle {\n    r: f64,\n}\n\nimpl Shape for Circle {\n    fn area(&self) -> f64 {\n        let r2 = self.r * self.r;\n        r2\n    }\n}\n\nfn main() {}\n",
        );

        assert_eq!(kind_of(&graph, "Circle"), Some(NodeKind::Struct));
        assert_eq!(kind_of(&graph, "Shape"), Some(NodeKind::Unknown));
        assert_eq!(kind_of(&graph, "Circle::area"), Some(NodeKind::Method));
        assert_eq!(kind_of(&graph, "main"), Some(NodeKind::Function));

        let circle = graph.node_by_name("Circle").map(|n| n.id);
        let area = graph.node_by_name("Circle::area").map(|n| n.id);
        assert!(graph.edges().iter().any(|e| e.kind == EdgeKind::Member
            && Some(e.source) == circle
            && Some(e.target) == area));
        assert!(graph.edges().iter().any(|e| e.kind == EdgeKind::Inheritance));
        assert_eq!(graph.local_symbols().len(), 1);
        assert!(graph.errors().is_empty());
        assert_eq!(graph.files()[0].language, "rust");
    }

    #[test]
    fn java_class_records_access_and_supertypes() {
        let graph = scan(
            "src/Dog.java",
            "@Deprecated\npublic class Dog extends Animal implements Named, Walker {\n}\n",
        );

        let dog = graph.node_by_name("Dog").map(|n| n.id).unwrap_or(NO_ID);
        assert_eq!(graph.access(dog), Some(AccessKind::Public));
        assert_eq!(
            graph
                .edges()
                .iter()
                .filter(|e| e.kind == EdgeKind::Inheritance && e.source == dog)
                .count(),
            3
        );
        assert!(graph
            .element_components()
            .iter()
            .any(|c| c.element == dog && c.kind == ComponentKind::Deprecated));
    }

    #[test]
    fn duplicate_declarations_are_marked_ambiguous() {
        let graph = scan("a.py", "def run():\n    pass\n\ndef run():\n    pass\n");

        let component = graph
            .element_components()
            .iter()
            .find(|c| c.kind == ComponentKind::Ambiguous)
            .cloned();
        assert_eq!(component.map(|c| c.data), Some("1,4".to_string()));
    }

    #[test]
    fn unbalanced_braces_are_a_non_fatal_error() {
        let graph = scan("broken.rs", "fn broken() {\n");

        assert_eq!(graph.errors().len(), 1);
        assert!(!graph.errors()[0].fatal);
        assert_eq!(kind_of(&graph, "broken"), Some(NodeKind::Function));
    }

    #[test]
    fn locals_can_be_disabled_by_flag() {
        let item = WorkItem::new("x.rs").with_flags(vec![NO_LOCALS_FLAG.to_string()]);
        let graph = DeclarationScanner::new()
            .scan_source(&item, "fn f() {\n    let a = 1;\n}\n", 0)
            .expect("scan should work");

        assert!(graph.local_symbols().is_empty());
    }

    #[test]
    fn unreadable_file_is_an_analysis_error() {
        let err = DeclarationScanner::new()
            .analyze(&WorkItem::new("/definitely/not/here.rs"))
            .expect_err("missing file must fail");
        assert!(matches!(err, AnalysisError::Read { .. }));
    }
}
