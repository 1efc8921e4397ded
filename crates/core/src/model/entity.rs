use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::Id;

/// Node kinds, ordered from least to most specific.
///
/// Dedup keeps the greater kind, so an `Unknown` placeholder created by a
/// reference is upgraded once the declaration is seen, whatever the order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum NodeKind {
    Unknown,
    Module,
    Variable,
    Function,
    Method,
    Field,
    Enum,
    Struct,
    Interface,
    Trait,
    Class,
    File,
}

impl NodeKind {
    pub fn is_type(self) -> bool {
        matches!(
            self,
            NodeKind::Enum | NodeKind::Struct | NodeKind::Interface | NodeKind::Trait | NodeKind::Class
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EdgeKind {
    Member,
    Inheritance,
    Usage,
    Call,
    Include,
}

/// Weakest first: a referenced-only symbol is `Implicit`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum DefinitionKind {
    Implicit,
    Explicit,
}

/// Weakest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AccessKind {
    Unspecified,
    Private,
    Protected,
    Package,
    Public,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LocationKind {
    Token,
    Scope,
    LocalSymbol,
    Signature,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ComponentKind {
    /// The same name is declared more than once in one file.
    Ambiguous,
    Deprecated,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub id: Id,
    pub kind: NodeKind,
    /// Qualified name; the identity used for dedup.
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    /// Same id as the file's node.
    pub id: Id,
    pub path: PathBuf,
    pub language: String,
    pub modification_time: u64,
    pub indexed: bool,
    /// Memoized: indexed and free of fatal errors. Only meaningful after
    /// `CanonicalStore::refresh_file_status`.
    pub complete: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Symbol {
    pub id: Id,
    pub definition: DefinitionKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub id: Id,
    pub kind: EdgeKind,
    pub source: Id,
    pub target: Id,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalSymbol {
    pub id: Id,
    pub name: String,
}

/// 1-based, inclusive line/column range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start_line: u32,
    pub start_column: u32,
    pub end_line: u32,
    pub end_column: u32,
}

impl Span {
    pub fn on_line(line: u32, start_column: u32, end_column: u32) -> Self {
        Self {
            start_line: line,
            start_column,
            end_line: line,
            end_column,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLocation {
    pub id: Id,
    /// Node id of the file.
    pub file: Id,
    pub span: Span,
    pub kind: LocationKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Occurrence {
    /// A node, edge or local symbol id.
    pub element: Id,
    pub location: Id,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentAccess {
    pub node: Id,
    pub access: AccessKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ElementComponent {
    pub element: Id,
    pub kind: ComponentKind,
    pub data: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub id: Id,
    pub message: String,
    pub file: PathBuf,
    pub line: u32,
    pub column: u32,
    pub translation_unit: PathBuf,
    pub fatal: bool,
    pub indexed: bool,
}
