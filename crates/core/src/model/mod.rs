pub mod entity;
pub mod partial;
pub mod tables;
pub mod work;

pub use entity::{
    AccessKind, ComponentAccess, ComponentKind, DefinitionKind, EdgeKind, ElementComponent,
    ErrorRecord, FileRecord, LocalSymbol, LocationKind, Node, NodeKind, Occurrence,
    SourceLocation, Span, Symbol,
};
pub use partial::PartialGraph;
pub use tables::GraphTables;
pub use work::{AnalysisParams, IndexedFile, StoreId, WorkItem};

/// Entity id. Unique across every entity kind of one graph.
pub type Id = u64;

/// Reserved id meaning "no such entity".
pub const NO_ID: Id = 0;
