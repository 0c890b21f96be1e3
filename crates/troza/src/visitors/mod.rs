//! AST visitor implementations for troza
//!
//! Visitors walk a parsed module once and collect the references the graph builder and the
//! manifest builder need.

mod import_discovery;

pub use import_discovery::{
    DiscoveredImport, DynamicLoad, DynamicLoadTarget, ImportDiscoveryVisitor, ImportKind,
};
