//! Static dependency extraction for cell source text.
//!
//! This module provides:
//! - A logos lexer for the imperative cell language
//! - A top-level walker computing the `(reads, writes)` sets of a cell
//! - Template-placeholder scanning and rewriting for query cells
//!
//! Extraction is pure and deterministic; source that fails to lex or has a
//! broken top-level structure yields empty sets (the cell's own execution
//! will surface the syntax error).

mod builtins;
mod imperative;
mod lexer;
mod query;

use std::collections::BTreeSet;

use crate::model::CellType;

pub use imperative::extract_imperative;
pub use query::{extract_query, rewrite_placeholders};

/// The names a cell consumes from and defines into the notebook namespace.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DepSets {
    pub reads: BTreeSet<String>,
    pub writes: BTreeSet<String>,
}

/// Extract the dependency sets of a cell.
///
/// Query cells only read (every distinct `{name}` placeholder); imperative
/// cells are analyzed by the top-level walker.
pub fn extract(code: &str, cell_type: CellType) -> DepSets {
    match cell_type {
        CellType::Imperative => extract_imperative(code),
        CellType::Query => DepSets {
            reads: extract_query(code),
            writes: BTreeSet::new(),
        },
    }
}
