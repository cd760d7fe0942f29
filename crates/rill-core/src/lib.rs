//! Core engine for the Rill reactive notebook server.
//!
//! This crate provides the substrate shared between the server and the
//! kernel process:
//! - Data model for notebooks, cells, and output bundles
//! - Static dependency extraction for both cell languages
//! - The name-based dependency graph with cycle rejection
//! - The kernel IPC protocol and process manager
//! - Persistence and authentication capabilities

pub mod auth;
pub mod deps;
pub mod error;
pub mod graph;
pub mod ipc;
pub mod model;
pub mod store;

pub use error::{Error, Result};
pub use graph::DepGraph;
pub use model::{
    Cell, CellId, CellStatus, CellType, Notebook, NotebookId, NotebookRecord, Output,
    PrincipalId,
};
