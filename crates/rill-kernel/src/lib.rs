//! Kernel worker for Rill notebooks.
//!
//! Runs as a subprocess, one per notebook, holding all interpreter state:
//! the script scope, the dependency graph with has-run tracking, and the
//! query backend configuration. The host talks to it over length-prefixed
//! JSON frames on stdin/stdout.
//!
//! The session is also usable in-process (see [`session::KernelSession`]),
//! which is how the execution semantics are tested.

pub mod convert;
pub mod imperative;
pub mod query;
pub mod session;

pub use convert::{ConverterRegistry, Probe};
pub use imperative::{ScriptExecutor, ScriptOutcome};
pub use query::{BindValue, QueryExecutor, QueryOutcome};
pub use session::KernelSession;
