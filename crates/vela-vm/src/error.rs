//! Runtime error types.

use crate::module::ModuleError;
use crate::resolver::ResolveError;
use crate::snapshot::SnapshotError;

/// Errors that can occur while embedding the Vela runtime.
#[derive(Debug, thiserror::Error)]
pub enum VmError {
    /// The embedding contract was violated. Callers treat this as
    /// unrecoverable: the runtime's internal invariants can no longer be
    /// trusted, so the expected reaction is a fatal log and process abort,
    /// never a retry.
    #[error("embedding contract violated: {0}")]
    Contract(String),

    /// Source parse error
    #[error("parse error at line {line}: {message}")]
    Parse { line: usize, message: String },

    /// A function name collides with one from an already loaded library.
    #[error("duplicate function '{name}' (already defined when loading {library})")]
    DuplicateFunction { name: String, library: String },

    /// Snapshot decode error
    #[error("snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),

    /// Loadable module error
    #[error("module error: {0}")]
    Module(#[from] ModuleError),

    /// Import resolution error
    #[error("{0}")]
    Resolve(#[from] ResolveError),

    /// A function referenced by name does not exist in the program.
    #[error("unknown function '{0}'")]
    UnknownFunction(String),

    /// The program signalled failure (a `fail` statement).
    #[error("failure: {0}")]
    Failure(String),
}
