use std::io;
use std::path::PathBuf;

use vela_vm::error::VmError;
use vela_vm::module::ModuleError;

/// Errors from opening bundles and extracting program images.
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    #[error("bundle is {size} bytes; the payload starts after a one-page header")]
    BundleTooSmall { size: usize },
    #[error("bundle tag is longer than the reserved header page")]
    TagTooLong,
    #[error("cannot open bundle '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("cannot map bundle '{path}': {reason}")]
    Map { path: PathBuf, reason: String },
    #[error("precompiled bundle is missing export '{0}'")]
    MissingExport(&'static str),
    #[error(transparent)]
    Module(#[from] ModuleError),
    #[error(transparent)]
    Vm(#[from] VmError),
}
