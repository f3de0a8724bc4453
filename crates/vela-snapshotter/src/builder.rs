//! Image building.

use std::io;
use std::path::PathBuf;

use vela_vm::error::VmError;
use vela_vm::host;
use vela_vm::loader;
use vela_vm::resolver::{FileResolver, ResolveError};
use vela_vm::snapshot::{self, ImageMode};

use crate::depfile;

/// The entry points a precompiled image must keep: the program's entry
/// plus the hook symbols the runner's builtin libraries invoke.
pub const ENTRY_POINTS: &[&str] = &[
    "main",
    "_setup_hooks",
    "_schedule_microtask",
    "_print",
    "_raw_script_url",
    "_environment",
    "_outgoing_services",
];

/// A validated build request.
#[derive(Debug)]
pub enum BuildRequest {
    /// Write only the shared runtime image.
    VmImage { output: PathBuf },
    /// Build an app image from source.
    App {
        main_source: String,
        packages: PathBuf,
        snapshot: PathBuf,
        /// Depfile path and the build-output name it is keyed on.
        depfile: Option<(PathBuf, String)>,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error(transparent)]
    Vm(#[from] VmError),
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error("cannot write '{path}': {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl BuildError {
    /// Whether the failure is an embedding-contract violation rather than
    /// a build-input problem.
    pub fn is_contract_violation(&self) -> bool {
        matches!(self, BuildError::Vm(VmError::Contract(_)))
    }
}

/// Run one build. The host must already be initialized.
pub fn build(request: &BuildRequest, mode: ImageMode) -> Result<(), BuildError> {
    match request {
        BuildRequest::VmImage { output } => {
            let flags = host::flags()?;
            let image = snapshot::write_vm_image(mode, &flags);
            write(output, &image)
        }
        BuildRequest::App {
            main_source,
            packages,
            snapshot: snapshot_path,
            depfile,
        } => {
            let mut resolver = FileResolver::with_packages_map(packages)?;
            let mut program = loader::load_program(&mut resolver, main_source)?;
            loader::finalize(&mut program)?;

            let image = match mode {
                ImageMode::Interpretable => snapshot::serialize_program(&program),
                ImageMode::Precompiled => {
                    loader::precompile(&mut program, ENTRY_POINTS)?;
                    loader::write_app_module(&program)?
                }
            };
            write(snapshot_path, &image)?;

            if let Some((depfile_path, build_output)) = depfile {
                depfile::write_depfile(depfile_path, build_output, resolver.dependencies())
                    .map_err(|source| BuildError::Write {
                        path: depfile_path.clone(),
                        source,
                    })?;
            }
            Ok(())
        }
    }
}

fn write(path: &PathBuf, bytes: &[u8]) -> Result<(), BuildError> {
    std::fs::write(path, bytes).map_err(|source| BuildError::Write {
        path: path.clone(),
        source,
    })
}
