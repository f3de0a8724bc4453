//! Program-image extraction from content bundles.
//!
//! The build mode decides what the payload is; it is never sniffed from
//! the bundle. Interpretable payloads are used in place as a slice of the
//! bundle memory. Precompiled payloads are opened as a loadable module at
//! the one-page offset, and the module (with the bundle backing it) stays
//! loaded for the rest of the process.

use vela_vm::module::{Module, SNAPSHOT_DATA_EXPORT, SNAPSHOT_INSTRUCTIONS_EXPORT};
use vela_vm::snapshot::ImageMode;
use vela_vm::ProgramImage;

use crate::bundle::{page_size, ContentBundle};
use crate::error::RunnerError;

/// Extract the program image from a bundle for the given build mode.
pub fn extract_image<'b>(
    bundle: &'b ContentBundle,
    mode: ImageMode,
) -> Result<ProgramImage<'b>, RunnerError> {
    match mode {
        ImageMode::Interpretable => {
            let script = bundle.payload()?;
            Ok(ProgramImage::Interpretable { script })
        }
        ImageMode::Precompiled => {
            // Checks the size contract before the module parse runs.
            bundle.payload()?;
            let module = Module::open(bundle.share_backing(), page_size())?;
            let data = module
                .export(SNAPSHOT_DATA_EXPORT)
                .ok_or(RunnerError::MissingExport(SNAPSHOT_DATA_EXPORT))?;
            let instructions = module
                .export(SNAPSHOT_INSTRUCTIONS_EXPORT)
                .ok_or(RunnerError::MissingExport(SNAPSHOT_INSTRUCTIONS_EXPORT))?;
            Ok(ProgramImage::Precompiled { data, instructions })
        }
    }
}
