//! Source loading and offline precompilation.
//!
//! Loading walks the import graph breadth-first from a root library,
//! canonicalizing each URL against its importer and merging every library
//! into one program. Precompilation then strips the program down to what
//! the fixed entry-point set can reach and emits the data/instructions
//! module consumed by precompiled-mode contexts.

use std::collections::{BTreeSet, VecDeque};

use crate::error::VmError;
use crate::host;
use crate::module::{self, SNAPSHOT_DATA_EXPORT, SNAPSHOT_INSTRUCTIONS_EXPORT};
use crate::program::{parse_library, Program, Stmt};
use crate::resolver::{dispatch_library_tag, ImportResolver, LibraryTag};
use crate::snapshot;

/// Load the root library and everything it transitively imports.
pub fn load_program<R: ImportResolver + ?Sized>(
    resolver: &mut R,
    root_url: &str,
) -> Result<Program, VmError> {
    host::require_initialized("program loading")?;

    let mut program = Program::new();
    let mut visited = BTreeSet::new();
    let mut queue = VecDeque::new();
    queue.push_back(root_url.to_string());
    visited.insert(root_url.to_string());

    while let Some(url) = queue.pop_front() {
        let source = dispatch_library_tag(resolver, LibraryTag::Import, "", &url)?;
        let library = parse_library(&url, &source)?;
        for import in &library.imports {
            let canonical = dispatch_library_tag(resolver, LibraryTag::Canonicalize, &url, import)?;
            if visited.insert(canonical.clone()) {
                queue.push_back(canonical);
            }
        }
        program.add_library(library)?;
    }
    Ok(program)
}

/// Finish loading: after this the program accepts no more libraries and is
/// eligible for serialization and precompilation.
pub fn finalize(program: &mut Program) -> Result<(), VmError> {
    if program.is_sealed() {
        return Err(VmError::Contract(
            "program loading finalized twice".to_string(),
        ));
    }
    program.seal();
    Ok(())
}

/// Precompile a finalized program against a fixed entry-point set.
///
/// Every entry point that exists is a reachability root; functions nothing
/// reaches are dropped from the program. A missing entry point is not an
/// error, unreachable roots simply contribute nothing.
pub fn precompile(program: &mut Program, entry_points: &[&str]) -> Result<(), VmError> {
    if !program.is_sealed() {
        return Err(VmError::Contract(
            "precompilation before loading was finalized".to_string(),
        ));
    }

    let mut keep = BTreeSet::new();
    let mut queue: VecDeque<String> = entry_points
        .iter()
        .filter(|name| program.function(name).is_some())
        .map(|name| name.to_string())
        .collect();
    for name in &queue {
        keep.insert(name.clone());
    }

    while let Some(name) = queue.pop_front() {
        let Some(function) = program.function(&name) else {
            continue;
        };
        let callees: Vec<String> = function
            .body
            .iter()
            .filter_map(|stmt| match stmt {
                Stmt::Call(callee) | Stmt::Schedule(callee) | Stmt::Defer(callee) => {
                    Some(callee.clone())
                }
                _ => None,
            })
            .collect();
        for callee in callees {
            if keep.insert(callee.clone()) {
                queue.push_back(callee);
            }
        }
    }

    program.retain_functions(&keep);
    Ok(())
}

/// Emit a precompiled program as a loadable module exporting the snapshot
/// data/instructions pair under the well-known names.
pub fn write_app_module(program: &Program) -> Result<Vec<u8>, VmError> {
    if !program.is_sealed() {
        return Err(VmError::Contract(
            "module emission before loading was finalized".to_string(),
        ));
    }
    let (data, instructions) = snapshot::serialize_app_parts(program);
    Ok(module::write_module(&[
        (SNAPSHOT_DATA_EXPORT, &data),
        (SNAPSHOT_INSTRUCTIONS_EXPORT, &instructions),
    ]))
}
