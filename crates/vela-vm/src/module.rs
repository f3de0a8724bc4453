//! In-memory loadable modules.
//!
//! A precompiled program image is shipped as a `VELM` module: a small
//! binary with a named-export table in front of a blob section.
//!
//! ```text
//! ┌─────────────────────────┐
//! │  Header                 │  ← magic, version, blob checksum
//! ├─────────────────────────┤
//! │  Export Table           │  ← name, offset, length per export
//! ├─────────────────────────┤
//! │  Blob Section           │  ← export payloads, back to back
//! └─────────────────────────┘
//! ```
//!
//! Modules are opened directly from the backing memory that holds them —
//! no temporary file, no payload copy. An opened module is registered in a
//! process-global table and is **never unloaded**: managed heap objects may
//! reference its blobs for the remainder of process life, so module
//! lifetime equals process lifetime and no unload operation is exposed.

use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::Mutex;

/// Magic bytes identifying a loadable module.
pub const MODULE_MAGIC: [u8; 4] = *b"VELM";

/// Current module format version.
pub const MODULE_VERSION: u16 = 1;

/// Export name of the program snapshot data blob.
pub const SNAPSHOT_DATA_EXPORT: &str = "_vela_snapshot_data";

/// Export name of the program snapshot instructions blob.
pub const SNAPSHOT_INSTRUCTIONS_EXPORT: &str = "_vela_snapshot_instructions";

/// Memory that can back a loaded module.
///
/// The backing is shared (`Arc`) so the module can pin it for the life of
/// the process while the original owner goes away.
pub trait ModuleBacking: Send + Sync + 'static {
    fn bytes(&self) -> &[u8];
}

impl ModuleBacking for Vec<u8> {
    fn bytes(&self) -> &[u8] {
        self
    }
}

/// Errors from opening a module or resolving its exports.
#[derive(Debug, thiserror::Error)]
pub enum ModuleError {
    #[error("bad module magic")]
    BadMagic,
    #[error("unsupported module version {0}")]
    UnsupportedVersion(u16),
    #[error("truncated module")]
    Truncated,
    #[error("module checksum mismatch")]
    ChecksumMismatch,
    #[error("invalid export name")]
    BadExportName,
    #[error("export '{0}' is out of bounds")]
    ExportOutOfBounds(String),
}

/// A module opened from backing memory.
///
/// Only ever handed out as `&'static Module`; see [`Module::open`].
pub struct Module {
    backing: Arc<dyn ModuleBacking>,
    /// Offset of the module within the backing memory.
    base: usize,
    /// Export name → (offset, len), relative to the module start.
    exports: HashMap<String, (usize, usize)>,
}

// Loaded modules live until process exit. The table is only ever appended
// to; there is deliberately no way to remove an entry.
static LOADED_MODULES: Lazy<Mutex<Vec<&'static Module>>> = Lazy::new(|| Mutex::new(Vec::new()));

impl Module {
    /// Open a module located at `base` within `backing`.
    ///
    /// On success the module is registered in the process-global table and
    /// a `'static` reference is returned. Repeated opens of the same region
    /// each register a fresh entry; none is ever unloaded.
    pub fn open(
        backing: Arc<dyn ModuleBacking>,
        base: usize,
    ) -> Result<&'static Module, ModuleError> {
        let exports = {
            let bytes = backing.bytes();
            let region = bytes.get(base..).ok_or(ModuleError::Truncated)?;
            parse_exports(region)?
        };
        let module = Box::leak(Box::new(Module {
            backing,
            base,
            exports,
        }));
        LOADED_MODULES.lock().push(module);
        Ok(module)
    }

    /// Resolve a named export to its payload bytes.
    pub fn export<'a>(&'a self, name: &str) -> Option<&'a [u8]> {
        let &(offset, len) = self.exports.get(name)?;
        let region = &self.backing.bytes()[self.base..];
        // Bounds were validated at open time.
        Some(&region[offset..offset + len])
    }

    /// Number of named exports.
    pub fn export_count(&self) -> usize {
        self.exports.len()
    }
}

/// Number of modules loaded so far in this process.
pub fn loaded_module_count() -> usize {
    LOADED_MODULES.lock().len()
}

/// Serialize a module with the given named exports.
pub fn write_module(exports: &[(&str, &[u8])]) -> Vec<u8> {
    // Header: magic + version + blob checksum + export count.
    let header_len = 4 + 2 + 4 + 4;
    let table_len: usize = exports
        .iter()
        .map(|(name, _)| 4 + name.len() + 8 + 8)
        .sum();
    let blob_start = header_len + table_len;

    let mut blobs = Vec::new();
    let mut table = Vec::new();
    for (name, payload) in exports {
        let offset = (blob_start + blobs.len()) as u64;
        table.extend_from_slice(&(name.len() as u32).to_le_bytes());
        table.extend_from_slice(name.as_bytes());
        table.extend_from_slice(&offset.to_le_bytes());
        table.extend_from_slice(&(payload.len() as u64).to_le_bytes());
        blobs.extend_from_slice(payload);
    }

    let mut module = Vec::with_capacity(blob_start + blobs.len());
    module.extend_from_slice(&MODULE_MAGIC);
    module.extend_from_slice(&MODULE_VERSION.to_le_bytes());
    module.extend_from_slice(&crc32fast::hash(&blobs).to_le_bytes());
    module.extend_from_slice(&(exports.len() as u32).to_le_bytes());
    module.extend_from_slice(&table);
    module.extend_from_slice(&blobs);
    module
}

fn take<'a>(region: &'a [u8], pos: &mut usize, len: usize) -> Result<&'a [u8], ModuleError> {
    let end = pos.checked_add(len).ok_or(ModuleError::Truncated)?;
    let slice = region.get(*pos..end).ok_or(ModuleError::Truncated)?;
    *pos = end;
    Ok(slice)
}

fn parse_exports(region: &[u8]) -> Result<HashMap<String, (usize, usize)>, ModuleError> {
    let mut pos = 0usize;

    if take(region, &mut pos, 4)? != &MODULE_MAGIC[..] {
        return Err(ModuleError::BadMagic);
    }
    let version = {
        let b = take(region, &mut pos, 2)?;
        u16::from_le_bytes([b[0], b[1]])
    };
    if version != MODULE_VERSION {
        return Err(ModuleError::UnsupportedVersion(version));
    }
    let checksum = {
        let b = take(region, &mut pos, 4)?;
        u32::from_le_bytes([b[0], b[1], b[2], b[3]])
    };
    let count = {
        let b = take(region, &mut pos, 4)?;
        u32::from_le_bytes([b[0], b[1], b[2], b[3]])
    };

    let mut exports = HashMap::with_capacity(count as usize);
    for _ in 0..count {
        let name_len = {
            let b = take(region, &mut pos, 4)?;
            u32::from_le_bytes([b[0], b[1], b[2], b[3]]) as usize
        };
        let name = std::str::from_utf8(take(region, &mut pos, name_len)?)
            .map_err(|_| ModuleError::BadExportName)?
            .to_string();
        let offset = {
            let b = take(region, &mut pos, 8)?;
            u64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]) as usize
        };
        let len = {
            let b = take(region, &mut pos, 8)?;
            u64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]) as usize
        };
        let end = offset.checked_add(len).ok_or(ModuleError::Truncated)?;
        if end > region.len() {
            return Err(ModuleError::ExportOutOfBounds(name));
        }
        exports.insert(name, (offset, len));
    }

    // The blob section starts where the table ended.
    if crc32fast::hash(&region[pos..]) != checksum {
        return Err(ModuleError::ChecksumMismatch);
    }

    Ok(exports)
}
