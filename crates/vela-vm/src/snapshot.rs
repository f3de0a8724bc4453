//! Program image formats.
//!
//! All images use little-endian encoding with a four-byte magic, a format
//! version, and a crc32 checksum over the body.
//!
//! Three blob kinds exist:
//! - **script image** (`VELS`): the serialized state of a loaded program,
//!   consumed by interpretable-mode contexts.
//! - **app snapshot parts**: the data/instructions pair exported by a
//!   precompiled (`VELM`) module — the function table lives in the data
//!   blob, the statement streams in the instructions blob.
//! - **VM image** (`VELV`): the shared runtime image that records which
//!   format version and host flag set a precompiled app was built against.

use crate::program::{Function, Program, Stmt};

/// Magic bytes for a serialized script image.
pub const SCRIPT_MAGIC: [u8; 4] = *b"VELS";

/// Magic bytes for a shared runtime (VM) image.
pub const VM_MAGIC: [u8; 4] = *b"VELV";

/// Current image format version.
pub const SNAPSHOT_VERSION: u16 = 1;

/// Whether a program image holds precompiled snapshots or an interpretable
/// script. This is a whole-build choice selected by the `aot` cargo feature,
/// never inferred from bundle contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageMode {
    Precompiled,
    Interpretable,
}

impl ImageMode {
    /// The mode this crate was compiled for.
    pub fn for_build() -> Self {
        if cfg!(feature = "aot") {
            ImageMode::Precompiled
        } else {
            ImageMode::Interpretable
        }
    }

    pub(crate) fn tag(self) -> u8 {
        match self {
            ImageMode::Precompiled => 1,
            ImageMode::Interpretable => 0,
        }
    }

    pub(crate) fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(ImageMode::Precompiled),
            0 => Some(ImageMode::Interpretable),
            _ => None,
        }
    }
}

/// The program image extracted from a content bundle.
///
/// Both variants are pointer/length views — extraction never copies payload
/// bytes. Precompiled slices are `'static` because the backing module is
/// never unloaded for the life of the process.
#[derive(Debug, Clone, Copy)]
pub enum ProgramImage<'b> {
    Precompiled {
        data: &'static [u8],
        instructions: &'static [u8],
    },
    Interpretable {
        script: &'b [u8],
    },
}

/// Errors from decoding any image blob.
#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("bad magic")]
    BadMagic,
    #[error("unsupported image version {0}")]
    UnsupportedVersion(u16),
    #[error("checksum mismatch")]
    ChecksumMismatch,
    #[error("truncated image")]
    Truncated,
    #[error("invalid statement tag {0}")]
    BadStatement(u8),
    #[error("invalid string data")]
    BadString,
    #[error("invalid mode tag {0}")]
    BadMode(u8),
}

// ---------------------------------------------------------------------------
// Script image

/// Serialize a loaded program into a relocatable script image.
pub fn serialize_program(program: &Program) -> Vec<u8> {
    let mut body = Vec::new();
    write_u32(&mut body, program.libraries().len() as u32);
    for url in program.libraries() {
        write_str(&mut body, url);
    }
    write_u32(&mut body, program.function_count() as u32);
    for function in program.functions() {
        write_str(&mut body, &function.name);
        let encoded = encode_body(&function.body);
        write_u32(&mut body, encoded.len() as u32);
        body.extend_from_slice(&encoded);
    }

    let mut image = Vec::with_capacity(body.len() + 14);
    image.extend_from_slice(&SCRIPT_MAGIC);
    image.extend_from_slice(&SNAPSHOT_VERSION.to_le_bytes());
    image.extend_from_slice(&crc32fast::hash(&body).to_le_bytes());
    image.extend_from_slice(&(body.len() as u32).to_le_bytes());
    image.extend_from_slice(&body);
    image
}

/// Decode a script image back into a program.
pub fn deserialize_program(image: &[u8]) -> Result<Program, SnapshotError> {
    let mut reader = Reader::new(image);
    if reader.bytes(4)? != &SCRIPT_MAGIC[..] {
        return Err(SnapshotError::BadMagic);
    }
    let version = reader.u16()?;
    if version != SNAPSHOT_VERSION {
        return Err(SnapshotError::UnsupportedVersion(version));
    }
    let checksum = reader.u32()?;
    let body_len = reader.u32()? as usize;
    let body = reader.bytes(body_len)?;
    if crc32fast::hash(body) != checksum {
        return Err(SnapshotError::ChecksumMismatch);
    }

    let mut reader = Reader::new(body);
    let library_count = reader.u32()?;
    let mut libraries = Vec::with_capacity(library_count as usize);
    for _ in 0..library_count {
        libraries.push(reader.str()?);
    }
    let function_count = reader.u32()?;
    let mut functions = Vec::with_capacity(function_count as usize);
    for _ in 0..function_count {
        let name = reader.str()?;
        let body_len = reader.u32()? as usize;
        let body = decode_body(reader.bytes(body_len)?)?;
        functions.push(Function { name, body });
    }
    Ok(Program::from_parts(libraries, functions))
}

// ---------------------------------------------------------------------------
// App snapshot parts (precompiled mode)

/// Split a precompiled program into the data/instructions blob pair.
///
/// The instructions blob is the concatenation of every function's encoded
/// statement stream; the data blob holds the library list and the function
/// table (name, offset, length) plus a crc32 binding it to the instructions
/// blob it was emitted with.
pub fn serialize_app_parts(program: &Program) -> (Vec<u8>, Vec<u8>) {
    let mut instructions = Vec::new();
    let mut table = Vec::new();
    for function in program.functions() {
        let encoded = encode_body(&function.body);
        table.push((function.name.clone(), instructions.len() as u64, encoded.len() as u64));
        instructions.extend_from_slice(&encoded);
    }

    let mut data = Vec::new();
    data.extend_from_slice(&SNAPSHOT_VERSION.to_le_bytes());
    data.extend_from_slice(&crc32fast::hash(&instructions).to_le_bytes());
    write_u32(&mut data, program.libraries().len() as u32);
    for url in program.libraries() {
        write_str(&mut data, url);
    }
    write_u32(&mut data, table.len() as u32);
    for (name, offset, len) in table {
        write_str(&mut data, &name);
        data.extend_from_slice(&offset.to_le_bytes());
        data.extend_from_slice(&len.to_le_bytes());
    }
    (data, instructions)
}

/// Reconstruct a program from the data/instructions pair of a precompiled
/// module.
pub fn deserialize_app_parts(data: &[u8], instructions: &[u8]) -> Result<Program, SnapshotError> {
    let mut reader = Reader::new(data);
    let version = reader.u16()?;
    if version != SNAPSHOT_VERSION {
        return Err(SnapshotError::UnsupportedVersion(version));
    }
    let checksum = reader.u32()?;
    if crc32fast::hash(instructions) != checksum {
        return Err(SnapshotError::ChecksumMismatch);
    }
    let library_count = reader.u32()?;
    let mut libraries = Vec::with_capacity(library_count as usize);
    for _ in 0..library_count {
        libraries.push(reader.str()?);
    }
    let function_count = reader.u32()?;
    let mut functions = Vec::with_capacity(function_count as usize);
    for _ in 0..function_count {
        let name = reader.str()?;
        let offset = reader.u64()? as usize;
        let len = reader.u64()? as usize;
        let end = offset.checked_add(len).ok_or(SnapshotError::Truncated)?;
        let stream = instructions
            .get(offset..end)
            .ok_or(SnapshotError::Truncated)?;
        let body = decode_body(stream)?;
        functions.push(Function { name, body });
    }
    Ok(Program::from_parts(libraries, functions))
}

// ---------------------------------------------------------------------------
// VM image

/// Decoded header of a shared runtime image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmImageInfo {
    pub version: u16,
    pub mode: ImageMode,
    /// crc32 over the host flag set the image was produced with.
    pub flags_fingerprint: u32,
}

/// Serialize the shared runtime image for the given mode and host flags.
pub fn write_vm_image(mode: ImageMode, flags: &[String]) -> Vec<u8> {
    let mut image = Vec::new();
    image.extend_from_slice(&VM_MAGIC);
    image.extend_from_slice(&SNAPSHOT_VERSION.to_le_bytes());
    image.push(mode.tag());
    image.extend_from_slice(&flags_fingerprint(flags).to_le_bytes());
    image
}

/// Decode and validate a shared runtime image header.
pub fn read_vm_image(image: &[u8]) -> Result<VmImageInfo, SnapshotError> {
    let mut reader = Reader::new(image);
    if reader.bytes(4)? != &VM_MAGIC[..] {
        return Err(SnapshotError::BadMagic);
    }
    let version = reader.u16()?;
    if version != SNAPSHOT_VERSION {
        return Err(SnapshotError::UnsupportedVersion(version));
    }
    let tag = reader.u8()?;
    let mode = ImageMode::from_tag(tag).ok_or(SnapshotError::BadMode(tag))?;
    let flags_fingerprint = reader.u32()?;
    Ok(VmImageInfo {
        version,
        mode,
        flags_fingerprint,
    })
}

/// Fingerprint of a host flag set, for app/VM image compatibility checks.
pub fn flags_fingerprint(flags: &[String]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    for flag in flags {
        hasher.update(flag.as_bytes());
        hasher.update(b"\n");
    }
    hasher.finalize()
}

// ---------------------------------------------------------------------------
// Statement stream codec

const TAG_PRINT: u8 = 1;
const TAG_CALL: u8 = 2;
const TAG_SCHEDULE: u8 = 3;
const TAG_DEFER: u8 = 4;
const TAG_FAIL: u8 = 5;
const TAG_RETURN: u8 = 6;

pub(crate) fn encode_body(body: &[Stmt]) -> Vec<u8> {
    let mut out = Vec::new();
    write_u32(&mut out, body.len() as u32);
    for stmt in body {
        match stmt {
            Stmt::Print(text) => {
                out.push(TAG_PRINT);
                write_str(&mut out, text);
            }
            Stmt::Call(name) => {
                out.push(TAG_CALL);
                write_str(&mut out, name);
            }
            Stmt::Schedule(name) => {
                out.push(TAG_SCHEDULE);
                write_str(&mut out, name);
            }
            Stmt::Defer(name) => {
                out.push(TAG_DEFER);
                write_str(&mut out, name);
            }
            Stmt::Fail(reason) => {
                out.push(TAG_FAIL);
                write_str(&mut out, reason);
            }
            Stmt::Return(code) => {
                out.push(TAG_RETURN);
                out.extend_from_slice(&code.to_le_bytes());
            }
        }
    }
    out
}

pub(crate) fn decode_body(stream: &[u8]) -> Result<Vec<Stmt>, SnapshotError> {
    let mut reader = Reader::new(stream);
    let count = reader.u32()?;
    let mut body = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let tag = reader.u8()?;
        let stmt = match tag {
            TAG_PRINT => Stmt::Print(reader.str()?),
            TAG_CALL => Stmt::Call(reader.str()?),
            TAG_SCHEDULE => Stmt::Schedule(reader.str()?),
            TAG_DEFER => Stmt::Defer(reader.str()?),
            TAG_FAIL => Stmt::Fail(reader.str()?),
            TAG_RETURN => Stmt::Return(reader.i32()?),
            other => return Err(SnapshotError::BadStatement(other)),
        };
        body.push(stmt);
    }
    Ok(body)
}

// ---------------------------------------------------------------------------
// Little-endian helpers

fn write_u32(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_le_bytes());
}

fn write_str(out: &mut Vec<u8>, value: &str) {
    write_u32(out, value.len() as u32);
    out.extend_from_slice(value.as_bytes());
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn bytes(&mut self, len: usize) -> Result<&'a [u8], SnapshotError> {
        let end = self.pos.checked_add(len).ok_or(SnapshotError::Truncated)?;
        let slice = self.data.get(self.pos..end).ok_or(SnapshotError::Truncated)?;
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, SnapshotError> {
        Ok(self.bytes(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, SnapshotError> {
        let b = self.bytes(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32, SnapshotError> {
        let b = self.bytes(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn i32(&mut self) -> Result<i32, SnapshotError> {
        let b = self.bytes(4)?;
        Ok(i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self) -> Result<u64, SnapshotError> {
        let b = self.bytes(8)?;
        Ok(u64::from_le_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }

    fn str(&mut self) -> Result<String, SnapshotError> {
        let len = self.u32()? as usize;
        let bytes = self.bytes(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| SnapshotError::BadString)
    }
}
