//! Content bundles.
//!
//! A bundle is the delivery format for a program image: a one-page reserved
//! header carrying the padded build tag, then the payload at exactly one
//! page offset. Keeping the payload page-aligned lets precompiled modules
//! be opened straight out of a read-only file mapping.
//!
//! Backings are `Arc`-shared: a module opened from a bundle pins the
//! backing for the life of the process even after the bundle handle is
//! dropped.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use vela_vm::module::ModuleBacking;

use crate::error::RunnerError;

/// Size of the reserved bundle header.
pub fn page_size() -> usize {
    #[cfg(unix)]
    {
        let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        if size > 0 {
            return size as usize;
        }
        4096
    }
    #[cfg(not(unix))]
    {
        4096
    }
}

/// A read-only file mapping, unmapped on drop.
#[cfg(unix)]
struct MappedRegion {
    ptr: *mut libc::c_void,
    len: usize,
}

#[cfg(unix)]
impl MappedRegion {
    fn map(file: &fs::File, len: usize, path: &Path) -> Result<Self, RunnerError> {
        use std::os::unix::io::AsRawFd;
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ,
                libc::MAP_PRIVATE,
                file.as_raw_fd(),
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(RunnerError::Map {
                path: path.to_path_buf(),
                reason: std::io::Error::last_os_error().to_string(),
            });
        }
        Ok(Self { ptr, len })
    }

    fn bytes(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.ptr as *const u8, self.len) }
    }
}

#[cfg(unix)]
impl Drop for MappedRegion {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.ptr, self.len);
        }
    }
}

// The mapping is PROT_READ and never remapped, so shared access is fine.
#[cfg(unix)]
unsafe impl Send for MappedRegion {}
#[cfg(unix)]
unsafe impl Sync for MappedRegion {}

/// Memory backing a bundle: an owned buffer or a read-only file mapping.
pub struct BundleData {
    inner: Backing,
}

enum Backing {
    Owned(Vec<u8>),
    #[cfg(unix)]
    Mapped(MappedRegion),
}

impl BundleData {
    fn owned(bytes: Vec<u8>) -> Self {
        Self {
            inner: Backing::Owned(bytes),
        }
    }

    #[cfg(unix)]
    fn mapped(region: MappedRegion) -> Self {
        Self {
            inner: Backing::Mapped(region),
        }
    }

    pub fn data(&self) -> &[u8] {
        match &self.inner {
            Backing::Owned(bytes) => bytes,
            #[cfg(unix)]
            Backing::Mapped(region) => region.bytes(),
        }
    }
}

impl ModuleBacking for BundleData {
    fn bytes(&self) -> &[u8] {
        self.data()
    }
}

/// A handle onto one content bundle.
pub struct ContentBundle {
    data: Arc<BundleData>,
    label: String,
}

impl ContentBundle {
    /// Open a bundle file. On unix the file is mapped read-only; the
    /// mapping lives as long as anything still shares the backing.
    pub fn open(path: &Path) -> Result<Self, RunnerError> {
        #[cfg(unix)]
        {
            let file = fs::File::open(path).map_err(|source| RunnerError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            let len = file
                .metadata()
                .map_err(|source| RunnerError::Io {
                    path: path.to_path_buf(),
                    source,
                })?
                .len() as usize;
            if len == 0 {
                return Ok(Self::from_bytes(Vec::new()));
            }
            let region = MappedRegion::map(&file, len, path)?;
            Ok(Self {
                data: Arc::new(BundleData::mapped(region)),
                label: String::new(),
            })
        }
        #[cfg(not(unix))]
        {
            let bytes = fs::read(path).map_err(|source| RunnerError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            Ok(Self::from_bytes(bytes))
        }
    }

    /// Wrap an in-memory bundle.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self {
            data: Arc::new(BundleData::owned(bytes)),
            label: String::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.data.data().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn bytes(&self) -> &[u8] {
        self.data.data()
    }

    /// The image payload: everything past the reserved header page.
    pub fn payload(&self) -> Result<&[u8], RunnerError> {
        let page = page_size();
        let bytes = self.data.data();
        if bytes.len() <= page {
            return Err(RunnerError::BundleTooSmall { size: bytes.len() });
        }
        Ok(&bytes[page..])
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn set_label(&mut self, label: &str) {
        self.label = label.to_string();
    }

    /// Share the backing memory, e.g. to pin it under a loaded module.
    pub fn share_backing(&self) -> Arc<BundleData> {
        Arc::clone(&self.data)
    }
}

/// Write a bundle file: the tag padded to one page, then the payload.
pub fn write_bundle(path: &Path, tag: &str, payload: &[u8]) -> Result<(), RunnerError> {
    let bytes = bundle_bytes(tag, payload)?;
    fs::write(path, bytes).map_err(|source| RunnerError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Assemble bundle bytes in memory.
pub fn bundle_bytes(tag: &str, payload: &[u8]) -> Result<Vec<u8>, RunnerError> {
    let page = page_size();
    if tag.len() > page {
        return Err(RunnerError::TagTooLong);
    }
    let mut bytes = Vec::with_capacity(page + payload.len());
    bytes.extend_from_slice(tag.as_bytes());
    bytes.resize(page, 0);
    bytes.extend_from_slice(payload);
    Ok(bytes)
}
