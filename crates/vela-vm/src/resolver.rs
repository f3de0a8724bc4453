//! Import resolution.
//!
//! Every loader answers the same three-operation protocol: canonicalize a
//! URL relative to an importing library, import a URL as a new library,
//! and fetch source text for a URL. Keeping the protocol a trait (rather
//! than one function branching on a tag) makes resolvers substitutable in
//! tests.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

/// The resolution request kinds the runtime can issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LibraryTag {
    Canonicalize,
    Import,
    Source,
    /// Issued by runtimes with script-tag support; this embedder has none,
    /// so dispatching it is a reportable library-tag error.
    Script,
}

/// Errors from resolving imports.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("unknown library tag {0:?}")]
    UnknownTag(LibraryTag),
    #[error("cannot resolve '{url}': {reason}")]
    Unresolved { url: String, reason: String },
    #[error("unknown package '{0}'")]
    UnknownPackage(String),
    #[error("malformed packages map at line {line}: {message}")]
    PackagesMap { line: usize, message: String },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// The three-operation import-resolution protocol.
pub trait ImportResolver {
    /// Canonicalize `url` relative to the library importing it.
    fn canonicalize(&mut self, url: &str, importing_library: &str)
        -> Result<String, ResolveError>;

    /// Import a canonical URL as a new library, returning its source text.
    fn import(&mut self, url: &str) -> Result<String, ResolveError>;

    /// Fetch source text for a URL within an already imported library.
    fn fetch_source(&mut self, url: &str) -> Result<String, ResolveError>;
}

/// Dispatch a resolution request by tag.
pub fn dispatch_library_tag<R: ImportResolver + ?Sized>(
    resolver: &mut R,
    tag: LibraryTag,
    importing_library: &str,
    url: &str,
) -> Result<String, ResolveError> {
    match tag {
        LibraryTag::Canonicalize => resolver.canonicalize(url, importing_library),
        LibraryTag::Import => resolver.import(url),
        LibraryTag::Source => resolver.fetch_source(url),
        LibraryTag::Script => Err(ResolveError::UnknownTag(tag)),
    }
}

/// Filesystem-backed resolver driven by a packages map.
///
/// The map file has one `name:path` entry per line (`#` starts a comment);
/// paths may be relative to the map file's directory. `package:NAME/REST`
/// URLs resolve through the map, everything else is a plain path. Every
/// distinct file read is recorded so the builder can emit a dependency
/// file afterwards.
#[derive(Debug)]
pub struct FileResolver {
    packages: BTreeMap<String, PathBuf>,
    dependencies: BTreeSet<PathBuf>,
}

impl FileResolver {
    /// A resolver with no package map; only plain paths resolve.
    pub fn new() -> Self {
        Self {
            packages: BTreeMap::new(),
            dependencies: BTreeSet::new(),
        }
    }

    /// Load a packages map file.
    pub fn with_packages_map(path: &Path) -> Result<Self, ResolveError> {
        let text = fs::read_to_string(path)?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        let mut packages = BTreeMap::new();
        for (index, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((name, target)) = line.split_once(':') else {
                return Err(ResolveError::PackagesMap {
                    line: index + 1,
                    message: "expected 'name:path'".to_string(),
                });
            };
            let name = name.trim();
            if name.is_empty() {
                return Err(ResolveError::PackagesMap {
                    line: index + 1,
                    message: "empty package name".to_string(),
                });
            }
            let target = Path::new(target.trim());
            let target = if target.is_absolute() {
                target.to_path_buf()
            } else {
                base.join(target)
            };
            packages.insert(name.to_string(), target);
        }
        let mut dependencies = BTreeSet::new();
        dependencies.insert(path.to_path_buf());
        Ok(Self {
            packages,
            dependencies,
        })
    }

    /// Every distinct file visited while resolving, in path order.
    pub fn dependencies(&self) -> &BTreeSet<PathBuf> {
        &self.dependencies
    }

    fn url_to_path(&self, url: &str) -> Result<PathBuf, ResolveError> {
        if let Some(rest) = url.strip_prefix("package:") {
            let Some((name, tail)) = rest.split_once('/') else {
                return Err(ResolveError::Unresolved {
                    url: url.to_string(),
                    reason: "package URL is missing a file path".to_string(),
                });
            };
            let root = self
                .packages
                .get(name)
                .ok_or_else(|| ResolveError::UnknownPackage(name.to_string()))?;
            return Ok(root.join(tail));
        }
        Ok(PathBuf::from(url.strip_prefix("file://").unwrap_or(url)))
    }

    fn read(&mut self, url: &str) -> Result<String, ResolveError> {
        let path = self.url_to_path(url)?;
        let text = fs::read_to_string(&path).map_err(|err| ResolveError::Unresolved {
            url: url.to_string(),
            reason: err.to_string(),
        })?;
        self.dependencies.insert(path);
        Ok(text)
    }
}

impl Default for FileResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl ImportResolver for FileResolver {
    fn canonicalize(&mut self, url: &str, importing_library: &str) -> Result<String, ResolveError> {
        // Package URLs and absolute paths stand on their own; relative
        // paths resolve against the importing library's directory.
        if url.starts_with("package:") || Path::new(url).is_absolute() {
            return Ok(url.to_string());
        }
        if importing_library.is_empty() || importing_library.starts_with("package:") {
            return Ok(url.to_string());
        }
        let base = self.url_to_path(importing_library)?;
        let dir = base.parent().unwrap_or_else(|| Path::new("."));
        Ok(dir.join(url).to_string_lossy().into_owned())
    }

    fn import(&mut self, url: &str) -> Result<String, ResolveError> {
        self.read(url)
    }

    fn fetch_source(&mut self, url: &str) -> Result<String, ResolveError> {
        self.read(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_file(dir: &Path, name: &str, contents: &str) -> PathBuf {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        let mut file = fs::File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_packages_map_parsing() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "util/util.vela", "fn helper {\n}\n");
        let map = write_file(
            dir.path(),
            "packages",
            "# comment\nutil:util\n\nother:/abs/other\n",
        );
        let mut resolver = FileResolver::with_packages_map(&map).unwrap();
        let source = resolver.import("package:util/util.vela").unwrap();
        assert!(source.contains("helper"));
    }

    #[test]
    fn test_malformed_packages_map() {
        let dir = tempfile::tempdir().unwrap();
        let map = write_file(dir.path(), "packages", "no-colon-here\n");
        let err = FileResolver::with_packages_map(&map).unwrap_err();
        assert!(matches!(err, ResolveError::PackagesMap { line: 1, .. }));
    }

    #[test]
    fn test_unknown_package() {
        let mut resolver = FileResolver::new();
        let err = resolver.import("package:missing/lib.vela").unwrap_err();
        assert!(matches!(err, ResolveError::UnknownPackage(name) if name == "missing"));
    }

    #[test]
    fn test_canonicalize_relative_to_importer() {
        let mut resolver = FileResolver::new();
        let canonical = resolver
            .canonicalize("util.vela", "/srv/app/main.vela")
            .unwrap();
        assert_eq!(canonical, "/srv/app/util.vela");
    }

    #[test]
    fn test_canonicalize_keeps_package_urls() {
        let mut resolver = FileResolver::new();
        let canonical = resolver
            .canonicalize("package:util/util.vela", "/srv/app/main.vela")
            .unwrap();
        assert_eq!(canonical, "package:util/util.vela");
    }

    #[test]
    fn test_dependencies_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let main = write_file(dir.path(), "main.vela", "fn main {\nreturn 0;\n}\n");
        let mut resolver = FileResolver::new();
        resolver.import(main.to_str().unwrap()).unwrap();
        assert!(resolver.dependencies().contains(&main));
    }

    #[test]
    fn test_unknown_tag_is_reported() {
        let mut resolver = FileResolver::new();
        let err = dispatch_library_tag(&mut resolver, LibraryTag::Script, "", "main.vela")
            .unwrap_err();
        assert!(matches!(err, ResolveError::UnknownTag(LibraryTag::Script)));
    }
}
