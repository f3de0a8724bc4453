//! Dependency-file emission for build systems.
//!
//! One line, `<build-output>: <dep> <dep> ...`, no trailing newline. The
//! input set is ordered, relative paths are absolutized against the cwd,
//! and symlinks resolve to their targets, so re-running a build writes a
//! byte-identical file.

use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

pub fn write_depfile(
    path: &Path,
    build_output: &str,
    deps: &BTreeSet<PathBuf>,
) -> io::Result<()> {
    fs::write(path, render(build_output, deps)?)
}

fn render(build_output: &str, deps: &BTreeSet<PathBuf>) -> io::Result<String> {
    let cwd = std::env::current_dir()?;
    let mut line = String::from(build_output);
    line.push(':');
    for dep in deps {
        let absolute = if dep.is_absolute() {
            dep.clone()
        } else {
            cwd.join(dep)
        };
        // A dep that vanished since it was read keeps its recorded path.
        let resolved = fs::canonicalize(&absolute).unwrap_or(absolute);
        line.push(' ');
        line.push_str(&resolved.to_string_lossy());
    }
    Ok(line)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_depfile_format() {
        let dir = tempfile::tempdir().unwrap();
        let dep_a = dir.path().join("a.vela");
        let dep_b = dir.path().join("b.vela");
        fs::write(&dep_a, "").unwrap();
        fs::write(&dep_b, "").unwrap();

        let deps: BTreeSet<PathBuf> = [dep_a.clone(), dep_b.clone()].into_iter().collect();
        let out = dir.path().join("app.depfile");
        write_depfile(&out, "app.snapshot", &deps).unwrap();

        let text = fs::read_to_string(&out).unwrap();
        assert!(text.starts_with("app.snapshot:"));
        assert!(!text.ends_with('\n'));
        assert_eq!(text.matches(".vela").count(), 2);
    }

    #[test]
    fn test_rerun_is_byte_identical() {
        let dir = tempfile::tempdir().unwrap();
        let dep = dir.path().join("main.vela");
        fs::write(&dep, "").unwrap();
        let deps: BTreeSet<PathBuf> = [dep].into_iter().collect();

        let first = dir.path().join("first.depfile");
        let second = dir.path().join("second.depfile");
        write_depfile(&first, "out", &deps).unwrap();
        write_depfile(&second, "out", &deps).unwrap();
        assert_eq!(fs::read(&first).unwrap(), fs::read(&second).unwrap());
    }

    #[test]
    fn test_symlinks_resolve_to_targets() {
        #[cfg(unix)]
        {
            let dir = tempfile::tempdir().unwrap();
            let target = dir.path().join("real.vela");
            fs::write(&target, "").unwrap();
            let link = dir.path().join("link.vela");
            std::os::unix::fs::symlink(&target, &link).unwrap();

            let deps: BTreeSet<PathBuf> = [link].into_iter().collect();
            let text = render("out", &deps).unwrap();
            assert!(text.contains("real.vela"));
            assert!(!text.contains("link.vela"));
        }
    }
}
