//! Path and file primitives: atomic writes, extension-filtered directory
//! collection, and relative-path stripping (spec §4.9).

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::error::BuildError;

fn io_err(path: &Path, source: std::io::Error) -> BuildError {
    BuildError::Io { path: path.to_path_buf(), source }
}

/// Write `target` atomically: stage the full contents via `writer` into a
/// temp file alongside `target`, then rename over it. `target`'s parent
/// directories are created if missing. Each of the three ways this can
/// fail is surfaced as its own [`BuildError`] variant, named after the
/// teacher's own `StatusEnum{HasStreamErrors, FailedToRename,
/// FailedToCreateTempFile}`, so callers can tell "never got a temp file"
/// apart from "wrote a bad stream" apart from "couldn't rename into
/// place".
pub fn atomic_write(target: &Path, writer: impl FnOnce(&mut dyn Write) -> std::io::Result<()>) -> Result<(), BuildError> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
    }

    let mut tmp = tempfile::NamedTempFile::new_in(target.parent().unwrap_or_else(|| Path::new(".")))
        .map_err(|e| BuildError::FailedToCreateTempFile { path: target.to_path_buf(), source: e })?;

    if let Err(e) = writer(&mut tmp) {
        return Err(BuildError::HasStreamErrors { path: target.to_path_buf(), source: e });
    }
    if let Err(e) = tmp.flush() {
        return Err(BuildError::HasStreamErrors { path: target.to_path_buf(), source: e });
    }

    tmp.persist(target)
        .map_err(|e| BuildError::FailedToRename { path: target.to_path_buf(), source: e.error })
        .map(|_| ())
}

/// Breadth-first collection of every regular file under `root` whose
/// extension equals `extension`. Follows symlinks.
pub fn collect_files(root: &Path, extension: &str) -> Result<Vec<PathBuf>, BuildError> {
    let mut out = Vec::new();
    for entry in WalkDir::new(root).follow_links(true) {
        let entry = entry.map_err(|e| {
            BuildError::Io { path: e.path().map(Path::to_path_buf).unwrap_or_else(|| root.to_path_buf()), source: e.into() }
        })?;
        if entry.file_type().is_file() && entry.path().extension().map(|e| e == extension).unwrap_or(false) {
            out.push(entry.into_path());
        }
    }
    Ok(out)
}

/// Strip a leading occurrence of `parent` (made absolute first) and any
/// leading path separator from `path`.
pub fn make_relative(path: &Path, parent: &Path) -> PathBuf {
    let parent_abs = parent.canonicalize().unwrap_or_else(|_| parent.to_path_buf());
    let path_abs = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());

    match path_abs.strip_prefix(&parent_abs) {
        Ok(stripped) => stripped.to_path_buf(),
        Err(_) => path.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read as _;

    #[test]
    fn atomic_write_creates_parent_dirs_and_content() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("a/b/out.txt");
        atomic_write(&target, |w| w.write_all(b"hello")).unwrap();

        let mut contents = String::new();
        fs::File::open(&target).unwrap().read_to_string(&mut contents).unwrap();
        assert_eq!(contents, "hello");
    }

    #[test]
    fn atomic_write_never_leaves_partial_file_on_writer_error() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("out.txt");
        let result = atomic_write(&target, |_w| Err(std::io::Error::new(std::io::ErrorKind::Other, "boom")));
        assert!(result.is_err());
        assert!(!target.exists());
    }

    #[test]
    fn collect_files_filters_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("P1")).unwrap();
        fs::write(dir.path().join("P1/A.cppl"), b"").unwrap();
        fs::write(dir.path().join("P1/A.ldeps"), b"").unwrap();
        fs::write(dir.path().join("root.cppl"), b"").unwrap();

        let mut found = collect_files(dir.path(), "cppl").unwrap();
        found.sort();
        assert_eq!(found.len(), 2);
    }

    #[test]
    fn make_relative_strips_parent_prefix() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("P1")).unwrap();
        let file = dir.path().join("P1/A.cppl");
        fs::write(&file, b"").unwrap();

        let rel = make_relative(&file, dir.path());
        assert_eq!(rel, Path::new("P1/A.cppl"));
    }
}
