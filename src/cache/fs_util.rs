//! Filesystem helpers for publishing and restoring cache entries

use log::trace;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::errors::{ExtrasError, IoContext, Result};

/// Copy `src` to `dest` so that `dest` either does not exist or holds the
/// complete file. The copy goes to a temporary file in `dest`'s directory
/// which is then renamed into place. File permissions are preserved.
pub(crate) fn publish_file(src: &Path, dest: &Path) -> Result<()> {
    let parent = dest.parent().ok_or_else(|| ExtrasError::InvalidPath {
        path: dest.to_path_buf(),
        reason: "destination has no parent directory".to_string(),
    })?;

    let mut source = File::open(src)
        .io_context(|| format!("failed to open built artifact {}", src.display()))?;
    let permissions = source
        .metadata()
        .io_context(|| format!("failed to stat built artifact {}", src.display()))?
        .permissions();

    fs::create_dir_all(parent)
        .io_context(|| format!("failed to create cache directory {}", parent.display()))?;

    // Dropped (and removed) on any early return below.
    let mut tmp = tempfile::Builder::new()
        .prefix(".publish-")
        .tempfile_in(parent)
        .io_context(|| format!("failed to create temporary file in {}", parent.display()))?;
    trace!("Copying {} via {}", src.display(), tmp.path().display());

    io::copy(&mut source, tmp.as_file_mut())
        .io_context(|| format!("failed to copy {} into the cache", src.display()))?;
    tmp.as_file()
        .set_permissions(permissions)
        .io_context(|| format!("failed to set permissions on {}", tmp.path().display()))?;
    tmp.as_file()
        .sync_all()
        .io_context(|| format!("failed to flush {}", tmp.path().display()))?;

    tmp.persist(dest).map_err(|e| {
        ExtrasError::io(
            format!("failed to move artifact into place at {}", dest.display()),
            e.error,
        )
    })?;
    Ok(())
}

/// Recursively copy the contents of `src` into `dest`, overwriting files that
/// already exist. Returns the copied files relative to `src`, sorted.
pub(crate) fn copy_tree(src: &Path, dest: &Path) -> Result<Vec<PathBuf>> {
    let mut copied = Vec::new();

    for entry in WalkDir::new(src).follow_links(true).sort_by_file_name() {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(src).to_path_buf();
            ExtrasError::io(
                format!("failed to walk {}", path.display()),
                e.into_io_error()
                    .unwrap_or_else(|| io::Error::other("filesystem loop detected")),
            )
        })?;

        let rel = entry
            .path()
            .strip_prefix(src)
            .map_err(|_| ExtrasError::InvalidPath {
                path: entry.path().to_path_buf(),
                reason: format!("not under {}", src.display()),
            })?;
        let target = dest.join(rel);

        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)
                .io_context(|| format!("failed to create directory {}", target.display()))?;
        } else {
            fs::copy(entry.path(), &target).io_context(|| {
                format!(
                    "failed to copy {} to {}",
                    entry.path().display(),
                    target.display()
                )
            })?;
            copied.push(rel.to_path_buf());
        }
    }

    copied.sort();
    Ok(copied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_publish_file_creates_parents() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("a.out");
        fs::write(&src, b"binary").unwrap();
        let dest = tmp.path().join("x/y/z/a.out");

        publish_file(&src, &dest).unwrap();
        assert_eq!(fs::read(&dest).unwrap(), b"binary");

        // Only the published file is left behind.
        let entries: Vec<_> = fs::read_dir(dest.parent().unwrap()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn test_publish_missing_source_leaves_nothing() {
        let tmp = TempDir::new().unwrap();
        let dest = tmp.path().join("cache/a.out");
        assert!(publish_file(&tmp.path().join("missing"), &dest).is_err());
        assert!(!dest.exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_publish_preserves_mode() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("run.sh");
        fs::write(&src, "#!/bin/sh\n").unwrap();
        fs::set_permissions(&src, fs::Permissions::from_mode(0o755)).unwrap();
        let dest = tmp.path().join("out/run.sh");

        publish_file(&src, &dest).unwrap();
        let mode = fs::metadata(&dest).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
    }

    #[test]
    fn test_copy_tree() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("src");
        fs::create_dir_all(src.join("sub")).unwrap();
        fs::write(src.join("a.txt"), "a").unwrap();
        fs::write(src.join("sub/b.txt"), "b").unwrap();
        let dest = tmp.path().join("dest");
        fs::create_dir_all(&dest).unwrap();

        let copied = copy_tree(&src, &dest).unwrap();
        assert_eq!(
            copied,
            vec![PathBuf::from("a.txt"), PathBuf::from("sub/b.txt")]
        );
        assert_eq!(fs::read_to_string(dest.join("sub/b.txt")).unwrap(), "b");
    }
}
