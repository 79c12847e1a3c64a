use crate::StoreError;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Direct children of `dir`, sorted by path.
pub fn list_children(dir: &Path) -> Result<Vec<PathBuf>, StoreError> {
    let mut children = Vec::new();
    for entry in fs::read_dir(dir)? {
        children.push(entry?.path());
    }
    children.sort();
    Ok(children)
}

/// Recursively copy `src` into a new directory `dst`.
///
/// `dst` must not exist. A partially written copy is removed on failure.
pub fn copy_dir_all(src: &Path, dst: &Path) -> Result<usize, StoreError> {
    if dst.exists() {
        return Err(StoreError::Io(std::io::Error::new(
            std::io::ErrorKind::AlreadyExists,
            format!("{} already exists", dst.display()),
        )));
    }
    fs::create_dir_all(dst)?;
    let mut count = 0;
    if let Err(e) = copy_recursive(src, dst, &mut count) {
        if let Err(cleanup) = fs::remove_dir_all(dst) {
            warn!("failed to remove partial copy {}: {cleanup}", dst.display());
        }
        return Err(e);
    }
    debug!("copied {count} files from {} to {}", src.display(), dst.display());
    Ok(count)
}

fn copy_recursive(src: &Path, dst: &Path, count: &mut usize) -> Result<(), StoreError> {
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let src_path = entry.path();
        let dst_path = dst.join(entry.file_name());

        if entry.file_type()?.is_dir() {
            fs::create_dir_all(&dst_path)?;
            copy_recursive(&src_path, &dst_path, count)?;
        } else {
            fs::copy(&src_path, &dst_path)?;
            *count += 1;
        }
    }
    Ok(())
}

/// Move a file or directory, falling back to copy + remove when a plain
/// rename is not possible (e.g. across filesystems).
pub fn move_path(src: &Path, dst: &Path) -> Result<(), StoreError> {
    if dst.exists() {
        return Err(StoreError::Io(std::io::Error::new(
            std::io::ErrorKind::AlreadyExists,
            format!("{} already exists", dst.display()),
        )));
    }
    match fs::rename(src, dst) {
        Ok(()) => Ok(()),
        Err(e) => {
            debug!("rename {} failed ({e}), copying instead", src.display());
            if src.is_dir() {
                copy_dir_all(src, dst)?;
            } else {
                fs::copy(src, dst)?;
            }
            remove_path(src)
        }
    }
}

/// Remove a file or directory tree. Missing paths are not an error.
pub fn remove_path(path: &Path) -> Result<(), StoreError> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path)?,
        Ok(_) => fs::remove_file(path)?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }
    Ok(())
}
