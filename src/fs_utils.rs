//! Small filesystem helpers shared by the pipeline.

use std::{fs, io};

use crate::prelude::*;

/// Copy the modification time of `src` onto `dst`.
///
/// The logical age of a processed document is the age of the scan, not of
/// the processing run.
pub fn copy_modified_time(src: &Path, dst: &Path) -> Result<()> {
    let modified = fs::metadata(src)
        .and_then(|meta| meta.modified())
        .with_context(|| format!("cannot read modification time of {:?}", src.display()))?;
    let file = fs::File::options()
        .write(true)
        .open(dst)
        .with_context(|| format!("cannot open {:?}", dst.display()))?;
    file.set_modified(modified)
        .with_context(|| format!("cannot set modification time of {:?}", dst.display()))
}

/// Delete a file if it exists. Failures are logged, not returned, because
/// this is only used to clean up after something else already failed.
pub fn remove_if_exists(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => debug!(path = %path.display(), "Removed file"),
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => warn!(path = %path.display(), "failed to remove file: {}", err),
    }
}

/// Make a file readable and writable by everyone, so that scanner shares
/// and sync clients running as other users can manage it.
#[cfg(unix)]
pub fn make_world_read_write(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt as _;
    fs::set_permissions(path, fs::Permissions::from_mode(0o666))
        .with_context(|| format!("cannot change permissions of {:?}", path.display()))
}

#[cfg(not(unix))]
pub fn make_world_read_write(_path: &Path) -> Result<()> {
    Ok(())
}

/// Choose a path in `dir` named `<base>.<ext>`, adding `_2`, `_3`, … if that
/// name is taken by a file other than `current`.
pub fn unique_target(dir: &Path, base: &str, ext: &str, current: &Path) -> PathBuf {
    let mut candidate = dir.join(format!("{base}.{ext}"));
    let mut n = 2;
    while candidate.exists() && candidate != current {
        candidate = dir.join(format!("{base}_{n}.{ext}"));
        n += 1;
    }
    candidate
}
