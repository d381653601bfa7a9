//! Filesystem helpers used by the job cache and job preparation.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

/// Returns the modification time of `path` in seconds since the epoch.
///
/// Directories are expanded: with `dir_depth > 0` the newest mtime of their
/// entries (recursing `dir_depth - 1` levels) is returned instead of the
/// directory's own mtime. Symlinks report their own mtime. A missing path
/// reports `0.0`.
#[must_use]
pub fn get_mtime(path: &Path, dir_depth: u32) -> f64 {
    let Ok(meta) = fs::symlink_metadata(path) else {
        return 0.0;
    };

    let is_dir = if meta.file_type().is_symlink() {
        path.is_dir()
    } else {
        meta.is_dir()
    };

    if dir_depth == 0 || !is_dir {
        return mtime_of(&meta);
    }

    let Ok(entries) = fs::read_dir(path) else {
        return 0.0;
    };
    entries
        .filter_map(std::result::Result::ok)
        .map(|entry| get_mtime(&entry.path(), dir_depth - 1))
        .fold(0.0, f64::max)
}

fn mtime_of(meta: &fs::Metadata) -> f64 {
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map_or(0.0, |d| d.as_secs_f64())
}

/// Writes `content` to `path` only when the file is missing or differs.
///
/// Keeping the file untouched preserves its mtime, which the cache compares
/// against. Returns true if the file was written.
pub fn write_if_changed(path: &Path, content: &str) -> io::Result<bool> {
    if let Ok(existing) = fs::read_to_string(path) {
        if existing == content {
            return Ok(false);
        }
    }
    fs::write(path, content)?;
    Ok(true)
}

/// Returns the last `lines` lines of a text file, or an empty string.
#[must_use]
pub fn tail_lines(path: &Path, lines: usize) -> String {
    let Ok(content) = fs::read_to_string(path) else {
        return String::new();
    };
    let all: Vec<&str> = content.lines().collect();
    let start = all.len().saturating_sub(lines);
    all[start..].join("\n")
}

/// Reads an integer return code from a file such as `job.rc`.
#[must_use]
pub fn read_rc(path: &Path) -> Option<i32> {
    fs::read_to_string(path).ok()?.trim().parse().ok()
}

/// Removes a file, symlink or directory tree if it exists.
pub fn remove_path(path: &Path) -> io::Result<()> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path),
        Ok(_) => fs::remove_file(path),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Links `target` at `link`, copying when symlinks are unavailable.
pub fn symlink_or_copy(target: &Path, link: &Path) -> io::Result<()> {
    #[cfg(unix)]
    {
        std::os::unix::fs::symlink(target, link)
    }
    #[cfg(not(unix))]
    {
        if target.is_dir() {
            copy_dir(target, link)
        } else {
            fs::copy(target, link).map(|_| ())
        }
    }
}

#[cfg(not(unix))]
fn copy_dir(from: &Path, to: &Path) -> io::Result<()> {
    fs::create_dir_all(to)?;
    for entry in fs::read_dir(from)? {
        let entry = entry?;
        let dest = to.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir(&entry.path(), &dest)?;
        } else {
            fs::copy(entry.path(), dest)?;
        }
    }
    Ok(())
}

/// Returns true if `link` already points at (or is a copy of) `target`.
#[must_use]
pub fn links_to(link: &Path, target: &Path) -> bool {
    match fs::read_link(link) {
        Ok(dest) => dest == target,
        Err(_) => {
            let (Ok(a), Ok(b)) = (fs::canonicalize(link), fs::canonicalize(target)) else {
                return false;
            };
            a == b
        }
    }
}

/// Makes `path` absolute against the current directory without resolving symlinks.
pub fn absolutize(path: &Path) -> io::Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}
