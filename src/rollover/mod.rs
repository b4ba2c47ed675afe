// Rollover module - Discovery of rotated log families

use crate::error::{LogSyncError, Result};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::debug;
use walkdir::WalkDir;

/// Default highest numeric suffix probed when resolving a chain
pub const DEFAULT_MAX_SUFFIX: u32 = 20;

/// Extensions listed by [`find_log_files`]
const LOG_EXTENSIONS: [&str; 4] = ["log", "txt", "out", "err"];

/// Compressed siblings are never part of a readable chain
const COMPRESSED_EXTENSIONS: [&str; 5] = ["gz", "bz2", "xz", "zip", "zst"];

/// Numeric rollover suffix of a file name (`app.log.3` -> 3)
///
/// Only a number following a log extension counts, so `data.2024` or
/// `release.1` are plain files rather than rotated links.
pub fn rollover_suffix(path: &Path) -> Option<u32> {
    let name = path.file_name()?.to_str()?;
    let (base, suffix) = name.rsplit_once('.')?;
    if suffix.is_empty() || !suffix.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let (_, ext) = base.rsplit_once('.')?;
    if !LOG_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()) {
        return None;
    }
    suffix.parse().ok()
}

/// Strip a numeric rollover suffix so any link of a chain resolves to its base
pub fn base_path(path: &Path) -> PathBuf {
    match rollover_suffix(path) {
        Some(_) => path.with_extension(""),
        None => path.to_path_buf(),
    }
}

/// Resolve the rollover chain of a log file, oldest first
///
/// Numbered siblings `<base>.N` are probed up to `max_suffix` and ordered by
/// descending suffix, followed by the base file. Gaps in the numbering are
/// tolerated. When no numbered sibling exists, other files sharing the base's
/// stem (`app.log` / `app.old`) are ordered by modification time instead.
///
/// # Returns
/// * `Ok(Vec<PathBuf>)` - Chain ordered oldest to newest
/// * `Err(LogSyncError::NotFound)` - Neither the base nor any sibling exists
pub fn discover(path: &Path, max_suffix: u32) -> Result<Vec<PathBuf>> {
    let base = base_path(path);

    let mut numbered: Vec<(u32, PathBuf)> = (1..=max_suffix)
        .map(|n| (n, sibling(&base, n)))
        .filter(|(_, p)| p.is_file())
        .collect();

    let chain = if !numbered.is_empty() {
        numbered.sort_by(|a, b| b.0.cmp(&a.0));
        let mut chain: Vec<PathBuf> = numbered.into_iter().map(|(_, p)| p).collect();
        if base.is_file() {
            chain.push(base.clone());
        }
        chain
    } else {
        discover_by_mtime(&base)?
    };

    if chain.is_empty() {
        return Err(LogSyncError::NotFound(path.to_path_buf()));
    }

    debug!(
        "Resolved rollover chain for {}: {} file(s)",
        base.display(),
        chain.len()
    );
    Ok(chain)
}

fn sibling(base: &Path, n: u32) -> PathBuf {
    let mut name = base.as_os_str().to_os_string();
    name.push(format!(".{}", n));
    PathBuf::from(name)
}

/// Fallback ordering: files sharing the base stem, oldest modification first
fn discover_by_mtime(base: &Path) -> Result<Vec<PathBuf>> {
    let stem = match base.file_stem().and_then(|s| s.to_str()) {
        Some(stem) => format!("{}.", stem),
        None => return Ok(existing(base)),
    };
    let dir = match base.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    };

    let entries = match std::fs::read_dir(&dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(LogSyncError::from_io(e, &dir)),
    };

    let mut family: Vec<(SystemTime, PathBuf)> = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let is_family = path == base || name.starts_with(&stem);
        if !is_family || is_compressed(&path) {
            continue;
        }
        let Ok(meta) = entry.metadata() else {
            continue;
        };
        if !meta.is_file() {
            continue;
        }
        let mtime = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        family.push((mtime, path));
    }

    // Ties keep the base last so it stays the watched file
    family.sort_by(|a, b| {
        a.0.cmp(&b.0)
            .then_with(|| (a.1 == base).cmp(&(b.1 == base)))
            .then_with(|| a.1.cmp(&b.1))
    });
    Ok(family.into_iter().map(|(_, p)| p).collect())
}

fn existing(path: &Path) -> Vec<PathBuf> {
    if path.is_file() {
        vec![path.to_path_buf()]
    } else {
        Vec::new()
    }
}

fn is_compressed(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| COMPRESSED_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// List candidate log files under a directory
///
/// Hidden directories are skipped, as are numbered rollover siblings (only
/// the base of each chain is listed). Results are sorted and capped at
/// `max_results`.
pub fn find_log_files(dir: &Path, max_results: usize) -> Vec<PathBuf> {
    let mut results = Vec::new();

    let walker = WalkDir::new(dir)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_hidden(e.file_name()));

    for entry in walker.flatten() {
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if rollover_suffix(path).is_some() || is_compressed(path) {
            continue;
        }
        if looks_like_log(path) {
            results.push(path.to_path_buf());
            if results.len() >= max_results {
                break;
            }
        }
    }

    results
}

fn is_hidden(name: &std::ffi::OsStr) -> bool {
    name.to_str().map(|n| n.starts_with('.')).unwrap_or(false)
}

fn looks_like_log(path: &Path) -> bool {
    let ext_match = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| LOG_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false);
    let name_match = path
        .file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.to_ascii_lowercase().contains("log"))
        .unwrap_or(false);
    ext_match || name_match
}
