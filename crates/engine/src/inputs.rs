//! Input discovery for command-line arguments.
//!
//! Each argument may be a file or a directory. Files are kept in the order
//! given; directories are walked recursively (hidden subdirectories skipped)
//! and contribute their video files sorted by path. Duplicates keep their
//! first position.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Video container extensions picked up from directories (case-insensitive).
pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mkv", "avi", "mov", "webm", "m4v", "gif"];

pub fn is_video_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            VIDEO_EXTENSIONS
                .iter()
                .any(|known| known.eq_ignore_ascii_case(ext))
        })
        .unwrap_or(false)
}

/// Video files under `root`, sorted by path
pub fn scan_directory(root: &Path) -> Vec<PathBuf> {
    let walker = WalkDir::new(root).into_iter().filter_entry(|entry| {
        // allow the root itself even if hidden
        !(entry.file_type().is_dir()
            && entry.depth() > 0
            && entry
                .file_name()
                .to_str()
                .map(|name| name.starts_with('.'))
                .unwrap_or(false))
    });

    let mut found: Vec<PathBuf> = walker
        .filter_map(|e| e.ok())
        .filter(|entry| entry.file_type().is_file() && is_video_file(entry.path()))
        .map(|entry| entry.into_path())
        .collect();
    found.sort();
    found
}

/// Expand arguments into the ordered input list.
///
/// Arguments that are neither an existing file nor a directory are kept as
/// they are so submission validation can name them.
pub fn collect_inputs(args: &[PathBuf]) -> Vec<PathBuf> {
    let mut seen = HashSet::new();
    let mut inputs = Vec::new();

    for arg in args {
        let expanded = if arg.is_dir() {
            scan_directory(arg)
        } else {
            vec![arg.clone()]
        };
        for path in expanded {
            if seen.insert(path.clone()) {
                inputs.push(path);
            }
        }
    }

    inputs
}
