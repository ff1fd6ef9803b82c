// Repository segmentation
// Walks a repository snapshot and splits source files into line-bounded chunks

pub mod detect;


use itertools::Itertools;
use std::path::Path;
use tracing::{debug, info, warn};
use walkdir::{DirEntry, WalkDir};

use crate::config::SegmenterConfig;

pub use detect::{is_ignored_file, is_test_file, language_for_path, programming_language};

/// Version-control metadata directories that are never descended into
const VCS_DIRECTORIES: &[&str] = &[".git", ".hg", ".svn"];

/// One line-bounded window of a source file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentedChunk {
    /// Path relative to the repository root, `/`-separated
    pub file_path: String,
    /// Zero-based position of this chunk within its file
    pub chunk_index: usize,
    pub chunk_text: String,
}

/// Segment a repository using the configured chunk size and test filtering
#[inline]
pub fn segment_with_config(repo_root: &Path, config: &SegmenterConfig) -> Vec<SegmentedChunk> {
    segment(repo_root, config.max_chunk_size, config.ignore_tests)
}

/// Walk `repo_root` and split every eligible file into chunks of at most
/// `max_chunk_size` lines.
///
/// Unreadable or non-UTF-8 files are logged and skipped. Symbolic links are
/// not followed, so linked files and directories are skipped too (logged at
/// debug), keeping the walk inside the checkout and free of cycles. The
/// result may be empty; that is a valid outcome rather than an error.
#[inline]
pub fn segment(repo_root: &Path, max_chunk_size: usize, ignore_tests: bool) -> Vec<SegmentedChunk> {
    if max_chunk_size == 0 {
        warn!("max_chunk_size is 0, no chunks will be produced");
        return Vec::new();
    }

    let mut chunks = Vec::new();
    let mut files_read = 0_usize;
    let mut files_skipped = 0_usize;

    let walker = WalkDir::new(repo_root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| !is_vcs_directory(entry));

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Skipping unreadable path under {}: {}", repo_root.display(), e);
                continue;
            }
        };

        if entry.depth() > 0 && entry.path_is_symlink() {
            debug!("Not following symlink {}", entry.path().display());
            files_skipped += 1;
            continue;
        }

        if !entry.file_type().is_file() {
            continue;
        }

        let file_name = entry.file_name().to_string_lossy();
        if is_ignored_file(&file_name) || (ignore_tests && is_test_file(&file_name)) {
            debug!("Filtered out {}", entry.path().display());
            files_skipped += 1;
            continue;
        }

        let Some(file_path) = relative_path(repo_root, entry.path()) else {
            warn!("Skipping path outside repository root: {}", entry.path().display());
            continue;
        };

        let text = match std::fs::read_to_string(entry.path()) {
            Ok(text) => text,
            Err(e) => {
                warn!("Skipping file {}, error reading: {}", file_path, e);
                files_skipped += 1;
                continue;
            }
        };

        files_read += 1;
        chunks.extend(
            split_into_chunks(&text, max_chunk_size)
                .into_iter()
                .enumerate()
                .map(|(chunk_index, chunk_text)| SegmentedChunk {
                    file_path: file_path.clone(),
                    chunk_index,
                    chunk_text,
                }),
        );
    }

    info!(
        "Segmented {} files into {} chunks ({} files skipped) under {}",
        files_read,
        chunks.len(),
        files_skipped,
        repo_root.display()
    );

    chunks
}

/// Split text into consecutive windows of at most `max_lines` lines.
///
/// Line terminators are kept, so concatenating the windows reproduces the
/// input exactly. Empty input produces no windows.
#[inline]
pub fn split_into_chunks(text: &str, max_lines: usize) -> Vec<String> {
    if max_lines == 0 {
        return Vec::new();
    }

    let lines: Vec<&str> = text.split_inclusive('\n').collect();
    lines
        .chunks(max_lines)
        .map(|window| window.concat())
        .collect()
}

fn is_vcs_directory(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .is_some_and(|name| VCS_DIRECTORIES.contains(&name))
}

fn relative_path(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    Some(
        relative
            .components()
            .map(|component| component.as_os_str().to_string_lossy())
            .join("/"),
    )
}
