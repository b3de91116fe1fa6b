//! Moves loose files from the project root into `input/`.
//!
//! Nothing already in `input/` is ever overwritten: identical files are
//! de-duplicated and differing ones land next to the existing entry as
//! `name (N).ext`.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::error::{ArchiveFailure, IngestError, IngestResult};
use crate::util::{ensure_directory, sha256_file};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ArchiveReport {
    /// Source paths that now live under `input/`.
    pub moved: Vec<PathBuf>,
    /// Source paths dropped because `input/` already held identical bytes.
    pub deduplicated: Vec<PathBuf>,
    /// `(source, destination)` pairs stored under a numbered sibling name.
    pub renamed: Vec<(PathBuf, PathBuf)>,
}

impl ArchiveReport {
    pub fn is_empty(&self) -> bool {
        self.moved.is_empty() && self.deduplicated.is_empty() && self.renamed.is_empty()
    }
}

#[derive(Default)]
struct Archiver {
    report: ArchiveReport,
    failed: Vec<ArchiveFailure>,
}

/// Moves every entry of `loose` into `input_dir`, merging directories.
///
/// Partial failures leave the already-moved entries in place and are
/// reported through [`IngestError::Archive`].
pub fn archive_loose_entries(loose: &[PathBuf], input_dir: &Path) -> IngestResult<ArchiveReport> {
    ensure_directory(input_dir)?;

    let mut archiver = Archiver::default();
    for entry in loose {
        let Some(name) = entry.file_name() else {
            archiver.fail(entry, "entry has no file name".to_string());
            continue;
        };
        archiver.place(entry, &input_dir.join(name));
    }

    let Archiver { report, failed } = archiver;
    if !failed.is_empty() {
        for failure in &failed {
            warn!(path = %failure.path.display(), reason = %failure.reason, "failed to archive entry");
        }
        let mut moved = report.moved;
        moved.extend(report.deduplicated);
        moved.extend(report.renamed.into_iter().map(|(source, _)| source));
        return Err(IngestError::Archive { moved, failed });
    }

    info!(
        moved = report.moved.len(),
        deduplicated = report.deduplicated.len(),
        renamed = report.renamed.len(),
        "archived loose entries into input"
    );
    Ok(report)
}

impl Archiver {
    fn place(&mut self, source: &Path, target: &Path) {
        let source_is_dir = source.is_dir();

        if !target.exists() {
            match fs::rename(source, target) {
                Ok(()) => {
                    debug!(from = %source.display(), to = %target.display(), "moved");
                    self.report.moved.push(source.to_path_buf());
                }
                Err(err) => self.fail(source, err.to_string()),
            }
            return;
        }

        if source_is_dir && target.is_dir() {
            self.merge_directory(source, target);
            return;
        }

        if !source_is_dir && target.is_file() && same_content(source, target) {
            match fs::remove_file(source) {
                Ok(()) => self.report.deduplicated.push(source.to_path_buf()),
                Err(err) => self.fail(source, err.to_string()),
            }
            return;
        }

        let Some(sibling) = free_sibling(target) else {
            self.fail(source, format!("no free name next to {}", target.display()));
            return;
        };
        match fs::rename(source, &sibling) {
            Ok(()) => {
                info!(from = %source.display(), to = %sibling.display(), "name collision, stored as sibling");
                self.report
                    .renamed
                    .push((source.to_path_buf(), sibling));
            }
            Err(err) => self.fail(source, err.to_string()),
        }
    }

    fn merge_directory(&mut self, source: &Path, target: &Path) {
        let entries = match fs::read_dir(source) {
            Ok(entries) => entries,
            Err(err) => {
                self.fail(source, err.to_string());
                return;
            }
        };

        let mut children = Vec::new();
        for entry in entries {
            match entry {
                Ok(entry) => children.push(entry.path()),
                Err(err) => self.fail(source, err.to_string()),
            }
        }
        children.sort();

        for child in children {
            if let Some(name) = child.file_name() {
                self.place(&child, &target.join(name));
            }
        }

        // Non-empty means something failed to move; those failures are
        // already recorded.
        if fs::remove_dir(source).is_ok() {
            debug!(path = %source.display(), "removed merged directory");
        }
    }

    fn fail(&mut self, path: &Path, reason: String) {
        self.failed.push(ArchiveFailure {
            path: path.to_path_buf(),
            reason,
        });
    }
}

fn same_content(a: &Path, b: &Path) -> bool {
    let same_size = match (a.metadata(), b.metadata()) {
        (Ok(a), Ok(b)) => a.len() == b.len(),
        _ => false,
    };
    if !same_size {
        return false;
    }
    match (sha256_file(a), sha256_file(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// First `stem (N).ext` next to `target` that does not exist yet.
fn free_sibling(target: &Path) -> Option<PathBuf> {
    let parent = target.parent()?;
    let stem = target.file_stem()?.to_string_lossy();
    let extension = target
        .extension()
        .map(|ext| format!(".{}", ext.to_string_lossy()))
        .unwrap_or_default();

    (1..10_000)
        .map(|n| parent.join(format!("{stem} ({n}){extension}")))
        .find(|candidate| !candidate.exists())
}
