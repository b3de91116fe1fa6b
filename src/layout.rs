//! Canonical project directory convention.
//!
//! ```text
//! <root>/
//!   input/      archived originals
//!   ingested/   manifest.json, extracted images, repaired assets
//!   output/
//!     run-NNN/  or  <name>/
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{IngestError, IngestResult};
use crate::util::ensure_directory;

pub const INPUT_DIR: &str = "input";
pub const INGESTED_DIR: &str = "ingested";
pub const ASSETS_DIR: &str = "assets";
pub const OUTPUT_DIR: &str = "output";

const CONVENTIONAL_DIRS: [&str; 3] = [INPUT_DIR, INGESTED_DIR, OUTPUT_DIR];

/// Parses `run-NNN` (at least three digits); anything else is not a run.
fn parse_run_number(name: &str) -> Option<u32> {
    let digits = name.strip_prefix("run-")?;
    if digits.len() < 3 || !digits.bytes().all(|byte| byte.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectLayout {
    root: PathBuf,
}

impl ProjectLayout {
    /// Resolves the project root. Passing the `input/` directory itself
    /// resolves to its parent.
    pub fn resolve(path: &Path) -> IngestResult<Self> {
        let metadata = fs::metadata(path).map_err(|err| IngestError::InvalidLayout {
            path: path.to_path_buf(),
            reason: err.to_string(),
        })?;
        if !metadata.is_dir() {
            return Err(IngestError::InvalidLayout {
                path: path.to_path_buf(),
                reason: "not a directory".to_string(),
            });
        }

        let canonical = fs::canonicalize(path).map_err(|err| IngestError::InvalidLayout {
            path: path.to_path_buf(),
            reason: err.to_string(),
        })?;

        let root = match (canonical.file_name(), canonical.parent()) {
            (Some(name), Some(parent)) if name == INPUT_DIR => parent.to_path_buf(),
            _ => canonical,
        };

        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn input_dir(&self) -> PathBuf {
        self.root.join(INPUT_DIR)
    }

    pub fn ingested_dir(&self) -> PathBuf {
        self.root.join(INGESTED_DIR)
    }

    /// Repaired copies of the input assets, at their input-relative paths.
    /// Generated package files (manifest, images, logs) live beside this
    /// directory and can never collide with a user file.
    pub fn assets_dir(&self) -> PathBuf {
        self.ingested_dir().join(ASSETS_DIR)
    }

    pub fn output_dir(&self) -> PathBuf {
        self.root.join(OUTPUT_DIR)
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.ingested_dir().join(crate::ingest::manifest::MANIFEST_FILENAME)
    }

    /// Name of the project, taken from the root directory name.
    pub fn project_name(&self) -> String {
        self.root
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "project".to_string())
    }

    /// `output/<name>` when a name is given, else the next `output/run-NNN`.
    pub fn run_directory(&self, name: Option<&str>) -> PathBuf {
        match name {
            Some(name) => self.output_dir().join(name),
            None => {
                let next = self.highest_run().map_or(1, |(max, _)| max + 1);
                self.output_dir().join(format!("run-{next:03}"))
            }
        }
    }

    /// Highest-numbered existing `output/run-NNN` directory.
    pub fn latest_run_directory(&self) -> Option<PathBuf> {
        self.highest_run().map(|(_, path)| path)
    }

    fn highest_run(&self) -> Option<(u32, PathBuf)> {
        let entries = fs::read_dir(self.output_dir()).ok()?;

        entries
            .flatten()
            .filter(|entry| entry.file_type().is_ok_and(|kind| kind.is_dir()))
            .filter_map(|entry| {
                let number = parse_run_number(entry.file_name().to_str()?)?;
                Some((number, entry.path()))
            })
            .max_by_key(|(number, _)| *number)
    }

    /// Entries in the root other than the three conventional directories,
    /// sorted by path.
    pub fn loose_entries(&self) -> IngestResult<Vec<PathBuf>> {
        let entries =
            fs::read_dir(&self.root).map_err(|source| IngestError::io(&self.root, source))?;

        let mut loose = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| IngestError::io(&self.root, source))?;
            let name = entry.file_name();
            if CONVENTIONAL_DIRS.iter().any(|dir| name == *dir) {
                continue;
            }
            loose.push(entry.path());
        }
        loose.sort();
        Ok(loose)
    }

    pub fn has_loose_files(&self) -> IngestResult<bool> {
        Ok(!self.loose_entries()?.is_empty())
    }

    pub fn input_already_populated(&self) -> bool {
        fs::read_dir(self.input_dir())
            .map(|mut entries| entries.next().is_some())
            .unwrap_or(false)
    }

    pub fn ensure_directories(&self) -> IngestResult<()> {
        ensure_directory(&self.input_dir())?;
        ensure_directory(&self.ingested_dir())?;
        ensure_directory(&self.output_dir())
    }
}
