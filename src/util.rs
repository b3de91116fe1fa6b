use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::error::{IngestError, IngestResult};

pub fn utc_rfc3339(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub fn ensure_directory(path: &Path) -> IngestResult<()> {
    fs::create_dir_all(path).map_err(|source| IngestError::io(path, source))
}

pub fn sha256_bytes(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}

pub fn sha256_file(path: &Path) -> IngestResult<String> {
    let mut file = File::open(path).map_err(|source| IngestError::io(path, source))?;

    let mut hasher = Sha256::new();
    let mut buf = [0_u8; 8192];

    loop {
        let count = file
            .read(&mut buf)
            .map_err(|source| IngestError::io(path, source))?;
        if count == 0 {
            break;
        }
        hasher.update(&buf[..count]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

pub fn write_bytes(path: &Path, data: &[u8]) -> IngestResult<()> {
    if let Some(parent) = path.parent() {
        ensure_directory(parent)?;
    }
    fs::write(path, data).map_err(|source| IngestError::io(path, source))
}

pub fn write_json_pretty<T: Serialize>(path: &Path, value: &T) -> IngestResult<()> {
    if let Some(parent) = path.parent() {
        ensure_directory(parent)?;
    }

    let data = serde_json::to_vec_pretty(value).map_err(|source| IngestError::json(path, source))?;

    let mut file = File::create(path).map_err(|source| IngestError::io(path, source))?;
    file.write_all(&data)
        .map_err(|source| IngestError::io(path, source))?;
    file.write_all(b"\n")
        .map_err(|source| IngestError::io(path, source))?;

    Ok(())
}

/// Relative path rendered with `/` separators regardless of platform.
pub fn slash_path(path: &Path) -> String {
    path.components()
        .map(|component| component.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_file_matches_in_memory_digest() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("data.bin");
        fs::write(&path, b"hello notebook").expect("write file");

        let from_file = sha256_file(&path).expect("hash file");
        assert_eq!(from_file, sha256_bytes(b"hello notebook"));
    }

    #[test]
    fn write_json_pretty_creates_parent_and_trailing_newline() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("value.json");
        write_json_pretty(&path, &serde_json::json!({"a": 1})).expect("write json");

        let raw = fs::read_to_string(&path).expect("read json");
        assert!(raw.ends_with("}\n"));
    }

    #[test]
    fn slash_path_joins_components() {
        let path = Path::new("data").join("raw").join("scores.csv");
        assert_eq!(slash_path(&path), "data/raw/scores.csv");
    }
}
