use std::fs::{self, File};
use std::io::Read;
use std::path::Path;

use tracing::warn;
use walkdir::WalkDir;

use crate::error::{IngestError, IngestResult};
use crate::ingest::{charset, tabular};
use crate::model::{Asset, AssetKind, DataSchema};
use crate::util::{sha256_file, slash_path};

const KIND_BY_EXTENSION: &[(&str, AssetKind)] = &[
    ("ipynb", AssetKind::Notebook),
    ("csv", AssetKind::Data),
    ("tsv", AssetKind::Data),
    ("json", AssetKind::Data),
    ("parquet", AssetKind::Data),
    ("xlsx", AssetKind::Data),
    ("xls", AssetKind::Data),
    ("zip", AssetKind::Data),
    ("png", AssetKind::Image),
    ("jpg", AssetKind::Image),
    ("jpeg", AssetKind::Image),
    ("gif", AssetKind::Image),
    ("bmp", AssetKind::Image),
    ("webp", AssetKind::Image),
    ("svg", AssetKind::Image),
    ("md", AssetKind::Instructions),
    ("txt", AssetKind::Instructions),
    ("pdf", AssetKind::Instructions),
];

const SNIFF_LEN: usize = 512;

/// Enumerates every file under `input_dir`, sorted by relative path.
///
/// Fails only when `input_dir` itself is missing. Entries that cannot be
/// inspected become `unknown` assets carrying a note.
pub fn scan(input_dir: &Path) -> IngestResult<Vec<Asset>> {
    if !input_dir.is_dir() {
        return Err(IngestError::Scan(input_dir.to_path_buf()));
    }

    let mut assets = Vec::new();
    for entry in WalkDir::new(input_dir).min_depth(1).sort_by_file_name() {
        match entry {
            Ok(entry) => {
                if entry.file_type().is_dir() {
                    continue;
                }
                let relative = entry
                    .path()
                    .strip_prefix(input_dir)
                    .unwrap_or(entry.path());
                assets.push(classify(entry.path(), &slash_path(relative)));
            }
            Err(err) => {
                let Some(path) = err.path() else {
                    warn!(error = %err, "skipping unreadable entry without a path");
                    continue;
                };
                let relative = path.strip_prefix(input_dir).unwrap_or(path);
                warn!(path = %path.display(), error = %err, "unreadable inventory entry");
                assets.push(unreadable_asset(&slash_path(relative), err.to_string()));
            }
        }
    }

    assets.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(assets)
}

fn classify(path: &Path, relative: &str) -> Asset {
    let format = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .unwrap_or_else(|| "unknown".to_string());

    let size = match path.metadata() {
        Ok(metadata) => metadata.len(),
        Err(err) => return unreadable_asset(relative, err.to_string()),
    };

    let head = match read_head(path) {
        Ok(head) => head,
        Err(err) => {
            warn!(path = %path.display(), error = %err, "failed to read asset header");
            let mut asset = unreadable_asset(relative, err.to_string());
            asset.size = size;
            asset.format = format;
            return asset;
        }
    };

    let (kind, format) = detect_kind(&format, &head);

    let (sha256, note) = match sha256_file(path) {
        Ok(digest) => (Some(digest), None),
        Err(err) => (None, Some(err.to_string())),
    };

    let (schema, contents) = match kind {
        AssetKind::Data if format == "zip" => (None, tabular::list_zip_contents(path)),
        AssetKind::Data => (delimited_schema(path, &format), None),
        _ => (None, None),
    };

    Asset {
        path: relative.to_string(),
        size,
        kind,
        format,
        sha256,
        role: None,
        description: None,
        charset: None,
        schema,
        contents,
        transformations: Vec::new(),
        note,
    }
}

/// Schema of a CSV/TSV file, read through the same charset repair the
/// package build applies.
fn delimited_schema(path: &Path, format: &str) -> Option<DataSchema> {
    let delimiter = tabular::delimiter_for(format)?;
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) => {
            warn!(path = %path.display(), error = %err, "failed to read data file for schema");
            return None;
        }
    };
    let report = charset::analyze(&bytes);
    let repaired = charset::repair(&bytes, &report);
    tabular::extract_schema(&repaired.bytes, delimiter)
}

fn unreadable_asset(relative: &str, note: String) -> Asset {
    Asset {
        path: relative.to_string(),
        size: 0,
        kind: AssetKind::Unknown,
        format: "unknown".to_string(),
        sha256: None,
        role: None,
        description: None,
        charset: None,
        schema: None,
        contents: None,
        transformations: Vec::new(),
        note: Some(note),
    }
}

fn read_head(path: &Path) -> std::io::Result<Vec<u8>> {
    let mut head = Vec::with_capacity(SNIFF_LEN);
    File::open(path)?
        .take(SNIFF_LEN as u64)
        .read_to_end(&mut head)?;
    Ok(head)
}

/// Kind from extension, overridden by content sniffing. Returns the
/// (possibly corrected) format alongside.
fn detect_kind(extension: &str, head: &[u8]) -> (AssetKind, String) {
    if extension == "ipynb" {
        return (AssetKind::Notebook, extension.to_string());
    }

    if let Some(image_format) = sniff_image_format(head) {
        return (AssetKind::Image, image_format.to_string());
    }

    if let Some((_, kind)) = KIND_BY_EXTENSION.iter().find(|(ext, _)| *ext == extension) {
        return (*kind, extension.to_string());
    }

    if looks_like_notebook(head) {
        return (AssetKind::Notebook, "ipynb".to_string());
    }

    (AssetKind::Unknown, extension.to_string())
}

/// Image format from magic bytes.
pub fn sniff_image_format(head: &[u8]) -> Option<&'static str> {
    if head.starts_with(b"\x89PNG\r\n\x1a\n") {
        Some("png")
    } else if head.starts_with(&[0xFF, 0xD8, 0xFF]) {
        Some("jpeg")
    } else if head.starts_with(b"GIF87a") || head.starts_with(b"GIF89a") {
        Some("gif")
    } else if head.len() >= 12 && head.starts_with(b"RIFF") && &head[8..12] == b"WEBP" {
        Some("webp")
    } else if head.starts_with(b"BM") && has_bmp_info_header(head) {
        Some("bmp")
    } else {
        None
    }
}

fn has_bmp_info_header(head: &[u8]) -> bool {
    let Some(size) = head.get(14..18) else {
        return false;
    };
    let size = u32::from_le_bytes([size[0], size[1], size[2], size[3]]);
    matches!(size, 12 | 40 | 52 | 56 | 108 | 124)
}

fn looks_like_notebook(head: &[u8]) -> bool {
    let text = String::from_utf8_lossy(head);
    let trimmed = text.trim_start_matches('\u{feff}').trim_start();
    trimmed.starts_with('{') && (text.contains("\"cells\"") || text.contains("\"nbformat\""))
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::notebook::fixtures::PNG_BYTES;

    #[test]
    fn scan_fails_for_missing_directory() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = scan(&dir.path().join("input")).expect_err("missing dir");
        assert!(matches!(err, IngestError::Scan(_)));
    }

    #[test]
    fn scan_sorts_and_classifies_recursively() {
        let dir = tempfile::tempdir().expect("tempdir");
        let input = dir.path();
        fs::create_dir_all(input.join("data")).expect("create data dir");
        fs::write(input.join("Homework.IPYNB"), r#"{"cells": []}"#).expect("write nb");
        fs::write(input.join("instructions.md"), "# Task").expect("write md");
        fs::write(input.join("data").join("scores.csv"), "a,b\n1,2\n").expect("write csv");
        fs::write(input.join("plot.png"), PNG_BYTES).expect("write png");
        fs::write(input.join("notes.xyz"), "plain").expect("write unknown");

        let assets = scan(input).expect("scan");
        let summary: Vec<_> = assets
            .iter()
            .map(|asset| (asset.path.as_str(), asset.kind))
            .collect();
        assert_eq!(
            summary,
            vec![
                ("Homework.IPYNB", AssetKind::Notebook),
                ("data/scores.csv", AssetKind::Data),
                ("instructions.md", AssetKind::Instructions),
                ("notes.xyz", AssetKind::Unknown),
                ("plot.png", AssetKind::Image),
            ]
        );
        assert!(assets.iter().all(|asset| asset.sha256.is_some()));
        assert_eq!(assets[1].size, 8);
    }

    #[test]
    fn image_magic_bytes_override_extension() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("figure.dat"), PNG_BYTES).expect("write disguised png");
        fs::write(dir.path().join("export"), r#"{"nbformat": 4, "cells": []}"#)
            .expect("write extensionless notebook");

        let assets = scan(dir.path()).expect("scan");
        assert_eq!(assets[0].path, "export");
        assert_eq!(assets[0].kind, AssetKind::Notebook);
        assert_eq!(assets[1].kind, AssetKind::Image);
        assert_eq!(assets[1].format, "png");
    }

    #[test]
    fn sniff_recognizes_common_image_headers() {
        assert_eq!(sniff_image_format(&[0xFF, 0xD8, 0xFF, 0xE0]), Some("jpeg"));
        assert_eq!(sniff_image_format(b"GIF89a...."), Some("gif"));
        assert_eq!(sniff_image_format(b"RIFF\0\0\0\0WEBPVP8 "), Some("webp"));
        assert_eq!(sniff_image_format(b"id,name\n"), None);
        assert_eq!(sniff_image_format(b"BMI readings for the cohort"), None);
    }

    #[test]
    fn data_assets_carry_schema_and_archive_listing() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(
            dir.path().join("scores.csv"),
            b"student,score\r\nAda,91\r\nJos\xe9,\r\n",
        )
        .expect("write csv");
        fs::write(dir.path().join("broken.zip"), b"PK but not really").expect("write zip");

        let assets = scan(dir.path()).expect("scan");
        let zip = &assets[0];
        assert_eq!(zip.path, "broken.zip");
        assert!(zip.contents.is_none());
        assert!(zip.schema.is_none());

        let schema = assets[1].schema.as_ref().expect("csv schema");
        assert_eq!(schema.columns, vec!["student", "score"]);
        assert_eq!(schema.row_count, 2);
        assert_eq!(schema.null_counts.get("score"), Some(&1));
        assert_eq!(schema.sample_head[0]["student"], "Ada");
        assert_eq!(schema.sample_head[0]["score"], 91);
        assert!(
            schema.sample_head[1]["student"]
                .as_str()
                .is_some_and(|name| name.starts_with("Jos"))
        );
    }

    #[cfg(unix)]
    #[test]
    fn dangling_symlink_becomes_unknown_with_note() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("a.csv"), "x\n1\n").expect("write csv");
        std::os::unix::fs::symlink(dir.path().join("gone.csv"), dir.path().join("b.csv"))
            .expect("create symlink");

        let assets = scan(dir.path()).expect("scan continues past broken entry");
        assert_eq!(assets.len(), 2);
        assert_eq!(assets[0].kind, AssetKind::Data);
        assert_eq!(assets[1].path, "b.csv");
        assert_eq!(assets[1].kind, AssetKind::Unknown);
        assert!(assets[1].note.is_some());
    }
}
