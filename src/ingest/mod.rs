//! Turns a loose assignment folder into a normalized ingested package.

pub mod archive;
pub mod charset;
pub mod inventory;
pub mod manifest;
pub mod preprocess;
pub mod tabular;
pub mod transformations;


use std::fs;
use std::path::Path;

use chrono::Utc;
use tracing::{info, warn};

use crate::error::{IngestError, IngestResult};
use crate::layout::{ASSETS_DIR, ProjectLayout};
use crate::model::{
    Asset, AssetKind, CharsetReport, ExtractedImage, Manifest, RepairAction, Transformation,
    TransformationIssue,
};
use crate::notebook::Notebook;
use crate::util::write_bytes;

use self::archive::{ArchiveReport, archive_loose_entries};
use self::manifest::{ManifestInputs, RoleClassifier, UnknownRoleClassifier};
use self::preprocess::{NotebookPreprocessor, Preprocessed};
use self::transformations::TransformationLog;

const STAGING_PREFIX: &str = ".staging-";

#[derive(Debug, Clone, Default)]
pub struct IngestOptions {
    /// Merge loose files into a populated `input/` and rebuild the package
    /// even when a cached manifest exists.
    pub force: bool,
    /// Extra fill-in marker regexes on top of the built-in vocabulary.
    pub marker_patterns: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct IngestOutcome {
    pub manifest: Manifest,
    pub archive: ArchiveReport,
    /// The manifest came from a previous run.
    pub cached: bool,
}

pub struct PackageIngestor {
    options: IngestOptions,
    preprocessor: NotebookPreprocessor,
    classifier: Box<dyn RoleClassifier>,
}

impl PackageIngestor {
    pub fn new(options: IngestOptions) -> Result<Self, regex::Error> {
        let preprocessor = NotebookPreprocessor::new(&options.marker_patterns)?;
        Ok(Self {
            options,
            preprocessor,
            classifier: Box::new(UnknownRoleClassifier),
        })
    }

    pub fn with_classifier(mut self, classifier: Box<dyn RoleClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    /// Archives loose files, then returns the cached manifest or builds a new
    /// package. The package is assembled in a staging directory and only
    /// replaces `ingested/` once every step has succeeded.
    ///
    /// Package layout: repaired assets under `assets/<input path>`, extracted
    /// images under `images/`, plus `manifest.json` and `transformations.log`.
    pub fn ingest(&self, layout: &ProjectLayout) -> IngestResult<IngestOutcome> {
        let input_dir = layout.input_dir();
        let ingested_dir = layout.ingested_dir();

        let loose = layout.loose_entries()?;
        if !loose.is_empty() && layout.input_already_populated() && !self.options.force {
            return Err(IngestError::Conflict {
                input: input_dir,
                loose,
            });
        }

        layout.ensure_directories()?;

        let archive = if loose.is_empty() {
            ArchiveReport::default()
        } else {
            info!(count = loose.len(), root = %layout.root().display(), "archiving loose entries");
            archive_loose_entries(&loose, &input_dir)?
        };

        if !self.options.force {
            if let Some(manifest) = manifest::read_cached(&ingested_dir) {
                info!(path = %layout.manifest_path().display(), "using cached manifest");
                return Ok(IngestOutcome {
                    manifest,
                    archive,
                    cached: true,
                });
            }
        }

        let staging = tempfile::Builder::new()
            .prefix(STAGING_PREFIX)
            .tempdir_in(&ingested_dir)
            .map_err(|source| IngestError::io(&ingested_dir, source))?;

        let manifest = self.assemble(layout, staging.path())?;
        promote(staging.path(), &ingested_dir)?;

        info!(
            assets = manifest.assets.len(),
            sections = manifest.fill_in_sections.len(),
            images = manifest.extracted_images.len(),
            path = %layout.manifest_path().display(),
            "ingested package"
        );

        Ok(IngestOutcome {
            manifest,
            archive,
            cached: false,
        })
    }

    fn assemble(&self, layout: &ProjectLayout, staging: &Path) -> IngestResult<Manifest> {
        let input_dir = layout.input_dir();
        let mut assets = inventory::scan(&input_dir)?;

        let notebook_index = assets
            .iter()
            .position(|asset| asset.kind == AssetKind::Notebook)
            .ok_or_else(|| IngestError::MissingNotebook(input_dir.clone()))?;
        let extra_notebooks = assets
            .iter()
            .filter(|asset| asset.kind == AssetKind::Notebook)
            .count()
            - 1;
        if extra_notebooks > 0 {
            warn!(
                primary = %assets[notebook_index].path,
                others = extra_notebooks,
                "several notebooks found; only the first is preprocessed"
            );
        }

        let assets_dir = staging.join(ASSETS_DIR);
        let mut log = TransformationLog::default();
        let mut primary_bytes = None;
        for (index, asset) in assets.iter_mut().enumerate() {
            let Some(bytes) = stage_asset(&input_dir, &assets_dir, asset, &mut log)? else {
                continue;
            };
            if index == notebook_index {
                primary_bytes = Some(bytes);
            }
        }

        let notebook_path = assets[notebook_index].path.clone();
        let bytes = primary_bytes.ok_or_else(|| IngestError::MalformedNotebook {
            path: notebook_path.clone(),
            reason: assets[notebook_index]
                .note
                .clone()
                .unwrap_or_else(|| "unreadable".to_string()),
        })?;

        let mut notebook = Notebook::from_slice(&bytes, &notebook_path)?;
        let Preprocessed {
            images,
            sections,
            summary,
        } = self.preprocessor.preprocess(
            &mut notebook,
            &notebook_path,
            &image_link_base(&notebook_path),
        );

        for image in &images {
            write_bytes(&staging.join(&image.filename), &image.payload)?;
        }
        if let Some(transformation) = image_transformation(&notebook_path, &images) {
            log.record(transformation.clone());
            assets[notebook_index].transformations.push(transformation);
        }
        let cleaned_path = assets_dir.join(&notebook_path);
        let cleaned = notebook
            .to_pretty_bytes()
            .map_err(|source| IngestError::json(&cleaned_path, source))?;
        write_bytes(&cleaned_path, &cleaned)?;

        let manifest = manifest::build(
            ManifestInputs {
                project_name: layout.project_name(),
                generated_at: Utc::now(),
                assets,
                fill_in_sections: sections,
                extracted_images: images,
                notebook: Some(summary),
            },
            self.classifier.as_ref(),
        );
        manifest::write(&manifest, staging)?;
        log.save(staging)?;
        info!(summary = %log.summary(), "recorded transformations");
        Ok(manifest)
    }
}

/// Relative path from the cleaned notebook back to the package root.
fn image_link_base(notebook_path: &str) -> String {
    let depth = notebook_path.split('/').count();
    "../".repeat(depth)
}

fn image_transformation(notebook_path: &str, images: &[ExtractedImage]) -> Option<Transformation> {
    if images.is_empty() {
        return None;
    }
    let total: u64 = images.iter().map(|image| image.size).sum();
    Some(Transformation {
        path: notebook_path.to_string(),
        issue: TransformationIssue::EmbeddedImages,
        action: "Extracted embedded images".to_string(),
        details: format!("Extracted {} base64 image(s) totaling {total} bytes", images.len()),
        records_affected: images.len(),
        confidence: 1.0,
    })
}

/// Copies one asset into `assets_dir`, transcoding text-bearing assets to
/// UTF-8 and normalizing CRLF in text data files. Every change is recorded
/// on the asset and in `log`. Returns the staged bytes, or `None` when the
/// original could not be read (recorded on the asset).
fn stage_asset(
    input_dir: &Path,
    assets_dir: &Path,
    asset: &mut Asset,
    log: &mut TransformationLog,
) -> IngestResult<Option<Vec<u8>>> {
    let source = input_dir.join(&asset.path);
    let bytes = match fs::read(&source) {
        Ok(bytes) => bytes,
        Err(err) => {
            warn!(path = %source.display(), error = %err, "skipping unreadable asset");
            asset.note.get_or_insert_with(|| err.to_string());
            return Ok(None);
        }
    };

    if !asset.is_text_bearing() {
        write_bytes(&assets_dir.join(&asset.path), &bytes)?;
        return Ok(Some(bytes));
    }

    let report = charset::analyze(&bytes);
    let repaired = charset::repair(&bytes, &report);
    match repaired.report.action {
        RepairAction::None => {}
        RepairAction::Transcoded => info!(
            path = %asset.path,
            encoding = %repaired.report.detected_encoding,
            "transcoded to UTF-8"
        ),
        RepairAction::BestEffortReplaced => warn!(
            path = %asset.path,
            encoding = %repaired.report.detected_encoding,
            "undecodable bytes replaced with U+FFFD"
        ),
    }
    let mut staged = repaired.bytes.into_owned();
    if let Some(transformation) = encoding_transformation(&asset.path, &repaired.report, &staged) {
        record(asset, log, transformation);
    }
    asset.charset = Some(repaired.report);

    if asset.kind == AssetKind::Data {
        if let Some((normalized, replaced)) = charset::normalize_line_endings(&staged) {
            info!(path = %asset.path, replaced, "normalized CRLF line endings");
            staged = normalized;
            let transformation = Transformation {
                path: asset.path.clone(),
                issue: TransformationIssue::LineEndings,
                action: "Normalized CRLF to LF".to_string(),
                details: format!("Replaced {replaced} CRLF line endings with LF"),
                records_affected: replaced,
                confidence: 1.0,
            };
            record(asset, log, transformation);
        }
    }

    write_bytes(&assets_dir.join(&asset.path), &staged)?;
    Ok(Some(staged))
}

fn record(asset: &mut Asset, log: &mut TransformationLog, transformation: Transformation) {
    log.record(transformation.clone());
    asset.transformations.push(transformation);
}

fn encoding_transformation(
    path: &str,
    report: &CharsetReport,
    repaired: &[u8],
) -> Option<Transformation> {
    let action = match report.action {
        RepairAction::None => return None,
        RepairAction::Transcoded => {
            format!("Converted from {} to UTF-8", report.detected_encoding)
        }
        RepairAction::BestEffortReplaced => format!(
            "Decoded as {} with undecodable bytes replaced",
            report.detected_encoding
        ),
    };
    let substitutions: Vec<String> = report
        .findings
        .iter()
        .map(|finding| format!("{} -> {:?} x{}", finding.bytes, finding.decoded, finding.occurrences))
        .collect();
    let details = if substitutions.is_empty() {
        format!("Converted {} to UTF-8", report.detected_encoding)
    } else {
        format!(
            "Converted {} to UTF-8: {}",
            report.detected_encoding,
            substitutions.join(", ")
        )
    };
    Some(Transformation {
        path: path.to_string(),
        issue: TransformationIssue::Encoding,
        action,
        details,
        records_affected: repaired.iter().filter(|byte| **byte == b'\n').count(),
        confidence: report.confidence,
    })
}

/// Replaces the contents of `ingested` with the contents of `staging`.
fn promote(staging: &Path, ingested: &Path) -> IngestResult<()> {
    let entries = fs::read_dir(ingested).map_err(|source| IngestError::io(ingested, source))?;
    for entry in entries {
        let path = entry
            .map_err(|source| IngestError::io(ingested, source))?
            .path();
        if path == staging {
            continue;
        }
        let removed = if path.is_dir() {
            fs::remove_dir_all(&path)
        } else {
            fs::remove_file(&path)
        };
        removed.map_err(|source| IngestError::io(&path, source))?;
    }

    let staged = fs::read_dir(staging).map_err(|source| IngestError::io(staging, source))?;
    for entry in staged {
        let entry = entry.map_err(|source| IngestError::io(staging, source))?;
        let target = ingested.join(entry.file_name());
        fs::rename(entry.path(), &target).map_err(|source| IngestError::io(&target, source))?;
    }

    Ok(())
}
