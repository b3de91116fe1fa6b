use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::error::IngestResult;
use crate::model::{
    Asset, AssetRole, ExtractedImage, FillInSection, MANIFEST_FORMAT_VERSION, Manifest,
    NotebookSummary,
};
use crate::util::{utc_rfc3339, write_json_pretty};

pub const MANIFEST_FILENAME: &str = "manifest.json";

/// Assigns each asset a role within the assignment.
pub trait RoleClassifier {
    fn classify(&self, asset: &Asset) -> AssetRole;
}

/// Leaves every role `unknown`.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnknownRoleClassifier;

impl RoleClassifier for UnknownRoleClassifier {
    fn classify(&self, _asset: &Asset) -> AssetRole {
        AssetRole::Unknown
    }
}

pub struct ManifestInputs {
    pub project_name: String,
    pub generated_at: DateTime<Utc>,
    pub assets: Vec<Asset>,
    pub fill_in_sections: Vec<FillInSection>,
    pub extracted_images: Vec<ExtractedImage>,
    pub notebook: Option<NotebookSummary>,
}

/// Assembles a manifest. Output depends only on the inputs.
pub fn build(inputs: ManifestInputs, classifier: &dyn RoleClassifier) -> Manifest {
    let ManifestInputs {
        project_name,
        generated_at,
        mut assets,
        mut fill_in_sections,
        extracted_images,
        notebook,
    } = inputs;

    assets.sort_by(|a, b| a.path.cmp(&b.path));
    for asset in &mut assets {
        asset.role = Some(classifier.classify(asset));
    }
    fill_in_sections.sort_by_key(|section| section.cell_index);

    Manifest {
        format_version: MANIFEST_FORMAT_VERSION,
        project_name,
        generated_at: utc_rfc3339(generated_at),
        assets,
        fill_in_sections,
        extracted_images,
        notebook,
    }
}

/// Overwrites `<dir>/manifest.json`.
pub fn write(manifest: &Manifest, dir: &Path) -> IngestResult<()> {
    write_json_pretty(&dir.join(MANIFEST_FILENAME), manifest)
}

/// The manifest in `dir`, or `None` when it is missing or unreadable.
pub fn read_cached(dir: &Path) -> Option<Manifest> {
    let path = dir.join(MANIFEST_FILENAME);
    let data = fs::read(&path).ok()?;
    match serde_json::from_slice(&data) {
        Ok(manifest) => Some(manifest),
        Err(err) => {
            warn!(path = %path.display(), error = %err, "ignoring unreadable cached manifest");
            None
        }
    }
}
