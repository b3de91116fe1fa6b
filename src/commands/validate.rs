use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use tracing::info;

use crate::cli::ValidateArgs;
use crate::commands::resolve_layout;
use crate::ingest::{charset, manifest};
use crate::layout::ProjectLayout;
use crate::notebook::Notebook;
use crate::pipeline::COMPLETED_SUFFIX;
use crate::pipeline::exporter::{Exporter, NbconvertExporter};
use crate::pipeline::nbconvert::Nbconvert;
use crate::pipeline::reembed::reembed_outputs;
use crate::util::write_bytes;

pub const VALIDATED_NOTEBOOK: &str = "validated.ipynb";
pub const VALIDATED_HTML: &str = "validated.html";

pub fn run(args: ValidateArgs) -> Result<()> {
    let layout = resolve_layout(&args.folder)?;

    let run_dir = match args.name.as_deref() {
        Some(name) => layout.run_directory(Some(name)),
        None => layout
            .latest_run_directory()
            .with_context(|| format!("no run-NNN directory in {}", layout.output_dir().display()))?,
    };
    if !run_dir.is_dir() {
        bail!("run directory not found: {}", run_dir.display());
    }

    let completed_path = find_completed_notebook(&run_dir)?;
    info!(path = %completed_path.display(), "validating completed notebook");

    let original = load_original_notebook(&layout)?;
    let mut completed = read_notebook(&completed_path)?;
    let restored = reembed_outputs(&original, &mut completed);
    info!(restored, "re-embedded original outputs");

    let validated_path = run_dir.join(VALIDATED_NOTEBOOK);
    let data = completed
        .to_pretty_bytes()
        .context("failed to serialize validated notebook")?;
    write_bytes(&validated_path, &data)?;

    let exporter = NbconvertExporter::new(Nbconvert::default().in_directory(layout.assets_dir()));
    let html = exporter
        .export_html(&completed)
        .context("failed to export validated notebook")?;
    let html_path = run_dir.join(VALIDATED_HTML);
    write_bytes(&html_path, html.as_bytes())?;

    info!(
        notebook = %validated_path.display(),
        html = %html_path.display(),
        "validation completed"
    );
    Ok(())
}

fn find_completed_notebook(run_dir: &Path) -> Result<PathBuf> {
    let suffix = format!("{COMPLETED_SUFFIX}.ipynb");
    let mut candidates = Vec::new();
    for entry in fs::read_dir(run_dir)
        .with_context(|| format!("failed to read {}", run_dir.display()))?
    {
        let entry = entry.with_context(|| format!("failed to read entry in {}", run_dir.display()))?;
        if entry.file_name().to_string_lossy().ends_with(&suffix) {
            candidates.push(entry.path());
        }
    }
    candidates.sort();
    candidates
        .into_iter()
        .next()
        .with_context(|| format!("no completed notebook found in {}", run_dir.display()))
}

/// The notebook as archived in `input/`, outputs intact, decoded the same
/// way ingestion decodes it.
fn load_original_notebook(layout: &ProjectLayout) -> Result<Notebook> {
    let manifest = manifest::read_cached(&layout.ingested_dir())
        .with_context(|| format!("no manifest at {}", layout.manifest_path().display()))?;
    let asset = manifest
        .notebook_asset()
        .context("manifest lists no notebook")?;

    let path = layout.input_dir().join(&asset.path);
    let bytes = fs::read(&path).with_context(|| format!("failed to read {}", path.display()))?;
    let report = charset::analyze(&bytes);
    let repaired = charset::repair(&bytes, &report);
    Notebook::from_slice(&repaired.bytes, &asset.path)
        .with_context(|| format!("failed to parse {}", path.display()))
}

fn read_notebook(path: &Path) -> Result<Notebook> {
    let bytes = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    Notebook::from_slice(&bytes, &path.display().to_string())
        .with_context(|| format!("failed to parse {}", path.display()))
}
