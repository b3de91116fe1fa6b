use anyhow::{Context, Result};
use tracing::info;

use crate::cli::IngestArgs;
use crate::commands::{build_ingestor, resolve_layout};
use crate::ingest::IngestOutcome;
use crate::layout::ProjectLayout;

pub fn run(args: IngestArgs) -> Result<()> {
    let layout = resolve_layout(&args.folder)?;
    info!(root = %layout.root().display(), force = args.options.force, "starting ingest");

    let outcome = build_ingestor(&args.options)?
        .ingest(&layout)
        .with_context(|| format!("failed to ingest {}", layout.root().display()))?;

    log_outcome(&layout, &outcome);
    Ok(())
}

pub(crate) fn log_outcome(layout: &ProjectLayout, outcome: &IngestOutcome) {
    let manifest = &outcome.manifest;
    let dependencies = manifest
        .notebook
        .as_ref()
        .map(|summary| summary.dependencies.join(", "))
        .filter(|joined| !joined.is_empty())
        .unwrap_or_else(|| "none".to_string());

    info!(
        moved = outcome.archive.moved.len(),
        deduplicated = outcome.archive.deduplicated.len(),
        renamed = outcome.archive.renamed.len(),
        "archive summary"
    );
    info!(
        cached = outcome.cached,
        assets = manifest.assets.len(),
        fill_in_sections = manifest.fill_in_sections.len(),
        images = manifest.extracted_images.len(),
        dependencies = %dependencies,
        manifest = %layout.manifest_path().display(),
        "ingest completed"
    );
}
