pub mod ingest;
pub mod inventory;
pub mod process;
pub mod run;
pub mod status;
pub mod validate;

use std::path::Path;

use anyhow::{Context, Result};

use crate::cli::{IngestOptionArgs, PipelineArgs};
use crate::ingest::{IngestOptions, PackageIngestor};
use crate::layout::ProjectLayout;
use crate::pipeline::ProcessingPipeline;
use crate::pipeline::executor::JupyterExecutor;
use crate::pipeline::exporter::NbconvertExporter;
use crate::pipeline::nbconvert::Nbconvert;

pub(crate) fn resolve_layout(folder: &Path) -> Result<ProjectLayout> {
    ProjectLayout::resolve(folder)
        .with_context(|| format!("failed to resolve project at {}", folder.display()))
}

pub(crate) fn build_ingestor(args: &IngestOptionArgs) -> Result<PackageIngestor> {
    PackageIngestor::new(IngestOptions {
        force: args.force,
        marker_patterns: args.marker_patterns.clone(),
    })
    .context("failed to compile fill-in marker patterns")
}

/// Notebooks execute from the ingested package so relative data paths
/// resolve against the repaired copies.
pub(crate) fn build_pipeline(layout: &ProjectLayout, args: &PipelineArgs) -> ProcessingPipeline {
    let executor = JupyterExecutor::new(
        Nbconvert::default().in_directory(layout.assets_dir()),
        args.timeout,
        args.kernel.clone(),
    );
    let exporter = NbconvertExporter::new(Nbconvert::default().in_directory(layout.assets_dir()));
    ProcessingPipeline::new(Box::new(executor), Box::new(exporter))
}
