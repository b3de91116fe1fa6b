use std::fs;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::cli::StatusArgs;
use crate::commands::resolve_layout;
use crate::ingest::manifest;
use crate::model::{PipelineState, PipelineStep};
use crate::pipeline::STATE_FILENAME;

pub fn run(args: StatusArgs) -> Result<()> {
    let layout = resolve_layout(&args.folder)?;
    let loose = layout.loose_entries()?;

    info!(
        root = %layout.root().display(),
        input_populated = layout.input_already_populated(),
        loose_entries = loose.len(),
        "project layout"
    );
    for entry in &loose {
        warn!(path = %entry.display(), "loose entry not yet archived");
    }

    match manifest::read_cached(&layout.ingested_dir()) {
        Some(manifest) => info!(
            project = %manifest.project_name,
            generated_at = %manifest.generated_at,
            assets = manifest.assets.len(),
            fill_in_sections = manifest.fill_in_sections.len(),
            images = manifest.extracted_images.len(),
            notebook = %manifest.notebook_asset().map(|asset| asset.path.as_str()).unwrap_or_default(),
            "ingested package"
        ),
        None => warn!(path = %layout.manifest_path().display(), "manifest missing"),
    }

    let Some(run_dir) = layout.latest_run_directory() else {
        warn!(output = %layout.output_dir().display(), "no runs yet");
        return Ok(());
    };

    let state_path = run_dir.join(STATE_FILENAME);
    if !state_path.is_file() {
        warn!(path = %state_path.display(), "run has no pipeline state");
        return Ok(());
    }

    let raw = fs::read(&state_path)
        .with_context(|| format!("failed to read {}", state_path.display()))?;
    let state: PipelineState = serde_json::from_slice(&raw)
        .with_context(|| format!("failed to parse {}", state_path.display()))?;

    let completed: Vec<&str> = state.completed_steps.iter().map(|step| step.as_str()).collect();
    let pending: Vec<&str> = PipelineStep::ALL
        .iter()
        .filter(|step| !state.is_completed(**step))
        .map(|step| step.as_str())
        .collect();

    info!(
        run_dir = %run_dir.display(),
        current_step = state.current_step.as_str(),
        completed = %completed.join(", "),
        pending = %pending.join(", "),
        errors = state.errors.len(),
        done_path = %state.done_path.as_deref().unwrap_or_default(),
        "latest run"
    );
    for message in &state.errors {
        warn!(error = %message, "recorded pipeline error");
    }

    Ok(())
}
