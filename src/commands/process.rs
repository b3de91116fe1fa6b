use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::cli::{PipelineArgs, ProcessArgs};
use crate::commands::{build_pipeline, resolve_layout};
use crate::layout::ProjectLayout;
use crate::pipeline::solver::StubSolver;

pub fn run(args: ProcessArgs) -> Result<()> {
    let layout = resolve_layout(&args.folder)?;
    process(&layout, &args.pipeline)
}

pub(crate) fn process(layout: &ProjectLayout, args: &PipelineArgs) -> Result<()> {
    let run_dir = layout.run_directory(args.name.as_deref());
    info!(
        package = %layout.ingested_dir().display(),
        run_dir = %run_dir.display(),
        "starting pipeline"
    );

    let pipeline = build_pipeline(layout, args);
    let state = pipeline
        .run(layout, &run_dir, args.done_dir.as_deref(), &StubSolver)
        .with_context(|| format!("pipeline failed for {}", run_dir.display()))?;

    let completed: Vec<&str> = state
        .completed_steps
        .iter()
        .map(|step| step.as_str())
        .collect();
    info!(
        completed_steps = %completed.join(", "),
        output = %run_dir.display(),
        "pipeline completed"
    );
    for message in &state.errors {
        warn!(error = %message, "recorded pipeline error");
    }

    Ok(())
}
