use anyhow::{Context, Result};
use tracing::info;

use crate::cli::RunArgs;
use crate::commands::{build_ingestor, ingest, process, resolve_layout};

pub fn run(args: RunArgs) -> Result<()> {
    let layout = resolve_layout(&args.folder)?;
    info!(root = %layout.root().display(), "starting ingest and process");

    let outcome = build_ingestor(&args.options)?
        .ingest(&layout)
        .with_context(|| format!("failed to ingest {}", layout.root().display()))?;
    ingest::log_outcome(&layout, &outcome);

    process::process(&layout, &args.pipeline)
}
