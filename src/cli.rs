use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::pipeline::executor::DEFAULT_TIMEOUT_SECS;

#[derive(Parser, Debug)]
#[command(
    name = "notebook-processor",
    version,
    about = "Ingest assignment notebooks and run them through the completion pipeline"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Archive loose files into input/ and build the ingested package.
    Ingest(IngestArgs),
    /// List the assets under input/ without building a package.
    Inventory(InventoryArgs),
    /// Run the pipeline on an already ingested package.
    Process(ProcessArgs),
    /// Ingest, then process.
    Run(RunArgs),
    /// Re-embed original outputs into a completed notebook and export it.
    Validate(ValidateArgs),
    /// Summarize the project layout, package and latest run.
    Status(StatusArgs),
}

#[derive(Args, Debug, Clone)]
pub struct IngestOptionArgs {
    /// Merge loose files into a populated input/ and rebuild the package.
    #[arg(long, default_value_t = false)]
    pub force: bool,

    /// Additional fill-in marker regex; may be repeated.
    #[arg(long = "marker-pattern")]
    pub marker_patterns: Vec<String>,
}

#[derive(Args, Debug, Clone)]
pub struct PipelineArgs {
    /// Run directory name under output/ (default: next run-NNN).
    #[arg(long)]
    pub name: Option<String>,

    /// Copy input/ here once the run has been exported.
    #[arg(long)]
    pub done_dir: Option<PathBuf>,

    /// Per-cell execution timeout in seconds.
    #[arg(long, default_value_t = DEFAULT_TIMEOUT_SECS)]
    pub timeout: u64,

    /// Kernel name; defaults to the notebook's own kernelspec.
    #[arg(long)]
    pub kernel: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct IngestArgs {
    /// Project root, or its input/ directory.
    pub folder: PathBuf,

    #[command(flatten)]
    pub options: IngestOptionArgs,
}

#[derive(Args, Debug, Clone)]
pub struct InventoryArgs {
    pub folder: PathBuf,

    #[arg(long, default_value_t = false)]
    pub dry_run: bool,
}

#[derive(Args, Debug, Clone)]
pub struct ProcessArgs {
    pub folder: PathBuf,

    #[command(flatten)]
    pub pipeline: PipelineArgs,
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    pub folder: PathBuf,

    #[command(flatten)]
    pub options: IngestOptionArgs,

    #[command(flatten)]
    pub pipeline: PipelineArgs,
}

#[derive(Args, Debug, Clone)]
pub struct ValidateArgs {
    pub folder: PathBuf,

    /// Run directory name under output/ (default: latest run-NNN).
    #[arg(long)]
    pub name: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct StatusArgs {
    pub folder: PathBuf,
}
