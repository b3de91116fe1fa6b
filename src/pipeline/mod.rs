//! Resumable processing of an ingested package into a run directory.
//!
//! Steps run in order: parse, solve, build, execute, export, archive.
//! Progress is persisted to `state.json` after every step. Parse and solve
//! keep no artifacts of their own, so they are replayed until build has
//! completed.

pub mod executor;
pub mod exporter;
pub mod nbconvert;
pub mod reembed;
pub mod solver;

#[cfg(test)]
mod tests;

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{error, info, warn};
use walkdir::WalkDir;

use crate::error::IngestError;
use crate::ingest::manifest;
use crate::layout::ProjectLayout;
use crate::model::{Manifest, PipelineState, PipelineStep};
use crate::notebook::Notebook;
use crate::util::{ensure_directory, sha256_file, slash_path, write_bytes, write_json_pretty};

use self::executor::{ExecutionError, Executor, first_error};
use self::exporter::{ExportError, Exporter};
use self::solver::{SolveContext, Solver};

pub const STATE_FILENAME: &str = "state.json";
pub const COMPLETED_SUFFIX: &str = "_completed";

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("no ingested package at {}; run `ingest` first", .0.display())]
    NotIngested(PathBuf),

    #[error(transparent)]
    Ingest(#[from] IngestError),

    #[error("execution failed: {0}")]
    Execution(#[from] ExecutionError),

    #[error("export failed: {0}")]
    Export(#[from] ExportError),
}

pub struct ProcessingPipeline {
    executor: Box<dyn Executor>,
    exporter: Box<dyn Exporter>,
}

/// Paths of the artifacts a run produces.
pub struct RunPaths {
    pub completed_notebook: PathBuf,
    pub html: PathBuf,
}

impl RunPaths {
    pub fn for_notebook(run_dir: &Path, notebook_path: &str) -> Self {
        let stem = Path::new(notebook_path)
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| "notebook".to_string());
        Self {
            completed_notebook: run_dir.join(format!("{stem}{COMPLETED_SUFFIX}.ipynb")),
            html: run_dir.join(format!("{stem}{COMPLETED_SUFFIX}.html")),
        }
    }
}

impl ProcessingPipeline {
    pub fn new(executor: Box<dyn Executor>, exporter: Box<dyn Exporter>) -> Self {
        Self { executor, exporter }
    }

    /// Runs every step not yet recorded in `<run_dir>/state.json`.
    ///
    /// A fatal error is appended to the state's error list and persisted
    /// before it is returned. Solver failures are not fatal.
    pub fn run(
        &self,
        layout: &ProjectLayout,
        run_dir: &Path,
        done_dir: Option<&Path>,
        solver: &dyn Solver,
    ) -> Result<PipelineState, PipelineError> {
        ensure_directory(run_dir)?;
        let state_path = run_dir.join(STATE_FILENAME);
        let mut state = load_or_create_state(&state_path, layout, run_dir)?;
        if let Some(done_dir) = done_dir {
            state.done_path = Some(done_dir.display().to_string());
        }

        match self.run_steps(&mut state, &state_path, layout, run_dir, solver) {
            Ok(()) => {
                save_state(&state_path, &state)?;
                info!(
                    steps = state.completed_steps.len(),
                    errors = state.errors.len(),
                    run_dir = %run_dir.display(),
                    "pipeline finished"
                );
                Ok(state)
            }
            Err(err) => {
                error!(step = state.current_step.as_str(), error = %err, "pipeline failed");
                state.errors.push(err.to_string());
                if let Err(save_err) = save_state(&state_path, &state) {
                    warn!(error = %save_err, "failed to persist pipeline state after failure");
                }
                Err(err)
            }
        }
    }

    fn run_steps(
        &self,
        state: &mut PipelineState,
        state_path: &Path,
        layout: &ProjectLayout,
        run_dir: &Path,
        solver: &dyn Solver,
    ) -> Result<(), PipelineError> {
        let ingested = layout.ingested_dir();
        let manifest = manifest::read_cached(&ingested)
            .ok_or_else(|| PipelineError::NotIngested(ingested.clone()))?;
        let notebook_path = manifest
            .notebook_asset()
            .map(|asset| asset.path.clone())
            .ok_or_else(|| IngestError::MissingNotebook(ingested.clone()))?;
        let paths = RunPaths::for_notebook(run_dir, &notebook_path);

        if !state.is_completed(PipelineStep::Build) {
            begin(state, PipelineStep::Parse);
            let source = layout.assets_dir().join(&notebook_path);
            let bytes = fs::read(&source).map_err(|err| IngestError::io(&source, err))?;
            let mut notebook = Notebook::from_slice(&bytes, &notebook_path)?;
            finish(state, state_path, PipelineStep::Parse)?;

            begin(state, PipelineStep::Solve);
            let answers = solve_sections(&notebook, &manifest, solver, &mut state.errors);
            finish(state, state_path, PipelineStep::Solve)?;

            begin(state, PipelineStep::Build);
            apply_answers(&mut notebook, answers);
            write_notebook(&paths.completed_notebook, &notebook)?;
            info!(path = %paths.completed_notebook.display(), "built completed notebook");
            finish(state, state_path, PipelineStep::Build)?;
        }

        if !state.is_completed(PipelineStep::Execute) {
            begin(state, PipelineStep::Execute);
            let notebook = read_notebook(&paths.completed_notebook)?;
            let executed = self.executor.execute(&notebook)?;
            write_notebook(&paths.completed_notebook, &executed)?;
            if let Some(err) = first_error(&executed) {
                return Err(err.into());
            }
            finish(state, state_path, PipelineStep::Execute)?;
        }

        if !state.is_completed(PipelineStep::Export) {
            begin(state, PipelineStep::Export);
            let notebook = read_notebook(&paths.completed_notebook)?;
            let html = self.exporter.export_html(&notebook)?;
            write_bytes(&paths.html, html.as_bytes())?;
            info!(path = %paths.html.display(), "exported HTML");
            finish(state, state_path, PipelineStep::Export)?;
        }

        if !state.is_completed(PipelineStep::Archive) {
            match state.done_path.clone() {
                Some(done) => {
                    begin(state, PipelineStep::Archive);
                    let copied = preserve_inputs(&layout.input_dir(), Path::new(&done))?;
                    info!(copied, done = %done, "archived inputs");
                    finish(state, state_path, PipelineStep::Archive)?;
                }
                None => info!("no done directory configured; skipping archive"),
            }
        }

        Ok(())
    }
}

fn begin(state: &mut PipelineState, step: PipelineStep) {
    info!(step = step.as_str(), "starting step");
    state.current_step = step;
}

fn finish(
    state: &mut PipelineState,
    state_path: &Path,
    step: PipelineStep,
) -> Result<(), PipelineError> {
    state.mark_completed(step);
    save_state(state_path, state)?;
    Ok(())
}

/// Calls the solver once per marked cell; the first section of a cell wins.
/// Failures are recorded and leave the cell as it was.
fn solve_sections(
    notebook: &Notebook,
    manifest: &Manifest,
    solver: &dyn Solver,
    errors: &mut Vec<String>,
) -> BTreeMap<usize, String> {
    let context = SolveContext { notebook, manifest };
    let mut attempted = BTreeSet::new();
    let mut answers = BTreeMap::new();

    for section in &manifest.fill_in_sections {
        if !attempted.insert(section.cell_index) {
            continue;
        }
        if section.cell_index >= notebook.cells.len() {
            let message = format!(
                "cell {}: section points past the end of the notebook",
                section.cell_index
            );
            warn!(cell = section.cell_index, "fill-in section out of range");
            errors.push(message);
            continue;
        }
        match solver.solve(section, &context) {
            Ok(answer) => {
                answers.insert(section.cell_index, answer);
            }
            Err(err) => {
                warn!(cell = section.cell_index, error = %err, "solver failed; leaving cell unchanged");
                errors.push(format!("cell {}: {err}", section.cell_index));
            }
        }
    }

    info!(solved = answers.len(), "solved fill-in sections");
    answers
}

/// Replaces solved cell sources. Solved code cells lose their stale outputs.
fn apply_answers(notebook: &mut Notebook, answers: BTreeMap<usize, String>) {
    for (index, answer) in answers {
        if let Some(cell) = notebook.cells.get_mut(index) {
            cell.source = answer;
            cell.clear_outputs();
        }
    }
}

fn read_notebook(path: &Path) -> Result<Notebook, PipelineError> {
    let bytes = fs::read(path).map_err(|err| IngestError::io(path, err))?;
    Ok(Notebook::from_slice(&bytes, &path.display().to_string())?)
}

fn write_notebook(path: &Path, notebook: &Notebook) -> Result<(), PipelineError> {
    let data = notebook
        .to_pretty_bytes()
        .map_err(|err| IngestError::json(path, err))?;
    write_bytes(path, &data)?;
    Ok(())
}

fn load_or_create_state(
    state_path: &Path,
    layout: &ProjectLayout,
    run_dir: &Path,
) -> Result<PipelineState, PipelineError> {
    if state_path.is_file() {
        let data = fs::read(state_path).map_err(|err| IngestError::io(state_path, err))?;
        let state = serde_json::from_slice(&data).map_err(|err| IngestError::json(state_path, err))?;
        info!(path = %state_path.display(), "resuming pipeline");
        return Ok(state);
    }

    Ok(PipelineState {
        input_path: layout.ingested_dir().display().to_string(),
        output_path: run_dir.display().to_string(),
        done_path: None,
        current_step: PipelineStep::Parse,
        completed_steps: Vec::new(),
        errors: Vec::new(),
    })
}

fn save_state(state_path: &Path, state: &PipelineState) -> Result<(), IngestError> {
    write_json_pretty(state_path, state)
}

/// Copies every file of `input_dir` into `done_dir`, keeping relative
/// paths. Files already present with identical content are skipped.
/// Returns the number of files copied.
pub fn preserve_inputs(input_dir: &Path, done_dir: &Path) -> Result<usize, IngestError> {
    if !input_dir.is_dir() {
        return Err(IngestError::Scan(input_dir.to_path_buf()));
    }
    ensure_directory(done_dir)?;

    let mut copied = 0;
    for entry in WalkDir::new(input_dir).min_depth(1).sort_by_file_name() {
        let entry = entry.map_err(|err| {
            let path = err.path().unwrap_or(input_dir).to_path_buf();
            IngestError::io(path, std::io::Error::other(err.to_string()))
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(input_dir)
            .unwrap_or(entry.path());
        let target = done_dir.join(relative);

        if target.is_file() && sha256_file(&target)? == sha256_file(entry.path())? {
            continue;
        }
        if let Some(parent) = target.parent() {
            ensure_directory(parent)?;
        }
        fs::copy(entry.path(), &target).map_err(|err| IngestError::io(&target, err))?;
        info!(path = %slash_path(relative), "preserved input");
        copied += 1;
    }
    Ok(copied)
}
