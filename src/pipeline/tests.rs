use std::cell::Cell;
use std::fs;

use serde_json::{Value, json};

use super::executor::ExecutionError;
use super::solver::{STUB_CODE, STUB_NARRATIVE, SolverError, StubSolver};
use super::*;
use crate::ingest::{IngestOptions, PackageIngestor};
use crate::model::FillInSection;
use crate::notebook::fixtures::{code_cell, markdown_cell, notebook};

/// Marks every code cell as executed once.
struct RecordingExecutor;

impl Executor for RecordingExecutor {
    fn execute(&self, notebook: &Notebook) -> Result<Notebook, ExecutionError> {
        let mut executed = notebook.clone();
        for (count, cell) in executed.cells.iter_mut().filter(|cell| cell.is_code()).enumerate() {
            cell.extra
                .insert("execution_count".to_string(), json!(count + 1));
        }
        Ok(executed)
    }
}

struct FailingExecutor;

impl Executor for FailingExecutor {
    fn execute(&self, _notebook: &Notebook) -> Result<Notebook, ExecutionError> {
        Err(ExecutionError::Cell {
            cell_index: 2,
            ename: "NameError".to_string(),
            message: "name 'df' is not defined".to_string(),
        })
    }
}

/// Fills in outputs, with cell 2 raising.
struct RaisingExecutor;

impl Executor for RaisingExecutor {
    fn execute(&self, notebook: &Notebook) -> Result<Notebook, ExecutionError> {
        let mut executed = notebook.clone();
        executed.cells[2].outputs = Some(vec![json!({
            "output_type": "error",
            "ename": "NameError",
            "evalue": "name 'df' is not defined",
            "traceback": []
        })]);
        Ok(executed)
    }
}

struct CellCountExporter;

impl Exporter for CellCountExporter {
    fn export_html(&self, notebook: &Notebook) -> Result<String, ExportError> {
        Ok(format!("<html>{} cells</html>", notebook.cells.len()))
    }
}

struct CountingSolver {
    calls: Cell<usize>,
}

impl Solver for CountingSolver {
    fn solve(&self, section: &FillInSection, context: &SolveContext<'_>) -> Result<String, SolverError> {
        self.calls.set(self.calls.get() + 1);
        StubSolver.solve(section, context)
    }
}

struct DecliningSolver;

impl Solver for DecliningSolver {
    fn solve(&self, section: &FillInSection, _context: &SolveContext<'_>) -> Result<String, SolverError> {
        Err(SolverError::Declined {
            cell_index: section.cell_index,
            reason: "no idea".to_string(),
        })
    }
}

fn pipeline(executor: Box<dyn Executor>) -> ProcessingPipeline {
    ProcessingPipeline::new(executor, Box::new(CellCountExporter))
}

fn ingested_project() -> (tempfile::TempDir, ProjectLayout) {
    let dir = tempfile::tempdir().expect("tempdir");
    let raw = notebook(vec![
        markdown_cell("m0", "# Lab 1"),
        code_cell(
            "c1",
            "# TODO\n# YOUR CODE HERE",
            vec![json!({"output_type": "stream", "name": "stdout", "text": "stale"})],
        ),
        code_cell("c2", "print('given')", vec![]),
        markdown_cell("m3", "Your answer here"),
    ]);
    fs::write(
        dir.path().join("lab1.ipynb"),
        serde_json::to_vec_pretty(&raw).expect("serialize notebook"),
    )
    .expect("write notebook");
    fs::write(dir.path().join("data.csv"), "a,b\n1,2\n").expect("write data");

    let layout = ProjectLayout::resolve(dir.path()).expect("resolve layout");
    PackageIngestor::new(IngestOptions::default())
        .expect("build ingestor")
        .ingest(&layout)
        .expect("ingest");
    (dir, layout)
}

fn completed_cells(path: &Path) -> Vec<Value> {
    let value: Value =
        serde_json::from_slice(&fs::read(path).expect("read completed")).expect("parse completed");
    value["cells"].as_array().expect("cells").clone()
}

#[test]
fn full_run_builds_executes_exports_and_skips_archive() {
    let (_dir, layout) = ingested_project();
    let run_dir = layout.run_directory(None);

    let state = pipeline(Box::new(RecordingExecutor))
        .run(&layout, &run_dir, None, &StubSolver)
        .expect("run pipeline");

    assert_eq!(
        state.completed_steps,
        vec![
            PipelineStep::Parse,
            PipelineStep::Solve,
            PipelineStep::Build,
            PipelineStep::Execute,
            PipelineStep::Export,
        ]
    );
    assert!(!state.is_completed(PipelineStep::Archive));
    assert!(state.errors.is_empty());

    let cells = completed_cells(&run_dir.join("lab1_completed.ipynb"));
    assert_eq!(cells[1]["source"], STUB_CODE);
    assert_eq!(cells[1]["outputs"], json!([]));
    assert_eq!(cells[1]["execution_count"], 1);
    assert_eq!(cells[2]["source"], "print('given')");
    assert_eq!(cells[3]["source"], STUB_NARRATIVE);

    assert_eq!(
        fs::read_to_string(run_dir.join("lab1_completed.html")).expect("read html"),
        "<html>4 cells</html>"
    );

    let saved: PipelineState =
        serde_json::from_slice(&fs::read(run_dir.join(STATE_FILENAME)).expect("read state"))
            .expect("parse state");
    assert_eq!(saved, state);
}

#[test]
fn done_directory_receives_a_copy_of_inputs() {
    let (dir, layout) = ingested_project();
    let run_dir = layout.run_directory(Some("final"));
    let done = dir.path().join("done");

    let state = pipeline(Box::new(RecordingExecutor))
        .run(&layout, &run_dir, Some(&done), &StubSolver)
        .expect("run pipeline");

    assert!(state.is_completed(PipelineStep::Archive));
    assert_eq!(
        fs::read(done.join("data.csv")).expect("read preserved"),
        fs::read(layout.input_dir().join("data.csv")).expect("read input")
    );
    assert!(layout.input_dir().join("lab1.ipynb").exists());
    assert_eq!(
        preserve_inputs(&layout.input_dir(), &done).expect("second copy"),
        0
    );
}

#[test]
fn solver_failures_are_recorded_but_not_fatal() {
    let (_dir, layout) = ingested_project();
    let run_dir = layout.run_directory(None);

    let state = pipeline(Box::new(RecordingExecutor))
        .run(&layout, &run_dir, None, &DecliningSolver)
        .expect("run pipeline");

    assert_eq!(state.errors.len(), 2);
    assert!(state.errors[0].starts_with("cell 1:"));
    assert!(state.is_completed(PipelineStep::Export));

    let cells = completed_cells(&run_dir.join("lab1_completed.ipynb"));
    assert_eq!(cells[1]["source"], "# TODO\n# YOUR CODE HERE");
    assert_eq!(cells[1]["outputs"][0]["text"], "stale");
}

#[test]
fn solver_runs_once_per_cell() {
    let (_dir, layout) = ingested_project();
    let solver = CountingSolver { calls: Cell::new(0) };

    pipeline(Box::new(RecordingExecutor))
        .run(&layout, &layout.run_directory(None), None, &solver)
        .expect("run pipeline");

    // Cell 1 matches two markers but is solved once.
    assert_eq!(solver.calls.get(), 2);
}

#[test]
fn execution_failure_is_persisted_and_resume_skips_build() {
    let (_dir, layout) = ingested_project();
    let run_dir = layout.run_directory(None);

    let err = pipeline(Box::new(FailingExecutor))
        .run(&layout, &run_dir, None, &StubSolver)
        .expect_err("execution should fail");
    assert!(matches!(err, PipelineError::Execution(_)));

    let saved: PipelineState =
        serde_json::from_slice(&fs::read(run_dir.join(STATE_FILENAME)).expect("read state"))
            .expect("parse state");
    assert_eq!(saved.current_step, PipelineStep::Execute);
    assert!(saved.is_completed(PipelineStep::Build));
    assert!(saved.errors[0].contains("NameError"));

    let solver = CountingSolver { calls: Cell::new(0) };
    let state = pipeline(Box::new(RecordingExecutor))
        .run(&layout, &run_dir, None, &solver)
        .expect("resume");
    assert_eq!(solver.calls.get(), 0);
    assert!(state.is_completed(PipelineStep::Export));
    assert_eq!(state.errors.len(), 1);
}

#[test]
fn missing_package_is_reported() {
    let dir = tempfile::tempdir().expect("tempdir");
    let layout = ProjectLayout::resolve(dir.path()).expect("resolve layout");
    let run_dir = layout.run_directory(None);

    let err = pipeline(Box::new(RecordingExecutor))
        .run(&layout, &run_dir, None, &StubSolver)
        .expect_err("nothing ingested");
    assert!(matches!(err, PipelineError::NotIngested(_)));

    let saved: PipelineState =
        serde_json::from_slice(&fs::read(run_dir.join(STATE_FILENAME)).expect("read state"))
            .expect("parse state");
    assert_eq!(saved.errors.len(), 1);
}

#[test]
fn failing_cell_keeps_the_executed_notebook() {
    let (_dir, layout) = ingested_project();
    let run_dir = layout.run_directory(None);

    let err = pipeline(Box::new(RaisingExecutor))
        .run(&layout, &run_dir, None, &StubSolver)
        .expect_err("cell error should fail the run");
    let PipelineError::Execution(ExecutionError::Cell {
        cell_index, ename, ..
    }) = err
    else {
        panic!("expected a cell execution error");
    };
    assert_eq!(cell_index, 2);
    assert_eq!(ename, "NameError");

    let cells = completed_cells(&run_dir.join("lab1_completed.ipynb"));
    assert_eq!(cells[1]["source"], STUB_CODE);
    assert_eq!(cells[2]["outputs"][0]["output_type"], "error");
    assert!(!run_dir.join("lab1_completed.html").exists());
}
