use serde_json::Value;
use tracing::info;

use crate::notebook::{Notebook, joined_text};

use super::nbconvert::{Nbconvert, NbconvertError};

pub const DEFAULT_TIMEOUT_SECS: u64 = 600;

#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    #[error("cell {cell_index} raised {ename}: {message}")]
    Cell {
        cell_index: usize,
        ename: String,
        message: String,
    },

    #[error(transparent)]
    Nbconvert(#[from] NbconvertError),

    #[error("executor returned an unreadable notebook: {0}")]
    InvalidOutput(String),
}

/// Runs every code cell and returns the notebook with fresh outputs. A cell
/// that raises keeps its `error` output and does not fail the call; callers
/// use [`first_error`] to decide whether the run succeeded.
pub trait Executor {
    fn execute(&self, notebook: &Notebook) -> Result<Notebook, ExecutionError>;
}

/// Executes through `jupyter nbconvert --execute --allow-errors`, so a
/// failing cell still yields the executed notebook.
#[derive(Debug, Clone)]
pub struct JupyterExecutor {
    nbconvert: Nbconvert,
    timeout_secs: u64,
    kernel: Option<String>,
}

impl JupyterExecutor {
    pub fn new(nbconvert: Nbconvert, timeout_secs: u64, kernel: Option<String>) -> Self {
        Self {
            nbconvert,
            timeout_secs,
            kernel,
        }
    }

    fn args(&self) -> Vec<String> {
        let mut args = vec![
            "--to".to_string(),
            "notebook".to_string(),
            "--execute".to_string(),
            "--allow-errors".to_string(),
            format!("--ExecutePreprocessor.timeout={}", self.timeout_secs),
        ];
        if let Some(kernel) = &self.kernel {
            args.push(format!("--ExecutePreprocessor.kernel_name={kernel}"));
        }
        args
    }
}

impl Executor for JupyterExecutor {
    fn execute(&self, notebook: &Notebook) -> Result<Notebook, ExecutionError> {
        info!(cells = notebook.cells.len(), timeout = self.timeout_secs, "executing notebook");
        let stdout = self.nbconvert.run(notebook, &self.args())?;
        serde_json::from_slice(&stdout).map_err(|err| ExecutionError::InvalidOutput(err.to_string()))
    }
}

/// The first `error` output in cell order.
pub fn first_error(notebook: &Notebook) -> Option<ExecutionError> {
    notebook
        .cells
        .iter()
        .enumerate()
        .filter(|(_, cell)| cell.is_code())
        .find_map(|(cell_index, cell)| {
            let output = cell
                .outputs
                .as_deref()?
                .iter()
                .find(|output| output.get("output_type").and_then(Value::as_str) == Some("error"))?;

            let field = |key: &str| {
                output
                    .get(key)
                    .and_then(joined_text)
                    .unwrap_or_default()
            };
            Some(ExecutionError::Cell {
                cell_index,
                ename: field("ename"),
                message: field("evalue"),
            })
        })
}
