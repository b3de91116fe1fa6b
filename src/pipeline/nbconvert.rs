//! Thin wrapper around `jupyter nbconvert`.

use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, ExitStatus};

use tracing::debug;

use crate::notebook::Notebook;

pub const DEFAULT_PROGRAM: &str = "jupyter";

#[derive(Debug, thiserror::Error)]
pub enum NbconvertError {
    #[error("failed to stage notebook for nbconvert: {0}")]
    Stage(#[source] std::io::Error),

    #[error("failed to serialize notebook for nbconvert: {0}")]
    Serialize(#[source] serde_json::Error),

    #[error("failed to launch `{program}`: {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("nbconvert exited with {status}: {stderr}")]
    Failed { status: ExitStatus, stderr: String },
}

#[derive(Debug, Clone)]
pub struct Nbconvert {
    program: String,
    working_dir: Option<PathBuf>,
}

impl Default for Nbconvert {
    fn default() -> Self {
        Self {
            program: DEFAULT_PROGRAM.to_string(),
            working_dir: None,
        }
    }
}

impl Nbconvert {
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    /// Directory the notebook is staged in. Kernels resolve relative paths
    /// against it.
    pub fn in_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Stages `notebook` as a scratch file, runs `nbconvert <args> --stdout`
    /// on it and returns stdout.
    pub fn run(&self, notebook: &Notebook, args: &[String]) -> Result<Vec<u8>, NbconvertError> {
        let data = notebook.to_pretty_bytes().map_err(NbconvertError::Serialize)?;

        let mut builder = tempfile::Builder::new();
        builder.prefix(".nbconvert-").suffix(".ipynb");
        let mut scratch = match &self.working_dir {
            Some(dir) => builder.tempfile_in(dir),
            None => builder.tempfile(),
        }
        .map_err(NbconvertError::Stage)?;
        scratch.write_all(&data).map_err(NbconvertError::Stage)?;
        scratch.flush().map_err(NbconvertError::Stage)?;

        let mut command = Command::new(&self.program);
        command
            .arg("nbconvert")
            .args(args)
            .arg("--stdout")
            .arg(scratch.path());
        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }
        debug!(program = %self.program, ?args, "running nbconvert");

        let output = command.output().map_err(|source| NbconvertError::Launch {
            program: self.program.clone(),
            source,
        })?;
        if !output.status.success() {
            return Err(NbconvertError::Failed {
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(output.stdout)
    }
}
