use crate::model::{CompletionKind, FillInSection, Manifest};
use crate::notebook::Notebook;

/// What a solver may look at besides the section itself.
pub struct SolveContext<'a> {
    pub notebook: &'a Notebook,
    pub manifest: &'a Manifest,
}

#[derive(Debug, thiserror::Error)]
pub enum SolverError {
    #[error("solver declined cell {cell_index}: {reason}")]
    Declined { cell_index: usize, reason: String },

    #[error("solver backend failed: {0}")]
    Backend(String),
}

/// Produces the replacement source for one fill-in section.
pub trait Solver {
    fn solve(&self, section: &FillInSection, context: &SolveContext<'_>)
    -> Result<String, SolverError>;
}

/// Placeholder answers, for exercising the pipeline end to end.
#[derive(Debug, Clone, Copy, Default)]
pub struct StubSolver;

pub const STUB_CODE: &str = "# Stub solution\npass";
pub const STUB_NARRATIVE: &str = "Stub answer: This is a placeholder response.";

impl Solver for StubSolver {
    fn solve(
        &self,
        section: &FillInSection,
        _context: &SolveContext<'_>,
    ) -> Result<String, SolverError> {
        Ok(match section.kind {
            CompletionKind::Code => STUB_CODE.to_string(),
            CompletionKind::Narrative => STUB_NARRATIVE.to_string(),
        })
    }
}
