use tracing::info;

use crate::notebook::Notebook;

use super::nbconvert::{Nbconvert, NbconvertError};

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error(transparent)]
    Nbconvert(#[from] NbconvertError),

    #[error("exporter produced non UTF-8 output: {0}")]
    InvalidOutput(#[from] std::string::FromUtf8Error),
}

/// Renders a notebook as a standalone HTML document.
pub trait Exporter {
    fn export_html(&self, notebook: &Notebook) -> Result<String, ExportError>;
}

#[derive(Debug, Clone, Default)]
pub struct NbconvertExporter {
    nbconvert: Nbconvert,
}

impl NbconvertExporter {
    pub fn new(nbconvert: Nbconvert) -> Self {
        Self { nbconvert }
    }
}

impl Exporter for NbconvertExporter {
    fn export_html(&self, notebook: &Notebook) -> Result<String, ExportError> {
        info!(cells = notebook.cells.len(), "exporting notebook to HTML");
        let args = ["--to".to_string(), "html".to_string()];
        let stdout = self.nbconvert.run(notebook, &args)?;
        Ok(String::from_utf8(stdout)?)
    }
}
