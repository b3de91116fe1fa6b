//! In-memory nbformat v4 notebook document.
//!
//! Only the fields the processor reads or rewrites are typed; everything
//! else round-trips through the flattened `extra` maps.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::error::{IngestError, IngestResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notebook {
    pub cells: Vec<Cell>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(default = "default_nbformat")]
    pub nbformat: u32,
    #[serde(default)]
    pub nbformat_minor: u32,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_nbformat() -> u32 {
    4
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CellType {
    Code,
    Markdown,
    Raw,
}

impl CellType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Code => "code",
            Self::Markdown => "markdown",
            Self::Raw => "raw",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cell {
    pub cell_type: CellType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(default, deserialize_with = "multiline_string")]
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outputs: Option<Vec<Value>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Cell {
    pub fn is_code(&self) -> bool {
        self.cell_type == CellType::Code
    }

    /// Drops outputs and the execution count so a kernel can repopulate them.
    pub fn clear_outputs(&mut self) {
        if self.is_code() {
            self.outputs = Some(Vec::new());
            self.extra
                .insert("execution_count".to_string(), Value::Null);
        }
    }
}

/// nbformat stores multi-line strings either as one string or as a list of
/// line fragments.
fn multiline_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    joined_text(&value).ok_or_else(|| serde::de::Error::custom("expected string or list of strings"))
}

/// Joins a multi-line nbformat value into one string.
pub fn joined_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Array(parts) => parts
            .iter()
            .map(|part| part.as_str())
            .collect::<Option<Vec<_>>>()
            .map(|parts| parts.concat()),
        Value::Null => Some(String::new()),
        _ => None,
    }
}

impl Notebook {
    pub fn from_slice(bytes: &[u8], label: &str) -> IngestResult<Self> {
        serde_json::from_slice(bytes).map_err(|err| IngestError::MalformedNotebook {
            path: label.to_string(),
            reason: err.to_string(),
        })
    }

    pub fn to_pretty_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        let mut data = serde_json::to_vec_pretty(self)?;
        data.push(b'\n');
        Ok(data)
    }

    pub fn kernel_name(&self) -> Option<String> {
        self.metadata
            .get("kernelspec")
            .and_then(|spec| spec.get("name"))
            .and_then(Value::as_str)
            .map(ToOwned::to_owned)
    }

    pub fn cell_type_counts(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for cell in &self.cells {
            *counts
                .entry(cell.cell_type.as_str().to_string())
                .or_insert(0) += 1;
        }
        counts
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use serde_json::{Value, json};

    pub fn code_cell(id: &str, source: &str, outputs: Vec<Value>) -> Value {
        json!({
            "cell_type": "code",
            "id": id,
            "metadata": {},
            "execution_count": null,
            "source": source,
            "outputs": outputs,
        })
    }

    pub fn markdown_cell(id: &str, source: &str) -> Value {
        json!({
            "cell_type": "markdown",
            "id": id,
            "metadata": {},
            "source": source,
        })
    }

    pub fn notebook(cells: Vec<Value>) -> Value {
        json!({
            "nbformat": 4,
            "nbformat_minor": 5,
            "metadata": {
                "kernelspec": {
                    "name": "python3",
                    "display_name": "Python 3",
                    "language": "python"
                }
            },
            "cells": cells,
        })
    }

    /// 1x1 PNG.
    pub const PNG_BYTES: &[u8] = b"\x89PNG\r\n\x1a\n\x00\x00\x00\rIHDR\x00\x00\x00\x01\x00\x00\x00\x01\x08\x02\x00\x00\x00\x90wS\xde\x00\x00\x00\x0cIDATx\x9cc\xf8\x0f\x00\x00\x01\x01\x00\x05\x18\xd8N\x00\x00\x00\x00IEND\xaeB`\x82";

    pub fn png_base64() -> String {
        use base64::Engine as _;
        base64::engine::general_purpose::STANDARD.encode(PNG_BYTES)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::fixtures::{code_cell, markdown_cell, notebook};
    use super::*;

    #[test]
    fn source_accepts_list_of_lines() {
        let raw = notebook(vec![json!({
            "cell_type": "code",
            "metadata": {},
            "execution_count": 3,
            "source": ["import numpy as np\n", "x = 1"],
            "outputs": []
        })]);
        let bytes = serde_json::to_vec(&raw).expect("serialize fixture");

        let nb = Notebook::from_slice(&bytes, "nb.ipynb").expect("parse notebook");
        assert_eq!(nb.cells[0].source, "import numpy as np\nx = 1");
        assert_eq!(nb.cells[0].extra["execution_count"], 3);
    }

    #[test]
    fn unknown_fields_round_trip() {
        let mut raw = notebook(vec![markdown_cell("m1", "# Title")]);
        raw["metadata"]["custom"] = json!({"course": "ml-101"});
        raw["cells"][0]["attachments"] = json!({});
        let bytes = serde_json::to_vec(&raw).expect("serialize fixture");

        let nb = Notebook::from_slice(&bytes, "nb.ipynb").expect("parse notebook");
        let back: Value = serde_json::from_slice(&nb.to_pretty_bytes().expect("serialize"))
            .expect("reparse");
        assert_eq!(back["metadata"]["custom"]["course"], "ml-101");
        assert_eq!(back["cells"][0]["attachments"], json!({}));
        assert_eq!(nb.kernel_name().as_deref(), Some("python3"));
    }

    #[test]
    fn non_notebook_json_is_malformed() {
        let err = Notebook::from_slice(br#"{"worksheets": []}"#, "old.ipynb")
            .expect_err("v3 layout should be rejected");
        assert!(matches!(err, IngestError::MalformedNotebook { .. }));

        let err = Notebook::from_slice(b"not json", "broken.ipynb").expect_err("not json");
        assert!(matches!(err, IngestError::MalformedNotebook { .. }));
    }

    #[test]
    fn clear_outputs_resets_execution_count() {
        let raw = notebook(vec![code_cell("c1", "print(1)", vec![json!({"output_type": "stream", "name": "stdout", "text": "1\n"})])]);
        let bytes = serde_json::to_vec(&raw).expect("serialize fixture");
        let mut nb = Notebook::from_slice(&bytes, "nb.ipynb").expect("parse notebook");

        nb.cells[0].clear_outputs();
        assert_eq!(nb.cells[0].outputs.as_deref(), Some(&[][..]));
        assert_eq!(nb.cells[0].extra["execution_count"], Value::Null);
        assert_eq!(nb.cell_type_counts().get("code"), Some(&1));
    }
}
