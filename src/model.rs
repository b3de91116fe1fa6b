use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const MANIFEST_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetKind {
    Notebook,
    Instructions,
    Image,
    Data,
    Unknown,
}

impl AssetKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Notebook => "notebook",
            Self::Instructions => "instructions",
            Self::Image => "image",
            Self::Data => "data",
            Self::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetRole {
    AssignmentData,
    Reference,
    SampleOutput,
    Configuration,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Asset {
    pub path: String,
    pub size: u64,
    pub kind: AssetKind,
    pub format: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<AssetRole>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub charset: Option<CharsetReport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<DataSchema>,
    /// Member names of a ZIP archive, in archive order.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contents: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub transformations: Vec<Transformation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl Asset {
    /// Whether the asset holds text that must decode cleanly downstream.
    pub fn is_text_bearing(&self) -> bool {
        match self.kind {
            AssetKind::Notebook => true,
            AssetKind::Instructions => matches!(self.format.as_str(), "md" | "txt"),
            AssetKind::Data => matches!(self.format.as_str(), "csv" | "tsv" | "json" | "txt"),
            AssetKind::Image | AssetKind::Unknown => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Int64,
    Float64,
    Object,
}

/// Shape of a delimited data file as seen after charset repair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSchema {
    pub columns: Vec<String>,
    pub dtypes: BTreeMap<String, ColumnType>,
    pub row_count: usize,
    pub sample_head: Vec<Map<String, Value>>,
    pub sample_tail: Vec<Map<String, Value>>,
    /// Only columns with at least one empty cell are listed.
    pub null_counts: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransformationIssue {
    Encoding,
    LineEndings,
    EmbeddedImages,
}

impl TransformationIssue {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Encoding => "encoding",
            Self::LineEndings => "line_endings",
            Self::EmbeddedImages => "embedded_images",
        }
    }
}

/// One change applied to an asset while building the package.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transformation {
    pub path: String,
    pub issue: TransformationIssue,
    pub action: String,
    pub details: String,
    pub records_affected: usize,
    pub confidence: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepairAction {
    None,
    Transcoded,
    BestEffortReplaced,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharsetFinding {
    /// Offending bytes in hex, e.g. `92` or `c3 a2`.
    pub bytes: String,
    pub decoded: String,
    pub occurrences: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CharsetReport {
    pub detected_encoding: String,
    pub confidence: f32,
    pub bom: bool,
    pub findings: Vec<CharsetFinding>,
    pub action: RepairAction,
    pub original_size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repaired_size: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionKind {
    Code,
    Narrative,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FillInSection {
    pub cell_index: usize,
    pub kind: CompletionKind,
    pub marker: String,
    pub pattern: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variable_name: Option<String>,
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preceding_source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification_source: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageOrigin {
    Output,
    Markdown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedImage {
    pub cell_index: usize,
    pub output_index: usize,
    pub origin: ImageOrigin,
    pub format: String,
    pub filename: String,
    pub size: u64,
    pub sha256: String,
    #[serde(skip)]
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotebookSummary {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kernel: Option<String>,
    pub total_cells: usize,
    pub cell_type_counts: BTreeMap<String, usize>,
    pub dependencies: Vec<String>,
    pub api_dependencies: Vec<String>,
    pub hardcoded_paths: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub format_version: u32,
    pub project_name: String,
    pub generated_at: String,
    pub assets: Vec<Asset>,
    pub fill_in_sections: Vec<FillInSection>,
    pub extracted_images: Vec<ExtractedImage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notebook: Option<NotebookSummary>,
}

impl Manifest {
    pub fn notebook_asset(&self) -> Option<&Asset> {
        self.assets
            .iter()
            .find(|asset| asset.kind == AssetKind::Notebook)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStep {
    Parse,
    Solve,
    Build,
    Execute,
    Export,
    Archive,
}

impl PipelineStep {
    pub const ALL: [PipelineStep; 6] = [
        Self::Parse,
        Self::Solve,
        Self::Build,
        Self::Execute,
        Self::Export,
        Self::Archive,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Parse => "parse",
            Self::Solve => "solve",
            Self::Build => "build",
            Self::Execute => "execute",
            Self::Export => "export",
            Self::Archive => "archive",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineState {
    pub input_path: String,
    pub output_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub done_path: Option<String>,
    pub current_step: PipelineStep,
    #[serde(default)]
    pub completed_steps: Vec<PipelineStep>,
    #[serde(default)]
    pub errors: Vec<String>,
}

impl PipelineState {
    pub fn is_completed(&self, step: PipelineStep) -> bool {
        self.completed_steps.contains(&step)
    }

    pub fn mark_completed(&mut self, step: PipelineStep) {
        if !self.is_completed(step) {
            self.completed_steps.push(step);
        }
    }
}
