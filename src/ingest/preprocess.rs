//! Notebook preprocessing: embedded image extraction, fill-in marker
//! detection and dependency scanning.

use std::collections::BTreeSet;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use regex::{Captures, Regex, RegexBuilder};
use serde_json::{Map, Value};

use crate::model::{CompletionKind, ExtractedImage, FillInSection, ImageOrigin, NotebookSummary};
use crate::notebook::{CellType, Notebook, joined_text};
use crate::util::sha256_bytes;

pub const IMAGES_DIR: &str = "images";

const OUTPUT_IMAGE_MIMES: [(&str, &str); 3] = [
    ("image/png", "png"),
    ("image/jpeg", "jpeg"),
    ("image/gif", "gif"),
];

/// Output metadata key that maps each extracted mime type to its file.
pub const EXTRACTED_IMAGE_KEY: &str = "extracted_image";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scope {
    Code,
    Narrative,
    Any,
}

impl Scope {
    fn applies_to(self, kind: CompletionKind) -> bool {
        matches!(
            (self, kind),
            (Scope::Any, _)
                | (Scope::Code, CompletionKind::Code)
                | (Scope::Narrative, CompletionKind::Narrative)
        )
    }
}

/// Built-in vocabulary, always matched case-insensitively.
const DEFAULT_MARKERS: &[(&str, Scope, &str)] = &[
    ("todo", Scope::Code, r"#\s*TODO\b"),
    ("your_code_here", Scope::Code, r"#\s*YOUR\s+CODE\s+HERE"),
    ("not_implemented", Scope::Code, r"raise\s+NotImplementedError"),
    (
        "prompt_placeholder",
        Scope::Code,
        r"<--\s*YOUR\s+(?:SYSTEM|USER)\s+PROMPT\s+GOES\s+HERE\s*-->",
    ),
    ("your_answer_here", Scope::Narrative, r"\byour\s+answer\s+here\b"),
    ("answer_comment", Scope::Narrative, r"<!--\s*answer\s*-->"),
    ("enter_your_here", Scope::Any, r"`<Enter\s+your\s+[^`]*here>`"),
];

const API_PACKAGES: [&str; 6] = [
    "anthropic",
    "cohere",
    "google",
    "huggingface_hub",
    "openai",
    "replicate",
];

const STDLIB_MODULES: [&str; 34] = [
    "abc",
    "argparse",
    "base64",
    "collections",
    "configparser",
    "copy",
    "csv",
    "dataclasses",
    "datetime",
    "enum",
    "functools",
    "glob",
    "hashlib",
    "io",
    "itertools",
    "json",
    "logging",
    "math",
    "os",
    "pathlib",
    "pprint",
    "random",
    "re",
    "shutil",
    "string",
    "subprocess",
    "sys",
    "tempfile",
    "textwrap",
    "time",
    "typing",
    "unittest",
    "warnings",
    "__future__",
];

struct MarkerPattern {
    id: String,
    scope: Scope,
    regex: Regex,
}

/// Everything preprocessing learns about one notebook.
#[derive(Debug, Clone)]
pub struct Preprocessed {
    pub images: Vec<ExtractedImage>,
    pub sections: Vec<FillInSection>,
    pub summary: NotebookSummary,
}

pub struct NotebookPreprocessor {
    markers: Vec<MarkerPattern>,
    assignment: Regex,
    verification: Regex,
    markdown_image: Regex,
    import: Regex,
    from_import: Regex,
    pip_install: Regex,
    hardcoded_path: Regex,
}

impl NotebookPreprocessor {
    /// Built-in marker vocabulary followed by `custom_patterns`, which apply
    /// to both code and markdown cells and are compiled exactly as given.
    pub fn new(custom_patterns: &[String]) -> Result<Self, regex::Error> {
        let mut markers = Vec::with_capacity(DEFAULT_MARKERS.len() + custom_patterns.len());
        for (id, scope, pattern) in DEFAULT_MARKERS {
            markers.push(MarkerPattern {
                id: (*id).to_string(),
                scope: *scope,
                regex: RegexBuilder::new(pattern).case_insensitive(true).build()?,
            });
        }
        for (index, pattern) in custom_patterns.iter().enumerate() {
            markers.push(MarkerPattern {
                id: format!("custom_{}", index + 1),
                scope: Scope::Any,
                regex: Regex::new(pattern)?,
            });
        }

        Ok(Self {
            markers,
            assignment: Regex::new(r"^\s*([A-Za-z_]\w*)\s*=(?:[^=]|$)")?,
            verification: Regex::new(r"(?m)^\s*assert\b|\b(?:check|test)\w*\s*\(")?,
            markdown_image: Regex::new(
                r"!\[([^\]]*)\]\(data:image/(png|jpe?g|gif);base64,([A-Za-z0-9+/=\s]+)\)",
            )?,
            import: Regex::new(r"(?m)^[ \t]*import[ \t]+([^\n#;]+)")?,
            from_import: Regex::new(r"(?m)^[ \t]*from[ \t]+(\.*)([\w.]*)[ \t]+import\b")?,
            pip_install: Regex::new(r"(?m)^[ \t]*[!%]pip[ \t]+install[ \t]+([^\n#]+)")?,
            hardcoded_path: Regex::new(
                r#"(?i)["']([^"'\n]*(?:your_file|\.csv|\.tsv|\.json|\.xlsx|/path/to|\\path\\to)[^"'\n]*)["']"#,
            )?,
        })
    }

    /// Runs every phase. Images are extracted first so marker detection and
    /// dependency scanning see the cleaned notebook. `image_link_base` is
    /// prepended to rewritten markdown links so they resolve from wherever
    /// the cleaned notebook is stored.
    pub fn preprocess(
        &self,
        notebook: &mut Notebook,
        notebook_path: &str,
        image_link_base: &str,
    ) -> Preprocessed {
        let images = self.extract_images(notebook, image_link_base);
        let sections = self.detect_fill_in_sections(notebook);
        let summary = self.summarize(notebook, notebook_path);
        Preprocessed {
            images,
            sections,
            summary,
        }
    }

    /// Moves base64 image payloads out of the notebook. Payloads that do not
    /// decode stay where they are. Running this on its own output finds
    /// nothing.
    ///
    /// Filenames are relative to the package root; markdown links are
    /// written as `link_base` followed by the filename.
    pub fn extract_images(&self, notebook: &mut Notebook, link_base: &str) -> Vec<ExtractedImage> {
        let mut extracted = Vec::new();

        for (cell_index, cell) in notebook.cells.iter_mut().enumerate() {
            match cell.cell_type {
                CellType::Code => {
                    let Some(outputs) = cell.outputs.as_mut() else {
                        continue;
                    };
                    for (output_index, output) in outputs.iter_mut().enumerate() {
                        extract_output_images(output, cell_index, output_index, &mut extracted);
                    }
                }
                CellType::Markdown => {
                    let mut inline_index = 0_usize;
                    let rewritten = self
                        .markdown_image
                        .replace_all(&cell.source, |caps: &Captures<'_>| {
                            let format = normalize_format(&caps[2]);
                            let Some(payload) = decode_payload(&caps[3]) else {
                                return caps[0].to_string();
                            };
                            let filename = format!(
                                "{IMAGES_DIR}/cell{cell_index:03}_inline{inline_index:02}.{}",
                                extension(format)
                            );
                            extracted.push(ExtractedImage {
                                cell_index,
                                output_index: inline_index,
                                origin: ImageOrigin::Markdown,
                                format: format.to_string(),
                                filename: filename.clone(),
                                size: payload.len() as u64,
                                sha256: sha256_bytes(&payload),
                                payload,
                            });
                            inline_index += 1;
                            format!("![{}]({link_base}{filename})", &caps[1])
                        })
                        .into_owned();
                    cell.source = rewritten;
                }
                CellType::Raw => {}
            }
        }

        extracted
    }

    /// Every cell matching a marker, one section per matched pattern, in
    /// cell order then vocabulary order.
    pub fn detect_fill_in_sections(&self, notebook: &Notebook) -> Vec<FillInSection> {
        let mut sections = Vec::new();

        for (cell_index, cell) in notebook.cells.iter().enumerate() {
            let kind = match cell.cell_type {
                CellType::Code => CompletionKind::Code,
                CellType::Markdown => CompletionKind::Narrative,
                CellType::Raw => continue,
            };
            if cell.source.trim().is_empty() {
                continue;
            }

            for marker in self.markers.iter().filter(|m| m.scope.applies_to(kind)) {
                let Some(found) = marker.regex.find(&cell.source) else {
                    continue;
                };
                sections.push(FillInSection {
                    cell_index,
                    kind,
                    marker: found.as_str().to_string(),
                    pattern: marker.id.clone(),
                    variable_name: self.variable_on_marker_line(&cell.source, found.start()),
                    source: cell.source.clone(),
                    preceding_source: preceding_source(notebook, cell_index),
                    verification_source: self.verification_source(notebook, cell_index),
                });
            }
        }

        sections
    }

    /// Third-party top-level package names, sorted. The second list is the
    /// subset that talks to hosted model APIs.
    pub fn detect_dependencies(&self, notebook: &Notebook) -> (Vec<String>, Vec<String>) {
        let mut found = BTreeSet::new();

        for cell in notebook.cells.iter().filter(|cell| cell.is_code()) {
            for caps in self.import.captures_iter(&cell.source) {
                for item in caps[1].split(',') {
                    let name = item.split_whitespace().next().unwrap_or_default();
                    if let Some(top) = top_level_module(name) {
                        found.insert(top.to_string());
                    }
                }
            }

            for caps in self.from_import.captures_iter(&cell.source) {
                if !caps[1].is_empty() {
                    continue;
                }
                if let Some(top) = top_level_module(&caps[2]) {
                    found.insert(top.to_string());
                }
            }

            for caps in self.pip_install.captures_iter(&cell.source) {
                found.extend(
                    caps[1]
                        .split_whitespace()
                        .filter(|token| !token.starts_with('-'))
                        .filter_map(pip_requirement_name),
                );
            }
        }

        let dependencies: Vec<String> = found
            .into_iter()
            .filter(|name| !STDLIB_MODULES.contains(&name.as_str()))
            .collect();
        let api = dependencies
            .iter()
            .filter(|name| API_PACKAGES.contains(&name.as_str()))
            .cloned()
            .collect();
        (dependencies, api)
    }

    /// String literals in code cells that look like data file paths, in
    /// first-seen order.
    pub fn detect_hardcoded_paths(&self, notebook: &Notebook) -> Vec<String> {
        let mut paths: Vec<String> = Vec::new();
        for cell in notebook.cells.iter().filter(|cell| cell.is_code()) {
            for caps in self.hardcoded_path.captures_iter(&cell.source) {
                let path = caps[1].to_string();
                if !paths.contains(&path) {
                    paths.push(path);
                }
            }
        }
        paths
    }

    pub fn summarize(&self, notebook: &Notebook, notebook_path: &str) -> NotebookSummary {
        let (dependencies, api_dependencies) = self.detect_dependencies(notebook);
        NotebookSummary {
            path: notebook_path.to_string(),
            kernel: notebook.kernel_name(),
            total_cells: notebook.cells.len(),
            cell_type_counts: notebook.cell_type_counts(),
            dependencies,
            api_dependencies,
            hardcoded_paths: self.detect_hardcoded_paths(notebook),
        }
    }

    fn variable_on_marker_line(&self, source: &str, marker_start: usize) -> Option<String> {
        let line_start = source[..marker_start].rfind('\n').map_or(0, |pos| pos + 1);
        self.assignment
            .captures(&source[line_start..marker_start])
            .map(|caps| caps[1].to_string())
    }

    /// Next code cell, when it reads like a check of the answer.
    fn verification_source(&self, notebook: &Notebook, cell_index: usize) -> Option<String> {
        notebook
            .cells
            .iter()
            .skip(cell_index + 1)
            .find(|cell| cell.is_code() && !cell.source.trim().is_empty())
            .filter(|cell| self.verification.is_match(&cell.source))
            .map(|cell| cell.source.clone())
    }
}

fn extract_output_images(
    output: &mut Value,
    cell_index: usize,
    output_index: usize,
    extracted: &mut Vec<ExtractedImage>,
) {
    let Some(output) = output.as_object_mut() else {
        return;
    };
    let Some(data) = output.get_mut("data").and_then(Value::as_object_mut) else {
        return;
    };

    let mut references = Map::new();
    for (mime, format) in OUTPUT_IMAGE_MIMES {
        let Some(payload) = data
            .get(mime)
            .and_then(joined_text)
            .and_then(|text| decode_payload(&text))
        else {
            continue;
        };
        let filename = format!(
            "{IMAGES_DIR}/cell{cell_index:03}_output{output_index:02}.{}",
            extension(format)
        );
        data.remove(mime);
        references.insert(mime.to_string(), Value::String(filename.clone()));
        extracted.push(ExtractedImage {
            cell_index,
            output_index,
            origin: ImageOrigin::Output,
            format: format.to_string(),
            filename,
            size: payload.len() as u64,
            sha256: sha256_bytes(&payload),
            payload,
        });
    }

    if references.is_empty() {
        return;
    }
    let metadata = output
        .entry("metadata")
        .or_insert_with(|| Value::Object(Map::new()));
    if let Some(metadata) = metadata.as_object_mut() {
        metadata.insert(EXTRACTED_IMAGE_KEY.to_string(), Value::Object(references));
    }
}

fn decode_payload(text: &str) -> Option<Vec<u8>> {
    let cleaned: String = text.chars().filter(|ch| !ch.is_whitespace()).collect();
    if cleaned.is_empty() {
        return None;
    }
    STANDARD.decode(cleaned).ok()
}

fn normalize_format(subtype: &str) -> &'static str {
    match subtype {
        "png" => "png",
        "gif" => "gif",
        _ => "jpeg",
    }
}

fn extension(format: &str) -> &str {
    if format == "jpeg" { "jpg" } else { format }
}

fn preceding_source(notebook: &Notebook, cell_index: usize) -> Option<String> {
    notebook.cells[..cell_index]
        .iter()
        .rev()
        .find(|cell| !cell.source.trim().is_empty())
        .map(|cell| cell.source.clone())
}

/// `numpy.linalg` → `numpy`; anything that is not an identifier is dropped.
fn top_level_module(dotted: &str) -> Option<&str> {
    let top = dotted.split('.').next()?.trim();
    let mut chars = top.chars();
    let first = chars.next()?;
    let valid = (first.is_ascii_alphabetic() || first == '_')
        && chars.all(|ch| ch.is_ascii_alphanumeric() || ch == '_');
    valid.then_some(top)
}

/// `openai==1.3.0` → `openai`, `"pandas>=2"` → `pandas`.
fn pip_requirement_name(token: &str) -> Option<String> {
    let token = token.trim_matches(|ch| ch == '"' || ch == '\'');
    let end = token
        .find(|ch: char| matches!(ch, '=' | '<' | '>' | '!' | '~' | '[' | ';' | '@'))
        .unwrap_or(token.len());
    let name = token[..end].trim();
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.'));
    valid.then(|| name.to_string())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::notebook::fixtures::{PNG_BYTES, code_cell, markdown_cell, notebook, png_base64};

    fn parse(raw: Value) -> Notebook {
        let bytes = serde_json::to_vec(&raw).expect("serialize fixture");
        Notebook::from_slice(&bytes, "fixture.ipynb").expect("parse fixture")
    }

    fn preprocessor() -> NotebookPreprocessor {
        NotebookPreprocessor::new(&[]).expect("default patterns compile")
    }

    fn image_notebook() -> Notebook {
        parse(notebook(vec![
            markdown_cell(
                "m0",
                &format!("Expected output:\n\n![chart](data:image/png;base64,{})", png_base64()),
            ),
            code_cell(
                "c1",
                "plot()",
                vec![json!({
                    "output_type": "display_data",
                    "metadata": {},
                    "data": {
                        "image/png": [png_base64()],
                        "text/plain": ["<Figure size 640x480>"]
                    }
                })],
            ),
            code_cell(
                "c2",
                "broken()",
                vec![json!({
                    "output_type": "display_data",
                    "metadata": {},
                    "data": {"image/gif": "%%%not-base64%%%"}
                })],
            ),
        ]))
    }

    #[test]
    fn extracts_output_and_inline_images() {
        let mut nb = image_notebook();
        let images = preprocessor().extract_images(&mut nb, "");

        let names: Vec<_> = images.iter().map(|image| image.filename.as_str()).collect();
        assert_eq!(
            names,
            vec!["images/cell000_inline00.png", "images/cell001_output00.png"]
        );
        assert!(images.iter().all(|image| image.payload == PNG_BYTES));
        assert_eq!(images[1].size, PNG_BYTES.len() as u64);

        assert!(nb.cells[0].source.ends_with("![chart](images/cell000_inline00.png)"));
        let output = &nb.cells[1].outputs.as_ref().expect("outputs")[0];
        assert!(output["data"].get("image/png").is_none());
        assert_eq!(output["data"]["text/plain"][0], "<Figure size 640x480>");
        assert_eq!(
            output["metadata"][EXTRACTED_IMAGE_KEY]["image/png"],
            "images/cell001_output00.png"
        );

        let untouched = &nb.cells[2].outputs.as_ref().expect("outputs")[0];
        assert_eq!(untouched["data"]["image/gif"], "%%%not-base64%%%");
    }

    #[test]
    fn extraction_is_deterministic_and_idempotent() {
        let mut first = image_notebook();
        let mut second = image_notebook();
        let processor = preprocessor();

        let a = processor.extract_images(&mut first, "");
        let b = processor.extract_images(&mut second, "");
        assert_eq!(a, b);
        assert_eq!(first, second);

        let again = processor.extract_images(&mut first, "");
        assert!(again.is_empty());
        assert_eq!(first, second);
    }

    #[test]
    fn every_marked_cell_becomes_a_section() {
        let nb = parse(notebook(vec![
            markdown_cell("m0", "## Part 1\nImplement the loader."),
            code_cell("c1", "def load(path):\n    # TODO: read the csv\n    pass", vec![]),
            code_cell("c2", "def score(x):\n    raise NotImplementedError", vec![]),
            code_cell(
                "c3",
                "system_prompt = \"<-- YOUR SYSTEM PROMPT GOES HERE -->\"",
                vec![],
            ),
            markdown_cell("m4", "**Your answer here**"),
            markdown_cell("m5", ""),
            code_cell("c6", "assert score(2) == 4", vec![]),
        ]));

        let sections = preprocessor().detect_fill_in_sections(&nb);
        let summary: Vec<_> = sections
            .iter()
            .map(|section| (section.cell_index, section.kind, section.pattern.as_str()))
            .collect();
        assert_eq!(
            summary,
            vec![
                (1, CompletionKind::Code, "todo"),
                (2, CompletionKind::Code, "not_implemented"),
                (3, CompletionKind::Code, "prompt_placeholder"),
                (4, CompletionKind::Narrative, "your_answer_here"),
            ]
        );

        assert_eq!(sections[2].variable_name.as_deref(), Some("system_prompt"));
        assert!(sections[0].variable_name.is_none());
        assert_eq!(
            sections[0].preceding_source.as_deref(),
            Some("## Part 1\nImplement the loader.")
        );
        assert_eq!(
            sections[3].verification_source.as_deref(),
            Some("assert score(2) == 4")
        );
        assert!(sections[0].verification_source.is_none());
    }

    #[test]
    fn one_cell_can_match_several_patterns() {
        let nb = parse(notebook(vec![code_cell(
            "c0",
            "# TODO\n# YOUR CODE HERE\nraise NotImplementedError()",
            vec![],
        )]));
        let patterns: Vec<_> = preprocessor()
            .detect_fill_in_sections(&nb)
            .into_iter()
            .map(|section| section.pattern)
            .collect();
        assert_eq!(patterns, vec!["todo", "your_code_here", "not_implemented"]);
    }

    #[test]
    fn custom_patterns_extend_the_vocabulary() {
        let nb = parse(notebook(vec![
            code_cell("c0", "result = ...  # FILL ME", vec![]),
            markdown_cell("m1", "Explain: FILL ME"),
        ]));
        let processor =
            NotebookPreprocessor::new(&[r"FILL\s+ME".to_string()]).expect("custom pattern");
        let sections = processor.detect_fill_in_sections(&nb);
        assert_eq!(sections.len(), 2);
        assert!(sections.iter().all(|section| section.pattern == "custom_1"));
        assert_eq!(sections[0].variable_name.as_deref(), Some("result"));

        assert!(NotebookPreprocessor::new(&["(unclosed".to_string()]).is_err());
    }

    #[test]
    fn dependencies_normalize_aliases_submodules_and_pip() {
        let nb = parse(notebook(vec![
            code_cell("c0", "!pip install openai==1.3.0 'pandas>=2' -q", vec![]),
            code_cell(
                "c1",
                "import numpy as np, os\nimport matplotlib.pyplot as plt\nfrom sklearn.model_selection import train_test_split\nfrom . import helpers\nfrom google.generativeai import configure",
                vec![],
            ),
            code_cell("c2", "import pandas as pd  # again\n%pip install anthropic", vec![]),
            markdown_cell("m3", "import torch"),
        ]));

        let (dependencies, api) = preprocessor().detect_dependencies(&nb);
        assert_eq!(
            dependencies,
            vec![
                "anthropic",
                "google",
                "matplotlib",
                "numpy",
                "openai",
                "pandas",
                "sklearn"
            ]
        );
        assert_eq!(api, vec!["anthropic", "google", "openai"]);
    }

    #[test]
    fn hardcoded_paths_are_reported_once() {
        let nb = parse(notebook(vec![
            code_cell(
                "c0",
                "df = pd.read_csv('data/scores.csv')\nother = pd.read_csv(\"data/scores.csv\")\nraw = open('/path/to/your_file.txt')",
                vec![],
            ),
            markdown_cell("m1", "Use 'notes.csv' as input."),
        ]));

        let summary = preprocessor().summarize(&nb, "homework.ipynb");
        assert_eq!(
            summary.hardcoded_paths,
            vec!["data/scores.csv", "/path/to/your_file.txt"]
        );
        assert_eq!(summary.total_cells, 2);
        assert_eq!(summary.kernel.as_deref(), Some("python3"));
    }

    #[test]
    fn built_in_markers_ignore_case() {
        let nb = parse(notebook(vec![
            code_cell("c0", "def fit(x):\n    # todo: implement", vec![]),
            code_cell(
                "c1",
                "user_prompt = \"<-- your user prompt goes here -->\"",
                vec![],
            ),
            code_cell("c2", "raise notimplementederror", vec![]),
            markdown_cell("m3", "<!-- ANSWER -->"),
        ]));

        let patterns: Vec<_> = preprocessor()
            .detect_fill_in_sections(&nb)
            .into_iter()
            .map(|section| (section.cell_index, section.pattern))
            .collect();
        assert_eq!(
            patterns,
            vec![
                (0, "todo".to_string()),
                (1, "prompt_placeholder".to_string()),
                (2, "not_implemented".to_string()),
                (3, "answer_comment".to_string()),
            ]
        );

        let strict = NotebookPreprocessor::new(&["FILL_ME".to_string()]).expect("custom pattern");
        let custom = parse(notebook(vec![code_cell("c0", "x = fill_me", vec![])]));
        assert!(strict.detect_fill_in_sections(&custom).is_empty());
    }

    #[test]
    fn markdown_links_use_the_link_base() {
        let mut nb = image_notebook();
        let images = preprocessor().extract_images(&mut nb, "../");
        assert_eq!(images[0].filename, "images/cell000_inline00.png");
        assert!(nb.cells[0].source.ends_with("![chart](../images/cell000_inline00.png)"));

        let output = &nb.cells[1].outputs.as_ref().expect("outputs")[0];
        assert_eq!(
            output["metadata"][EXTRACTED_IMAGE_KEY]["image/png"],
            "images/cell001_output00.png"
        );
    }
}
