//! Append-only record of every change made to user data during ingestion,
//! saved next to the manifest as `transformations.log`.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::Path;

use crate::error::IngestResult;
use crate::model::Transformation;
use crate::util::write_bytes;

pub const TRANSFORMATIONS_FILENAME: &str = "transformations.log";

#[derive(Debug, Clone, Default)]
pub struct TransformationLog {
    entries: Vec<Transformation>,
}

impl TransformationLog {
    pub fn record(&mut self, transformation: Transformation) {
        self.entries.push(transformation);
    }

    pub fn entries(&self) -> &[Transformation] {
        &self.entries
    }

    /// Human-readable numbered entries, one blank line between them.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for (number, entry) in self.entries.iter().enumerate() {
            let _ = writeln!(
                out,
                "[{}] {}: {}",
                number + 1,
                entry.issue.as_str().to_uppercase(),
                entry.action
            );
            let _ = writeln!(out, "    File: {}", entry.path);
            let _ = writeln!(out, "    Details: {}", entry.details);
            if entry.records_affected > 0 {
                let _ = writeln!(out, "    Records affected: {}", entry.records_affected);
            }
            if entry.confidence < 1.0 {
                let _ = writeln!(out, "    Confidence: {:.0}%", entry.confidence * 100.0);
            }
            out.push('\n');
        }
        out
    }

    /// Writes `<dir>/transformations.log`, even when nothing was changed.
    pub fn save(&self, dir: &Path) -> IngestResult<()> {
        write_bytes(&dir.join(TRANSFORMATIONS_FILENAME), self.render().as_bytes())
    }

    pub fn summary(&self) -> String {
        if self.entries.is_empty() {
            return "no transformations applied".to_string();
        }
        let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
        for entry in &self.entries {
            *counts.entry(entry.issue.as_str()).or_insert(0) += 1;
        }
        let parts: Vec<String> = counts
            .into_iter()
            .map(|(issue, count)| format!("{count} {issue}"))
            .collect();
        format!("{} transformation(s): {}", self.entries.len(), parts.join(", "))
    }
}
