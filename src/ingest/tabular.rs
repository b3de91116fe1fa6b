//! Structural summaries of data assets: column schemas for delimited text
//! and member listings for ZIP archives.

use std::collections::BTreeMap;
use std::fs::File;
use std::path::Path;

use csv::{ReaderBuilder, StringRecord};
use serde_json::{Map, Number, Value};
use tracing::warn;
use zip::ZipArchive;

use crate::model::{ColumnType, DataSchema};

const HEAD_ROWS: usize = 3;
const TAIL_ROWS: usize = 2;

/// Field delimiter for a data format, if it is a delimited text format.
pub fn delimiter_for(format: &str) -> Option<u8> {
    match format {
        "csv" => Some(b','),
        "tsv" => Some(b'\t'),
        _ => None,
    }
}

/// Header, per-column types, row count, samples and null counts of
/// UTF-8 delimited text. `None` when there is no header row or the text
/// does not parse.
pub fn extract_schema(text: &[u8], delimiter: u8) -> Option<DataSchema> {
    let mut reader = ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(false)
        .flexible(true)
        .from_reader(text);

    let mut records = Vec::new();
    for record in reader.records() {
        match record {
            Ok(record) => records.push(record),
            Err(err) => {
                warn!(error = %err, "unparseable delimited data");
                return None;
            }
        }
    }
    if records.is_empty() {
        return None;
    }

    let header = records.remove(0);
    let columns: Vec<String> = header.iter().map(str::to_string).collect();
    let row_count = records.len();

    let mut dtypes = BTreeMap::new();
    let mut null_counts = BTreeMap::new();
    for (index, column) in columns.iter().enumerate() {
        let (dtype, nulls) = infer_column(&records, index);
        dtypes.insert(column.clone(), dtype);
        if nulls > 0 {
            null_counts.insert(column.clone(), nulls);
        }
    }

    let sample = |rows: &[StringRecord]| -> Vec<Map<String, Value>> {
        rows.iter()
            .map(|row| row_to_object(row, &columns, &dtypes))
            .collect()
    };
    let sample_head = sample(&records[..row_count.min(HEAD_ROWS)]);
    let sample_tail = if row_count >= TAIL_ROWS {
        sample(&records[row_count - TAIL_ROWS..])
    } else {
        sample_head.clone()
    };

    Some(DataSchema {
        columns,
        dtypes,
        row_count,
        sample_head,
        sample_tail,
        null_counts,
    })
}

/// Narrowest of int64, float64 and object that fits every non-empty cell,
/// plus the number of empty cells. A column with no values is `object`.
fn infer_column(records: &[StringRecord], index: usize) -> (ColumnType, usize) {
    let mut nulls = 0;
    let mut is_int = true;
    let mut is_float = true;

    for record in records {
        let value = cell(record, index);
        if value.is_empty() {
            nulls += 1;
            continue;
        }
        if is_int && value.parse::<i64>().is_err() {
            is_int = false;
        }
        if is_float && !is_int && value.parse::<f64>().is_err() {
            is_float = false;
        }
    }

    let dtype = if nulls == records.len() {
        ColumnType::Object
    } else if is_int {
        ColumnType::Int64
    } else if is_float {
        ColumnType::Float64
    } else {
        ColumnType::Object
    };
    (dtype, nulls)
}

fn cell(record: &StringRecord, index: usize) -> &str {
    record.get(index).unwrap_or_default().trim()
}

fn row_to_object(
    record: &StringRecord,
    columns: &[String],
    dtypes: &BTreeMap<String, ColumnType>,
) -> Map<String, Value> {
    let mut row = Map::new();
    for (index, column) in columns.iter().enumerate() {
        let raw = record.get(index).unwrap_or_default();
        let value = cell(record, index);
        let coerced = if value.is_empty() {
            Value::Null
        } else {
            match dtypes.get(column) {
                Some(ColumnType::Int64) => value.parse::<i64>().map_or(Value::Null, Value::from),
                Some(ColumnType::Float64) => value
                    .parse::<f64>()
                    .ok()
                    .and_then(Number::from_f64)
                    .map_or(Value::Null, Value::Number),
                _ => Value::String(raw.to_string()),
            }
        };
        row.insert(column.clone(), coerced);
    }
    row
}

/// Member names of the ZIP archive at `path`, without extracting anything.
/// `None` when the file is not a readable archive.
pub fn list_zip_contents(path: &Path) -> Option<Vec<String>> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(err) => {
            warn!(path = %path.display(), error = %err, "failed to open archive");
            return None;
        }
    };
    let mut archive = match ZipArchive::new(file) {
        Ok(archive) => archive,
        Err(err) => {
            warn!(path = %path.display(), error = %err, "not a readable zip archive");
            return None;
        }
    };

    let mut names = Vec::with_capacity(archive.len());
    for index in 0..archive.len() {
        match archive.by_index(index) {
            Ok(entry) => names.push(entry.name().to_string()),
            Err(err) => {
                warn!(path = %path.display(), index, error = %err, "unreadable archive entry");
                return None;
            }
        }
    }
    Some(names)
}
