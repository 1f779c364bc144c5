//! In-memory tabular datasets and per-column type inference.
//!
//! A refreshed report is read into a [`TabularDataset`]: an ordered list of
//! named columns, each with an [`InferredType`], and rectangular rows of
//! [`Cell`] values. Spreadsheet containers are read through `calamine` from
//! their first worksheet; delimited exports go through the `csv` reader after
//! decoding (see [`crate::io_utils::decode_with_fallback`]).
//!
//! Inference is deliberately conservative. Any text observation, or any mix
//! of kinds other than integer with float, collapses a column to text.

use std::{fmt, fs, path::Path};

use anyhow::{Context, Result, anyhow, bail};
use calamine::{Data, Reader, open_workbook_auto};
use chrono::{NaiveDate, NaiveDateTime, TimeDelta};
use encoding_rs::{Encoding, UTF_8};
use log::{debug, warn};

use crate::io_utils;

const SPREADSHEET_EXTENSIONS: &[&str] = &["xlsx", "xlsm", "xlsb", "xls", "ods"];
const DELIMITED_EXTENSIONS: &[&str] = &["csv", "tsv"];

/// Largest magnitude at which every integral `f64` is exact.
const MAX_EXACT_FLOAT_INTEGER: f64 = 9_007_199_254_740_992.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InferredType {
    Text,
    Float,
    Integer,
    Timestamp,
    Duration,
}

impl InferredType {
    pub const ALL: [InferredType; 5] = [
        InferredType::Text,
        InferredType::Float,
        InferredType::Integer,
        InferredType::Timestamp,
        InferredType::Duration,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            InferredType::Text => "text",
            InferredType::Float => "float",
            InferredType::Integer => "integer",
            InferredType::Timestamp => "timestamp",
            InferredType::Duration => "duration",
        }
    }
}

impl fmt::Display for InferredType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Empty,
    Text(String),
    Integer(i64),
    Float(f64),
    Timestamp(NaiveDateTime),
    Duration(TimeDelta),
}

impl Cell {
    fn kind(&self) -> Option<InferredType> {
        match self {
            Cell::Empty => None,
            Cell::Text(_) => Some(InferredType::Text),
            Cell::Integer(_) => Some(InferredType::Integer),
            Cell::Float(_) => Some(InferredType::Float),
            Cell::Timestamp(_) => Some(InferredType::Timestamp),
            Cell::Duration(_) => Some(InferredType::Duration),
        }
    }

    /// Text form used in the bulk-load stream; `None` is SQL NULL.
    pub fn render(&self) -> Option<String> {
        match self {
            Cell::Empty => None,
            Cell::Text(s) => Some(s.clone()),
            Cell::Integer(i) => Some(i.to_string()),
            Cell::Float(f) => Some(f.to_string()),
            Cell::Timestamp(ts) => Some(ts.format("%Y-%m-%d %H:%M:%S%.f").to_string()),
            Cell::Duration(delta) => Some(format_duration(delta)),
        }
    }
}

fn format_duration(delta: &TimeDelta) -> String {
    let sign = if *delta < TimeDelta::zero() { "-" } else { "" };
    let abs = delta.abs();
    let total_seconds = abs.num_seconds();
    let millis = abs.subsec_nanos() / 1_000_000;
    let (hours, minutes, seconds) = (
        total_seconds / 3600,
        (total_seconds % 3600) / 60,
        total_seconds % 60,
    );
    if millis > 0 {
        format!("{sign}{hours:02}:{minutes:02}:{seconds:02}.{millis:03}")
    } else {
        format!("{sign}{hours:02}:{minutes:02}:{seconds:02}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub inferred: InferredType,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TabularDataset {
    columns: Vec<Column>,
    rows: Vec<Vec<Cell>>,
}

impl TabularDataset {
    /// Builds a dataset, padding short rows and inferring column types.
    ///
    /// Rows wider than the header are rejected with their 1-based data row number.
    pub fn from_cells(headers: Vec<String>, mut rows: Vec<Vec<Cell>>) -> Result<Self> {
        let width = headers.len();
        for (idx, row) in rows.iter_mut().enumerate() {
            if row.len() > width {
                bail!(
                    "Row {} has {} value(s) but the header defines {} column(s)",
                    idx + 1,
                    row.len(),
                    width
                );
            }
            row.resize(width, Cell::Empty);
        }

        let mut candidates = vec![TypeCandidate::default(); width];
        for row in &rows {
            for (candidate, cell) in candidates.iter_mut().zip(row) {
                candidate.observe(cell);
            }
        }

        let columns = headers
            .into_iter()
            .enumerate()
            .map(|(idx, name)| Column {
                name: header_or_placeholder(name, idx),
                inferred: candidates[idx].decide(),
            })
            .collect();
        Ok(Self { columns, rows })
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Cell>] {
        &self.rows
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }
}

fn header_or_placeholder(name: String, idx: usize) -> String {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        format!("unnamed_{}", idx + 1)
    } else {
        trimmed.to_string()
    }
}

#[derive(Debug, Clone, Default)]
struct TypeCandidate {
    non_empty: usize,
    text_matches: usize,
    integer_matches: usize,
    float_matches: usize,
    timestamp_matches: usize,
    duration_matches: usize,
}

impl TypeCandidate {
    fn observe(&mut self, cell: &Cell) {
        let Some(kind) = cell.kind() else {
            return;
        };
        self.non_empty += 1;
        match kind {
            InferredType::Text => self.text_matches += 1,
            InferredType::Integer => self.integer_matches += 1,
            InferredType::Float => self.float_matches += 1,
            InferredType::Timestamp => self.timestamp_matches += 1,
            InferredType::Duration => self.duration_matches += 1,
        }
    }

    fn decide(&self) -> InferredType {
        if self.non_empty == 0 || self.text_matches > 0 {
            return InferredType::Text;
        }
        let numeric = self.integer_matches + self.float_matches;
        if numeric == self.non_empty {
            if self.float_matches > 0 {
                InferredType::Float
            } else {
                InferredType::Integer
            }
        } else if self.timestamp_matches == self.non_empty {
            InferredType::Timestamp
        } else if self.duration_matches == self.non_empty {
            InferredType::Duration
        } else {
            InferredType::Text
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    Spreadsheet,
    Delimited(u8),
}

impl SourceFormat {
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        if SPREADSHEET_EXTENSIONS.contains(&ext.as_str()) {
            Some(SourceFormat::Spreadsheet)
        } else if DELIMITED_EXTENSIONS.contains(&ext.as_str()) {
            Some(SourceFormat::Delimited(io_utils::resolve_input_delimiter(path)))
        } else {
            None
        }
    }
}

#[derive(Debug)]
pub struct LoadedDataset {
    pub dataset: TabularDataset,
    /// Text encoding that decoded the file; UTF-8 for spreadsheet containers.
    pub encoding: &'static Encoding,
}

pub fn load_dataset(path: &Path) -> Result<LoadedDataset> {
    let format = SourceFormat::from_path(path)
        .ok_or_else(|| anyhow!("Unsupported report format for {path:?}"))?;
    match format {
        SourceFormat::Spreadsheet => {
            let dataset = load_spreadsheet(path)?;
            Ok(LoadedDataset {
                dataset,
                encoding: UTF_8,
            })
        }
        SourceFormat::Delimited(delimiter) => load_delimited(path, delimiter),
    }
}

fn load_spreadsheet(path: &Path) -> Result<TabularDataset> {
    let mut workbook =
        open_workbook_auto(path).with_context(|| format!("Opening workbook {path:?}"))?;
    let sheet = workbook
        .sheet_names()
        .first()
        .cloned()
        .ok_or_else(|| anyhow!("Workbook {path:?} has no worksheets"))?;
    let range = workbook
        .worksheet_range(&sheet)
        .with_context(|| format!("Reading worksheet '{sheet}' from {path:?}"))?;
    debug!("Reading worksheet '{sheet}' ({:?}) from {path:?}", range.get_size());

    let mut rows = range.rows();
    let Some(header_row) = rows.next() else {
        return TabularDataset::from_cells(Vec::new(), Vec::new());
    };
    let headers = header_row.iter().map(header_text).collect();
    let cells = rows
        .map(|row| row.iter().map(spreadsheet_cell).collect::<Vec<_>>())
        .filter(|row| row.iter().any(|cell| *cell != Cell::Empty))
        .collect();
    TabularDataset::from_cells(headers, cells)
}

fn header_text(data: &Data) -> String {
    match data {
        Data::Empty => String::new(),
        Data::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn spreadsheet_cell(data: &Data) -> Cell {
    match data {
        Data::Empty => Cell::Empty,
        Data::String(s) if s.is_empty() => Cell::Empty,
        Data::String(s) => Cell::Text(s.clone()),
        Data::Int(i) => Cell::Integer(*i),
        Data::Float(f) => integral_float(*f).map_or(Cell::Float(*f), Cell::Integer),
        Data::Bool(b) => Cell::Text(b.to_string()),
        Data::DateTime(value) => {
            let converted = if value.is_duration() {
                value.as_duration().map(Cell::Duration)
            } else {
                value.as_datetime().map(Cell::Timestamp)
            };
            converted.unwrap_or_else(|| Cell::Float(value.as_f64()))
        }
        Data::DateTimeIso(s) => parse_timestamp(s).map_or_else(|| Cell::Text(s.clone()), Cell::Timestamp),
        Data::DurationIso(s) => Cell::Text(s.clone()),
        Data::Error(err) => Cell::Text(err.to_string()),
    }
}

fn integral_float(value: f64) -> Option<i64> {
    if value.is_finite() && value.fract() == 0.0 && value.abs() <= MAX_EXACT_FLOAT_INTEGER {
        Some(value as i64)
    } else {
        None
    }
}

fn load_delimited(path: &Path, delimiter: u8) -> Result<LoadedDataset> {
    let bytes = fs::read(path).with_context(|| format!("Reading {path:?}"))?;
    let (text, encoding) = io_utils::decode_with_fallback(&bytes)
        .with_context(|| format!("Decoding {path:?}"))?;
    if encoding != UTF_8 {
        warn!(
            "{path:?} is not valid UTF-8; decoded with fallback encoding {}",
            encoding.name()
        );
    }

    let mut reader = io_utils::open_csv_reader(text.as_bytes(), delimiter);
    let mut records = reader.records();
    let headers = match records.next() {
        Some(record) => record
            .with_context(|| format!("Reading header row of {path:?}"))?
            .iter()
            .map(|field| field.trim_start_matches('\u{feff}').to_string())
            .collect(),
        None => Vec::new(),
    };

    let mut cells = Vec::new();
    for (idx, record) in records.enumerate() {
        let record = record.with_context(|| format!("Reading row {} in {path:?}", idx + 2))?;
        if record.iter().all(|field| field.is_empty()) {
            continue;
        }
        cells.push(record.iter().map(text_cell).collect::<Vec<_>>());
    }
    let dataset = TabularDataset::from_cells(headers, cells)
        .with_context(|| format!("Building dataset from {path:?}"))?;
    Ok(LoadedDataset { dataset, encoding })
}

fn text_cell(raw: &str) -> Cell {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Cell::Empty;
    }
    if let Ok(value) = trimmed.parse::<i64>() {
        return Cell::Integer(value);
    }
    if let Ok(value) = trimmed.parse::<f64>()
        && value.is_finite()
    {
        return Cell::Float(value);
    }
    if let Some(ts) = parse_timestamp(trimmed) {
        return Cell::Timestamp(ts);
    }
    Cell::Text(raw.to_string())
}

pub fn parse_timestamp(value: &str) -> Option<NaiveDateTime> {
    const DATETIME_FORMATS: &[&str] = &[
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%d/%m/%Y %H:%M:%S",
        "%m/%d/%Y %H:%M:%S",
        "%Y-%m-%d %H:%M",
        "%Y-%m-%dT%H:%M",
    ];
    const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%d/%m/%Y", "%m/%d/%Y", "%d-%m-%Y"];

    let value = value.trim().trim_end_matches('Z');
    DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
        .or_else(|| {
            DATE_FORMATS
                .iter()
                .find_map(|fmt| NaiveDate::parse_from_str(value, fmt).ok())
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        })
}
