//! In-memory table snapshots.
//!
//! A [`Frame`] is the unit of work every transform and join operates on:
//! named columns with an inferred [`ColumnKind`] and optional (missing)
//! cells. Frames are transient; the store materializes them into physical
//! relations and reads them back out.

use std::io::Read;
use std::path::Path;

use crate::data::{ColumnKind, Value, parse_naive_date, parse_naive_datetime, parse_typed_value};
use crate::error::{Result, StoreError};

#[derive(Debug, Clone, PartialEq)]
pub struct FrameColumn {
    pub name: String,
    pub kind: ColumnKind,
    pub cells: Vec<Option<Value>>,
}

impl FrameColumn {
    pub fn new(name: impl Into<String>, kind: ColumnKind) -> Self {
        Self {
            name: name.into(),
            kind,
            cells: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Frame {
    pub columns: Vec<FrameColumn>,
}

impl Frame {
    pub fn new(columns: Vec<FrameColumn>) -> Self {
        Self { columns }
    }

    pub fn row_count(&self) -> usize {
        self.columns.first().map(|c| c.cells.len()).unwrap_or(0)
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn column(&self, name: &str) -> Option<&FrameColumn> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    /// Keeps only the rows whose index passes `keep`. Used by row-dropping
    /// transforms so all columns stay aligned.
    pub fn retain_rows(&mut self, keep: &[bool]) {
        for column in &mut self.columns {
            let mut index = 0usize;
            column.cells.retain(|_| {
                let keep_row = keep.get(index).copied().unwrap_or(false);
                index += 1;
                keep_row
            });
        }
    }

    /// Renders every row as display strings, missing cells as empty strings.
    pub fn display_rows(&self) -> Vec<Vec<String>> {
        let mut rows = Vec::with_capacity(self.row_count());
        for row_idx in 0..self.row_count() {
            let row = self
                .columns
                .iter()
                .map(|column| {
                    column.cells[row_idx]
                        .as_ref()
                        .map(Value::as_display)
                        .unwrap_or_default()
                })
                .collect();
            rows.push(row);
        }
        rows
    }

    /// Reads a whole CSV stream into a typed frame, inferring column kinds
    /// by elimination over all rows. Blank lines become all-missing rows
    /// instead of being skipped.
    pub fn from_csv_reader<R: Read>(mut reader: R) -> Result<Frame> {
        let mut text = String::new();
        reader.read_to_string(&mut text)?;
        let text = preserve_blank_records(&text);
        let mut csv_reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(text.as_bytes());
        let headers = csv_reader.headers()?.clone();
        let mut raw_rows: Vec<Vec<String>> = Vec::new();
        for record in csv_reader.records() {
            let record = record?;
            let blank = record.len() == 1 && record[0].is_empty();
            if !blank && record.len() != headers.len() {
                return Err(StoreError::Import(format!(
                    "row {} has {} fields, expected {}",
                    raw_rows.len() + 1,
                    record.len(),
                    headers.len()
                )));
            }
            raw_rows.push(record.iter().map(|s| s.to_string()).collect());
        }

        let mut candidates = vec![TypeCandidate::new(); headers.len()];
        for row in &raw_rows {
            for (idx, field) in row.iter().enumerate() {
                if field.is_empty() {
                    continue;
                }
                if let Some(candidate) = candidates.get_mut(idx) {
                    candidate.observe(field);
                }
            }
        }

        let mut columns: Vec<FrameColumn> = headers
            .iter()
            .enumerate()
            .map(|(idx, name)| FrameColumn::new(name, candidates[idx].decide()))
            .collect();

        for row in &raw_rows {
            for (idx, column) in columns.iter_mut().enumerate() {
                let raw = row.get(idx).map(|s| s.as_str()).unwrap_or("");
                let cell = parse_typed_value(raw, column.kind)
                    .map_err(|err| StoreError::Import(format!("{err:#}")))?;
                column.cells.push(cell);
            }
        }

        Ok(Frame::new(columns))
    }

    pub fn from_csv_path(path: &Path) -> Result<Frame> {
        let file = std::fs::File::open(path)?;
        Frame::from_csv_reader(file)
    }

    /// Writes the frame back out as a CSV file with display-name headers.
    pub fn to_csv_path(&self, path: &Path) -> Result<()> {
        let mut writer = csv::Writer::from_path(path)?;
        writer.write_record(self.column_names())?;
        for row in self.display_rows() {
            writer.write_record(&row)?;
        }
        writer.flush()?;
        Ok(())
    }
}

/// The csv crate silently drops fully blank records, which would lose a
/// missing value in a single-column table. Rewrites blank lines (outside
/// quoted fields) as one quoted empty field so they survive as rows.
fn preserve_blank_records(text: &str) -> std::borrow::Cow<'_, str> {
    let mut out = String::with_capacity(text.len());
    let mut in_quotes = false;
    let mut line_has_content = false;
    let mut chars = text.chars().peekable();
    while let Some(ch) = chars.next() {
        if in_quotes {
            if ch == '"' {
                in_quotes = false;
            }
            out.push(ch);
            continue;
        }
        match ch {
            '"' => {
                in_quotes = true;
                line_has_content = true;
                out.push(ch);
            }
            '\r' if chars.peek() == Some(&'\n') => {
                if !line_has_content {
                    out.push_str("\"\"");
                }
                chars.next();
                out.push_str("\r\n");
                line_has_content = false;
            }
            '\n' => {
                if !line_has_content {
                    out.push_str("\"\"");
                }
                out.push('\n');
                line_has_content = false;
            }
            _ => {
                line_has_content = true;
                out.push(ch);
            }
        }
    }
    if out.len() == text.len() {
        std::borrow::Cow::Borrowed(text)
    } else {
        std::borrow::Cow::Owned(out)
    }
}

/// Per-column type possibilities, eliminated as evidence arrives.
#[derive(Debug, Clone)]
struct TypeCandidate {
    possible_integer: bool,
    possible_float: bool,
    possible_boolean: bool,
    possible_date: bool,
    possible_datetime: bool,
    saw_value: bool,
}

impl TypeCandidate {
    fn new() -> Self {
        Self {
            possible_integer: true,
            possible_float: true,
            possible_boolean: true,
            possible_date: true,
            possible_datetime: true,
            saw_value: false,
        }
    }

    fn observe(&mut self, field: &str) {
        self.saw_value = true;
        if self.possible_boolean
            && !matches!(
                field.to_ascii_lowercase().as_str(),
                "true" | "false" | "t" | "f" | "yes" | "no" | "y" | "n"
            )
        {
            self.possible_boolean = false;
        }
        if self.possible_integer && field.parse::<i64>().is_err() {
            self.possible_integer = false;
        }
        if self.possible_float && field.parse::<f64>().is_err() {
            self.possible_float = false;
        }
        if self.possible_date && parse_naive_date(field).is_err() {
            self.possible_date = false;
        }
        if self.possible_datetime && parse_naive_datetime(field).is_err() {
            self.possible_datetime = false;
        }
    }

    fn decide(&self) -> ColumnKind {
        if !self.saw_value {
            ColumnKind::String
        } else if self.possible_boolean {
            ColumnKind::Boolean
        } else if self.possible_integer {
            ColumnKind::Integer
        } else if self.possible_float {
            ColumnKind::Float
        } else if self.possible_date {
            ColumnKind::Date
        } else if self.possible_datetime {
            ColumnKind::DateTime
        } else {
            ColumnKind::String
        }
    }
}
