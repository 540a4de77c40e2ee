//! The transform catalogue.
//!
//! A fixed set of column-scoped operations over an in-memory snapshot.
//! Each operation is total: applied to a column of an incompatible kind it
//! returns the snapshot unchanged instead of failing, except for type
//! casts and duplicate resolution, which surface row-level errors.
//! Committing a transform always creates a new version; prior versions are
//! never touched.

use std::collections::{BTreeMap, BTreeSet};

use chrono::Datelike;
use log::info;
use regex::Regex;

use crate::data::{ColumnKind, Value, parse_naive_date, parse_naive_datetime, parse_typed_value};
use crate::dedup;
use crate::engine::RelationEngine;
use crate::error::{Result, StoreError};
use crate::frame::{Frame, FrameColumn};
use crate::store::{Id, Store};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CastKind {
    String,
    Int,
    Float,
    DateTime,
}

impl CastKind {
    fn label(self) -> &'static str {
        match self {
            CastKind::String => "string",
            CastKind::Int => "int",
            CastKind::Float => "float",
            CastKind::DateTime => "datetime",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatePart {
    Year,
    Month,
    /// ISO week number.
    Week,
    Day,
    /// Full weekday name, e.g. `Monday`.
    Weekday,
}

impl DatePart {
    fn label(self) -> &'static str {
        match self {
            DatePart::Year => "year",
            DatePart::Month => "month",
            DatePart::Week => "week",
            DatePart::Day => "day",
            DatePart::Weekday => "weekday",
        }
    }
}

#[derive(Debug, Clone)]
pub enum Transform {
    FindReplace { column: String, find: String, replace: String },
    FindReplaceRegex { column: String, pattern: String, replace: String },
    FindReplaceAll { find: String, replace: String },
    Normalize { column: String },
    NormalizeAll,
    RemoveOutliers { column: String, range: f64 },
    RemoveAllOutliers { range: f64 },
    FillEmptyMean { column: String },
    FillEmptyMedian { column: String },
    FillEmptyValue { column: String, value: String },
    FillAllEmptyMean,
    FillAllEmptyMedian,
    DiscretizeEquiwidth { column: String, bins: usize },
    DiscretizeEquifreq { column: String, bins: usize },
    DiscretizeRanges { column: String, boundaries: Vec<f64> },
    OneHotEncode { column: String, use_old_name: bool },
    ChangeType { column: String, new_type: CastKind },
    ExtractFromDatetime { column: String, part: DatePart },
    ReplaceDuplicates {
        column: String,
        replacements: BTreeMap<String, String>,
        chain: bool,
    },
    DeleteColumn { column: String },
}

impl Transform {
    /// Audit-trail description recorded on the version this transform
    /// produces.
    pub fn describe(&self) -> String {
        match self {
            Transform::FindReplace { column, find, replace } => {
                format!("FIND {find} REPLACE {replace} IN {column}")
            }
            Transform::FindReplaceRegex { column, pattern, replace } => {
                format!("FIND {pattern} REPLACE {replace} IN {column}")
            }
            Transform::FindReplaceAll { find, replace } => {
                format!("FIND {find} REPLACE {replace} IN ALL")
            }
            Transform::Normalize { column } => format!("NORMALIZE {column}"),
            Transform::NormalizeAll => "NORMALIZE ALL".to_string(),
            Transform::RemoveOutliers { column, range } => {
                format!("REMOVE OUTLIERS WITH RANGE {range} IN {column}")
            }
            Transform::RemoveAllOutliers { range } => {
                format!("REMOVE OUTLIERS WITH RANGE {range} IN ALL")
            }
            Transform::FillEmptyMean { column } => format!("FILL EMPTY WITH MEAN IN {column}"),
            Transform::FillEmptyMedian { column } => {
                format!("FILL EMPTY WITH MEDIAN IN {column}")
            }
            Transform::FillEmptyValue { column, value } => {
                format!("FILL EMPTY WITH {value} IN {column}")
            }
            Transform::FillAllEmptyMean => "FILL EMPTY WITH MEAN IN ALL".to_string(),
            Transform::FillAllEmptyMedian => "FILL EMPTY WITH MEDIAN IN ALL".to_string(),
            Transform::DiscretizeEquiwidth { column, bins } => {
                format!("DISCRETIZE (EQUIWIDTH) TO {bins} BINS IN {column}")
            }
            Transform::DiscretizeEquifreq { column, bins } => {
                format!("DISCRETIZE (EQUIFREQ) TO {bins} BINS IN {column}")
            }
            Transform::DiscretizeRanges { column, boundaries } => format!(
                "DISCRETIZE (MANUAL RANGES) TO {} BINS IN {column}",
                boundaries.len() + 1
            ),
            Transform::OneHotEncode { column, .. } => format!("ONE-HOT ENCODE {column}"),
            Transform::ChangeType { column, new_type } => {
                format!("CHANGE TYPE OF {column} TO {}", new_type.label())
            }
            Transform::ExtractFromDatetime { column, part } => {
                format!("EXTRACT {} FROM DATETIME IN {column}", part.label())
            }
            Transform::ReplaceDuplicates { column, .. } => {
                format!("REPLACE DUPLICATES IN {column}")
            }
            Transform::DeleteColumn { column } => format!("DELETE COLUMN {column}"),
        }
    }

    /// Applies the transform to a snapshot in place.
    pub fn apply(&self, frame: &mut Frame) -> Result<()> {
        match self {
            Transform::FindReplace { column, find, replace } => {
                let idx = column_index(frame, column)?;
                find_replace(&mut frame.columns[idx], find, replace);
            }
            Transform::FindReplaceRegex { column, pattern, replace } => {
                let idx = column_index(frame, column)?;
                find_replace_regex(&mut frame.columns[idx], pattern, replace)?;
            }
            Transform::FindReplaceAll { find, replace } => {
                for column in &mut frame.columns {
                    find_replace(column, find, replace);
                }
            }
            Transform::Normalize { column } => {
                let idx = column_index(frame, column)?;
                normalize(&mut frame.columns[idx]);
            }
            Transform::NormalizeAll => {
                for column in &mut frame.columns {
                    normalize(column);
                }
            }
            Transform::RemoveOutliers { column, range } => {
                let idx = column_index(frame, column)?;
                if let Some(keep) = outlier_mask(&frame.columns[idx], *range) {
                    frame.retain_rows(&keep);
                }
            }
            Transform::RemoveAllOutliers { range } => {
                let mut keep = vec![true; frame.row_count()];
                for column in &frame.columns {
                    if let Some(mask) = outlier_mask(column, *range) {
                        for (slot, ok) in keep.iter_mut().zip(mask) {
                            *slot = *slot && ok;
                        }
                    }
                }
                frame.retain_rows(&keep);
            }
            Transform::FillEmptyMean { column } => {
                let idx = column_index(frame, column)?;
                fill_statistic(&mut frame.columns[idx], mean);
            }
            Transform::FillEmptyMedian { column } => {
                let idx = column_index(frame, column)?;
                fill_statistic(&mut frame.columns[idx], median);
            }
            Transform::FillEmptyValue { column, value } => {
                let idx = column_index(frame, column)?;
                fill_value(&mut frame.columns[idx], value);
            }
            Transform::FillAllEmptyMean => {
                for column in &mut frame.columns {
                    fill_statistic(column, mean);
                }
            }
            Transform::FillAllEmptyMedian => {
                for column in &mut frame.columns {
                    fill_statistic(column, median);
                }
            }
            Transform::DiscretizeEquiwidth { column, bins } => {
                let idx = column_index(frame, column)?;
                discretize_equiwidth(&mut frame.columns[idx], *bins);
            }
            Transform::DiscretizeEquifreq { column, bins } => {
                let idx = column_index(frame, column)?;
                discretize_equifreq(&mut frame.columns[idx], *bins);
            }
            Transform::DiscretizeRanges { column, boundaries } => {
                let idx = column_index(frame, column)?;
                discretize_ranges(&mut frame.columns[idx], boundaries);
            }
            Transform::OneHotEncode { column, use_old_name } => {
                let idx = column_index(frame, column)?;
                one_hot_encode(frame, idx, *use_old_name);
            }
            Transform::ChangeType { column, new_type } => {
                let idx = column_index(frame, column)?;
                change_type(&mut frame.columns[idx], *new_type)?;
            }
            Transform::ExtractFromDatetime { column, part } => {
                let idx = column_index(frame, column)?;
                extract_from_datetime(&mut frame.columns[idx], *part);
            }
            Transform::ReplaceDuplicates { column, replacements, chain } => {
                let idx = frame
                    .column_index(column)
                    .ok_or_else(|| StoreError::Dedup(format!("no column named '{column}'")))?;
                replace_duplicates(&mut frame.columns[idx], replacements, *chain)?;
            }
            Transform::DeleteColumn { column } => {
                let idx = column_index(frame, column)?;
                frame.columns.remove(idx);
            }
        }
        Ok(())
    }
}

fn column_index(frame: &Frame, name: &str) -> Result<usize> {
    frame
        .column_index(name)
        .ok_or_else(|| StoreError::Transform(format!("no column named '{name}'")))
}

fn is_numeric(column: &FrameColumn) -> bool {
    column.kind.is_numeric()
}

/// Numeric view of a column; `None` for missing cells.
fn numeric_cells(column: &FrameColumn) -> Vec<Option<f64>> {
    column
        .cells
        .iter()
        .map(|cell| cell.as_ref().and_then(Value::as_f64))
        .collect()
}

fn present(values: &[Option<f64>]) -> Vec<f64> {
    values.iter().copied().flatten().collect()
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 1 {
        Some(sorted[mid])
    } else {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    }
}

/// Sample standard deviation; `None` with fewer than two values.
fn stddev(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let mean = mean(values)?;
    let variance =
        values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    Some(variance.sqrt())
}

/// Rewrites every cell to its string rendering. Used when a replacement or
/// fill value does not fit the column's kind, mirroring dataframe dtype
/// widening.
fn widen_to_string(column: &mut FrameColumn) {
    for cell in &mut column.cells {
        if let Some(value) = cell {
            *cell = Some(Value::String(value.as_display()));
        }
    }
    column.kind = ColumnKind::String;
}

fn convert_to_float(column: &mut FrameColumn) {
    for cell in &mut column.cells {
        if let Some(value) = cell {
            if let Some(v) = value.as_f64() {
                *cell = Some(Value::Float(v));
            }
        }
    }
    column.kind = ColumnKind::Float;
}

fn find_replace(column: &mut FrameColumn, find: &str, replace: &str) {
    let hit = column
        .cells
        .iter()
        .any(|cell| cell.as_ref().is_some_and(|v| v.as_display() == find));
    if !hit {
        return;
    }
    let replacement = match parse_typed_value(replace, column.kind) {
        Ok(parsed) => parsed,
        Err(_) => {
            widen_to_string(column);
            Some(Value::String(replace.to_string()))
        }
    };
    for cell in &mut column.cells {
        if cell.as_ref().is_some_and(|v| v.as_display() == find) {
            *cell = replacement.clone();
        }
    }
}

fn find_replace_regex(column: &mut FrameColumn, pattern: &str, replace: &str) -> Result<()> {
    if column.kind != ColumnKind::String {
        return Ok(());
    }
    let regex = Regex::new(pattern)
        .map_err(|err| StoreError::Transform(format!("invalid pattern '{pattern}': {err}")))?;
    for cell in &mut column.cells {
        if let Some(Value::String(s)) = cell {
            let replaced = regex.replace_all(s, replace);
            if replaced != *s {
                *cell = Some(Value::String(replaced.into_owned()));
            }
        }
    }
    Ok(())
}

/// Min-max rescale to [0, 1]. A constant column maps to all zeros so the
/// output stays defined when `max == min`.
fn normalize(column: &mut FrameColumn) {
    if !is_numeric(column) {
        return;
    }
    let values = present(&numeric_cells(column));
    let (Some(min), Some(max)) = (
        values.iter().copied().min_by(f64::total_cmp),
        values.iter().copied().max_by(f64::total_cmp),
    ) else {
        return;
    };
    let span = max - min;
    for cell in &mut column.cells {
        if let Some(v) = cell.as_ref().and_then(Value::as_f64) {
            let scaled = if span == 0.0 { 0.0 } else { (v - min) / span };
            *cell = Some(Value::Float(scaled));
        }
    }
    column.kind = ColumnKind::Float;
}

/// Keep-mask for outlier removal, or `None` when the column is not
/// numeric or has no usable spread. Missing cells fail the predicate and
/// are dropped, like null comparisons in a dataframe filter.
fn outlier_mask(column: &FrameColumn, range: f64) -> Option<Vec<bool>> {
    if !is_numeric(column) {
        return None;
    }
    let cells = numeric_cells(column);
    let values = present(&cells);
    let mean = mean(&values)?;
    let stddev = stddev(&values)?;
    Some(
        cells
            .iter()
            .map(|cell| match cell {
                Some(v) => (v - mean).abs() <= range * stddev,
                None => false,
            })
            .collect(),
    )
}

fn fill_statistic(column: &mut FrameColumn, statistic: fn(&[f64]) -> Option<f64>) {
    if !is_numeric(column) {
        return;
    }
    let Some(fill) = statistic(&present(&numeric_cells(column))) else {
        return;
    };
    if column.kind == ColumnKind::Integer && fill.fract() != 0.0 {
        convert_to_float(column);
    }
    let fill = match column.kind {
        ColumnKind::Integer => Value::Integer(fill as i64),
        _ => Value::Float(fill),
    };
    for cell in &mut column.cells {
        if cell.is_none() {
            *cell = Some(fill.clone());
        }
    }
}

fn fill_value(column: &mut FrameColumn, value: &str) {
    let fill = match parse_typed_value(value, column.kind) {
        Ok(Some(parsed)) => parsed,
        Ok(None) => return,
        Err(_) => {
            widen_to_string(column);
            Value::String(value.to_string())
        }
    };
    for cell in &mut column.cells {
        if cell.is_none() {
            *cell = Some(fill.clone());
        }
    }
}

fn fmt_edge(value: f64) -> String {
    let rounded = (value * 1000.0).round() / 1000.0;
    format!("{rounded}")
}

fn bucket_label(lower: f64, upper: f64) -> String {
    format!("({}, {}]", fmt_edge(lower), fmt_edge(upper))
}

/// Replaces numeric cells with the label of the half-open interval
/// `(edges[i], edges[i+1]]` containing them.
fn apply_edges(column: &mut FrameColumn, edges: &[f64]) {
    for cell in &mut column.cells {
        if let Some(v) = cell.as_ref().and_then(Value::as_f64) {
            let bucket = edges
                .windows(2)
                .find(|pair| v > pair[0] && v <= pair[1])
                .map(|pair| bucket_label(pair[0], pair[1]));
            *cell = bucket.map(Value::String);
        }
    }
    column.kind = ColumnKind::String;
}

fn discretize_equiwidth(column: &mut FrameColumn, bins: usize) {
    if !is_numeric(column) || bins == 0 {
        return;
    }
    let values = present(&numeric_cells(column));
    let (Some(min), Some(max)) = (
        values.iter().copied().min_by(f64::total_cmp),
        values.iter().copied().max_by(f64::total_cmp),
    ) else {
        return;
    };
    let span = max - min;
    // The lowest edge sits just below the minimum so the minimum itself
    // falls inside the first bucket.
    let pad = if span == 0.0 { 0.001 } else { span * 0.001 };
    let mut edges = vec![min - pad];
    for i in 1..=bins {
        edges.push(min + span * i as f64 / bins as f64);
    }
    apply_edges(column, &edges);
}

fn discretize_equifreq(column: &mut FrameColumn, bins: usize) {
    if !is_numeric(column) || bins == 0 {
        return;
    }
    let mut values = present(&numeric_cells(column));
    if values.is_empty() {
        return;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let n = values.len();
    let min = values[0];
    let max = values[n - 1];
    let pad = if max == min { 0.001 } else { (max - min) * 0.001 };

    // Nearest-rank quantile edges; duplicate edges collapse so every
    // bucket keeps a non-empty range.
    let mut edges = vec![min - pad];
    for i in 1..=bins {
        let rank = ((i * n).div_ceil(bins)).max(1) - 1;
        let edge = values[rank.min(n - 1)];
        if edge > *edges.last().unwrap_or(&f64::MIN) {
            edges.push(edge);
        }
    }
    apply_edges(column, &edges);
}

/// Buckets by explicit boundaries. Rejected (no-op) when the lowest or
/// highest boundary falls outside the observed range; the engine pads with
/// a value just below the minimum and with the maximum so no input value
/// is left without a bucket.
fn discretize_ranges(column: &mut FrameColumn, boundaries: &[f64]) {
    if !is_numeric(column) || boundaries.is_empty() {
        return;
    }
    let values = present(&numeric_cells(column));
    let (Some(min), Some(max)) = (
        values.iter().copied().min_by(f64::total_cmp),
        values.iter().copied().max_by(f64::total_cmp),
    ) else {
        return;
    };
    let mut sorted = boundaries.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    if sorted[0] < min || sorted[sorted.len() - 1] > max {
        return;
    }
    let span = max - min;
    let pad = if span == 0.0 { 0.001 } else { span / 1000.0 };
    let mut edges = vec![min - pad];
    edges.extend(sorted);
    edges.push(max);
    edges.dedup();
    apply_edges(column, &edges);
}

/// Expands a string column into one boolean column per distinct value,
/// inserted where the source column sat.
fn one_hot_encode(frame: &mut Frame, index: usize, use_old_name: bool) {
    if frame.columns[index].kind != ColumnKind::String {
        return;
    }
    let source = frame.columns.remove(index);
    let distinct: BTreeSet<&str> = source
        .cells
        .iter()
        .filter_map(|cell| match cell {
            Some(Value::String(s)) => Some(s.as_str()),
            _ => None,
        })
        .collect();

    for (offset, value) in distinct.iter().enumerate() {
        let name = if use_old_name {
            format!("{}_{value}", source.name)
        } else {
            (*value).to_string()
        };
        let mut encoded = FrameColumn::new(name, ColumnKind::Boolean);
        encoded.cells = source
            .cells
            .iter()
            .map(|cell| {
                let hit = matches!(cell, Some(Value::String(s)) if s == value);
                Some(Value::Boolean(hit))
            })
            .collect();
        frame.columns.insert(index + offset, encoded);
    }
}

fn cast_error(value: &Value, target: &str) -> StoreError {
    StoreError::Transform(format!("cannot cast '{}' to {target}", value.as_display()))
}

fn change_type(column: &mut FrameColumn, new_type: CastKind) -> Result<()> {
    match new_type {
        CastKind::String => {
            widen_to_string(column);
        }
        CastKind::Int => {
            for cell in &mut column.cells {
                if let Some(value) = cell {
                    let number = value
                        .as_f64()
                        .or_else(|| match value {
                            Value::String(s) => s.trim().parse::<f64>().ok(),
                            _ => None,
                        })
                        .ok_or_else(|| cast_error(value, "int"))?;
                    *cell = Some(Value::Integer(number.round() as i64));
                }
            }
            column.kind = ColumnKind::Integer;
        }
        CastKind::Float => {
            for cell in &mut column.cells {
                if let Some(value) = cell {
                    let number = value
                        .as_f64()
                        .or_else(|| match value {
                            Value::String(s) => s.trim().parse::<f64>().ok(),
                            _ => None,
                        })
                        .ok_or_else(|| cast_error(value, "float"))?;
                    *cell = Some(Value::Float(number));
                }
            }
            column.kind = ColumnKind::Float;
        }
        CastKind::DateTime => {
            for cell in &mut column.cells {
                if let Some(value) = cell {
                    let parsed = match value {
                        Value::DateTime(dt) => *dt,
                        Value::Date(d) => d
                            .and_hms_opt(0, 0, 0)
                            .ok_or_else(|| cast_error(value, "datetime"))?,
                        Value::String(s) => parse_naive_datetime(s)
                            .or_else(|_| {
                                parse_naive_date(s).map(|d| d.and_hms_opt(0, 0, 0).unwrap_or_default())
                            })
                            .map_err(|_| cast_error(value, "datetime"))?,
                        _ => return Err(cast_error(value, "datetime")),
                    };
                    *cell = Some(Value::DateTime(parsed));
                }
            }
            column.kind = ColumnKind::DateTime;
        }
    }
    Ok(())
}

fn extract_from_datetime(column: &mut FrameColumn, part: DatePart) {
    if !column.kind.is_temporal() {
        return;
    }
    for cell in &mut column.cells {
        let Some(value) = cell else { continue };
        let date = match value {
            Value::Date(d) => *d,
            Value::DateTime(dt) => dt.date(),
            _ => continue,
        };
        *cell = Some(match part {
            DatePart::Year => Value::Integer(i64::from(date.year())),
            DatePart::Month => Value::Integer(i64::from(date.month())),
            DatePart::Week => Value::Integer(i64::from(date.iso_week().week())),
            DatePart::Day => Value::Integer(i64::from(date.day())),
            DatePart::Weekday => Value::String(date.format("%A").to_string()),
        });
    }
    column.kind = match part {
        DatePart::Weekday => ColumnKind::String,
        _ => ColumnKind::Integer,
    };
}

fn replace_duplicates(
    column: &mut FrameColumn,
    replacements: &BTreeMap<String, String>,
    chain: bool,
) -> Result<()> {
    if column.kind != ColumnKind::String {
        return Err(StoreError::Dedup(format!(
            "column '{}' is not a string column",
            column.name
        )));
    }
    let values: Vec<&str> = column
        .cells
        .iter()
        .map(|cell| match cell {
            Some(Value::String(s)) => s.as_str(),
            _ => "",
        })
        .collect();
    let resolved = dedup::resolve_duplicates(values.iter().copied(), replacements, chain);
    for (cell, value) in column.cells.iter_mut().zip(resolved) {
        if matches!(cell, Some(Value::String(_))) {
            *cell = Some(Value::String(value));
        }
    }
    Ok(())
}

/// Applies a transform to the current table of the dataset's latest
/// version and commits the result as a new version. Returns the new
/// version's id.
pub fn apply_and_commit<E>(
    store: &mut Store<E>,
    dataset_id: Id,
    transform: &Transform,
) -> Result<Id>
where
    E: RelationEngine,
    Store<E>: Clone,
{
    let table = store.current_table(dataset_id)?;
    let table_name = table.name.clone();
    let mut frame = store.snapshot(table.id)?;
    transform.apply(&mut frame)?;

    let description = transform.describe();
    store.transaction(|store| {
        let version = store.next_version(dataset_id, &description)?;
        let new_table = store.materialize_table(version, &table_name, &[])?;
        store.load_dataframe(new_table, &frame)?;
        info!("dataset {dataset_id}: {description}");
        Ok(version)
    })
}
