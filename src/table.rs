//! Elastic table rendering for CLI output.

use std::borrow::Cow;
use std::fmt::Write as _;

use crate::frame::Frame;

/// Renders a snapshot, truncated to `limit` rows when given.
pub fn render_frame(frame: &Frame, limit: Option<usize>) -> String {
    let headers = frame.column_names();
    let mut rows = frame.display_rows();
    let total = rows.len();
    if let Some(limit) = limit {
        rows.truncate(limit);
    }
    let mut output = render_table(&headers, &rows);
    if rows.len() < total {
        let _ = writeln!(output, "... {} more row(s)", total - rows.len());
    }
    output
}

pub fn render_table(headers: &[String], rows: &[Vec<String>]) -> String {
    let column_count = headers.len();
    let mut widths = headers
        .iter()
        .map(|h| h.chars().count())
        .collect::<Vec<_>>();

    for row in rows {
        for (idx, cell) in row.iter().enumerate().take(column_count) {
            widths[idx] = widths[idx].max(cell.chars().count());
        }
    }
    for width in &mut widths {
        *width = (*width).max(1);
    }

    let mut output = String::new();
    let _ = writeln!(output, "{}", format_row(headers, &widths));
    let separator = widths
        .iter()
        .map(|w| "-".repeat(*w))
        .collect::<Vec<_>>();
    let _ = writeln!(output, "{}", format_row(&separator, &widths));
    for row in rows {
        let _ = writeln!(output, "{}", format_row(row, &widths));
    }
    output
}

fn format_row(values: &[String], widths: &[usize]) -> String {
    let mut cells = Vec::with_capacity(values.len());
    for (idx, value) in values.iter().enumerate() {
        if idx >= widths.len() {
            break;
        }
        let sanitized = sanitize_cell(value);
        let display = sanitized.chars().count();
        let mut cell = sanitized.into_owned();
        let padding = widths[idx].saturating_sub(display);
        if padding > 0 {
            cell.push_str(&" ".repeat(padding));
        }
        cells.push(cell);
    }
    let mut line = cells.join("  ");
    while line.ends_with(' ') {
        line.pop();
    }
    line
}

fn sanitize_cell(value: &str) -> Cow<'_, str> {
    if value.contains(['\n', '\r', '\t']) {
        let mut sanitized = String::with_capacity(value.len());
        for ch in value.chars() {
            match ch {
                '\n' | '\r' | '\t' => sanitized.push(' '),
                other => sanitized.push(other),
            }
        }
        Cow::Owned(sanitized)
    } else {
        Cow::Borrowed(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn columns_align_to_their_widest_cell() {
        let headers = vec!["id".to_string(), "name".to_string()];
        let rows = vec![
            vec!["1".to_string(), "ada".to_string()],
            vec!["2".to_string(), "grace hopper".to_string()],
        ];
        let rendered = render_table(&headers, &rows);
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(lines[0], "id  name");
        assert_eq!(lines[1], "--  ------------");
        assert_eq!(lines[3], "2   grace hopper");
    }

    #[test]
    fn render_frame_reports_truncation() {
        let frame = Frame::from_csv_reader("v\n1\n2\n3\n".as_bytes()).expect("frame");
        let rendered = render_frame(&frame, Some(2));
        assert!(rendered.ends_with("... 1 more row(s)\n"));
        assert!(!render_frame(&frame, None).contains("more row"));
    }
}
