//! Ranked tabular blocks with a ratcheting column-width model.
//!
//! A [`Table`] owns a fixed header set and a per-column width that only grows
//! across refreshes, so columns do not jitter from frame to frame. Rendering
//! is bounded by the caller's height and width; rows are cut column by column
//! and a column is dropped entirely once there is not enough room left for
//! its own header.

use crate::fmt;
use crate::models::QueryPayload;

/// Starting width of every column, grown as wider cells arrive.
const INITIAL_COLUMN_WIDTH: usize = 6;

/// One heterogeneous cell value.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Null,
    Str(String),
    /// Identity-bearing integer (opid, seconds); rendered unscaled.
    Num(i64),
    /// Large counter; rendered with a magnitude suffix.
    Count(u64),
    /// A `current / total` pair, both halves scaled.
    Pair(u64, u64),
    /// Structured query payload; renders compact, retains structure.
    Query(QueryPayload),
}

impl Cell {
    /// Rendered text for display.
    pub fn text(&self) -> String {
        match self {
            Cell::Null => String::new(),
            Cell::Str(text) => text.clone(),
            Cell::Num(value) => value.to_string(),
            Cell::Count(value) => fmt::scale(*value),
            Cell::Pair(current, total) => {
                format!("{} / {}", fmt::scale(*current), fmt::scale(*total))
            }
            Cell::Query(payload) => payload.compact(),
        }
    }

    /// Unformatted identity text, used to resolve user input back to a row.
    /// Never truncated, never suffix-scaled.
    pub fn plain(&self) -> String {
        match self {
            Cell::Null => String::new(),
            Cell::Str(text) => text.clone(),
            Cell::Num(value) => value.to_string(),
            Cell::Count(value) => value.to_string(),
            Cell::Pair(current, total) => format!("{}/{}", current, total),
            Cell::Query(payload) => payload.compact(),
        }
    }
}

pub type Row = Vec<Cell>;

/// A block of rows sharing one header line.
#[derive(Debug)]
pub struct Table {
    headers: Vec<&'static str>,
    widths: Vec<usize>,
    rows: Vec<Row>,
}

impl Table {
    pub fn new(headers: Vec<&'static str>) -> Table {
        let widths = vec![INITIAL_COLUMN_WIDTH; headers.len()];
        Table {
            headers,
            widths,
            rows: Vec::new(),
        }
    }

    /// Replaces the row set. Does not render.
    ///
    /// Rows must not be wider than the header line.
    pub fn reset(&mut self, rows: Vec<Row>) {
        debug_assert!(rows.iter().all(|row| row.len() <= self.headers.len()));
        self.rows = rows;
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    /// Returns the first stored row whose cells satisfy the predicate.
    ///
    /// Callers match on [`Cell::plain`] values, not rendered text.
    pub fn find_row(&self, matches: impl Fn(&[Cell]) -> bool) -> Option<&Row> {
        self.rows.iter().find(|row| matches(row))
    }

    /// Renders the header plus as many rows as fit, as plain lines.
    ///
    /// `max_height` must leave room for the header; one line is reserved so a
    /// tall row set can never starve it. Every returned line is at most
    /// `max_width` characters.
    pub fn render(&mut self, max_height: usize, max_width: usize) -> Vec<String> {
        assert!(max_height > 1);
        let mut lines = Vec::with_capacity(self.rows.len() + 1);
        let header_cells: Vec<String> = self.headers.iter().map(|h| h.to_string()).collect();
        lines.push(layout_line(
            &self.headers,
            &mut self.widths,
            &header_cells,
            max_width,
        ));
        let mut height_left = max_height - 1;
        for row in &self.rows {
            if height_left <= 1 {
                break;
            }
            height_left -= 1;
            let cells: Vec<String> = row.iter().map(Cell::text).collect();
            lines.push(layout_line(&self.headers, &mut self.widths, &cells, max_width));
        }
        lines
    }
}

/// Lays out one line, cell by cell, ratcheting column widths as it goes.
///
/// A column whose header no longer fits in the remaining width ends the line;
/// the last cell of a row never widens its column, so long tails (queries) do
/// not push the width model.
fn layout_line(
    headers: &[&'static str],
    widths: &mut [usize],
    cells: &[String],
    max_width: usize,
) -> String {
    let mut out = String::new();
    let mut width_left = max_width;
    for (index, cell) in cells.iter().enumerate() {
        if width_left < headers[index].len() {
            break;
        }
        if index + 1 < cells.len() {
            widths[index] = widths[index].max(cell.len() + 2);
        }
        let mut padded = format!("{:<width$}", cell, width = widths[index]);
        padded.truncate(width_left);
        out.push_str(&padded);
        width_left = width_left.saturating_sub(widths[index]);
    }
    out.truncate(out.trim_end().len());
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_table() -> Table {
        let mut table = Table::new(vec!["Server", "Opid", "Query"]);
        table.reset(vec![
            vec![
                Cell::Str("alpha".to_string()),
                Cell::Num(1),
                Cell::Str("a".to_string()),
            ],
            vec![
                Cell::Str("beta".to_string()),
                Cell::Num(42),
                Cell::Str("b".to_string()),
            ],
            vec![
                Cell::Str("gamma".to_string()),
                Cell::Num(7),
                Cell::Str("c".to_string()),
            ],
        ]);
        table
    }

    #[test]
    fn lines_never_exceed_max_width() {
        let mut table = sample_table();
        for width in [5, 10, 14, 80] {
            for line in table.render(10, width) {
                assert!(line.len() <= width, "width {}: {:?}", width, line);
            }
        }
    }

    #[test]
    fn height_two_emits_only_the_header() {
        let mut table = sample_table();
        let lines = table.render(2, 80);
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("Server"));
    }

    #[test]
    fn height_bounds_the_row_count() {
        let mut table = sample_table();
        // Header plus two rows fit; the third is cut.
        assert_eq!(table.render(4, 80).len(), 3);
        assert_eq!(table.render(10, 80).len(), 4);
    }

    #[test]
    fn column_without_room_for_header_is_dropped() {
        let mut table = Table::new(vec!["Server", "Namespace"]);
        table.reset(vec![vec![
            Cell::Str("a".to_string()),
            Cell::Str("shop.orders".to_string()),
        ]]);
        // First column consumes its default width of 6; at total width 10
        // only 4 columns remain, less than "Namespace".
        let lines = table.render(5, 10);
        assert!(lines[1].starts_with('a'));
        assert!(!lines[1].contains("shop"));
    }

    #[test]
    fn column_widths_only_grow() {
        let mut table = Table::new(vec!["Server", "Opid"]);
        table.reset(vec![vec![
            Cell::Str("a-rather-long-name".to_string()),
            Cell::Num(1),
        ]]);
        let wide = table.render(5, 80);
        let opid_column = wide[1].find('1').unwrap();

        // A short row afterwards still aligns to the widened column.
        table.reset(vec![vec![Cell::Str("tiny".to_string()), Cell::Num(2)]]);
        let narrow = table.render(5, 80);
        assert_eq!(narrow[1].find('2').unwrap(), opid_column);
    }

    #[test]
    fn find_row_matches_unformatted_identity() {
        let mut table = Table::new(vec!["Server", "Opid", "Sec"]);
        table.reset(vec![
            vec![
                Cell::Str("alpha".to_string()),
                Cell::Num(41),
                Cell::Num(9),
            ],
            vec![
                Cell::Str("alpha".to_string()),
                Cell::Num(42),
                Cell::Num(5),
            ],
            vec![
                Cell::Str("beta".to_string()),
                Cell::Num(42),
                Cell::Num(1),
            ],
        ]);
        let row = table
            .find_row(|cells| cells[0].plain() == "alpha" && cells[1].plain() == "42")
            .unwrap();
        assert_eq!(row[2], Cell::Num(5));
        assert!(table
            .find_row(|cells| cells[0].plain() == "delta")
            .is_none());
    }

    #[test]
    fn scaled_cells_keep_plain_identity() {
        let cell = Cell::Count(1_500_000);
        assert_eq!(cell.text(), "2M");
        assert_eq!(cell.plain(), "1500000");
        let pair = Cell::Pair(12, 1_500_000);
        assert_eq!(pair.text(), "12 / 2M");
    }

    #[test]
    fn null_cells_render_empty() {
        let mut table = Table::new(vec!["Server", "Sec", "Namespace"]);
        table.reset(vec![vec![
            Cell::Str("alpha".to_string()),
            Cell::Null,
            Cell::Str("shop.orders".to_string()),
        ]]);
        let lines = table.render(5, 80);
        assert!(lines[1].contains("alpha"));
        assert!(lines[1].contains("shop.orders"));
        assert!(!lines[1].contains("Null"));
    }

    #[test]
    fn short_rows_are_allowed() {
        // A disconnected server contributes only name and error text.
        let mut table = Table::new(vec!["Server", "QPS", "Active", "Queue"]);
        table.reset(vec![vec![
            Cell::Str("beta".to_string()),
            Cell::Str("connection refused".to_string()),
        ]]);
        let lines = table.render(5, 80);
        assert!(lines[1].contains("connection refused"));
    }
}
