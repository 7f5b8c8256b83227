//! Spreadsheet reading (CSV and XLSX) and numeric formula resolution

use std::collections::HashSet;
use std::path::Path;

use calamine::{open_workbook, Data, Reader, Xlsx, XlsxError};
use chrono::{Duration, NaiveDate, NaiveDateTime};
use thiserror::Error;

use crate::error::ImportError;
use crate::services::dates;
use crate::types::{FieldSchema, FieldType, RowRecord, SchemaConfig};

/// Nested formula references followed before giving up
const MAX_FORMULA_DEPTH: usize = 8;

/// Cells one numeric resolution may read, across ranges and nested formulas
const MAX_CELLS_VISITED: usize = 10_000;

static EMPTY_CELL: Cell = Cell::Empty;

#[derive(Debug, Clone, Default, PartialEq)]
pub enum Cell {
    #[default]
    Empty,
    Text(String),
    Number(f64),
    DateTime(NaiveDateTime),
    /// Formula text including the leading `=`, next to the value the
    /// workbook cached for it (`Empty` when none was stored)
    Formula { text: String, cached: Box<Cell> },
}

impl Cell {
    fn is_empty(&self) -> bool {
        match self {
            Cell::Empty => true,
            Cell::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }

    /// Text form of the cell; date cells use `date_format` (PHP notation)
    /// when given, ISO otherwise.
    fn render(&self, date_format: Option<&str>) -> Option<String> {
        match self {
            Cell::Empty => None,
            Cell::Text(s) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
            Cell::Number(n) => Some(format_number(*n)),
            Cell::DateTime(dt) => {
                let chrono_format = date_format.and_then(dates::php_to_chrono);
                Some(match chrono_format {
                    Some(format) => dt.format(&format).to_string(),
                    None if dt.time() == chrono::NaiveTime::MIN => dates::to_storage(dt.date()),
                    None => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
                })
            }
            Cell::Formula { cached, .. } => cached.render(date_format),
        }
    }

    pub fn formula(text: impl Into<String>, cached: Cell) -> Self {
        Cell::Formula {
            text: text.into(),
            cached: Box::new(cached),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CoercionError {
    #[error("'{0}' is not a number")]
    NotNumeric(String),

    #[error("'{0}' is not a whole number")]
    NotInteger(String),

    #[error("unsupported formula '{0}'")]
    UnsupportedFormula(String),

    #[error("invalid cell reference '{0}'")]
    InvalidReference(String),

    #[error("formula '{0}' nests too deeply")]
    TooDeep(String),

    #[error("formula '{0}' reads too many cells")]
    TooManyCells(String),
}

/// First worksheet of an uploaded file, on an absolute grid
/// (`cells[0][0]` is `A1`).
#[derive(Debug, Clone, Default)]
pub struct Sheet {
    cells: Vec<Vec<Cell>>,
    header_row: usize,
}

impl Sheet {
    /// Read by extension: `.csv` or `.xlsx`
    pub fn open(path: &Path) -> Result<Self, ImportError> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();

        match extension.as_str() {
            "csv" => {
                let bytes = std::fs::read(path)?;
                Self::from_csv(&bytes)
            }
            "xlsx" => Self::from_xlsx(path),
            _ => Err(ImportError::UnsupportedFile(path.display().to_string())),
        }
    }

    pub fn from_csv(bytes: &[u8]) -> Result<Self, ImportError> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(sniff_delimiter(bytes))
            .has_headers(false)
            .flexible(true)
            .from_reader(bytes);

        let mut cells = Vec::new();
        for record in reader.records() {
            let record = record.map_err(|e| ImportError::Parse(e.to_string()))?;
            cells.push(
                record
                    .iter()
                    .map(|v| {
                        if v.is_empty() {
                            Cell::Empty
                        } else {
                            Cell::Text(v.to_string())
                        }
                    })
                    .collect(),
            );
        }

        Self::from_grid(cells)
    }

    pub fn from_xlsx(path: &Path) -> Result<Self, ImportError> {
        let mut workbook: Xlsx<_> = open_workbook(path).map_err(xlsx_error)?;

        let sheet_name = workbook
            .sheet_names()
            .first()
            .cloned()
            .ok_or(ImportError::EmptyFile)?;

        let range = workbook.worksheet_range(&sheet_name).map_err(xlsx_error)?;
        let mut cells: Vec<Vec<Cell>> = Vec::new();

        if let Some((start_row, start_col)) = range.start() {
            for (r, c, data) in range.cells() {
                let cell = data_to_cell(data);
                if cell != Cell::Empty {
                    place(&mut cells, start_row as usize + r, start_col as usize + c, cell);
                }
            }
        }

        // Formula text is kept next to the cached value for numeric fields
        let formulas = workbook.worksheet_formula(&sheet_name).map_err(xlsx_error)?;
        if let Some((start_row, start_col)) = formulas.start() {
            for (r, c, formula) in formulas.cells() {
                if !formula.is_empty() {
                    let (row, col) = (start_row as usize + r, start_col as usize + c);
                    let cached = take(&mut cells, row, col);
                    place(&mut cells, row, col, Cell::formula(format!("={}", formula), cached));
                }
            }
        }

        Self::from_grid(cells)
    }

    /// Header row is the first row holding any value
    pub fn from_grid(cells: Vec<Vec<Cell>>) -> Result<Self, ImportError> {
        let header_row = cells
            .iter()
            .position(|row| row.iter().any(|c| !c.is_empty()))
            .ok_or(ImportError::EmptyFile)?;
        Ok(Self { cells, header_row })
    }

    pub fn headers(&self) -> Vec<String> {
        self.cells[self.header_row]
            .iter()
            .map(|c| c.render(None).unwrap_or_default())
            .collect()
    }

    pub fn data_row_count(&self) -> usize {
        self.cells.len() - self.header_row - 1
    }

    /// Data row `index` (0-based, header excluded) keyed by `headers`
    pub fn record(&self, index: usize, headers: &[String], schema: &SchemaConfig) -> RowRecord {
        let row = self
            .cells
            .get(self.header_row + 1 + index)
            .map(Vec::as_slice)
            .unwrap_or_default();

        let values: Vec<Option<String>> = headers
            .iter()
            .enumerate()
            .map(|(col, key)| {
                let field = schema.field(key);
                let cell = row.get(col)?;
                if let (Cell::Formula { text, cached }, Some(f)) = (cell, field) {
                    if f.field_type.is_numeric() {
                        return self.render_numeric_formula(text, cached);
                    }
                }
                let format = field
                    .filter(|f| f.field_type == FieldType::Date)
                    .map(|f: &FieldSchema| f.date_format().unwrap_or("Y-m-d"));
                cell.render(format)
            })
            .collect();

        RowRecord::from_cells(headers, &values)
    }

    /// Evaluated formula for a numeric field. The cached value stands in
    /// when the formula cannot be evaluated here; with no cached value the
    /// formula text is kept so the coercion error surfaces on validation.
    fn render_numeric_formula(&self, text: &str, cached: &Cell) -> Option<String> {
        match self.resolve_number(text) {
            Ok(n) => Some(format_number(n)),
            Err(_) => cached.render(None).or_else(|| Some(text.to_string())),
        }
    }

    pub fn cell(&self, row: usize, col: usize) -> &Cell {
        self.cells
            .get(row)
            .and_then(|r| r.get(col))
            .unwrap_or(&EMPTY_CELL)
    }

    /// Resolve a numeric cell value. Plain numbers parse directly; formulas
    /// (`=SUM(A1:A3)`, `=A1+B1`, `=C2`) are evaluated against this sheet.
    pub fn resolve_number(&self, value: &str) -> Result<f64, CoercionError> {
        let mut visited = 0;
        self.resolve_value(value, 0, &mut visited).map_err(|e| match e {
            CoercionError::TooManyCells(_) => CoercionError::TooManyCells(value.trim().to_string()),
            other => other,
        })
    }

    fn resolve_value(&self, value: &str, depth: usize, visited: &mut usize) -> Result<f64, CoercionError> {
        let value = value.trim();
        match value.strip_prefix('=') {
            Some(expr) => {
                if depth >= MAX_FORMULA_DEPTH {
                    return Err(CoercionError::TooDeep(value.to_string()));
                }
                self.evaluate(expr.trim(), depth + 1, visited)
            }
            None => parse_number(value),
        }
    }

    fn evaluate(&self, expr: &str, depth: usize, visited: &mut usize) -> Result<f64, CoercionError> {
        let upper = expr.to_ascii_uppercase();
        if let Some(args) = upper
            .strip_prefix("SUM(")
            .and_then(|rest| rest.strip_suffix(')'))
        {
            let mut total = 0.0;
            for arg in args.split([',', ';']) {
                total += self.evaluate_operand(arg.trim(), depth, true, visited)?;
            }
            return Ok(total);
        }

        if upper.contains('(') {
            return Err(CoercionError::UnsupportedFormula(format!("={}", expr)));
        }

        let mut total = 0.0;
        for term in upper.split('+') {
            total += self.evaluate_operand(term.trim(), depth, false, visited)?;
        }
        Ok(total)
    }

    fn evaluate_operand(
        &self,
        operand: &str,
        depth: usize,
        allow_range: bool,
        visited: &mut usize,
    ) -> Result<f64, CoercionError> {
        if operand.is_empty() {
            return Err(CoercionError::UnsupportedFormula(operand.to_string()));
        }

        if let Some((from, to)) = operand.split_once(':') {
            if !allow_range {
                return Err(CoercionError::UnsupportedFormula(operand.to_string()));
            }
            let (r1, c1) = parse_cell_ref(from)?;
            let (r2, c2) = parse_cell_ref(to)?;
            return self.sum_range((r1.min(r2), c1.min(c2)), (r1.max(r2), c1.max(c2)), depth, visited);
        }

        if let Ok(number) = parse_number(operand) {
            return Ok(number);
        }

        let (row, col) = parse_cell_ref(operand)?;
        self.referenced_value(row, col, depth, visited)
    }

    /// Sum of a range, clamped to the cells the sheet actually holds
    fn sum_range(
        &self,
        (top, left): (usize, usize),
        (bottom, right): (usize, usize),
        depth: usize,
        visited: &mut usize,
    ) -> Result<f64, CoercionError> {
        let mut total = 0.0;
        for (row, cells) in self.cells.iter().enumerate().take(bottom.saturating_add(1)).skip(top) {
            for col in left..cells.len().min(right.saturating_add(1)) {
                total += self.referenced_value(row, col, depth, visited)?;
            }
        }
        Ok(total)
    }

    fn referenced_value(&self, row: usize, col: usize, depth: usize, visited: &mut usize) -> Result<f64, CoercionError> {
        *visited += 1;
        if *visited > MAX_CELLS_VISITED {
            return Err(CoercionError::TooManyCells(format!("{}{}", column_name(col), row + 1)));
        }

        match self.cell(row, col) {
            Cell::Empty => Ok(0.0),
            Cell::Number(n) => Ok(*n),
            Cell::Text(s) if s.trim().is_empty() => Ok(0.0),
            Cell::Text(s) => self.resolve_value(s, depth, visited),
            Cell::Formula { text, cached } => match self.resolve_value(text, depth, visited) {
                Err(e @ CoercionError::TooManyCells(_)) => Err(e),
                Err(e) => match cached.as_ref() {
                    Cell::Number(n) => Ok(*n),
                    _ => Err(e),
                },
                ok => ok,
            },
            Cell::DateTime(dt) => Err(CoercionError::NotNumeric(dt.to_string())),
        }
    }
}

/// `;` when the header line has more semicolons than commas
fn sniff_delimiter(bytes: &[u8]) -> u8 {
    let first_line = bytes.split(|b| *b == b'\n').next().unwrap_or_default();
    let semicolons = first_line.iter().filter(|b| **b == b';').count();
    let commas = first_line.iter().filter(|b| **b == b',').count();
    if semicolons > commas {
        b';'
    } else {
        b','
    }
}

fn place(cells: &mut Vec<Vec<Cell>>, row: usize, col: usize, cell: Cell) {
    if cells.len() <= row {
        cells.resize(row + 1, Vec::new());
    }
    let target = &mut cells[row];
    if target.len() <= col {
        target.resize(col + 1, Cell::Empty);
    }
    target[col] = cell;
}

fn take(cells: &mut [Vec<Cell>], row: usize, col: usize) -> Cell {
    cells
        .get_mut(row)
        .and_then(|r| r.get_mut(col))
        .map(std::mem::take)
        .unwrap_or_default()
}

fn data_to_cell(data: &Data) -> Cell {
    match data {
        Data::Empty => Cell::Empty,
        Data::String(s) => Cell::Text(s.clone()),
        Data::Int(n) => Cell::Number(*n as f64),
        Data::Float(f) => Cell::Number(*f),
        Data::Bool(b) => Cell::Text(b.to_string()),
        Data::Error(e) => Cell::Text(format!("#ERR({:?})", e)),
        Data::DateTime(dt) => match excel_serial_to_datetime(dt.as_f64()) {
            Some(value) => Cell::DateTime(value),
            None => Cell::Number(dt.as_f64()),
        },
        Data::DateTimeIso(s) => NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S")
            .ok()
            .or_else(|| {
                NaiveDate::parse_from_str(s, "%Y-%m-%d")
                    .ok()
                    .map(|d| d.and_time(chrono::NaiveTime::MIN))
            })
            .map(Cell::DateTime)
            .unwrap_or_else(|| Cell::Text(s.clone())),
        Data::DurationIso(s) => Cell::Text(s.clone()),
    }
}

/// Excel's 1900 date system, counted from 1899-12-30
fn excel_serial_to_datetime(serial: f64) -> Option<NaiveDateTime> {
    if !serial.is_finite() || serial < 0.0 {
        return None;
    }
    let epoch = NaiveDate::from_ymd_opt(1899, 12, 30)?.and_time(chrono::NaiveTime::MIN);
    let days = serial.trunc() as i64;
    let seconds = ((serial - serial.trunc()) * 86_400.0).round() as i64;
    epoch.checked_add_signed(Duration::days(days) + Duration::seconds(seconds))
}

fn xlsx_error(e: XlsxError) -> ImportError {
    match e {
        XlsxError::Io(io) => ImportError::Io(io),
        other => ImportError::Parse(other.to_string()),
    }
}

fn parse_number(value: &str) -> Result<f64, CoercionError> {
    value
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|n| n.is_finite())
        .ok_or_else(|| CoercionError::NotNumeric(value.to_string()))
}

/// Integral values without a trailing `.0`
pub fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

/// `B3` / `$B$3` -> zero-based (row, col)
fn parse_cell_ref(reference: &str) -> Result<(usize, usize), CoercionError> {
    let invalid = || CoercionError::InvalidReference(reference.to_string());
    let cleaned: String = reference.chars().filter(|c| *c != '$').collect();
    let split = cleaned
        .find(|c: char| c.is_ascii_digit())
        .ok_or_else(invalid)?;
    let (letters, digits) = cleaned.split_at(split);

    if letters.is_empty() || letters.len() > 3 || !letters.chars().all(|c| c.is_ascii_uppercase()) {
        return Err(invalid());
    }

    let col = letters
        .chars()
        .fold(0usize, |acc, c| acc * 26 + (c as usize - 'A' as usize + 1))
        - 1;
    let row: usize = digits.parse().map_err(|_| invalid())?;
    if row == 0 {
        return Err(invalid());
    }

    Ok((row - 1, col))
}

/// Zero-based column index -> `A`, `AB`, ...
fn column_name(col: usize) -> String {
    let mut name = Vec::new();
    let mut n = col + 1;
    while n > 0 {
        let rem = (n - 1) % 26;
        name.push(b'A' + rem as u8);
        n = (n - 1) / 26;
    }
    name.reverse();
    String::from_utf8_lossy(&name).into_owned()
}

/// Canonical keys that more than one header normalized to
pub fn duplicate_keys(headers: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    headers
        .iter()
        .filter(|h| !h.is_empty() && !seen.insert(h.as_str()))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::schema::SchemaRegistry;

    fn grid(rows: &[&[&str]]) -> Sheet {
        let cells = rows
            .iter()
            .map(|row| {
                row.iter()
                    .map(|v| {
                        if v.is_empty() {
                            Cell::Empty
                        } else if v.starts_with('=') {
                            Cell::formula(*v, Cell::Empty)
                        } else {
                            Cell::Text(v.to_string())
                        }
                    })
                    .collect()
            })
            .collect();
        Sheet::from_grid(cells).unwrap()
    }

    #[test]
    fn test_csv_comma_and_semicolon() {
        let sheet = Sheet::from_csv(b"SKU,Cost\nA1,10\n").unwrap();
        assert_eq!(sheet.headers(), vec!["SKU", "Cost"]);
        assert_eq!(sheet.data_row_count(), 1);

        let sheet = Sheet::from_csv(b"SKU;Cost\nA1;10,5\n").unwrap();
        assert_eq!(sheet.headers(), vec!["SKU", "Cost"]);
        assert_eq!(sheet.cell(1, 1), &Cell::Text("10,5".into()));
    }

    #[test]
    fn test_csv_empty_is_error() {
        assert!(matches!(Sheet::from_csv(b""), Err(ImportError::EmptyFile)));
        assert!(matches!(Sheet::from_csv(b",,\n"), Err(ImportError::EmptyFile)));
    }

    #[test]
    fn test_open_rejects_unknown_extension() {
        let result = Sheet::open(Path::new("/tmp/upload.pdf"));
        assert!(matches!(result, Err(ImportError::UnsupportedFile(_))));
    }

    #[test]
    fn test_cell_references() {
        assert_eq!(parse_cell_ref("A1").unwrap(), (0, 0));
        assert_eq!(parse_cell_ref("$C$12").unwrap(), (11, 2));
        assert_eq!(parse_cell_ref("AA3").unwrap(), (2, 26));
        assert!(parse_cell_ref("A0").is_err());
        assert!(parse_cell_ref("12").is_err());
        assert!(parse_cell_ref("a1").is_err());
    }

    #[test]
    fn test_resolve_plain_and_formula_numbers() {
        let sheet = grid(&[
            &["cost", "shipping", "total"],
            &["10", "2.5", "=A2+B2"],
            &["5", "", "=SUM(A2:A3)"],
            &["x", "", "=C2"],
        ]);
        assert_eq!(sheet.resolve_number("12.75").unwrap(), 12.75);
        assert_eq!(sheet.resolve_number("=A2+B2").unwrap(), 12.5);
        assert_eq!(sheet.resolve_number("=SUM(A2:A3)").unwrap(), 15.0);
        assert_eq!(sheet.resolve_number("=sum(A2;B2;1)").unwrap(), 13.5);
        // nested reference to another formula; empty cells count as zero
        assert_eq!(sheet.resolve_number("=C2+B3").unwrap(), 12.5);
    }

    #[test]
    fn test_resolve_failures() {
        let sheet = grid(&[&["a", "b"], &["=B2", "=A2"], &["text", ""]]);
        assert!(matches!(
            sheet.resolve_number("abc"),
            Err(CoercionError::NotNumeric(_))
        ));
        assert!(matches!(
            sheet.resolve_number("=A3"),
            Err(CoercionError::NotNumeric(_))
        ));
        assert!(matches!(
            sheet.resolve_number("=AVERAGE(A1:A2)"),
            Err(CoercionError::UnsupportedFormula(_))
        ));
        assert!(matches!(
            sheet.resolve_number("=A2"),
            Err(CoercionError::TooDeep(_))
        ));
    }

    #[test]
    fn test_record_renders_dates_in_field_format() {
        let registry = SchemaRegistry::load(None).unwrap();
        let schema = registry.resolve("orders").unwrap();
        let date = NaiveDate::from_ymd_opt(2025, 1, 15)
            .unwrap()
            .and_time(chrono::NaiveTime::MIN);
        let sheet = Sheet::from_grid(vec![
            vec![Cell::Text("order_date".into()), Cell::Text("cost".into())],
            vec![Cell::DateTime(date), Cell::Number(12.0)],
        ])
        .unwrap();

        let headers = vec!["order_date".to_string(), "cost".to_string()];
        let record = sheet.record(0, &headers, schema);
        assert_eq!(record.get("order_date"), Some("15.01.2025"));
        assert_eq!(record.get("cost"), Some("12"));
    }

    #[test]
    fn test_formula_cells_use_cached_values_outside_numeric_fields() {
        let registry = SchemaRegistry::load(None).unwrap();
        let schema = registry.resolve("orders").unwrap();
        let today = NaiveDate::from_ymd_opt(2025, 3, 4)
            .unwrap()
            .and_time(chrono::NaiveTime::MIN);
        let sheet = Sheet::from_grid(vec![
            vec![
                Cell::Text("origin".into()),
                Cell::Text("order_date".into()),
                Cell::Text("cost".into()),
                Cell::Text("shipping_cost".into()),
            ],
            vec![
                Cell::formula("=UPPER(\"lisbon\")", Cell::Text("LISBON".into())),
                Cell::formula("=TODAY()", Cell::DateTime(today)),
                Cell::formula("=ROUND(2.5,0)", Cell::Number(3.0)),
                Cell::formula("=C2+1", Cell::Number(99.0)),
            ],
        ])
        .unwrap();

        let headers: Vec<String> = ["origin", "order_date", "cost", "shipping_cost"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let record = sheet.record(0, &headers, schema);

        assert_eq!(record.get("origin"), Some("LISBON"));
        assert_eq!(record.get("order_date"), Some("04.03.2025"));
        // unsupported function falls back to the workbook's value
        assert_eq!(record.get("cost"), Some("3"));
        // supported formulas are evaluated, reading C2 through its cached value
        assert_eq!(record.get("shipping_cost"), Some("4"));
    }

    #[test]
    fn test_formula_without_cached_value_keeps_text() {
        let registry = SchemaRegistry::load(None).unwrap();
        let schema = registry.resolve("orders").unwrap();
        let sheet = grid(&[&["cost"], &["=ROUND(1.5,0)"]]);

        let record = sheet.record(0, &["cost".to_string()], schema);
        assert_eq!(record.get("cost"), Some("=ROUND(1.5,0)"));
    }

    #[test]
    fn test_sum_range_is_clamped_to_sheet() {
        let sheet = grid(&[&["a", "b"], &["1", "2"], &["3"]]);
        assert_eq!(sheet.resolve_number("=SUM(A2:ZZZ1048576)").unwrap(), 6.0);
        assert_eq!(sheet.resolve_number("=SUM(C5:D9)").unwrap(), 0.0);
    }

    #[test]
    fn test_resolution_stops_after_cell_budget() {
        let mut rows = vec![vec![Cell::Text("n".into())]];
        rows.extend((0..MAX_CELLS_VISITED + 1).map(|_| vec![Cell::Number(1.0)]));
        let sheet = Sheet::from_grid(rows).unwrap();

        assert_eq!(
            sheet.resolve_number("=SUM(A2:A10001)").unwrap(),
            MAX_CELLS_VISITED as f64
        );
        assert_eq!(
            sheet.resolve_number("=SUM(A2:A20000)"),
            Err(CoercionError::TooManyCells("=SUM(A2:A20000)".into()))
        );

        // fan-out through nested formulas counts against the same budget
        let mut rows = vec![vec![Cell::formula("=SUM(B1:B200)", Cell::Empty)]];
        rows.extend((0..199).map(|_| Vec::new()));
        for row in rows.iter_mut() {
            row.resize(2, Cell::Empty);
            row[1] = Cell::formula("=SUM(C1:C200)", Cell::Empty);
            row.push(Cell::Number(1.0));
        }
        let sheet = Sheet::from_grid(rows).unwrap();
        assert!(matches!(
            sheet.resolve_number("=A1"),
            Err(CoercionError::TooManyCells(_))
        ));
    }

    #[test]
    fn test_column_names() {
        assert_eq!(column_name(0), "A");
        assert_eq!(column_name(27), "AB");
        assert_eq!(column_name(701), "ZZ");
    }

    #[test]
    fn test_excel_serial_conversion() {
        let dt = excel_serial_to_datetime(45672.5).unwrap();
        assert_eq!(dt.to_string(), "2025-01-15 12:00:00");
    }

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(3.0), "3");
        assert_eq!(format_number(2.5), "2.5");
        assert_eq!(format_number(-4.0), "-4");
    }

    #[test]
    fn test_duplicate_keys() {
        let headers: Vec<String> = ["sku", "cost", "sku", "", ""].iter().map(|s| s.to_string()).collect();
        assert_eq!(duplicate_keys(&headers), vec!["sku".to_string()]);
    }
}
