//! Cell grids imported from delimited text and legacy `.xls` workbooks,
//! and their export to a fresh xlsx workbook.

use calamine::{Data, Reader, Xls, XlsError, open_workbook};
use camino::Utf8Path;
use regex::Regex;
use rust_xlsxwriter::{Format, XlsxError};
use std::collections::HashSet;
use std::sync::LazyLock;
use thiserror::Error;

/// Excel's sheet name length limit
pub const MAX_SHEET_NAME_LEN: usize = 31;

const INVALID_SHEET_NAME_CHARS: [char; 7] = ['[', ']', ':', '*', '?', '/', '\\'];

const DATE_FORMAT: &str = "yyyy-mm-dd hh:mm:ss";

/// Decimal numbers without significant leading zeros
static NUMBER_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[-+]?(0|[1-9][0-9]*)(\.[0-9]+)?([eE][-+]?[0-9]+)?$|^[-+]?\.[0-9]+$")
        .expect("Invalid number regex")
});

/// Errors while importing or exporting a grid
#[derive(Error, Debug)]
pub enum GridError {
    #[error("delimited text could not be read: {0}")]
    Delimited(#[from] csv::Error),

    #[error("legacy workbook could not be read: {0}")]
    Legacy(#[from] XlsError),

    #[error("legacy workbook is password protected")]
    Encrypted,

    #[error("xlsx could not be written: {0}")]
    Export(#[from] XlsxError),

    #[error("sheet {0} is wider than a worksheet")]
    TooWide(String),
}

/// One imported cell value
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Empty,
    Text(String),
    Number(f64),
    Bool(bool),
    /// Excel serial date
    DateTime(f64),
    /// Error value such as `#DIV/0!`, written back as text
    Error(String),
}

/// One sheet of cells
#[derive(Debug, Clone, PartialEq)]
pub struct GridSheet {
    pub name: String,
    /// Zero-based (row, column) of the first cell in `rows`
    pub origin: (u32, u32),
    pub rows: Vec<Vec<Cell>>,
}

impl GridSheet {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            origin: (0, 0),
            rows: Vec::new(),
        }
    }
}

/// An imported workbook without protection or formatting
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Grid {
    pub sheets: Vec<GridSheet>,
}

/// Type a text field the way a spreadsheet import would
pub fn parse_cell(text: &str) -> Cell {
    if text.is_empty() {
        return Cell::Empty;
    }
    if text.eq_ignore_ascii_case("true") {
        return Cell::Bool(true);
    }
    if text.eq_ignore_ascii_case("false") {
        return Cell::Bool(false);
    }
    if NUMBER_PATTERN.is_match(text) {
        match text.parse::<f64>() {
            Ok(number) if number.is_finite() => return Cell::Number(number),
            _ => {}
        }
    }
    Cell::Text(text.to_string())
}

/// Pick the field delimiter from the first line of a file.
///
/// `.csv` files use `;` when it outnumbers `,`. Other text files use tab
/// unless the first line has no tab but does have a comma.
pub fn sniff_delimiter(first_line: &str, is_csv: bool) -> u8 {
    if is_csv {
        let commas = first_line.matches(',').count();
        let semicolons = first_line.matches(';').count();
        return if semicolons > commas { b';' } else { b',' };
    }
    if !first_line.contains('\t') && first_line.contains(',') {
        b','
    } else {
        b'\t'
    }
}

/// Import a `.csv` or `.txt` file's bytes as a single-sheet grid
pub fn read_delimited(bytes: &[u8], sheet_name: &str, is_csv: bool) -> Result<Grid, GridError> {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    let first_line_end = bytes.iter().position(|b| *b == b'\n').unwrap_or(bytes.len());
    let first_line = String::from_utf8_lossy(&bytes[..first_line_end]);
    let delimiter = sniff_delimiter(&first_line, is_csv);

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(false)
        .flexible(true)
        .from_reader(bytes);

    let mut sheet = GridSheet::new(sheet_name);
    for record in reader.byte_records() {
        let record = record?;
        sheet.rows.push(
            record
                .iter()
                .map(|field| parse_cell(&String::from_utf8_lossy(field)))
                .collect(),
        );
    }

    Ok(Grid {
        sheets: vec![sheet],
    })
}

/// Import every sheet of a legacy `.xls` workbook
pub fn read_legacy_xls(path: &Utf8Path) -> Result<Grid, GridError> {
    let mut workbook: Xls<_> = match open_workbook(path) {
        Ok(workbook) => workbook,
        Err(XlsError::Password) => return Err(GridError::Encrypted),
        Err(e) => return Err(e.into()),
    };

    let mut grid = Grid::default();
    for name in workbook.sheet_names() {
        let range = match workbook.worksheet_range(&name) {
            Ok(range) => range,
            Err(XlsError::Password) => return Err(GridError::Encrypted),
            Err(e) => return Err(e.into()),
        };

        let mut sheet = GridSheet::new(name);
        sheet.origin = range.start().unwrap_or((0, 0));
        sheet.rows = range
            .rows()
            .map(|row| row.iter().map(cell_from_data).collect())
            .collect();
        grid.sheets.push(sheet);
    }

    Ok(grid)
}

fn cell_from_data(data: &Data) -> Cell {
    match data {
        Data::Empty => Cell::Empty,
        Data::String(s) => Cell::Text(s.clone()),
        Data::Float(f) => Cell::Number(*f),
        Data::Int(i) => Cell::Number(*i as f64),
        Data::Bool(b) => Cell::Bool(*b),
        Data::DateTime(dt) => Cell::DateTime(dt.as_f64()),
        Data::DateTimeIso(s) | Data::DurationIso(s) => Cell::Text(s.clone()),
        Data::Error(e) => Cell::Error(e.to_string()),
    }
}

/// Write a grid as a new xlsx workbook and return the file bytes
pub fn write_xlsx(grid: &Grid) -> Result<Vec<u8>, GridError> {
    let mut workbook = rust_xlsxwriter::Workbook::new();
    let date_format = Format::new().set_num_format(DATE_FORMAT);
    let mut used_names = HashSet::new();

    let empty_sheet = GridSheet::new("Sheet1");
    let sheets: Vec<&GridSheet> = if grid.sheets.is_empty() {
        vec![&empty_sheet]
    } else {
        grid.sheets.iter().collect()
    };

    for sheet in sheets {
        let worksheet = workbook.add_worksheet();
        worksheet.set_name(sanitize_sheet_name(&sheet.name, &mut used_names))?;

        let (row0, col0) = sheet.origin;
        for (r, cells) in sheet.rows.iter().enumerate() {
            let row = row0 + r as u32;
            for (c, cell) in cells.iter().enumerate() {
                let col = u16::try_from(col0 as usize + c)
                    .map_err(|_| GridError::TooWide(sheet.name.clone()))?;
                match cell {
                    Cell::Empty => {}
                    Cell::Text(s) | Cell::Error(s) => {
                        worksheet.write_string(row, col, s)?;
                    }
                    Cell::Number(n) => {
                        worksheet.write_number(row, col, *n)?;
                    }
                    Cell::Bool(b) => {
                        worksheet.write_boolean(row, col, *b)?;
                    }
                    Cell::DateTime(serial) => {
                        worksheet.write_number_with_format(row, col, *serial, &date_format)?;
                    }
                }
            }
        }
    }

    Ok(workbook.save_to_buffer()?)
}

/// Make `name` a valid sheet name that is unique (case-insensitively) among `used`
pub fn sanitize_sheet_name(name: &str, used: &mut HashSet<String>) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if INVALID_SHEET_NAME_CHARS.contains(&c) || c.is_control() {
                '_'
            } else {
                c
            }
        })
        .collect();
    let base = match trim_name(&cleaned) {
        "" => "Sheet",
        trimmed => trimmed,
    };

    let mut candidate = trim_name(&truncate_chars(base, MAX_SHEET_NAME_LEN)).to_string();
    let mut counter = 2;
    while used.contains(&candidate.to_lowercase()) {
        let suffix = format!(" ({counter})");
        let room = MAX_SHEET_NAME_LEN - suffix.chars().count();
        candidate = format!("{}{}", trim_name(&truncate_chars(base, room)), suffix);
        counter += 1;
    }

    used.insert(candidate.to_lowercase());
    candidate
}

/// Sheet names may not start or end with an apostrophe
fn trim_name(name: &str) -> &str {
    name.trim_matches(|c: char| c == '\'' || c.is_whitespace())
}

fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}
