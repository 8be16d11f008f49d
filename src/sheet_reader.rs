//! Sheet readers: CSV, TSV and XLSX files into [`SheetTable`]s.
//!
//! A CSV or TSV file yields one table named after the file stem. An XLSX
//! workbook yields one table per worksheet that has a header row, in
//! workbook order. Row numbers are physical: the header is row 1.
//!
//! Readers return [`ReadError`] instead of panicking; the import pipeline
//! reports the file as unreadable and moves on.

use std::collections::HashMap;
use std::io::Read;
use std::path::Path;

use quick_xml::events::{BytesStart, Event};
use sheet_harness_core::models::{RawRow, SheetTable};

/// Maximum sheets read from one workbook.
const XLSX_MAX_SHEETS: usize = 100;
/// Maximum cells read per sheet.
const XLSX_MAX_CELLS_PER_SHEET: usize = 1_000_000;
/// Maximum decompressed bytes read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum ReadError {
    #[error("unsupported sheet format: {0}")]
    UnsupportedFormat(String),
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("CSV parse failed: {0}")]
    Csv(#[from] csv::Error),
    #[error("XLSX extraction failed: {0}")]
    Xlsx(String),
    #[error("{0} has no header row")]
    MissingHeader(String),
}

impl From<zip::result::ZipError> for ReadError {
    fn from(e: zip::result::ZipError) -> Self {
        ReadError::Xlsx(e.to_string())
    }
}

impl From<quick_xml::Error> for ReadError {
    fn from(e: quick_xml::Error) -> Self {
        ReadError::Xlsx(e.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SheetFormat {
    Csv,
    Tsv,
    Xlsx,
}

impl SheetFormat {
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "csv" => Some(SheetFormat::Csv),
            "tsv" | "tab" => Some(SheetFormat::Tsv),
            "xlsx" | "xlsm" => Some(SheetFormat::Xlsx),
            _ => None,
        }
    }
}

/// Read every table in the file at `path`.
pub fn read_sheets(path: &Path) -> Result<Vec<SheetTable>, ReadError> {
    let format = SheetFormat::from_path(path)
        .ok_or_else(|| ReadError::UnsupportedFormat(path.display().to_string()))?;
    let bytes = std::fs::read(path).map_err(|source| ReadError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let source_file = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    let stem = path
        .file_stem()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| source_file.clone());

    match format {
        SheetFormat::Csv => Ok(vec![read_delimited(&bytes, b',', &stem, &source_file)?]),
        SheetFormat::Tsv => Ok(vec![read_delimited(&bytes, b'\t', &stem, &source_file)?]),
        SheetFormat::Xlsx => read_xlsx(&bytes, &source_file),
    }
}

fn is_blank_row(cells: &[String]) -> bool {
    cells.iter().all(|c| c.trim().is_empty())
}

/// Parse delimited text. Record lengths may vary; all-blank records are
/// skipped but still counted for row numbering.
pub fn read_delimited(
    bytes: &[u8],
    delimiter: u8,
    name: &str,
    source_file: &str,
) -> Result<SheetTable, ReadError> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(true)
        .flexible(true)
        .from_reader(bytes);

    let header_record = reader.byte_headers()?.clone();
    let mut headers: Vec<String> = header_record
        .iter()
        .map(|h| String::from_utf8_lossy(h).into_owned())
        .collect();
    if let Some(first) = headers.first_mut() {
        *first = first.trim_start_matches('\u{feff}').to_string();
    }
    if headers.is_empty() || is_blank_row(&headers) {
        return Err(ReadError::MissingHeader(source_file.to_string()));
    }

    let mut rows = Vec::new();
    let mut record = csv::ByteRecord::new();
    let mut number = 1u64;
    while reader.read_byte_record(&mut record)? {
        number += 1;
        let cells: Vec<String> = record
            .iter()
            .map(|c| String::from_utf8_lossy(c).into_owned())
            .collect();
        if is_blank_row(&cells) {
            continue;
        }
        rows.push(RawRow { number, cells });
    }

    Ok(SheetTable {
        name: name.to_string(),
        source_file: source_file.to_string(),
        headers,
        rows,
    })
}

type Archive<'a> = zip::ZipArchive<std::io::Cursor<&'a [u8]>>;

fn read_zip_entry_bounded(
    archive: &mut Archive<'_>,
    name: &str,
    max_bytes: u64,
) -> Result<Vec<u8>, ReadError> {
    let entry = archive.by_name(name)?;
    let mut out = Vec::new();
    entry
        .take(max_bytes)
        .read_to_end(&mut out)
        .map_err(|e| ReadError::Xlsx(e.to_string()))?;
    if out.len() as u64 >= max_bytes {
        return Err(ReadError::Xlsx(format!(
            "ZIP entry {} exceeds size limit ({} bytes)",
            name, max_bytes
        )));
    }
    Ok(out)
}

pub fn read_xlsx(bytes: &[u8], source_file: &str) -> Result<Vec<SheetTable>, ReadError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))?;
    let shared_strings = if archive.index_for_name("xl/sharedStrings.xml").is_some() {
        let xml =
            read_zip_entry_bounded(&mut archive, "xl/sharedStrings.xml", MAX_XML_ENTRY_BYTES)?;
        parse_shared_strings(&xml)?
    } else {
        Vec::new()
    };

    let sheets = match workbook_sheets(&mut archive)? {
        found if !found.is_empty() => found,
        _ => list_worksheet_entries(&archive),
    };

    let mut tables = Vec::new();
    for (name, entry) in sheets.into_iter().take(XLSX_MAX_SHEETS) {
        let xml = read_zip_entry_bounded(&mut archive, &entry, MAX_XML_ENTRY_BYTES)?;
        let grid = parse_sheet_rows(&xml, &shared_strings)?;
        if let Some(table) = grid_to_table(grid, &name, source_file) {
            tables.push(table);
        }
    }

    if tables.is_empty() {
        return Err(ReadError::MissingHeader(source_file.to_string()));
    }
    Ok(tables)
}

fn attr_value(e: &BytesStart<'_>, local: &[u8]) -> Option<String> {
    e.attributes().flatten().find_map(|a| {
        (a.key.local_name().as_ref() == local)
            .then(|| a.unescape_value().ok().map(|v| v.into_owned()))
            .flatten()
    })
}

/// Shared strings table. Rich-text runs in one item are concatenated.
fn parse_shared_strings(xml: &[u8]) -> Result<Vec<String>, ReadError> {
    let mut strings = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut current: Option<String> = None;
    let mut in_t = false;
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"si" => current = Some(String::new()),
                b"t" => in_t = current.is_some(),
                _ => {}
            },
            Event::Empty(e) if e.local_name().as_ref() == b"si" => strings.push(String::new()),
            Event::Text(te) if in_t => {
                if let Some(s) = current.as_mut() {
                    s.push_str(&te.unescape().unwrap_or_default());
                }
            }
            Event::End(e) => match e.local_name().as_ref() {
                b"t" => in_t = false,
                b"si" => strings.extend(current.take()),
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(strings)
}

/// `(sheet name, zip entry)` pairs in workbook order, resolved through the
/// workbook relationships.
fn workbook_sheets(archive: &mut Archive<'_>) -> Result<Vec<(String, String)>, ReadError> {
    if archive.index_for_name("xl/workbook.xml").is_none()
        || archive.index_for_name("xl/_rels/workbook.xml.rels").is_none()
    {
        return Ok(Vec::new());
    }

    let rels_xml =
        read_zip_entry_bounded(archive, "xl/_rels/workbook.xml.rels", MAX_XML_ENTRY_BYTES)?;
    let mut targets: HashMap<String, String> = HashMap::new();
    let mut reader = quick_xml::Reader::from_reader(rels_xml.as_slice());
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"Relationship" => {
                if let (Some(id), Some(target)) = (attr_value(&e, b"Id"), attr_value(&e, b"Target"))
                {
                    targets.insert(id, target);
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    let workbook_xml = read_zip_entry_bounded(archive, "xl/workbook.xml", MAX_XML_ENTRY_BYTES)?;
    let mut sheets = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(workbook_xml.as_slice());
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"sheet" => {
                let name = attr_value(&e, b"name");
                let target = attr_value(&e, b"id").and_then(|id| targets.get(&id).cloned());
                if let (Some(name), Some(target)) = (name, target) {
                    let entry = match target.strip_prefix('/') {
                        Some(absolute) => absolute.to_string(),
                        None => format!("xl/{}", target),
                    };
                    if archive.index_for_name(&entry).is_some() {
                        sheets.push((name, entry));
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(sheets)
}

/// Fallback when the workbook part is missing: every `sheetN.xml`, in
/// numeric order, named `SheetN`.
fn list_worksheet_entries(archive: &Archive<'_>) -> Vec<(String, String)> {
    let mut entries: Vec<(u32, String)> = archive
        .file_names()
        .filter(|n| n.starts_with("xl/worksheets/sheet") && n.ends_with(".xml"))
        .map(|n| {
            let idx = n
                .trim_start_matches("xl/worksheets/sheet")
                .trim_end_matches(".xml")
                .parse::<u32>()
                .unwrap_or(u32::MAX);
            (idx, n.to_string())
        })
        .collect();
    entries.sort();
    entries
        .into_iter()
        .map(|(idx, entry)| (format!("Sheet{}", idx), entry))
        .collect()
}

/// Zero-based column position of a cell reference like `AB12`.
pub fn column_index(cell_ref: &str) -> Option<usize> {
    let letters: Vec<u8> = cell_ref
        .bytes()
        .take_while(|b| b.is_ascii_alphabetic())
        .collect();
    if letters.is_empty() || letters.len() > 3 {
        return None;
    }
    let mut idx = 0usize;
    for b in letters {
        idx = idx * 26 + (b.to_ascii_uppercase() - b'A' + 1) as usize;
    }
    Some(idx - 1)
}

#[derive(Clone, Copy, PartialEq)]
enum CellKind {
    Number,
    Shared,
    Inline,
    Bool,
    Text,
}

struct CellState {
    col: usize,
    kind: CellKind,
    value: String,
}

/// Rows of a worksheet as `(physical row number, cells)`.
fn parse_sheet_rows(
    xml: &[u8],
    shared_strings: &[String],
) -> Result<Vec<(u64, Vec<String>)>, ReadError> {
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut rows: Vec<(u64, Vec<String>)> = Vec::new();
    let mut current_row: Option<(u64, Vec<String>)> = None;
    let mut cell: Option<CellState> = None;
    let mut capture = false;
    let mut cell_count = 0usize;

    loop {
        if cell_count >= XLSX_MAX_CELLS_PER_SHEET {
            break;
        }
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"row" => {
                    let prev = rows.last().map_or(0, |(n, _)| *n);
                    let number = attr_value(&e, b"r")
                        .and_then(|r| r.parse::<u64>().ok())
                        .unwrap_or(prev + 1);
                    current_row = Some((number, Vec::new()));
                }
                b"c" => {
                    let next_col = current_row.as_ref().map_or(0, |(_, cells)| cells.len());
                    let col = attr_value(&e, b"r")
                        .and_then(|r| column_index(&r))
                        .unwrap_or(next_col);
                    let kind = match attr_value(&e, b"t").as_deref() {
                        Some("s") => CellKind::Shared,
                        Some("inlineStr") => CellKind::Inline,
                        Some("b") => CellKind::Bool,
                        Some("str") | Some("e") | Some("d") => CellKind::Text,
                        _ => CellKind::Number,
                    };
                    cell = Some(CellState {
                        col,
                        kind,
                        value: String::new(),
                    });
                }
                b"v" => capture = cell.as_ref().is_some_and(|c| c.kind != CellKind::Inline),
                b"t" => capture = cell.as_ref().is_some_and(|c| c.kind == CellKind::Inline),
                _ => {}
            },
            Event::Text(te) if capture => {
                if let Some(c) = cell.as_mut() {
                    c.value.push_str(&te.unescape().unwrap_or_default());
                }
            }
            Event::End(e) => match e.local_name().as_ref() {
                b"v" | b"t" => capture = false,
                b"c" => {
                    if let (Some(c), Some((_, cells))) = (cell.take(), current_row.as_mut()) {
                        let text = resolve_cell(&c, shared_strings);
                        if c.col >= cells.len() {
                            cells.resize(c.col + 1, String::new());
                        }
                        cells[c.col] = text;
                        cell_count += 1;
                    }
                }
                b"row" => rows.extend(current_row.take()),
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(rows)
}

fn resolve_cell(cell: &CellState, shared_strings: &[String]) -> String {
    match cell.kind {
        CellKind::Shared => cell
            .value
            .trim()
            .parse::<usize>()
            .ok()
            .and_then(|i| shared_strings.get(i).cloned())
            .unwrap_or_default(),
        CellKind::Bool => match cell.value.trim() {
            "1" => "true".to_string(),
            "0" => "false".to_string(),
            other => other.to_string(),
        },
        _ => cell.value.clone(),
    }
}

/// The first non-blank row is the header; blank rows after it are dropped.
fn grid_to_table(
    grid: Vec<(u64, Vec<String>)>,
    name: &str,
    source_file: &str,
) -> Option<SheetTable> {
    let mut rows = grid.into_iter().filter(|(_, cells)| !is_blank_row(cells));
    let (_, mut headers) = rows.next()?;
    while headers.last().is_some_and(|h| h.trim().is_empty()) {
        headers.pop();
    }
    let rows = rows
        .map(|(number, mut cells)| {
            while cells.last().is_some_and(|c| c.trim().is_empty()) {
                cells.pop();
            }
            RawRow { number, cells }
        })
        .collect();
    Some(SheetTable {
        name: name.to_string(),
        source_file: source_file.to_string(),
        headers,
        rows,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    fn workbook(parts: &[(&str, &str)]) -> Vec<u8> {
        let mut zip = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
        for (name, body) in parts {
            zip.start_file(*name, SimpleFileOptions::default()).unwrap();
            zip.write_all(body.as_bytes()).unwrap();
        }
        zip.finish().unwrap().into_inner()
    }

    const WORKBOOK: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships">
<sheets><sheet name="Inventory" sheetId="1" r:id="rId1"/></sheets></workbook>"#;

    const RELS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">
<Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet1.xml"/>
</Relationships>"#;

    const SHARED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<sst xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main">
<si><t>Host</t></si><si><t>Port</t></si><si><r><t>web</t></r><r><t>-01</t></r></si>
</sst>"#;

    const SHEET: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><sheetData>
<row r="1"><c r="A1" t="s"><v>0</v></c><c r="B1" t="s"><v>1</v></c><c r="C1" t="inlineStr"><is><t>Active</t></is></c></row>
<row r="3"><c r="A3" t="s"><v>2</v></c><c r="B3"><v>8080</v></c><c r="C3" t="b"><v>1</v></c></row>
<row r="4"><c r="B4"><v>443</v></c></row>
</sheetData></worksheet>"#;

    #[test]
    fn test_column_index() {
        assert_eq!(column_index("A1"), Some(0));
        assert_eq!(column_index("Z9"), Some(25));
        assert_eq!(column_index("AA10"), Some(26));
        assert_eq!(column_index("12"), None);
    }

    #[test]
    fn test_csv_rows_are_physically_numbered() {
        let csv = "\u{feff}Host,Port\nweb-01,8080\n,\nweb-02,443,extra\n";
        let table = read_delimited(csv.as_bytes(), b',', "servers", "servers.csv").unwrap();
        assert_eq!(table.headers, vec!["Host", "Port"]);
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.rows[0].number, 2);
        assert_eq!(table.rows[1].number, 4);
        assert_eq!(table.rows[1].cells, vec!["web-02", "443", "extra"]);
    }

    #[test]
    fn test_tsv_delimiter() {
        let table = read_delimited(b"a\tb\n1\t2\n", b'\t', "t", "t.tsv").unwrap();
        assert_eq!(table.headers, vec!["a", "b"]);
        assert_eq!(table.rows[0].cells, vec!["1", "2"]);
    }

    #[test]
    fn test_empty_csv_has_no_header() {
        let err = read_delimited(b"", b',', "e", "e.csv").unwrap_err();
        assert!(matches!(err, ReadError::MissingHeader(_)));
    }

    #[test]
    fn test_xlsx_reads_named_sheet() {
        let bytes = workbook(&[
            ("xl/workbook.xml", WORKBOOK),
            ("xl/_rels/workbook.xml.rels", RELS),
            ("xl/sharedStrings.xml", SHARED),
            ("xl/worksheets/sheet1.xml", SHEET),
        ]);
        let tables = read_xlsx(&bytes, "hosts.xlsx").unwrap();
        assert_eq!(tables.len(), 1);
        let t = &tables[0];
        assert_eq!(t.name, "Inventory");
        assert_eq!(t.headers, vec!["Host", "Port", "Active"]);
        assert_eq!(t.rows[0].number, 3);
        assert_eq!(t.rows[0].cells, vec!["web-01", "8080", "true"]);
        assert_eq!(t.rows[1].cells, vec!["", "443"]);
    }

    #[test]
    fn test_xlsx_without_workbook_falls_back_to_entries() {
        let bytes = workbook(&[
            ("xl/sharedStrings.xml", SHARED),
            ("xl/worksheets/sheet1.xml", SHEET),
        ]);
        let tables = read_xlsx(&bytes, "hosts.xlsx").unwrap();
        assert_eq!(tables[0].name, "Sheet1");
    }

    #[test]
    fn test_invalid_zip_is_xlsx_error() {
        let err = read_xlsx(b"not a zip", "bad.xlsx").unwrap_err();
        assert!(matches!(err, ReadError::Xlsx(_)));
    }

    #[test]
    fn test_unsupported_extension() {
        let err = read_sheets(Path::new("notes.txt")).unwrap_err();
        assert!(matches!(err, ReadError::UnsupportedFormat(_)));
    }
}
