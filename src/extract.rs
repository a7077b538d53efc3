//! Per-format text extraction.
//!
//! Every supported file is reduced to plain UTF-8 text laid out in
//! blank-line separated blocks, which is what the chunker splits on.
//!
//! | Extension | Rendering |
//! |-----------|-----------|
//! | `txt`  | file contents, UTF-8 with a Latin-1 fallback |
//! | `csv`  | summary line, column list, then `Row i: col: val \| ...` |
//! | `pdf`  | `[Page n]` header before each non-empty page |
//! | `docx` | paragraphs, then table rows as `cell \| cell` |
//! | `xlsx` | per sheet: `[Sheet: name]` header then rows like csv |
//!
//! Legacy binary `doc`/`xls` files are not supported.

use std::collections::HashMap;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use thiserror::Error;

pub const SUPPORTED_EXTENSIONS: &[&str] = &["txt", "csv", "pdf", "docx", "xlsx"];

/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;
const XLSX_MAX_CELLS_PER_SHEET: usize = 100_000;
/// Column `XFD`, the last column a worksheet can address.
const XLSX_MAX_COLUMNS: usize = 16_384;
/// Upper bound on `rows * columns` once a sheet is laid out densely.
const XLSX_MAX_DENSE_CELLS: usize = 5_000_000;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("Unsupported file type: {0}")]
    UnsupportedFormat(String),
    #[error("Error extracting {format}: {reason}")]
    Extraction { format: String, reason: String },
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

fn failure(format: &str, reason: impl ToString) -> ExtractError {
    ExtractError::Extraction {
        format: format.to_uppercase(),
        reason: reason.to_string(),
    }
}

/// Lower-cased extension of `path`, if it is a supported format.
pub fn file_type(path: &Path) -> Result<String, ExtractError> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default();
    if SUPPORTED_EXTENSIONS.contains(&ext.as_str()) {
        Ok(ext)
    } else {
        Err(ExtractError::UnsupportedFormat(ext))
    }
}

/// Read a file and extract its text based on its extension.
pub fn extract_file(path: &Path) -> Result<String, ExtractError> {
    let ext = file_type(path)?;
    let bytes = std::fs::read(path).map_err(|source| ExtractError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    extract_bytes(&bytes, &ext)
}

pub fn extract_bytes(bytes: &[u8], ext: &str) -> Result<String, ExtractError> {
    match ext {
        "txt" => Ok(decode_text(bytes)),
        "csv" => extract_csv(bytes),
        "pdf" => extract_pdf(bytes),
        "docx" => extract_docx(bytes),
        "xlsx" => extract_xlsx(bytes),
        other => Err(ExtractError::UnsupportedFormat(other.to_string())),
    }
}

/// UTF-8, or Latin-1 when the bytes are not valid UTF-8.
fn decode_text(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => bytes.iter().map(|&b| b as char).collect(),
    }
}

// ============ PDF ============

fn extract_pdf(bytes: &[u8]) -> Result<String, ExtractError> {
    let pages = pdf_extract::extract_text_from_mem_by_pages(bytes).map_err(|e| failure("pdf", e))?;
    let parts: Vec<String> = pages
        .iter()
        .enumerate()
        .filter(|(_, text)| !text.trim().is_empty())
        .map(|(i, text)| format!("[Page {}]\n{}", i + 1, text.trim_end()))
        .collect();
    Ok(parts.join("\n\n"))
}

// ============ Tabular rendering ============

/// Render a header row plus data rows the way both csv and xlsx share.
fn render_rows(header: &[String], rows: &[Vec<String>]) -> Vec<String> {
    rows.iter()
        .enumerate()
        .map(|(i, row)| {
            let cells: Vec<String> = header
                .iter()
                .enumerate()
                .map(|(c, name)| {
                    let value = row.get(c).map(String::as_str).unwrap_or("");
                    format!("{}: {}", name, value)
                })
                .collect();
            format!("Row {}: {}", i + 1, cells.join(" | "))
        })
        .collect()
}

// ============ CSV ============

fn extract_csv(bytes: &[u8]) -> Result<String, ExtractError> {
    let text = decode_text(bytes);
    let mut records = parse_csv(text.trim_start_matches('\u{feff}'));
    if records.is_empty() {
        return Err(failure("csv", "No columns to parse from file"));
    }
    let header = records.remove(0);

    let mut parts = vec![
        format!(
            "CSV File with {} rows and {} columns",
            records.len(),
            header.len()
        ),
        format!("Columns: {}", header.join(", ")),
        "\nData:".to_string(),
    ];
    parts.extend(render_rows(&header, &records));
    Ok(parts.join("\n"))
}

/// Quote-aware CSV split. Quoted fields may contain commas, doubled quotes
/// and newlines. Blank lines are skipped.
fn parse_csv(text: &str) -> Vec<Vec<String>> {
    let mut records = Vec::new();
    let mut record: Vec<String> = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = text.chars().peekable();

    let mut finish_record = |record: &mut Vec<String>, field: &mut String| {
        record.push(std::mem::take(field));
        let row = std::mem::take(record);
        if !(row.len() == 1 && row[0].trim().is_empty()) {
            records.push(row);
        }
    };

    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' if chars.peek() == Some(&'"') => {
                    field.push('"');
                    chars.next();
                }
                '"' => in_quotes = false,
                _ => field.push(c),
            }
            continue;
        }
        match c {
            '"' => in_quotes = true,
            ',' => record.push(std::mem::take(&mut field)),
            '\r' => {}
            '\n' => finish_record(&mut record, &mut field),
            _ => field.push(c),
        }
    }
    if !field.is_empty() || !record.is_empty() {
        finish_record(&mut record, &mut field);
    }
    records
}

// ============ OOXML ============

type Archive<'a> = zip::ZipArchive<Cursor<&'a [u8]>>;

fn open_archive<'a>(bytes: &'a [u8], format: &str) -> Result<Archive<'a>, ExtractError> {
    zip::ZipArchive::new(Cursor::new(bytes)).map_err(|e| failure(format, e))
}

/// Read one entry, bounded in size. `Ok(None)` when the entry is absent.
fn read_entry(
    archive: &mut Archive<'_>,
    name: &str,
    format: &str,
) -> Result<Option<Vec<u8>>, ExtractError> {
    let entry = match archive.by_name(name) {
        Ok(entry) => entry,
        Err(zip::result::ZipError::FileNotFound) => return Ok(None),
        Err(e) => return Err(failure(format, e)),
    };
    let mut out = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut out)
        .map_err(|e| failure(format, e))?;
    if out.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(failure(
            format,
            format!("ZIP entry {} exceeds size limit", name),
        ));
    }
    Ok(Some(out))
}

fn attr(e: &BytesStart<'_>, key: &[u8]) -> Option<String> {
    e.try_get_attribute(key)
        .ok()
        .flatten()
        .and_then(|a| a.unescape_value().ok().map(|v| v.into_owned()))
}

// ============ DOCX ============

fn extract_docx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = open_archive(bytes, "docx")?;
    let xml = read_entry(&mut archive, "word/document.xml", "docx")?
        .ok_or_else(|| failure("docx", "word/document.xml not found"))?;
    docx_text(&xml)
}

/// Body paragraphs in order, followed by table rows.
fn docx_text(xml: &[u8]) -> Result<String, ExtractError> {
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();

    let mut paragraphs: Vec<String> = Vec::new();
    let mut table_rows: Vec<String> = Vec::new();
    let mut para = String::new();
    let mut cell = String::new();
    let mut row: Vec<String> = Vec::new();
    let mut table_depth = 0usize;
    let mut in_text = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"tbl" => table_depth += 1,
                b"tc" => cell.clear(),
                b"t" => in_text = true,
                _ => {}
            },
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"tab" => para.push('\t'),
                b"br" | b"cr" => para.push('\n'),
                _ => {}
            },
            Ok(Event::Text(t)) if in_text => {
                para.push_str(&t.unescape().map_err(|e| failure("docx", e))?);
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => {
                    let text = std::mem::take(&mut para);
                    if table_depth > 0 {
                        if !cell.is_empty() {
                            cell.push('\n');
                        }
                        cell.push_str(&text);
                    } else if !text.trim().is_empty() {
                        paragraphs.push(text);
                    }
                }
                b"tc" => row.push(cell.trim().to_string()),
                b"tr" => {
                    let cells: Vec<String> = std::mem::take(&mut row)
                        .into_iter()
                        .filter(|c| !c.is_empty())
                        .collect();
                    if !cells.is_empty() {
                        table_rows.push(cells.join(" | "));
                    }
                }
                b"tbl" => table_depth = table_depth.saturating_sub(1),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(failure("docx", e)),
            _ => {}
        }
        buf.clear();
    }

    paragraphs.extend(table_rows);
    Ok(paragraphs.join("\n\n"))
}

// ============ XLSX ============

fn extract_xlsx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = open_archive(bytes, "xlsx")?;
    let shared = match read_entry(&mut archive, "xl/sharedStrings.xml", "xlsx")? {
        Some(xml) => shared_strings(&xml)?,
        None => Vec::new(),
    };
    let sheets = workbook_sheets(&mut archive)?;

    let mut blocks = Vec::new();
    for (name, path) in sheets {
        let Some(xml) = read_entry(&mut archive, &path, "xlsx")? else {
            continue;
        };
        let mut rows = sheet_rows(&xml, &shared)?;
        let width = rows
            .iter()
            .flat_map(|r| r.iter().map(|(c, _)| c + 1))
            .max()
            .unwrap_or(0);
        if width.saturating_mul(rows.len()) > XLSX_MAX_DENSE_CELLS {
            return Err(failure(
                "xlsx",
                format!(
                    "sheet '{}' spans {} rows by {} columns, too large to extract",
                    name,
                    rows.len(),
                    width
                ),
            ));
        }
        let mut dense: Vec<Vec<String>> = rows
            .drain(..)
            .map(|cells| {
                let mut row = vec![String::new(); width];
                for (c, v) in cells {
                    row[c] = v;
                }
                row
            })
            .collect();
        let header: Vec<String> = if dense.is_empty() {
            Vec::new()
        } else {
            dense
                .remove(0)
                .into_iter()
                .enumerate()
                .map(|(i, h)| if h.is_empty() { format!("Unnamed: {}", i) } else { h })
                .collect()
        };

        let mut lines = vec![
            format!("[Sheet: {}]", name),
            format!("Rows: {}, Columns: {}", dense.len(), header.len()),
            format!("Columns: {}", header.join(", ")),
        ];
        lines.extend(render_rows(&header, &dense));
        blocks.push(lines.join("\n"));
    }
    Ok(blocks.join("\n\n"))
}

fn shared_strings(xml: &[u8]) -> Result<Vec<String>, ExtractError> {
    let mut strings = Vec::new();
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut current: Option<String> = None;
    let mut in_text = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"si" => current = Some(String::new()),
                b"t" => in_text = true,
                _ => {}
            },
            Ok(Event::Text(t)) if in_text => {
                if let Some(s) = current.as_mut() {
                    s.push_str(&t.unescape().map_err(|e| failure("xlsx", e))?);
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"si" => strings.extend(current.take()),
                _ => {}
            },
            Ok(Event::Empty(e)) if e.local_name().as_ref() == b"si" => strings.push(String::new()),
            Ok(Event::Eof) => break,
            Err(e) => return Err(failure("xlsx", e)),
            _ => {}
        }
        buf.clear();
    }
    Ok(strings)
}

/// `(sheet name, zip entry path)` in workbook order.
fn workbook_sheets(archive: &mut Archive<'_>) -> Result<Vec<(String, String)>, ExtractError> {
    let workbook = read_entry(archive, "xl/workbook.xml", "xlsx")?
        .ok_or_else(|| failure("xlsx", "xl/workbook.xml not found"))?;
    let rels = match read_entry(archive, "xl/_rels/workbook.xml.rels", "xlsx")? {
        Some(xml) => relationship_targets(&xml)?,
        None => HashMap::new(),
    };

    let mut sheets = Vec::new();
    let mut reader = Reader::from_reader(workbook.as_slice());
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) if e.local_name().as_ref() == b"sheet" => {
                let name = attr(&e, b"name").unwrap_or_default();
                let rid = e.attributes().flatten().find_map(|a| {
                    (a.key.local_name().as_ref() == b"id")
                        .then(|| a.unescape_value().ok().map(|v| v.into_owned()))
                        .flatten()
                });
                let position = sheets.len() + 1;
                let path = rid
                    .and_then(|id| rels.get(&id).cloned())
                    .map(|target| resolve_target(&target))
                    .unwrap_or_else(|| format!("xl/worksheets/sheet{}.xml", position));
                sheets.push((name, path));
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(failure("xlsx", e)),
            _ => {}
        }
        buf.clear();
    }
    Ok(sheets)
}

fn relationship_targets(xml: &[u8]) -> Result<HashMap<String, String>, ExtractError> {
    let mut map = HashMap::new();
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e))
                if e.local_name().as_ref() == b"Relationship" =>
            {
                if let (Some(id), Some(target)) = (attr(&e, b"Id"), attr(&e, b"Target")) {
                    map.insert(id, target);
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(failure("xlsx", e)),
            _ => {}
        }
        buf.clear();
    }
    Ok(map)
}

fn resolve_target(target: &str) -> String {
    match target.strip_prefix('/') {
        Some(absolute) => absolute.to_string(),
        None => format!("xl/{}", target),
    }
}

/// Zero-based column of a cell reference such as `AB12`.
///
/// `Ok(None)` when the reference has no column letters. Columns past `XFD`
/// are rejected.
fn column_index(reference: &str) -> Result<Option<usize>, ExtractError> {
    let letters: Vec<char> = reference
        .chars()
        .take_while(|c| c.is_ascii_alphabetic())
        .collect();
    if letters.is_empty() {
        return Ok(None);
    }
    let n = letters.iter().try_fold(0usize, |acc, c| {
        acc.checked_mul(26)?
            .checked_add(c.to_ascii_uppercase() as usize - 'A' as usize + 1)
    });
    match n {
        Some(n) if n <= XLSX_MAX_COLUMNS => Ok(Some(n - 1)),
        _ => Err(failure(
            "xlsx",
            format!("cell reference {} is beyond column XFD", reference),
        )),
    }
}

/// Column of a `<c>` element, or `next` when it carries no reference.
fn cell_column(e: &BytesStart<'_>, next: usize) -> Result<usize, ExtractError> {
    let col = match attr(e, b"r") {
        Some(r) => column_index(&r)?.unwrap_or(next),
        None => next,
    };
    if col >= XLSX_MAX_COLUMNS {
        return Err(failure("xlsx", "row has more than 16384 columns"));
    }
    Ok(col)
}

/// Sparse rows of `(column, value)` with shared strings resolved.
fn sheet_rows(xml: &[u8], shared: &[String]) -> Result<Vec<Vec<(usize, String)>>, ExtractError> {
    let mut rows = Vec::new();
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();

    let mut row: Vec<(usize, String)> = Vec::new();
    let mut next_col = 0usize;
    let mut col = 0usize;
    let mut cell_type = String::new();
    let mut value = String::new();
    let mut in_value = false;
    let mut cells = 0usize;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"row" => {
                    row.clear();
                    next_col = 0;
                }
                b"c" => {
                    col = cell_column(&e, next_col)?;
                    cell_type = attr(&e, b"t").unwrap_or_default();
                    value.clear();
                }
                b"v" | b"t" => in_value = true,
                _ => {}
            },
            Ok(Event::Empty(e)) if e.local_name().as_ref() == b"c" => {
                next_col = cell_column(&e, next_col)? + 1;
            }
            Ok(Event::Text(t)) if in_value => {
                value.push_str(&t.unescape().map_err(|e| failure("xlsx", e))?);
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"v" | b"t" => in_value = false,
                b"c" => {
                    let resolved = match cell_type.as_str() {
                        "s" => value
                            .trim()
                            .parse::<usize>()
                            .ok()
                            .and_then(|i| shared.get(i).cloned())
                            .unwrap_or_default(),
                        "b" => match value.trim() {
                            "1" => "TRUE".to_string(),
                            _ => "FALSE".to_string(),
                        },
                        _ => value.clone(),
                    };
                    if !resolved.is_empty() && cells < XLSX_MAX_CELLS_PER_SHEET {
                        row.push((col, resolved));
                        cells += 1;
                    }
                    next_col = col + 1;
                }
                b"row" => rows.push(std::mem::take(&mut row)),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(failure("xlsx", e)),
            _ => {}
        }
        buf.clear();
    }
    Ok(rows)
}
