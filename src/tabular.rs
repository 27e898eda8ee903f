//! Shared tabular-file I/O: encoding-fallback CSV decoding and XLSX reading.
//!
//! Used by both the detector (C3, first-ten-rows sampling) and the
//! normalizer (C4, full read), so the encoding-fallback sequence and sheet
//! selection behave identically in both places (spec §4.3 step 1, §4.4 step 2).

use calamine::{open_workbook_auto, Reader};
use std::path::Path;
use tracing::info;

/// Files at or under this size are read in a single pass; larger files are
/// read and concatenated in [`CHUNK_ROWS`]-row chunks (spec §4.4 step 2).
const CHUNKED_READ_THRESHOLD_BYTES: u64 = 50 * 1024 * 1024;

/// Row-count per chunk when [`read_csv`] falls back to chunked reading.
const CHUNK_ROWS: usize = 10_000;

/// A fully decoded tabular file: header row plus data rows, all as strings.
/// Numeric/date interpretation happens downstream in `normalize`.
pub struct Table {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

/// Decodes `bytes` trying, in order, `utf-8 -> latin-1 -> cp1252 -> iso-8859-1`
/// and returns the first successful decode (spec §4.3 step 1).
pub fn decode_with_fallback(bytes: &[u8]) -> String {
    if let Ok(s) = std::str::from_utf8(bytes) {
        return s.to_string();
    }
    // latin-1 / iso-8859-1 map every byte 1:1 onto U+0000..=U+00FF and never
    // fail; cp1252 is attempted first since it differs only in the C1
    // control range (0x80..=0x9F), which real-world exports virtually never
    // use for control characters.
    let (cp1252, _, had_errors) = encoding_rs::WINDOWS_1252.decode(bytes);
    if !had_errors {
        return cp1252.into_owned();
    }
    bytes.iter().map(|&b| b as char).collect()
}

/// Reads a CSV file (full or head-limited via `max_rows`) with the encoding
/// fallback sequence applied to the whole file up front.
///
/// Files over [`CHUNKED_READ_THRESHOLD_BYTES`] are read and concatenated in
/// [`CHUNK_ROWS`]-row chunks rather than collected in one pass, mirroring the
/// original importer's `pd.read_csv(chunksize=...)`/`pd.concat` fallback for
/// large exports (spec §4.4 step 2).
pub fn read_csv(path: &Path, max_rows: Option<usize>) -> std::io::Result<Table> {
    let file_size = std::fs::metadata(path)?.len();
    let bytes = std::fs::read(path)?;
    let text = decode_with_fallback(&bytes);

    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(text.as_bytes());

    let headers = reader
        .headers()?
        .iter()
        .map(|h| h.to_string())
        .collect::<Vec<_>>();

    if file_size > CHUNKED_READ_THRESHOLD_BYTES {
        info!(
            bytes = file_size,
            chunk_rows = CHUNK_ROWS,
            "large file detected, using chunked reading"
        );
        return read_records_chunked(reader, headers, max_rows);
    }

    read_records(reader, headers, max_rows)
}

fn read_records<R: std::io::Read>(
    mut reader: csv::Reader<R>,
    headers: Vec<String>,
    max_rows: Option<usize>,
) -> std::io::Result<Table> {
    let mut rows = Vec::new();
    for (i, record) in reader.records().enumerate() {
        if let Some(max) = max_rows {
            if i >= max {
                break;
            }
        }
        let record = record?;
        rows.push(record.iter().map(|f| f.to_string()).collect());
    }
    Ok(Table { headers, rows })
}

/// Reads `reader`'s remaining records in [`CHUNK_ROWS`]-row chunks,
/// concatenating each chunk into the final row set as it completes, instead
/// of collecting the whole record iterator in one unbounded pass.
fn read_records_chunked<R: std::io::Read>(
    mut reader: csv::Reader<R>,
    headers: Vec<String>,
    max_rows: Option<usize>,
) -> std::io::Result<Table> {
    let mut rows = Vec::new();
    let mut chunk = Vec::with_capacity(CHUNK_ROWS);
    let mut seen = 0usize;

    for record in reader.records() {
        if let Some(max) = max_rows {
            if seen >= max {
                break;
            }
        }
        let record = record?;
        chunk.push(record.iter().map(|f| f.to_string()).collect());
        seen += 1;

        if chunk.len() >= CHUNK_ROWS {
            rows.append(&mut chunk);
        }
    }
    rows.append(&mut chunk);

    Ok(Table { headers, rows })
}

/// Reads an XLSX file's sheet (first sheet when `sheet_name` is `None`).
pub fn read_xlsx(path: &Path, sheet_name: Option<&str>, max_rows: Option<usize>) -> std::io::Result<Table> {
    let mut workbook = open_workbook_auto(path)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))?;

    let sheet = match sheet_name {
        Some(name) => name.to_string(),
        None => workbook
            .sheet_names()
            .first()
            .cloned()
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::InvalidData, "workbook has no sheets"))?,
    };

    let range = workbook
        .worksheet_range(&sheet)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))?;

    let mut rows_iter = range.rows();
    let headers = match rows_iter.next() {
        Some(row) => row.iter().map(cell_to_string).collect(),
        None => Vec::new(),
    };

    let mut rows = Vec::new();
    for (i, row) in rows_iter.enumerate() {
        if let Some(max) = max_rows {
            if i >= max {
                break;
            }
        }
        rows.push(row.iter().map(cell_to_string).collect());
    }

    Ok(Table { headers, rows })
}

fn cell_to_string(cell: &calamine::Data) -> String {
    match cell {
        calamine::Data::Empty => String::new(),
        other => other.to_string(),
    }
}

/// Dispatches on file extension to [`read_csv`] or [`read_xlsx`].
pub fn read_table(path: &Path, sheet_name: Option<&str>, max_rows: Option<usize>) -> std::io::Result<Table> {
    match path.extension().and_then(|e| e.to_str()).map(|e| e.to_lowercase()) {
        Some(ext) if ext == "xlsx" => read_xlsx(path, sheet_name, max_rows),
        _ => read_csv(path, max_rows),
    }
}
