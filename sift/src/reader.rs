use std::fs;
use std::path::Path;
use calamine::{open_workbook_auto, Data, Reader};
use crate::{error::SiftError, model::RawTable};

// The encodings probed, in order, for delimited files. The first decoding that
// raises no errors wins. Latin-1 decodes anything, so it additionally rejects
// NUL bytes to avoid silently "decoding" binary input.
const ENCODING_LABELS: [&str; 4] = ["GB18030", "GBK", "GB2312", "windows-1252"];

const SPREADSHEET_EXTENSIONS: [&str; 2] = ["xlsx", "xls"];

///
/// Read a file into its raw tabular form.
///
/// The header row is the first non-empty row; everything after it becomes a record.
/// Cells stay strings here - coercion is the cleaner's job, which keeps the original
/// formatting available to issue detail templates.
///
pub fn read(path: &Path, sheet: Option<&str>) -> Result<RawTable, SiftError> {
    let extension = path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .unwrap_or_default();

    let rows = match SPREADSHEET_EXTENSIONS.contains(&extension.as_str()) {
        true  => read_sheet(path, sheet)?,
        false => read_delimited(path, &extension)?,
    };

    into_table(rows, path)
}

///
/// Decode and parse a delimited file (.csv, .tsv, .txt).
///
fn read_delimited(path: &Path, extension: &str) -> Result<Vec<Vec<String>>, SiftError> {
    let bytes = fs::read(path)
        .map_err(|err| read_failed(path, &err.to_string()))?;

    let text = decode(&bytes, path)?;
    let delimiter = infer_delimiter(&text, extension);

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .delimiter(delimiter)
        .from_reader(text.as_bytes());

    let mut rows = vec!();
    for record in reader.records() {
        let record = record.map_err(|err| read_failed(path, &err.to_string()))?;
        rows.push(record.iter().map(|cell| cell.to_string()).collect());
    }

    Ok(rows)
}

///
/// Probe the configured encodings in order and return the first clean decoding.
///
fn decode(bytes: &[u8], path: &Path) -> Result<String, SiftError> {
    // UTF-8 first, with or without a BOM.
    let stripped = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(bytes);
    if let Ok(text) = std::str::from_utf8(stripped) {
        return Ok(text.to_string())
    }

    for label in ENCODING_LABELS {
        let encoding = match encoding_rs::Encoding::for_label(label.as_bytes()) {
            Some(encoding) => encoding,
            None => continue,
        };

        let (decoded, had_errors) = encoding.decode_without_bom_handling(bytes);
        if !had_errors && !decoded.contains('\u{0}') {
            return Ok(decoded.into_owned())
        }
    }

    Err(read_failed(path, "content is not decodable with any supported encoding"))
}

///
/// Infer the delimiter from the first non-empty line: whichever of comma, semicolon
/// and tab appears most often outside quotes. A .tsv falls back to tab, everything
/// else to comma.
///
fn infer_delimiter(text: &str, extension: &str) -> u8 {
    let line = text.lines().find(|line| !line.trim().is_empty()).unwrap_or("");

    let mut commas = 0;
    let mut semicolons = 0;
    let mut tabs = 0;
    let mut quoted = false;

    for ch in line.chars() {
        match ch {
            '"' => quoted = !quoted,
            ',' if !quoted => commas += 1,
            ';' if !quoted => semicolons += 1,
            '\t' if !quoted => tabs += 1,
            _ => {},
        }
    }

    if commas == 0 && semicolons == 0 && tabs == 0 {
        return match extension {
            "tsv" => b'\t',
            _ => b',',
        }
    }

    if commas >= semicolons && commas >= tabs {
        b','
    } else if semicolons >= tabs {
        b';'
    } else {
        b'\t'
    }
}

///
/// Read the first (or named) worksheet of a spreadsheet.
///
fn read_sheet(path: &Path, sheet: Option<&str>) -> Result<Vec<Vec<String>>, SiftError> {
    let mut workbook = open_workbook_auto(path)
        .map_err(|err| read_failed(path, &err.to_string()))?;

    let names = workbook.sheet_names().to_vec();

    let target = match sheet {
        Some(name) => {
            if !names.iter().any(|candidate| candidate == name) {
                return Err(read_failed(path, &format!("worksheet '{}' not found", name)))
            }
            name.to_string()
        },
        None => match names.first() {
            Some(first) => first.clone(),
            None => return Err(read_failed(path, "workbook contains no sheets")),
        },
    };

    let range = workbook.worksheet_range(&target)
        .map_err(|err| read_failed(path, &err.to_string()))?;

    let rows = range.rows()
        .map(|row| row.iter().map(cell_to_string).collect())
        .collect();

    Ok(rows)
}

fn cell_to_string(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(text) => text.clone(),
        Data::Float(number) => number.to_string(),
        Data::Int(number) => number.to_string(),
        Data::Bool(flag) => flag.to_string(),
        Data::DateTime(stamp) => stamp.as_f64().to_string(),
        Data::DateTimeIso(text) => text.clone(),
        Data::DurationIso(text) => text.clone(),
        Data::Error(err) => format!("{:?}", err),
    }
}

///
/// Locate the header row and shape the remaining rows into records.
///
fn into_table(rows: Vec<Vec<String>>, path: &Path) -> Result<RawTable, SiftError> {
    let mut iter = rows.into_iter();

    let headers = loop {
        match iter.next() {
            Some(row) if row.iter().any(|cell| !cell.trim().is_empty()) => {
                break row.iter().map(|cell| cell.trim().to_string()).collect::<Vec<String>>()
            },
            Some(_) => continue,
            None => return Err(SiftError::EmptyFile { path: path.to_string_lossy().into() }),
        }
    };

    let mut records = vec!();
    for row in iter {
        if row.iter().all(|cell| cell.trim().is_empty()) {
            continue
        }

        // Short rows pad out to the header width.
        let mut record = row;
        record.resize(headers.len(), String::new());
        records.push(record);
    }

    if records.is_empty() {
        return Err(SiftError::EmptyFile { path: path.to_string_lossy().into() })
    }

    Ok(RawTable::new(headers, records))
}

fn read_failed(path: &Path, cause: &str) -> SiftError {
    SiftError::ReadFailed { path: path.to_string_lossy().into(), cause: cause.into() }
}
