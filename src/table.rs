//! Raw spreadsheet frames and the readers that produce them.

use std::io::Cursor;

use calamine::{open_workbook_auto_from_rs, Reader};
use tracing::debug;

use crate::error::{Error, Result};
use crate::schema::{self, STUDENT};

/// A header row plus string cells, as read from one file. Short rows read
/// as empty cells.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Frame {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Frame {
    /// First column with this exact name.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn cell(&self, row: usize, col: usize) -> &str {
        self.rows
            .get(row)
            .and_then(|r| r.get(col))
            .map(String::as_str)
            .unwrap_or("")
    }

    fn from_records(records: &[Vec<String>], header_row: usize) -> Option<Frame> {
        let columns = records.get(header_row)?.clone();
        let rows = records[header_row + 1..]
            .iter()
            .filter(|r| r.iter().any(|c| !c.trim().is_empty()))
            .cloned()
            .collect();
        Some(Frame { columns, rows })
    }
}

const ZIP_MAGIC: &[u8] = b"PK\x03\x04";
const OLE_MAGIC: &[u8] = &[0xD0, 0xCF, 0x11, 0xE0];

fn is_workbook(bytes: &[u8]) -> bool {
    bytes.starts_with(ZIP_MAGIC) || bytes.starts_with(OLE_MAGIC)
}

fn read_workbook(bytes: &[u8]) -> Result<Vec<Vec<String>>> {
    let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes.to_vec()))
        .map_err(|e| Error::UnreadableFile(e.to_string()))?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| Error::UnreadableFile("workbook has no worksheets".to_string()))?
        .map_err(|e| Error::UnreadableFile(e.to_string()))?;
    Ok(range
        .rows()
        .map(|row| row.iter().map(|cell| cell.to_string()).collect())
        .collect())
}

fn read_csv(bytes: &[u8]) -> Result<Vec<Vec<String>>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(bytes);
    let mut records = Vec::new();
    for result in reader.records() {
        let record = result.map_err(|e| Error::UnreadableFile(e.to_string()))?;
        records.push(record.iter().map(str::to_string).collect());
    }
    Ok(records)
}

fn has_student_column(frame: &Frame) -> bool {
    frame
        .columns
        .iter()
        .any(|c| schema::canonical_name(c) == STUDENT)
}

/// Reads spreadsheet bytes into a frame. Exports sometimes carry one banner
/// row above the header, so the row after it is tried as the header first,
/// then the first row. If neither names a student column the first row is
/// used and validation reports what is missing.
pub fn parse_frame(bytes: &[u8]) -> Result<Frame> {
    let records = if is_workbook(bytes) {
        read_workbook(bytes)?
    } else {
        read_csv(bytes)?
    };

    for header_row in [1, 0] {
        if let Some(frame) = Frame::from_records(&records, header_row) {
            if has_student_column(&frame) {
                debug!(header_row, rows = frame.rows.len(), "detected header row");
                return Ok(frame);
            }
        }
    }

    Frame::from_records(&records, 0)
        .ok_or_else(|| Error::UnreadableFile("file contains no rows".to_string()))
}
