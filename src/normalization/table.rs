use csv::{ByteRecord, ReaderBuilder};
use std::path::Path;

use crate::error::HarvestError;

/// Name of the leading brand column every staged batch carries.
pub const BRAND_COLUMN: &str = "BrandID";

/// Positional name of the `idx`-th data column.
pub fn data_column(idx: usize) -> String {
    format!("F{idx}")
}

/// Rectangular table parsed from a vendor export.
///
/// Column names are synthetic (`F0..F(n-1)`); the width comes from the first row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl Table {
    /// Builds a table, rejecting rows whose width differs from the first one.
    pub fn from_rows(rows: Vec<Vec<String>>) -> Result<Self, HarvestError> {
        let width = rows.first().map(Vec::len).unwrap_or(0);
        if let Some((idx, row)) = rows.iter().enumerate().find(|(_, r)| r.len() != width) {
            return Err(HarvestError::StagingLoad(format!(
                "row {} has {} fields, expected {}",
                idx + 1,
                row.len(),
                width
            )));
        }
        Ok(Self {
            columns: (0..width).map(data_column).collect(),
            rows,
        })
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// `BrandID, F0, .., F(n-1)`.
    pub fn header(&self) -> Vec<String> {
        std::iter::once(BRAND_COLUMN.to_string())
            .chain(self.columns.iter().cloned())
            .collect()
    }

    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    pub fn width(&self) -> usize {
        self.columns.len()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn into_rows(self) -> Vec<Vec<String>> {
        self.rows
    }
}

/// Parse a fully-quoted delimited payload into a [`Table`].
///
/// Undecodable bytes are replaced rather than rejected. A payload with no rows
/// yields an empty table; ragged rows are an error.
pub fn parse(bytes: &[u8]) -> Result<Table, HarvestError> {
    let mut rdr = ReaderBuilder::new()
        .has_headers(false)
        .flexible(false)
        .trim(csv::Trim::None)
        .from_reader(bytes);

    let mut rec = ByteRecord::new();
    let mut rows: Vec<Vec<String>> = Vec::new();
    loop {
        match rdr.read_byte_record(&mut rec) {
            Ok(true) => {
                rows.push(
                    rec.iter()
                        .map(|field| String::from_utf8_lossy(field).into_owned())
                        .collect(),
                );
            }
            Ok(false) => break,
            Err(err) => return Err(HarvestError::staging(format!("unparseable export: {err}"))),
        }
    }
    Table::from_rows(rows)
}

/// Same as [`parse`] but reads the payload from a scratch file.
pub fn parse_file(path: &Path) -> Result<Table, HarvestError> {
    let bytes = std::fs::read(path).map_err(|e| {
        HarvestError::staging(format!("failed to read {}: {e}", path.display()))
    })?;
    parse(&bytes)
}
