use csv::ReaderBuilder;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::{info, instrument};

use crate::error::{DatasetError, Result};

/// A delimited file held in memory as optional strings; empty cells are null.
#[derive(Debug, Clone, Default)]
pub struct RawTable {
    /// Short name used in errors and logs ("users", "recordings")
    pub name: String,
    pub headers: Vec<String>,
    pub rows: Vec<Vec<Option<String>>>,
}

impl RawTable {
    /// Index of a required column.
    pub fn column(&self, name: &str) -> Result<usize> {
        self.optional_column(name).ok_or_else(|| DatasetError::MissingColumn {
            table: self.name.clone(),
            column: name.to_string(),
        })
    }

    /// False for a zero-byte file, which has no header line at all
    pub fn has_header(&self) -> bool {
        !self.headers.is_empty()
    }

    pub fn optional_column(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Cell value at `row`/`col`, `None` when null or out of range.
    pub fn cell(&self, row: usize, col: Option<usize>) -> Option<&str> {
        let col = col?;
        self.rows.get(row)?.get(col)?.as_deref()
    }
}

/// Load a delimited file from disk.
#[instrument(skip_all, fields(table = %name, path = %path.display()))]
pub fn load_table(name: &str, path: &Path, delimiter: u8) -> Result<RawTable> {
    info!("Loading {} table from {}", name, path.display());
    let file = File::open(path).map_err(|e| {
        DatasetError::Config(format!("Cannot open {} file '{}': {}", name, path.display(), e))
    })?;
    let table = load_table_from_reader(name, file, delimiter)?;
    info!("Loaded {} rows from {}", table.len(), path.display());
    Ok(table)
}

pub fn load_table_from_reader<R: Read>(name: &str, reader: R, delimiter: u8) -> Result<RawTable> {
    let mut rdr = ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(true)
        .flexible(true)
        .from_reader(reader);

    let headers = rdr
        .headers()?
        .iter()
        .map(|h| h.trim().trim_start_matches('\u{feff}').to_string())
        .collect::<Vec<_>>();

    let mut rows = Vec::new();
    for record in rdr.records() {
        let record = record?;
        let row = (0..headers.len())
            .map(|i| {
                record
                    .get(i)
                    .map(str::trim)
                    .filter(|v| !v.is_empty())
                    .map(str::to_string)
            })
            .collect();
        rows.push(row);
    }

    Ok(RawTable {
        name: name.to_string(),
        headers,
        rows,
    })
}
