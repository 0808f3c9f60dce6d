//! Uploaded KPI tables
//!
//! A CSV upload is parsed once, shown back to the user and rendered to plain
//! text for a prompt. Nothing here is stored.

use std::io::Read;
use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};
use serde::Serialize;

/// Rows x named columns, immutable after parsing
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadedTable {
    columns: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl UploadedTable {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<String>>) -> Result<Self> {
        if columns.is_empty() {
            bail!("Table has no columns");
        }
        if let Some((idx, row)) = rows
            .iter()
            .enumerate()
            .find(|(_, row)| row.len() != columns.len())
        {
            bail!(
                "Row {} has {} fields, expected {}",
                idx + 1,
                row.len(),
                columns.len()
            );
        }
        Ok(Self { columns, rows })
    }

    /// Parse CSV with a header row. Ragged rows are rejected by the reader.
    pub fn from_csv_reader<R: Read>(reader: R) -> Result<Self> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let columns: Vec<String> = csv_reader
            .headers()
            .context("Failed to read CSV header")?
            .iter()
            .map(str::to_string)
            .collect();
        if columns.iter().all(|c| c.is_empty()) {
            return Err(anyhow!("CSV has no header row"));
        }

        let mut rows = Vec::new();
        for (idx, record) in csv_reader.records().enumerate() {
            let record = record.with_context(|| format!("Failed to parse CSV row {}", idx + 1))?;
            rows.push(record.iter().map(str::to_string).collect());
        }

        log::debug!("Parsed CSV: {} columns, {} rows", columns.len(), rows.len());
        Self::new(columns, rows)
    }

    pub fn from_csv_str(data: &str) -> Result<Self> {
        Self::from_csv_reader(data.as_bytes())
    }

    pub fn from_csv_path(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path)
            .with_context(|| format!("Failed to open {}", path.display()))?;
        Self::from_csv_reader(file)
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Plain-text rendering without an index column.
    ///
    /// Header first, every cell right-aligned to the widest entry of its
    /// column, columns separated by one space.
    pub fn to_plain_text(&self) -> String {
        let widths: Vec<usize> = self
            .columns
            .iter()
            .enumerate()
            .map(|(col, header)| {
                self.rows
                    .iter()
                    .map(|row| row[col].chars().count())
                    .chain(std::iter::once(header.chars().count()))
                    .max()
                    .unwrap_or(0)
            })
            .collect();

        std::iter::once(&self.columns)
            .chain(self.rows.iter())
            .map(|cells| {
                cells
                    .iter()
                    .zip(&widths)
                    .map(|(cell, width)| format!("{:>width$}", cell, width = *width))
                    .collect::<Vec<_>>()
                    .join(" ")
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}
