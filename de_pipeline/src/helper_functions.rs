use std::fs::{self, File};
use std::io::{Cursor, Read};
use std::path::Path;

use flate2::read::MultiGzDecoder;
use polars::prelude::*;
use tracing::debug;
use xz2::read::XzDecoder;

use crate::error::Result;
use crate::models::GENE_ID;

/// Missing-value marker written by R's `write.csv`.
const NA: &str = "NA";

/// Read the raw bytes of `path`, decompressing `.xz` and `.gz` files on the fly.
pub fn read_bytes(path: &Path) -> std::io::Result<Vec<u8>> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    match extension.as_deref() {
        Some("xz") => {
            let mut bytes = Vec::new();
            XzDecoder::new(File::open(path)?).read_to_end(&mut bytes)?;
            Ok(bytes)
        }
        Some("gz") => {
            let mut bytes = Vec::new();
            MultiGzDecoder::new(File::open(path)?).read_to_end(&mut bytes)?;
            Ok(bytes)
        }
        _ => fs::read(path),
    }
}

/// Parse CSV bytes with a header row. `NA` fields become nulls.
///
/// Column types are inferred from every row, so a fractional count deep in an
/// otherwise integer column still yields a float column.
pub fn parse_csv(bytes: Vec<u8>) -> PolarsResult<DataFrame> {
    let parse_options = CsvParseOptions::default()
        .with_null_values(Some(NullValues::AllColumnsSingle(PlSmallStr::from(NA))));

    CsvReadOptions::default()
        .with_has_header(true)
        .with_infer_schema_length(None)
        .with_parse_options(parse_options)
        .into_reader_with_file_handle(Cursor::new(bytes))
        .finish()
}

pub fn read_csv(path: &Path) -> Result<DataFrame> {
    let bytes = read_bytes(path)?;
    debug!("Read {} bytes from {}", bytes.len(), path.display());
    Ok(parse_csv(bytes)?)
}

pub fn write_csv(df: &mut DataFrame, path: &Path) -> Result<()> {
    let mut file = File::create(path)?;
    CsvWriter::new(&mut file).include_header(true).finish(df)?;
    debug!("Wrote {} rows x {} columns to {}", df.height(), df.width(), path.display());
    Ok(())
}

/// Writes `df` with its [`GENE_ID`] column renamed back to the input's index header.
pub fn write_indexed(df: &DataFrame, index_label: &str, path: &Path) -> Result<()> {
    let mut out = df.clone();
    let clashes = index_label != GENE_ID && out.column(index_label).is_ok();
    if index_label != GENE_ID && !clashes {
        out.rename(GENE_ID, PlSmallStr::from(index_label))?;
    }
    write_csv(&mut out, path)
}

pub fn column_names(df: &DataFrame) -> Vec<String> {
    df.get_column_names().iter().map(|c| c.to_string()).collect()
}

/// Rename the first column of `df` to [`GENE_ID`] and return its original header.
///
/// Tables written by pandas or R carry the identifiers in an unnamed first column,
/// so the index is addressed by position rather than by name.
pub fn take_index_column(df: &mut DataFrame) -> PolarsResult<String> {
    let first = df
        .get_column_names()
        .first()
        .map(|c| c.to_string())
        .ok_or_else(|| PolarsError::NoData("table has no columns".into()))?;

    if first != GENE_ID {
        df.rename(&first, PlSmallStr::from(GENE_ID))?;
    }
    Ok(first)
}

/// Values of a numeric column as `f64`; nulls stay `None`.
pub fn f64_values(df: &DataFrame, name: &str) -> PolarsResult<Vec<Option<f64>>> {
    let casted = df.column(name)?.cast(&DataType::Float64)?;
    Ok(casted.f64()?.into_iter().collect())
}

pub fn string_values(df: &DataFrame, name: &str) -> PolarsResult<Vec<Option<String>>> {
    let casted = df.column(name)?.cast(&DataType::String)?;
    Ok(casted.str()?.into_iter().map(|v| v.map(str::to_string)).collect())
}
