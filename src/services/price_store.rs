use std::fs;
use std::path::Path;

use csv::{Reader, ReaderBuilder, Writer};
use tracing::{info, warn};

use crate::errors::AppError;
use crate::models::{DerivedRow, PricePoint};

pub const PRICE_COLUMNS: [&str; 3] = ["date", "symbol", "price"];
pub const DERIVED_COLUMNS: [&str; 6] = [
    "date",
    "symbol",
    "close",
    "return",
    "volatility",
    "sharpe",
];

/// Write the normalized price table, wholly replacing prior contents.
pub fn write_prices(path: &Path, rows: &[PricePoint]) -> Result<(), AppError> {
    ensure_parent(path)?;

    let mut writer = Writer::from_path(path)?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;

    info!("Stored {} price rows at {}", rows.len(), path.display());
    Ok(())
}

/// Read the persisted price table.
///
/// The header is validated before any row is parsed: a file missing one of
/// the required columns is rejected outright, so no metrics computation is
/// ever attempted on a malformed table.
pub fn read_prices(path: &Path) -> Result<Vec<PricePoint>, AppError> {
    if !path.exists() {
        return Err(AppError::NotFound(
            "no price data has been fetched yet; refresh prices first".to_string(),
        ));
    }

    let mut reader = Reader::from_path(path)?;
    check_columns(reader.headers()?, &PRICE_COLUMNS)?;

    let mut rows = Vec::new();
    for (idx, result) in reader.deserialize::<PricePoint>().enumerate() {
        let row = result.map_err(|e| {
            AppError::Validation(format!("price file row {}: {}", idx + 1, e))
        })?;
        rows.push(row);
    }
    Ok(rows)
}

/// Write the derived per-row metrics table.
pub fn write_derived(path: &Path, rows: &[DerivedRow]) -> Result<(), AppError> {
    ensure_parent(path)?;

    let mut writer = Writer::from_path(path)?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;

    info!("Stored {} derived rows at {}", rows.len(), path.display());
    Ok(())
}

/// Read the derived table if it exists and still matches the expected
/// schema. `Ok(None)` means "rebuild from the price file": the derived
/// table is a cache, so a missing file, a stale header, or an unparsable
/// row is not an error.
pub fn read_derived(path: &Path) -> Result<Option<Vec<DerivedRow>>, AppError> {
    if !path.exists() {
        return Ok(None);
    }

    let mut reader = ReaderBuilder::new().from_path(path)?;
    let headers = reader.headers()?;
    if headers.iter().collect::<Vec<_>>() != DERIVED_COLUMNS {
        warn!(
            "Derived file {} has schema {:?}; rebuilding",
            path.display(),
            headers
        );
        return Ok(None);
    }

    let mut rows = Vec::new();
    for result in reader.deserialize::<DerivedRow>() {
        match result {
            Ok(row) => rows.push(row),
            Err(e) => {
                warn!("Derived file {} is unreadable ({}); rebuilding", path.display(), e);
                return Ok(None);
            }
        }
    }
    Ok(Some(rows))
}

fn ensure_parent(path: &Path) -> Result<(), AppError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

fn check_columns(headers: &csv::StringRecord, required: &[&str]) -> Result<(), AppError> {
    for column in required {
        if !headers.iter().any(|h| h == *column) {
            return Err(AppError::Validation(format!(
                "price file is missing required column '{}'",
                column
            )));
        }
    }
    Ok(())
}
