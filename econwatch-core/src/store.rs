//! Durable named datasets.
//!
//! Layout: `{store_dir}/{name}.parquet`, or `{store_dir}/{name}.csv` when the
//! Parquet write failed.
//!
//! Features:
//! - Atomic writes (write to .tmp, rename into place)
//! - Persisted tables are always deduplicated by date (last row wins) and
//!   sorted most recent first
//! - `append` merges new rows over old ones
//! - Quarantine for unreadable Parquet files ({name}.parquet.quarantined)

use crate::table::SeriesTable;
use chrono::NaiveDate;
use polars::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

const DATE_COLUMN: &str = "date";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O error: {0}")]
    Io(String),

    #[error("parquet error: {0}")]
    Parquet(String),

    #[error("csv error: {0}")]
    Csv(String),

    #[error("invalid dataset: {0}")]
    Validation(String),
}

/// File format a dataset was written in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoredFormat {
    Parquet,
    Csv,
}

/// The dataset store. The only writer of its directory.
#[derive(Debug, Clone)]
pub struct DataStore {
    dir: PathBuf,
}

impl DataStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn parquet_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.parquet"))
    }

    fn csv_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.csv"))
    }

    /// Persist `table` under `name`, replacing any prior content.
    ///
    /// Falls back to CSV once if the Parquet write fails.
    pub fn save(&self, name: &str, table: &SeriesTable) -> Result<StoredFormat, StoreError> {
        validate(table)?;
        fs::create_dir_all(&self.dir)
            .map_err(|e| StoreError::Io(format!("failed to create dir: {e}")))?;

        let mut table = table.clone();
        table.canonicalize();

        match write_parquet(&table, &self.parquet_path(name)) {
            Ok(()) => {
                remove_if_file(&self.csv_path(name));
                debug!(dataset = name, rows = table.len(), "saved parquet");
                Ok(StoredFormat::Parquet)
            }
            Err(parquet_err) => {
                warn!(dataset = name, error = %parquet_err, "parquet write failed, falling back to csv");
                write_csv(&table, &self.csv_path(name))?;
                remove_if_file(&self.parquet_path(name));
                info!(dataset = name, rows = table.len(), "saved csv fallback");
                Ok(StoredFormat::Csv)
            }
        }
    }

    /// The persisted table, or `None` if `name` was never saved.
    pub fn load(&self, name: &str) -> Result<Option<SeriesTable>, StoreError> {
        let parquet = self.parquet_path(name);
        let csv = self.csv_path(name);

        if parquet.exists() {
            match read_parquet(&parquet) {
                Ok(table) => return Ok(Some(table)),
                Err(e) => {
                    let quarantine = parquet.with_extension("parquet.quarantined");
                    warn!(
                        dataset = name,
                        path = %parquet.display(),
                        error = %e,
                        "quarantining unreadable parquet file"
                    );
                    let _ = fs::rename(&parquet, &quarantine);
                    if !csv.exists() {
                        return Err(e);
                    }
                }
            }
        }

        if csv.exists() {
            return read_csv(&csv).map(Some);
        }
        Ok(None)
    }

    /// Merge `rows` into the stored table. New rows win on date collisions.
    ///
    /// Columns are unioned, existing ones first. Returns the merged table.
    pub fn append(&self, name: &str, rows: &SeriesTable) -> Result<SeriesTable, StoreError> {
        let mut merged = match self.load(name)? {
            Some(existing) => existing.concat(rows),
            None => rows.clone(),
        };
        merged.canonicalize();
        self.save(name, &merged)?;
        Ok(merged)
    }

    /// Names of all stored datasets, sorted.
    pub fn list_datasets(&self) -> Result<Vec<String>, StoreError> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let entries =
            fs::read_dir(&self.dir).map_err(|e| StoreError::Io(format!("read dir: {e}")))?;

        let mut names = Vec::new();
        for entry in entries {
            let path = entry
                .map_err(|e| StoreError::Io(format!("dir entry: {e}")))?
                .path();
            if !path.is_file() {
                continue;
            }
            let ext = path.extension().and_then(|e| e.to_str());
            if !matches!(ext, Some("parquet") | Some("csv")) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                names.push(stem.to_string());
            }
        }
        names.sort();
        names.dedup();
        Ok(names)
    }
}

fn remove_if_file(path: &Path) {
    if path.is_file() {
        let _ = fs::remove_file(path);
    }
}

fn validate(table: &SeriesTable) -> Result<(), StoreError> {
    if table.is_empty() {
        return Err(StoreError::Validation("no rows to store".into()));
    }
    let columns = table.columns();
    for (i, c) in columns.iter().enumerate() {
        if c == DATE_COLUMN {
            return Err(StoreError::Validation("metric named 'date'".into()));
        }
        if columns[..i].contains(c) {
            return Err(StoreError::Validation(format!("duplicate column '{c}'")));
        }
    }
    Ok(())
}

fn epoch() -> NaiveDate {
    NaiveDate::from_ymd_opt(1970, 1, 1).unwrap_or_default()
}

// ── Parquet I/O helpers ─────────────────────────────────────────────

fn table_to_dataframe(table: &SeriesTable) -> Result<DataFrame, StoreError> {
    let epoch = epoch();
    let dates: Vec<i32> = table
        .rows()
        .iter()
        .map(|r| (r.date - epoch).num_days() as i32)
        .collect();

    let mut columns = vec![Column::new(DATE_COLUMN.into(), dates)
        .cast(&DataType::Date)
        .map_err(|e| StoreError::Parquet(format!("date cast: {e}")))?];
    for (i, name) in table.columns().iter().enumerate() {
        let values: Vec<Option<f64>> = table.rows().iter().map(|r| r.values[i]).collect();
        columns.push(Column::new(name.as_str().into(), values));
    }

    DataFrame::new(columns).map_err(|e| StoreError::Parquet(format!("dataframe creation: {e}")))
}

fn write_parquet(table: &SeriesTable, path: &Path) -> Result<(), StoreError> {
    let mut df = table_to_dataframe(table)?;
    let tmp_path = path.with_extension("parquet.tmp");

    let file = fs::File::create(&tmp_path)
        .map_err(|e| StoreError::Parquet(format!("create file: {e}")))?;
    ParquetWriter::new(file)
        .finish(&mut df)
        .map_err(|e| StoreError::Parquet(format!("write parquet: {e}")))?;

    fs::rename(&tmp_path, path).map_err(|e| {
        let _ = fs::remove_file(&tmp_path);
        StoreError::Parquet(format!("atomic rename failed: {e}"))
    })
}

fn read_parquet(path: &Path) -> Result<SeriesTable, StoreError> {
    let file = fs::File::open(path).map_err(|e| StoreError::Parquet(format!("open: {e}")))?;
    let df = ParquetReader::new(file)
        .finish()
        .map_err(|e| StoreError::Parquet(format!("read: {e}")))?;

    if df.height() == 0 {
        return Err(StoreError::Validation("empty parquet file".into()));
    }

    let date_ca = df
        .column(DATE_COLUMN)
        .map_err(|e| StoreError::Validation(format!("missing column 'date': {e}")))?
        .date()
        .map_err(|e| StoreError::Parquet(format!("date column type: {e}")))?;

    let mut names = Vec::new();
    let mut metrics = Vec::new();
    for column in df.get_columns() {
        let name = column.name().as_str();
        if name == DATE_COLUMN {
            continue;
        }
        let values = column
            .f64()
            .map_err(|e| StoreError::Parquet(format!("{name} column type: {e}")))?;
        names.push(name.to_string());
        metrics.push(values);
    }

    let epoch = epoch();
    let mut table = SeriesTable::new(names);
    for i in 0..df.height() {
        let days = date_ca
            .get(i)
            .ok_or_else(|| StoreError::Validation(format!("null date at row {i}")))?;
        let date = epoch + chrono::Duration::days(days as i64);
        table.push(date, metrics.iter().map(|ca| ca.get(i)).collect());
    }
    Ok(table)
}

// ── CSV fallback ────────────────────────────────────────────────────

fn write_csv(table: &SeriesTable, path: &Path) -> Result<(), StoreError> {
    let tmp_path = path.with_extension("csv.tmp");
    let mut writer =
        csv::Writer::from_path(&tmp_path).map_err(|e| StoreError::Csv(format!("create: {e}")))?;

    let mut header = vec![DATE_COLUMN.to_string()];
    header.extend(table.columns().iter().cloned());
    writer
        .write_record(&header)
        .map_err(|e| StoreError::Csv(format!("header: {e}")))?;

    for row in table.rows() {
        let mut record = vec![row.date.format("%Y-%m-%d").to_string()];
        record.extend(
            row.values
                .iter()
                .map(|v| v.map(|v| v.to_string()).unwrap_or_default()),
        );
        writer
            .write_record(&record)
            .map_err(|e| StoreError::Csv(format!("row: {e}")))?;
    }
    writer
        .flush()
        .map_err(|e| StoreError::Csv(format!("flush: {e}")))?;
    drop(writer);

    fs::rename(&tmp_path, path).map_err(|e| {
        let _ = fs::remove_file(&tmp_path);
        StoreError::Csv(format!("atomic rename failed: {e}"))
    })
}

fn read_csv(path: &Path) -> Result<SeriesTable, StoreError> {
    let mut reader =
        csv::Reader::from_path(path).map_err(|e| StoreError::Csv(format!("open: {e}")))?;
    let headers = reader
        .headers()
        .map_err(|e| StoreError::Csv(format!("header: {e}")))?
        .clone();
    if headers.get(0) != Some(DATE_COLUMN) {
        return Err(StoreError::Validation("first csv column is not 'date'".into()));
    }

    let mut table = SeriesTable::new(headers.iter().skip(1).map(str::to_string).collect());
    for record in reader.records() {
        let record = record.map_err(|e| StoreError::Csv(format!("row: {e}")))?;
        let date_text = record.get(0).unwrap_or_default();
        let date = NaiveDate::parse_from_str(date_text, "%Y-%m-%d")
            .map_err(|e| StoreError::Validation(format!("bad date '{date_text}': {e}")))?;
        let values = record.iter().skip(1).map(|c| c.parse::<f64>().ok()).collect();
        table.push(date, values);
    }
    Ok(table)
}
