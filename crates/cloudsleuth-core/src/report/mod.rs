//! Sequential CSV report written in depth-first completion order.
//!
//! Rows are appended and flushed at every container completion, before the
//! matching checkpoint write, so the report never lags the checkpoint. On
//! [`Recorder::finish`] the data rows are reversed once, putting the root
//! first while the header stays on top.

pub mod rows;

use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::error::ReportError;
pub use rows::ReportKind;

/// Append-only CSV writer for one run.
pub struct Recorder {
    path: PathBuf,
    kind: ReportKind,
    writer: csv::Writer<File>,
    rows: u64,
}

impl Recorder {
    /// `<output_dir>/<name>.csv`
    pub fn path_for(output_dir: &Path, name: &str) -> PathBuf {
        output_dir.join(format!("{name}.csv"))
    }

    /// Truncate or create the artifact and write the header.
    pub fn create(path: impl Into<PathBuf>, kind: ReportKind) -> Result<Self, ReportError> {
        let path = path.into();
        ensure_parent(&path)?;
        let file = File::create(&path).map_err(|e| ReportError::io(&path, e))?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        writer.write_record(kind.header())?;
        writer.flush().map_err(|e| ReportError::io(&path, e))?;
        debug!("Created report {}", path.display());
        Ok(Self {
            path,
            kind,
            writer,
            rows: 0,
        })
    }

    /// Reopen an existing artifact for appending.
    ///
    /// `expected_rows` is the row count the checkpoint accounts for. Rows
    /// written after the last checkpoint are dropped; fewer rows than the
    /// checkpoint expects make the artifact unusable for resume.
    pub fn resume(
        path: impl Into<PathBuf>,
        kind: ReportKind,
        expected_rows: u64,
    ) -> Result<Self, ReportError> {
        let path = path.into();
        let (header, records) = read_all(&path)?;
        let found = records.len() as u64;
        if header.iter().ne(kind.header().iter().copied()) || found < expected_rows {
            return Err(ReportError::Inconsistent {
                path,
                expected: expected_rows,
                found,
            });
        }
        if found > expected_rows {
            warn!(
                "Report {} has {} rows past the last checkpoint; dropping them",
                path.display(),
                found - expected_rows
            );
            rewrite(&path, &header, records.iter().take(expected_rows as usize))?;
        }

        let file = OpenOptions::new()
            .append(true)
            .open(&path)
            .map_err(|e| ReportError::io(&path, e))?;
        let writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        info!(
            "Resuming report {} at row {}",
            path.display(),
            expected_rows
        );
        Ok(Self {
            path,
            kind,
            writer,
            rows: expected_rows,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn kind(&self) -> ReportKind {
        self.kind
    }

    /// Data rows in the artifact so far.
    pub fn rows(&self) -> u64 {
        self.rows
    }

    /// Append and flush one container's rows.
    pub fn append(&mut self, rows: &[Vec<String>]) -> Result<(), ReportError> {
        if rows.is_empty() {
            return Ok(());
        }
        for row in rows {
            self.writer.write_record(row)?;
        }
        self.writer
            .flush()
            .map_err(|e| ReportError::io(&self.path, e))?;
        self.rows += rows.len() as u64;
        Ok(())
    }

    /// Flush and close without reordering. The artifact stays resumable.
    pub fn close(mut self) -> Result<PathBuf, ReportError> {
        self.writer
            .flush()
            .map_err(|e| ReportError::io(&self.path, e))?;
        Ok(self.path)
    }

    /// Close the artifact and reverse its rows to root-first order.
    pub fn finish(self) -> Result<PathBuf, ReportError> {
        let path = self.close()?;
        reverse_rows(&path)?;
        info!("Report written to {}", path.display());
        Ok(path)
    }
}

/// Rewrite the artifact with data rows in reverse order; the header stays first.
pub fn reverse_rows(path: &Path) -> Result<(), ReportError> {
    let (header, records) = read_all(path)?;
    rewrite(path, &header, records.iter().rev())
}

/// Content fingerprints already present in a files report.
pub fn existing_fingerprints(path: &Path) -> Result<HashSet<String>, ReportError> {
    let (_, records) = read_all(path)?;
    Ok(records
        .iter()
        .filter_map(|r| r.get(rows::FILE_HASH_COLUMN))
        .filter(|h| !h.is_empty())
        .map(str::to_string)
        .collect())
}

fn ensure_parent(path: &Path) -> Result<(), ReportError> {
    if let Some(dir) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(dir).map_err(|e| ReportError::io(dir, e))?;
    }
    Ok(())
}

fn read_all(path: &Path) -> Result<(csv::StringRecord, Vec<csv::StringRecord>), ReportError> {
    let file = File::open(path).map_err(|e| ReportError::io(path, e))?;
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(file);
    let header = reader.headers()?.clone();
    let records = reader.records().collect::<Result<Vec<_>, _>>()?;
    Ok((header, records))
}

fn rewrite<'a>(
    path: &Path,
    header: &csv::StringRecord,
    records: impl Iterator<Item = &'a csv::StringRecord>,
) -> Result<(), ReportError> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| ReportError::io(dir, e))?;
    {
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(tmp.as_file());
        writer.write_record(header)?;
        for record in records {
            writer.write_record(record)?;
        }
        writer.flush().map_err(|e| ReportError::io(path, e))?;
    }
    tmp.persist(path)
        .map_err(|e| ReportError::io(path, e.error))?;
    Ok(())
}
