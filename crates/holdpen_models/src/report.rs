//! CSV report written by discovery and read back by cleanup.

use crate::error::{ModelError, Result};
use crate::lookup_result::LookupResult;
use csv::StringRecord;
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::Path;
use tracing::{debug, error, info};

/// Reads [`LookupResult`]s from a report.
///
/// The header row is skipped. Rows that do not parse are logged with their line
/// number and skipped; errors from the CSV layer itself are returned and end the read.
pub struct ReportReader<R: Read> {
    reader: csv::Reader<R>,
    record: StringRecord,
    rows_read: u64,
    rows_skipped: u64,
}

impl ReportReader<File> {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|source| ModelError::OpenReport {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), "opened report");
        Ok(Self::from_reader(file))
    }
}

impl<R: Read> ReportReader<R> {
    pub fn from_reader(reader: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(reader);
        Self {
            reader,
            record: StringRecord::new(),
            rows_read: 0,
            rows_skipped: 0,
        }
    }

    pub fn rows_read(&self) -> u64 {
        self.rows_read
    }

    pub fn rows_skipped(&self) -> u64 {
        self.rows_skipped
    }
}

impl<R: Read> Iterator for ReportReader<R> {
    type Item = Result<LookupResult>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.reader.read_record(&mut self.record) {
                Ok(true) => {}
                Ok(false) => {
                    info!(
                        rows = self.rows_read,
                        skipped = self.rows_skipped,
                        "reached end of report"
                    );
                    return None;
                }
                Err(err) => return Some(Err(err.into())),
            }
            self.rows_read += 1;

            match LookupResult::from_csv_row(&self.record) {
                Ok(result) => return Some(Ok(result)),
                Err(err) => {
                    let line = self.record.position().map(|p| p.line()).unwrap_or(0);
                    error!(line, error = %err, "could not read report line, skipping");
                    self.rows_skipped += 1;
                }
            }
        }
    }
}

/// Writes [`LookupResult`]s as report rows, header first.
pub struct ReportWriter<W: Write> {
    writer: csv::Writer<W>,
    only_with_duplicates: bool,
    rows_written: u64,
}

impl ReportWriter<File> {
    /// Create (or truncate) the report at `path`.
    pub fn create(path: &Path, only_with_duplicates: bool) -> Result<Self> {
        let mut options = OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o640);
        }
        let file = options.open(path).map_err(|source| ModelError::OpenReport {
            path: path.to_path_buf(),
            source,
        })?;
        Self::new(file, only_with_duplicates)
    }
}

impl<W: Write> ReportWriter<W> {
    pub fn new(inner: W, only_with_duplicates: bool) -> Result<Self> {
        let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(inner);
        writer.write_record(LookupResult::csv_header().iter())?;
        Ok(Self {
            writer,
            only_with_duplicates,
            rows_written: 0,
        })
    }

    /// Write one row. Returns `false` when the filter leaves the result out.
    pub fn write(&mut self, result: &LookupResult) -> Result<bool> {
        if self.only_with_duplicates && !result.has_duplicates() {
            return Ok(false);
        }
        self.writer.write_record(result.to_csv_row().iter())?;
        self.rows_written += 1;
        Ok(true)
    }

    pub fn rows_written(&self) -> u64 {
        self.rows_written
    }

    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }

    /// Flush and hand back the underlying writer.
    pub fn into_inner(self) -> Result<W> {
        self.writer
            .into_inner()
            .map_err(|err| ModelError::Io(err.into_error()))
    }
}
