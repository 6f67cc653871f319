use crate::error::{ModelError, Result};
use crate::found_entry::FoundEntry;
use csv::StringRecord;

/// Column titles of the report, in order.
pub const CSV_HEADER: [&str; 5] = [
    "Source",
    "Duplicates count",
    "Proxy count",
    "Duplicates buckets",
    "Proxy locations",
];

const LIST_SEPARATOR: char = '|';

/// The reconciliation outcome for one holding-pen file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LookupResult {
    pub requested_file: String,
    pub requested_file_size: i64,
    /// Hits reported by the index, which may exceed `entries.len()`.
    pub count: i64,
    pub entries: Vec<FoundEntry>,
    pub proxies: Vec<FoundEntry>,
}

impl LookupResult {
    pub fn new(requested_file: impl Into<String>, requested_file_size: i64) -> Self {
        Self {
            requested_file: requested_file.into(),
            requested_file_size,
            ..Self::default()
        }
    }

    pub fn csv_header() -> StringRecord {
        StringRecord::from(CSV_HEADER.to_vec())
    }

    pub fn has_duplicates(&self) -> bool {
        self.count > 0
    }

    pub fn duplicate_buckets(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|entry| entry.bucket.as_str())
    }

    pub fn to_csv_row(&self) -> StringRecord {
        let buckets = self.duplicate_buckets().collect::<Vec<_>>().join("|");
        let proxies = self
            .proxies
            .iter()
            .map(FoundEntry::display_uri)
            .collect::<Vec<_>>()
            .join("|");

        StringRecord::from(vec![
            self.requested_file.clone(),
            self.count.to_string(),
            self.proxies.len().to_string(),
            buckets,
            proxies,
        ])
    }

    /// Rebuild a result from a report row.
    ///
    /// The proxy-count column is informational and not read back. Sizes are not
    /// part of the report and come back as 0.
    pub fn from_csv_row(row: &StringRecord) -> Result<Self> {
        if row.len() < CSV_HEADER.len() {
            return Err(ModelError::ShortRow {
                found: row.len(),
                expected: CSV_HEADER.len(),
            });
        }
        let requested_file = &row[0];
        let count = row[1]
            .parse::<i64>()
            .map_err(|_| ModelError::Count(row[1].to_string()))?;

        let proxies = split_list(&row[4])
            .enumerate()
            .map(|(i, uri)| {
                FoundEntry::from_uri(uri, true).map_err(|err| {
                    tracing::error!(
                        proxy = i,
                        file = %requested_file,
                        error = %err,
                        "could not interpret proxy location"
                    );
                    err
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let entries = split_list(&row[3])
            .map(|bucket| FoundEntry::new(bucket, requested_file, 0))
            .collect();

        Ok(Self {
            requested_file: requested_file.to_string(),
            requested_file_size: 0,
            count,
            entries,
            proxies,
        })
    }
}

fn split_list(field: &str) -> impl Iterator<Item = &str> {
    field.split(LIST_SEPARATOR).filter(|item| !item.is_empty())
}
