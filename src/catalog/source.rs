//! Tabular sources feeding the catalog
//!
//! A source only has to hand back a header and string cells. Typing,
//! normalization and schema checks happen in [`super::dataset`].

use std::fmt;
use std::path::PathBuf;

use csv::{ReaderBuilder, Trim};

/// Header plus string cells, as read from a source
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawTable {
    /// Column names in source order
    pub headers: Vec<String>,
    /// Rows; each row has one cell per header
    pub rows: Vec<Vec<String>>,
}

impl RawTable {
    /// Create a table, padding or truncating rows to the header width
    pub fn new(headers: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        let width = headers.len();
        let rows = rows
            .into_iter()
            .map(|mut row| {
                row.resize(width, String::new());
                row
            })
            .collect();
        Self { headers, rows }
    }
}

/// Anything that can produce a [`RawTable`]
///
/// Implementations may block (file reads); the catalog calls them once at
/// construction and never again.
pub trait TabularSource: Send + Sync {
    /// Human-readable origin used in logs and load errors
    fn origin(&self) -> String;

    /// Read the full table
    fn read(&self) -> Result<RawTable, String>;
}

/// Where a [`CsvSource`] reads from
#[derive(Debug, Clone)]
enum CsvOrigin {
    Path(PathBuf),
    Text(String),
}

/// CSV-backed source
///
/// Fields are trimmed and ragged rows are tolerated (padded to the header).
#[derive(Debug, Clone)]
pub struct CsvSource {
    origin: CsvOrigin,
    delimiter: u8,
}

impl CsvSource {
    /// Read from a CSV file
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        Self {
            origin: CsvOrigin::Path(path.into()),
            delimiter: b',',
        }
    }

    /// Read from CSV text held in memory
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            origin: CsvOrigin::Text(text.into()),
            delimiter: b',',
        }
    }

    /// Use a delimiter other than `,`
    pub fn with_delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }

    fn read_from<R: std::io::Read>(&self, reader: R) -> Result<RawTable, String> {
        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(Trim::All)
            .delimiter(self.delimiter)
            .from_reader(reader);

        let headers: Vec<String> = reader
            .headers()
            .map_err(|e| format!("cannot read header: {}", e))?
            .iter()
            .map(str::to_string)
            .collect();

        let mut rows = Vec::new();
        for (line, record) in reader.records().enumerate() {
            let record = record.map_err(|e| format!("cannot read record {}: {}", line + 1, e))?;
            rows.push(record.iter().map(str::to_string).collect());
        }

        Ok(RawTable::new(headers, rows))
    }
}

impl TabularSource for CsvSource {
    fn origin(&self) -> String {
        match &self.origin {
            CsvOrigin::Path(path) => path.display().to_string(),
            CsvOrigin::Text(_) => "<inline csv>".to_string(),
        }
    }

    fn read(&self) -> Result<RawTable, String> {
        match &self.origin {
            CsvOrigin::Path(path) => {
                let file = std::fs::File::open(path)
                    .map_err(|e| format!("cannot open {}: {}", path.display(), e))?;
                self.read_from(std::io::BufReader::new(file))
            },
            CsvOrigin::Text(text) => self.read_from(text.as_bytes()),
        }
    }
}

/// Rows already held in memory, e.g. handed over by an external loader
#[derive(Clone, Default)]
pub struct InMemorySource {
    table: RawTable,
}

impl InMemorySource {
    /// Create a source from a header and rows
    pub fn new<H, R, C>(headers: H, rows: R) -> Self
    where
        H: IntoIterator,
        H::Item: Into<String>,
        R: IntoIterator<Item = C>,
        C: IntoIterator,
        C::Item: Into<String>,
    {
        let headers = headers.into_iter().map(Into::into).collect();
        let rows = rows
            .into_iter()
            .map(|row| row.into_iter().map(Into::into).collect())
            .collect();
        Self {
            table: RawTable::new(headers, rows),
        }
    }
}

impl fmt::Debug for InMemorySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemorySource")
            .field("columns", &self.table.headers.len())
            .field("rows", &self.table.rows.len())
            .finish()
    }
}

impl TabularSource for InMemorySource {
    fn origin(&self) -> String {
        "<in-memory>".to_string()
    }

    fn read(&self) -> Result<RawTable, String> {
        Ok(self.table.clone())
    }
}
