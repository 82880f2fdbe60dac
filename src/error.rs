use thiserror::Error;

use crate::scraper::http_client::FetchStatus;

/// Failures of one scrape source. None of these abort a scrape cycle:
/// the orchestrator records them against the source and moves on.
#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error("fetch failed for {url}: {status} after {attempts} attempt(s)")]
    Fetch {
        url: String,
        status: FetchStatus,
        attempts: u32,
    },

    #[error("no usable {what} found in {source_name}")]
    Parse {
        source_name: String,
        what: &'static str,
    },

    #[error("validation failed: {0}")]
    Validation(String),
}

impl ScrapeError {
    pub fn parse(source_name: impl Into<String>, what: &'static str) -> Self {
        Self::Parse {
            source_name: source_name.into(),
            what,
        }
    }
}

/// Spreadsheet archive could not be turned into a table.
#[derive(Debug, Error)]
pub enum ParseFailure {
    #[error("cannot open spreadsheet archive: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("spreadsheet archive has no part {0}")]
    MissingPart(String),

    #[error("I/O error reading spreadsheet: {0}")]
    Io(#[from] std::io::Error),

    #[error("no rows recoverable from worksheet")]
    NoRows,
}
