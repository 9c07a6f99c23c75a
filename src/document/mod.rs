//! Document records, lifecycle statuses, and manifest loading.
//!
//! A [`DocumentRecord`] is the immutable description of one remote file as
//! supplied by the metadata source. The acquisition pipeline never mutates
//! records; it derives a deterministic [`StorageLocator`] from them and emits
//! a terminal [`DocumentStatus`] for each one.
//!
//! # Example
//!
//! ```
//! use docfetch_core::document::parse_documents;
//!
//! let manifest = r#"[{"id": "42", "url": "https://example.org/report.pdf", "country": "Kenya"}]"#;
//! let documents = parse_documents(manifest).unwrap();
//! assert_eq!(documents[0].source_url, "https://example.org/report.pdf");
//! ```

mod filename;
mod locator;

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;
use tracing::{debug, instrument, warn};

pub use filename::{
    UNKNOWN_COMPONENT, derive_filename, extract_year, placeholder_filename, sanitize_component,
};
pub use locator::{InvalidLocator, StorageLocator};

/// Immutable metadata describing one remote document.
///
/// Only `id` and `source_url` are required; classification attributes fall
/// back to `unknown` when the locator is computed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRecord {
    /// Unique identifier assigned by the metadata source.
    #[serde(deserialize_with = "deserialize_id")]
    pub id: String,
    /// Display title.
    #[serde(default, deserialize_with = "deserialize_title")]
    pub title: String,
    /// Remote location of the document payload.
    #[serde(alias = "url")]
    pub source_url: String,
    /// Country classification.
    #[serde(default)]
    pub country: Option<String>,
    /// Major document type classification.
    #[serde(default, alias = "major_doc_type")]
    pub major_type: Option<String>,
    /// Document language.
    #[serde(default)]
    pub language: Option<String>,
    /// Publication year (free-form; only used as a path component).
    #[serde(default, alias = "date", deserialize_with = "deserialize_year")]
    pub year: Option<String>,
    /// Filename used instead of the derived one when two records would
    /// otherwise share a locator.
    #[serde(skip)]
    storage_name: Option<String>,
}

impl DocumentRecord {
    /// Creates a record with only the required fields set.
    pub fn new(id: impl Into<String>, source_url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: String::new(),
            source_url: source_url.into(),
            country: None,
            major_type: None,
            language: None,
            year: None,
            storage_name: None,
        }
    }

    /// Sets the display title.
    #[must_use]
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    /// Sets the country, major type, and year classification.
    #[must_use]
    pub fn with_classification(
        mut self,
        country: impl Into<String>,
        major_type: impl Into<String>,
        year: impl Into<String>,
    ) -> Self {
        self.country = Some(country.into());
        self.major_type = Some(major_type.into());
        self.year = Some(year.into());
        self
    }

    /// Sets the document language.
    #[must_use]
    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    /// Returns the year used for storage organisation.
    ///
    /// Prefers the explicit year field (or the first year found in it, for
    /// full dates), then a year mentioned in the title, then `unknown`.
    #[must_use]
    pub fn effective_year(&self) -> String {
        self.year
            .as_deref()
            .map(str::trim)
            .filter(|year| !year.is_empty() && !year.eq_ignore_ascii_case("null"))
            .map(|year| extract_year(year).unwrap_or_else(|| sanitize_component(year, 100)))
            .or_else(|| extract_year(&self.title))
            .unwrap_or_else(|| UNKNOWN_COMPONENT.to_string())
    }

    /// Computes the locator where this document's payload is stored.
    ///
    /// The same record always yields the same locator.
    #[must_use]
    pub fn locator(&self) -> StorageLocator {
        match &self.storage_name {
            Some(name) => StorageLocator::for_record(self, name),
            None => StorageLocator::for_record(self, &derive_filename(self)),
        }
    }

    /// Returns this record stored under an id-prefixed filename.
    ///
    /// Used when another record in the same run derives the same locator.
    #[must_use]
    pub fn with_id_prefixed_filename(mut self) -> Self {
        let id = sanitize_component(&self.id, 100);
        self.storage_name = Some(format!("{id}_{}", derive_filename(&self)));
        self
    }

    /// Computes the locator of the placeholder artifact written when every
    /// fetch attempt has failed.
    #[must_use]
    pub fn placeholder_locator(&self) -> StorageLocator {
        StorageLocator::for_record(self, &placeholder_filename(self))
    }

    fn label(field: Option<&str>) -> &str {
        field
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .unwrap_or("Unknown")
    }

    /// Country for display purposes.
    #[must_use]
    pub fn country_label(&self) -> &str {
        Self::label(self.country.as_deref())
    }

    /// Major type for display purposes.
    #[must_use]
    pub fn major_type_label(&self) -> &str {
        Self::label(self.major_type.as_deref())
    }

    /// Language for display purposes.
    #[must_use]
    pub fn language_label(&self) -> &str {
        Self::label(self.language.as_deref())
    }
}

fn deserialize_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum IdRepr {
        Text(String),
        Number(i64),
    }

    Ok(match IdRepr::deserialize(deserializer)? {
        IdRepr::Text(text) => text,
        IdRepr::Number(number) => number.to_string(),
    })
}

fn deserialize_title<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

fn deserialize_year<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum YearRepr {
        Text(String),
        Number(i64),
    }

    Ok(Option::<YearRepr>::deserialize(deserializer)?.map(|year| match year {
        YearRepr::Text(text) => text,
        YearRepr::Number(number) => number.to_string(),
    }))
}

/// Lifecycle status of a document within one run.
///
/// Every document starts `Pending` and moves exactly once to one of the
/// terminal states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DocumentStatus {
    /// Not yet attempted.
    Pending,
    /// Payload stored (freshly fetched or already present).
    Downloaded,
    /// All attempts failed; a placeholder artifact preserves the URL.
    UrlOnly,
    /// All attempts failed and the placeholder could not be written either.
    Failed,
}

impl DocumentStatus {
    /// Returns the token persisted by status sinks.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Downloaded => "DOWNLOADED",
            Self::UrlOnly => "URL_ONLY",
            Self::Failed => "FAILED",
        }
    }

    /// Returns true for every status other than `Pending`.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised while loading a document manifest.
#[derive(Debug, Error)]
pub enum DocumentError {
    /// The manifest file could not be read.
    #[error("failed to read manifest {path}: {source}")]
    Io {
        /// Manifest path.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The manifest is not valid JSON / JSON Lines.
    #[error("invalid manifest JSON{}: {source}", line.map(|l| format!(" at line {l}")).unwrap_or_default())]
    Json {
        /// 1-based line number for JSON Lines input.
        line: Option<usize>,
        /// Underlying parse error.
        #[source]
        source: serde_json::Error,
    },
}

/// Reads document records from a JSON array or JSON Lines file.
///
/// # Errors
///
/// Returns [`DocumentError::Io`] when the file cannot be read and
/// [`DocumentError::Json`] when it cannot be parsed.
#[instrument(fields(path = %path.display()))]
pub async fn load_documents(path: &Path) -> Result<Vec<DocumentRecord>, DocumentError> {
    let text = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| DocumentError::Io {
            path: path.to_path_buf(),
            source,
        })?;
    parse_documents(&text)
}

/// Parses document records from manifest text.
///
/// Records with a blank id or URL are dropped with a warning, and duplicate
/// ids are collapsed so that each document is owned by at most one worker.
///
/// # Errors
///
/// Returns [`DocumentError::Json`] when the text is not a JSON array or
/// valid JSON Lines.
pub fn parse_documents(text: &str) -> Result<Vec<DocumentRecord>, DocumentError> {
    let trimmed = text.trim_start();
    let records: Vec<DocumentRecord> = if trimmed.starts_with('[') {
        serde_json::from_str(trimmed).map_err(|source| DocumentError::Json { line: None, source })?
    } else {
        let mut records = Vec::new();
        for (index, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let record = serde_json::from_str(line).map_err(|source| DocumentError::Json {
                line: Some(index + 1),
                source,
            })?;
            records.push(record);
        }
        records
    };

    Ok(normalize_documents(records))
}

fn normalize_documents(records: Vec<DocumentRecord>) -> Vec<DocumentRecord> {
    let mut seen = HashSet::new();
    let mut documents = Vec::with_capacity(records.len());

    for record in records {
        if record.id.trim().is_empty() || record.source_url.trim().is_empty() {
            warn!(id = %record.id, url = %record.source_url, "skipping record without id or url");
            continue;
        }
        if !seen.insert(record.id.clone()) {
            warn!(id = %record.id, "skipping duplicate document id");
            continue;
        }
        documents.push(record);
    }

    debug!(count = documents.len(), "documents loaded");
    documents
}
