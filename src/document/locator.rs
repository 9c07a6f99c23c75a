//! Hierarchical storage locators.

use std::fmt;
use std::path::{Component, Path, PathBuf};

use thiserror::Error;

use super::{DocumentRecord, UNKNOWN_COMPONENT, sanitize_component};

const MAX_COMPONENT_CHARS: usize = 100;

/// Raised when a locator string cannot be safely resolved under a storage root.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("invalid storage locator '{0}': must be a relative path without '..' segments")]
pub struct InvalidLocator(pub String);

/// Relative `country/type/year/filename` key identifying a stored artifact.
///
/// Always uses `/` as the separator so the same value works as a local path
/// and as a blob key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StorageLocator(String);

impl StorageLocator {
    /// Builds the locator for `filename` placed under the record's
    /// classification prefix.
    #[must_use]
    pub fn for_record(record: &DocumentRecord, filename: &str) -> Self {
        let component = |value: Option<&str>| {
            value.map_or_else(
                || UNKNOWN_COMPONENT.to_string(),
                |v| sanitize_component(v, MAX_COMPONENT_CHARS),
            )
        };
        let country = component(record.country.as_deref());
        let major_type = component(record.major_type.as_deref());
        let year = record.effective_year();
        let year = sanitize_component(&year, MAX_COMPONENT_CHARS);
        Self(format!("{country}/{major_type}/{year}/{filename}"))
    }

    /// Wraps an existing key after validating it.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidLocator`] for empty or absolute keys and for keys
    /// containing `.`/`..` segments.
    pub fn parse(value: impl Into<String>) -> Result<Self, InvalidLocator> {
        let value = value.into();
        let valid = !value.is_empty()
            && !value.starts_with('/')
            && !value.contains('\\')
            && value
                .split('/')
                .all(|segment| !segment.is_empty() && segment != "." && segment != "..");
        if valid {
            Ok(Self(value))
        } else {
            Err(InvalidLocator(value))
        }
    }

    /// Returns the key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the final path component.
    #[must_use]
    pub fn file_name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }

    /// Returns the directory prefix, or `None` for a bare filename.
    #[must_use]
    pub fn prefix(&self) -> Option<&str> {
        self.0.rsplit_once('/').map(|(prefix, _)| prefix)
    }

    /// Resolves the locator beneath `root`.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidLocator`] if any component would escape `root`.
    pub fn resolve_under(&self, root: &Path) -> Result<PathBuf, InvalidLocator> {
        let relative = Path::new(&self.0);
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(InvalidLocator(self.0.clone()));
        }
        Ok(root.join(relative))
    }
}

impl fmt::Display for StorageLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for StorageLocator {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
