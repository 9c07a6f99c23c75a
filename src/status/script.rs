//! Status sink that rewrites a companion SQL seed script in place.
//!
//! Updates are buffered during the run and applied once in
//! [`StatusSink::finish`]: for every updated document, the `'PENDING'` token
//! inside that document's `INSERT INTO documents` statement is replaced with
//! the final status, and the `NULL` location that follows the source URL is
//! replaced with the artifact locator.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{LazyLock, Mutex, PoisonError};

use async_trait::async_trait;
use regex::{Captures, Regex};
use tracing::{debug, info, warn};

use super::{StatusError, StatusSink};
use crate::document::{DocumentStatus, StorageLocator};

#[allow(clippy::expect_used)]
static LOCATION_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"('https?://[^']+'),\s*\n\s*NULL,\s*\n\s*('[^']*')")
        .expect("location regex is valid") // Static pattern, safe to panic
});

#[derive(Debug, Clone, PartialEq, Eq)]
struct PendingUpdate {
    status: DocumentStatus,
    location: Option<String>,
}

/// Buffers status updates and rewrites a SQL script when the run finishes.
#[derive(Debug)]
pub struct ScriptStatusSink {
    path: PathBuf,
    updates: Mutex<BTreeMap<String, PendingUpdate>>,
}

impl ScriptStatusSink {
    /// Creates a sink targeting the script at `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            updates: Mutex::new(BTreeMap::new()),
        }
    }

    /// Script being rewritten.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of buffered updates.
    #[must_use]
    pub fn pending_updates(&self) -> usize {
        self.updates
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

fn sql_literal(value: &str) -> String {
    value.replace('\'', "''")
}

/// Applies status updates to script text.
///
/// Returns the rewritten text and the number of statements changed. Ids
/// with no matching `'PENDING'` statement are left untouched.
#[must_use]
pub fn rewrite_script<'a, I>(content: &str, updates: I) -> (String, usize)
where
    I: IntoIterator<Item = (&'a str, DocumentStatus, Option<&'a str>)>,
{
    let mut text = content.to_string();
    let mut changed = 0;

    for (id, status, location) in updates {
        let pattern = format!(
            r"(?s)(INSERT INTO documents[^;]+VALUES[^;]+'{}'[^;]+)'PENDING'([^;]+;)",
            regex::escape(&sql_literal(id))
        );
        let statement = match Regex::new(&pattern) {
            Ok(re) => re,
            Err(e) => {
                warn!(id, error = %e, "skipping script update with unusable id");
                continue;
            }
        };

        let mut hit = false;
        let rewritten = statement.replace_all(&text, |caps: &Captures<'_>| {
            hit = true;
            let updated = format!("{}'{}'{}", &caps[1], status.as_str(), &caps[2]);
            match location {
                Some(loc) => LOCATION_PATTERN
                    .replace_all(&updated, |inner: &Captures<'_>| {
                        format!("{},\n    '{}',\n    {}", &inner[1], sql_literal(loc), &inner[2])
                    })
                    .into_owned(),
                None => updated,
            }
        });
        let rewritten = rewritten.into_owned();
        if hit {
            changed += 1;
            text = rewritten;
        } else {
            debug!(id, "no pending statement found in script");
        }
    }

    (text, changed)
}

#[async_trait]
impl StatusSink for ScriptStatusSink {
    async fn update_status(
        &self,
        document_id: &str,
        status: DocumentStatus,
        locator: Option<&StorageLocator>,
    ) -> Result<(), StatusError> {
        self.updates
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                document_id.to_string(),
                PendingUpdate {
                    status,
                    location: locator.map(ToString::to_string),
                },
            );
        debug!(document_id, %status, "script update queued");
        Ok(())
    }

    async fn finish(&self) -> Result<(), StatusError> {
        let updates = self
            .updates
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if updates.is_empty() {
            return Ok(());
        }

        let io_err = |source: std::io::Error| StatusError::Io {
            path: self.path.clone(),
            source,
        };
        let content = tokio::fs::read_to_string(&self.path).await.map_err(io_err)?;
        let (rewritten, changed) = rewrite_script(
            &content,
            updates
                .iter()
                .map(|(id, u)| (id.as_str(), u.status, u.location.as_deref())),
        );

        let mut temp_name = self.path.file_name().unwrap_or_default().to_os_string();
        temp_name.push(".tmp");
        let temp = self.path.with_file_name(temp_name);
        tokio::fs::write(&temp, rewritten).await.map_err(io_err)?;
        if let Err(e) = tokio::fs::rename(&temp, &self.path).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(io_err(e));
        }

        info!(
            path = %self.path.display(),
            changed,
            queued = updates.len(),
            "status script rewritten"
        );
        Ok(())
    }
}
