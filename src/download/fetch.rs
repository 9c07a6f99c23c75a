//! The fetch unit: one attempt at acquiring one document.

use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use tracing::{debug, info, instrument, warn};

use super::client::{FetchedPayload, HttpClient};
use super::constants::DEFAULT_REQUEST_DELAY;
use super::error::DownloadError;
use super::placeholder::render_placeholder;
use super::retry::{AttemptOutcome, FailureCause, FetchSuccess};
use crate::document::{DocumentRecord, StorageLocator};
use crate::lifecycle::ShutdownToken;
use crate::storage::{StorageBackend, StorageError};

/// Performs fetch attempts against a shared client and storage backend.
#[derive(Debug, Clone)]
pub struct Fetcher {
    client: HttpClient,
    storage: Arc<dyn StorageBackend>,
    shutdown: ShutdownToken,
    request_delay: Duration,
}

impl Fetcher {
    /// Creates a fetcher with the default inter-request delay.
    #[must_use]
    pub fn new(client: HttpClient, storage: Arc<dyn StorageBackend>, shutdown: ShutdownToken) -> Self {
        Self {
            client,
            storage,
            shutdown,
            request_delay: DEFAULT_REQUEST_DELAY,
        }
    }

    /// Sets the pause taken after each successful fetch.
    #[must_use]
    pub fn with_request_delay(mut self, request_delay: Duration) -> Self {
        self.request_delay = request_delay;
        self
    }

    /// The storage backend artifacts are written to.
    #[must_use]
    pub fn storage(&self) -> &Arc<dyn StorageBackend> {
        &self.storage
    }

    /// Makes one attempt at storing `record`.
    ///
    /// Never returns [`AttemptOutcome::PermanentFailure`]; that decision
    /// belongs to the retry controller.
    pub async fn attempt(&self, record: &DocumentRecord) -> AttemptOutcome {
        match self.try_attempt(record).await {
            Ok(success) => AttemptOutcome::Success(success),
            Err(error) => {
                debug!(id = %record.id, error = %error, "attempt failed");
                AttemptOutcome::from_error(&error)
            }
        }
    }

    #[instrument(skip(self, record), fields(id = %record.id, url = %record.source_url))]
    async fn try_attempt(&self, record: &DocumentRecord) -> Result<FetchSuccess, DownloadError> {
        let started = Instant::now();
        let locator = record.locator();

        let present = self
            .storage
            .exists(&locator)
            .await
            .map_err(|e| DownloadError::storage(locator.as_str(), e))?;
        if present {
            info!(locator = %locator, "already stored, skipping");
            return Ok(FetchSuccess {
                locator,
                bytes: 0,
                elapsed: started.elapsed(),
                skipped: true,
            });
        }

        let payload = self.client.fetch(&record.source_url, &self.shutdown).await?;
        check_payload(record, &payload);

        if let Some(prefix) = locator.prefix() {
            self.storage
                .create_directories(prefix)
                .await
                .map_err(|e| DownloadError::storage(locator.as_str(), e))?;
        }
        self.storage
            .save(&locator, &payload.bytes)
            .await
            .map_err(|e| DownloadError::storage(locator.as_str(), e))?;

        let bytes = payload.bytes.len() as u64;
        let elapsed = started.elapsed();
        info!(
            locator = %locator,
            bytes,
            elapsed_ms = elapsed.as_millis(),
            "document stored"
        );

        self.pause_after_success().await;

        Ok(FetchSuccess {
            locator,
            bytes,
            elapsed,
            skipped: false,
        })
    }

    async fn pause_after_success(&self) {
        if self.request_delay.is_zero() {
            return;
        }
        tokio::select! {
            () = self.shutdown.cancelled() => {}
            () = tokio::time::sleep(self.request_delay) => {}
        }
    }

    /// Writes the placeholder artifact for a document whose attempts were exhausted.
    ///
    /// # Errors
    ///
    /// Returns the storage error if the placeholder cannot be written.
    pub async fn write_placeholder(
        &self,
        record: &DocumentRecord,
        cause: &FailureCause,
        attempts: u32,
    ) -> Result<StorageLocator, StorageError> {
        let locator = record.placeholder_locator();
        let body = render_placeholder(record, cause, attempts, SystemTime::now());
        if let Some(prefix) = locator.prefix() {
            self.storage.create_directories(prefix).await?;
        }
        self.storage.save(&locator, body.as_bytes()).await?;
        info!(id = %record.id, locator = %locator, "placeholder written");
        Ok(locator)
    }
}

/// Advisory content checks; mismatches are logged and never fail the attempt.
fn check_payload(record: &DocumentRecord, payload: &FetchedPayload) {
    let declared_pdf = payload
        .content_type
        .as_deref()
        .is_some_and(|ct| ct.to_ascii_lowercase().contains("pdf"));
    if !declared_pdf && !url_names_pdf(&record.source_url) {
        warn!(
            id = %record.id,
            content_type = payload.content_type.as_deref().unwrap_or("<none>"),
            "response does not look like a PDF"
        );
    }

    if let Some(expected) = payload.content_length {
        let actual = payload.bytes.len() as u64;
        if expected != actual {
            warn!(id = %record.id, expected, actual, "downloaded size differs from Content-Length");
        }
    }
}

fn url_names_pdf(source_url: &str) -> bool {
    url::Url::parse(source_url).map_or_else(
        |_| source_url.to_ascii_lowercase().ends_with(".pdf"),
        |u| u.path().to_ascii_lowercase().ends_with(".pdf"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_names_pdf_ignores_query() {
        assert!(url_names_pdf("https://h/a/B.PDF?download=1"));
        assert!(!url_names_pdf("https://h/view?file=a.pdf"));
        assert!(url_names_pdf("relative/a.pdf"));
    }
}
