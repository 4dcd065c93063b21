//! Single-source acquisition pipeline

use crate::archive::ArchiveVerifier;
use crate::error::{Error, Result};
use crate::fetcher::Fetcher;
use crate::types::{Event, JobOutcome, SourceSpec, VerifyOutcome};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Runs one source through fetch, verify, and persist
///
/// The pipeline is failure-contained: every problem ends as a
/// [`JobOutcome::Failed`] for this unit, never a panic or an early return
/// that could disturb sibling units. A corrupt payload is discarded; a
/// payload that merely lacks its expected entry is persisted with a warning.
#[derive(Clone)]
pub struct SourceJob {
    fetcher: Fetcher,
    event_tx: broadcast::Sender<Event>,
}

impl SourceJob {
    /// Create a job runner over a shared fetcher and event channel
    pub fn new(fetcher: Fetcher, event_tx: broadcast::Sender<Event>) -> Self {
        Self { fetcher, event_tx }
    }

    /// Fetch, verify, and persist one source
    ///
    /// Resume decisions are the caller's; this method always fetches.
    pub async fn run(&self, spec: &SourceSpec) -> JobOutcome {
        info!(label = %spec.label, url = %spec.url, "fetching source");
        self.emit(Event::ItemStarted {
            label: spec.label.clone(),
            url: spec.url.clone(),
        });

        let bytes = match self.fetcher.fetch(&spec.url).await {
            Ok(bytes) => bytes,
            Err(e) => return self.fail(spec, e.into()),
        };

        match ArchiveVerifier::verify(&bytes, spec.expected_entry.as_deref()) {
            VerifyOutcome::Corrupt { reason } => {
                return self.fail(
                    spec,
                    Error::CorruptArchive {
                        label: spec.label.clone(),
                        reason,
                    },
                );
            }
            VerifyOutcome::MissingExpectedEntry { entries } => {
                let expected = spec.expected_entry.clone().unwrap_or_default();
                warn!(
                    label = %spec.label,
                    expected = %expected,
                    ?entries,
                    "expected entry not found in archive, persisting anyway"
                );
                self.emit(Event::EntryMissing {
                    label: spec.label.clone(),
                    expected,
                    entries,
                });
            }
            VerifyOutcome::Valid {
                entries,
                entry_size,
            } => {
                debug!(
                    label = %spec.label,
                    entry_count = entries.len(),
                    ?entry_size,
                    "archive verified"
                );
            }
        }

        if let Err(e) = self.persist(spec, &bytes).await {
            return self.fail(spec, e);
        }

        let byte_count = bytes.len() as u64;
        info!(
            label = %spec.label,
            path = %spec.destination.display(),
            bytes = byte_count,
            "saved"
        );
        self.emit(Event::ItemSaved {
            label: spec.label.clone(),
            path: spec.destination.clone(),
            bytes: byte_count,
        });
        JobOutcome::Saved {
            path: spec.destination.clone(),
            bytes: byte_count,
        }
    }

    /// Write the payload to its destination via a staging file
    ///
    /// The bytes land in a `.part` sibling first and are renamed into place,
    /// so an interrupted process never leaves a truncated archive that a
    /// later resume check would honor.
    async fn persist(&self, spec: &SourceSpec, bytes: &[u8]) -> Result<()> {
        if let Some(parent) = spec.destination.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                Error::Io(std::io::Error::new(
                    e.kind(),
                    format!("failed to create directory '{}': {e}", parent.display()),
                ))
            })?;
        }

        let staging = staging_path(&spec.destination);
        tokio::fs::write(&staging, bytes).await.map_err(|e| {
            Error::Io(std::io::Error::new(
                e.kind(),
                format!("failed to write '{}': {e}", staging.display()),
            ))
        })?;

        if let Err(e) = tokio::fs::rename(&staging, &spec.destination).await {
            // Drop the orphaned staging file before reporting the failure
            let _ = tokio::fs::remove_file(&staging).await;
            return Err(Error::Io(std::io::Error::new(
                e.kind(),
                format!(
                    "failed to move '{}' to '{}': {e}",
                    staging.display(),
                    spec.destination.display()
                ),
            )));
        }

        Ok(())
    }

    fn fail(&self, spec: &SourceSpec, error: Error) -> JobOutcome {
        error!(label = %spec.label, error = %error, "source failed");
        self.emit(Event::ItemFailed {
            label: spec.label.clone(),
            error: error.to_string(),
        });
        JobOutcome::Failed { error }
    }

    fn emit(&self, event: Event) {
        // send() fails only when no subscriber is attached, which is fine
        self.event_tx.send(event).ok();
    }
}

/// Staging sibling for a destination (`ken_all.zip` -> `ken_all.zip.part`)
fn staging_path(destination: &Path) -> PathBuf {
    let mut name = destination
        .file_name()
        .map(OsString::from)
        .unwrap_or_else(|| OsString::from("download"));
    name.push(".part");
    destination.with_file_name(name)
}
