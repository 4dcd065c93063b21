//! Core types for jusho-dl

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::config::FailurePolicy;
use crate::error::Error;

/// Immutable descriptor of one fetchable dataset
///
/// Resolved from configuration before a run starts; carries everything a job
/// needs to fetch, verify, and persist one archive.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSpec {
    /// Human-readable name used in events, logs, and summaries
    pub label: String,

    /// Fully resolved download URL
    pub url: String,

    /// Entry name expected inside the archive (None = container check only)
    pub expected_entry: Option<String>,

    /// Destination path for the persisted archive
    pub destination: PathBuf,
}

/// Verdict from inspecting downloaded bytes as a ZIP archive
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VerifyOutcome {
    /// Container is readable and the expected entry (if any) is present
    Valid {
        /// Entry names found in the archive
        entries: Vec<String>,
        /// Uncompressed size of the expected entry, when one was named
        entry_size: Option<u64>,
    },

    /// Container is readable but the expected entry is absent
    ///
    /// Upstream occasionally renames inner files; the archive is still
    /// persisted and the mismatch is reported as a warning.
    MissingExpectedEntry {
        /// Entry names actually found in the archive
        entries: Vec<String>,
    },

    /// Bytes could not be read as a ZIP archive
    Corrupt {
        /// Why the container could not be opened
        reason: String,
    },
}

impl VerifyOutcome {
    /// True when the container failed to open
    pub fn is_corrupt(&self) -> bool {
        matches!(self, VerifyOutcome::Corrupt { .. })
    }
}

/// Result of one acquisition unit
#[derive(Debug)]
pub enum JobOutcome {
    /// Archive fetched, verified, and written to disk
    Saved {
        /// Final destination path
        path: PathBuf,
        /// Size of the persisted archive in bytes
        bytes: u64,
    },

    /// Destination already existed, so no request was made
    Skipped {
        /// The pre-existing destination path
        path: PathBuf,
    },

    /// Unit failed; the error is recorded and the run continues
    Failed {
        /// What went wrong
        error: Error,
    },
}

impl JobOutcome {
    /// True when the unit produced or confirmed a usable archive on disk
    pub fn is_success(&self) -> bool {
        matches!(self, JobOutcome::Saved { .. } | JobOutcome::Skipped { .. })
    }
}

/// Aggregate counts from one batch fan-out
///
/// `attempted` always equals `saved + skipped + failed`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    /// Number of items processed
    pub attempted: usize,

    /// Items fetched and written this run
    pub saved: usize,

    /// Items skipped because the destination already existed
    pub skipped: usize,

    /// Items that failed to fetch, verify, or persist
    pub failed: usize,

    /// Labels of the failed items, in batch order
    pub failed_labels: Vec<String>,
}

impl BatchSummary {
    /// True when at least one item produced or confirmed an archive
    pub fn made_progress(&self) -> bool {
        self.saved + self.skipped > 0
    }
}

/// Aggregate report from one engine run
#[derive(Debug)]
pub struct RunReport {
    /// Outcome of the postal-code table fetch (None = not selected)
    pub postal_table: Option<JobOutcome>,

    /// Outcome of the business-office table fetch (None = not selected)
    pub office_table: Option<JobOutcome>,

    /// Summary of the position-reference batch (None = not selected)
    pub position_batch: Option<BatchSummary>,

    /// Number of `.zip` archives found in the batch directory after the run
    pub archives_on_disk: usize,

    /// When the run started
    pub started_at: DateTime<Utc>,

    /// When the run finished
    pub finished_at: DateTime<Utc>,
}

impl RunReport {
    /// Interpret the run against a failure policy
    pub fn is_success(&self, policy: FailurePolicy) -> bool {
        match policy {
            FailurePolicy::Permissive => true,
            FailurePolicy::RequireProgress => {
                let batch_ok = self
                    .position_batch
                    .as_ref()
                    .is_none_or(|summary| summary.attempted == 0 || summary.made_progress());
                unit_ok(self.postal_table.as_ref()) && unit_ok(self.office_table.as_ref()) && batch_ok
            }
            FailurePolicy::Strict => {
                let batch_ok = self
                    .position_batch
                    .as_ref()
                    .is_none_or(|summary| summary.failed == 0);
                unit_ok(self.postal_table.as_ref()) && unit_ok(self.office_table.as_ref()) && batch_ok
            }
        }
    }

    /// Wall-clock duration of the run
    pub fn duration(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }
}

fn unit_ok(outcome: Option<&JobOutcome>) -> bool {
    outcome.is_none_or(JobOutcome::is_success)
}

/// Event emitted during an acquisition run
///
/// Events are broadcast to all subscribers; the embedding application decides
/// how to render them (console progress, structured logs, metrics).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A run started
    RunStarted {
        /// Directory receiving the downloaded archives
        output_dir: PathBuf,
    },

    /// An acquisition unit started fetching
    ItemStarted {
        /// Source label
        label: String,
        /// Resolved URL being fetched
        url: String,
    },

    /// An acquisition unit was skipped because its destination already exists
    ItemSkipped {
        /// Source label
        label: String,
        /// The pre-existing destination path
        path: PathBuf,
    },

    /// An acquisition unit fetched, verified, and persisted its archive
    ItemSaved {
        /// Source label
        label: String,
        /// Final destination path
        path: PathBuf,
        /// Size of the persisted archive in bytes
        bytes: u64,
    },

    /// An acquisition unit failed
    ItemFailed {
        /// Source label
        label: String,
        /// Error message
        error: String,
    },

    /// A verified archive is missing its expected entry
    EntryMissing {
        /// Source label
        label: String,
        /// The entry that was expected
        expected: String,
        /// Entry names actually found in the archive
        entries: Vec<String>,
    },

    /// The position-reference batch started
    BatchStarted {
        /// Number of items in the batch
        total: usize,
        /// Number of workers fetching concurrently
        workers: usize,
    },

    /// The position-reference batch finished
    BatchCompleted {
        /// Aggregate counts for the batch
        summary: BatchSummary,
    },

    /// The run finished
    RunCompleted {
        /// Number of `.zip` archives in the batch directory after the run
        archives_on_disk: usize,
    },

    /// Cancellation was requested; unstarted items will not be fetched
    Cancelled,
}
