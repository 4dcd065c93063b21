//! # jusho-dl
//!
//! Acquisition library for Japanese postal and address reference datasets.
//!
//! ## Design Philosophy
//!
//! jusho-dl is designed to be:
//! - **Resumable** - Archives already on disk are never re-fetched in the batch
//! - **Failure-contained** - One unreachable dataset never aborts the rest
//! - **Library-first** - No CLI or UI, purely a Rust crate for embedding
//! - **Event-driven** - Consumers subscribe to events, no polling required
//!
//! The engine stages three dataset families: the Japan Post postal-code
//! table, the Japan Post business-office table, and the MLIT
//! position-reference batch (47 prefectures, two editions each). Downloaded
//! archives are persisted verbatim at well-known paths for a downstream
//! dictionary-building pipeline.
//!
//! ## Quick Start
//!
//! ```no_run
//! use jusho_dl::{Config, SourceDownloader};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut config = Config::default();
//!     config.fetch.output_dir = "data".into();
//!
//!     let downloader = SourceDownloader::new(config)?;
//!
//!     // Subscribe to events
//!     let mut events = downloader.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     let report = downloader.run().await;
//!     println!("archives on disk: {}", report.archives_on_disk);
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// In-memory ZIP archive verification
pub mod archive;
/// Bounded fan-out over the position-reference batch
pub mod batch;
/// Configuration types
pub mod config;
/// Core acquisition engine
pub mod downloader;
/// Error types
pub mod error;
/// Bounded-time HTTP fetching
pub mod fetcher;
/// Single-source acquisition pipeline
pub mod job;
/// Resume support for interrupted batch runs
pub mod resume;
/// Core types and events
pub mod types;

// Re-export commonly used types
pub use archive::ArchiveVerifier;
pub use batch::BatchJob;
pub use config::{Config, FailurePolicy, FetchConfig, SourcesConfig};
pub use downloader::SourceDownloader;
pub use error::{Error, FetchError, Result};
pub use fetcher::Fetcher;
pub use job::SourceJob;
pub use resume::ResumeGuard;
pub use types::{BatchSummary, Event, JobOutcome, RunReport, SourceSpec, VerifyOutcome};

/// Helper function to run one acquisition pass with graceful signal handling.
///
/// Starts the run and, if a termination signal arrives first, calls
/// `cancel()` so in-flight fetches finish or time out cleanly. The report of
/// whatever completed is returned either way.
///
/// On Unix this waits for SIGTERM or SIGINT (degrading gracefully when a
/// handler cannot be registered); elsewhere it waits for Ctrl+C.
///
/// # Example
///
/// ```no_run
/// use jusho_dl::{Config, SourceDownloader, run_with_shutdown};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let downloader = SourceDownloader::new(Config::default())?;
///     let report = run_with_shutdown(downloader).await;
///     println!("saved {} position archives", report.archives_on_disk);
///     Ok(())
/// }
/// ```
pub async fn run_with_shutdown(downloader: SourceDownloader) -> RunReport {
    let runner = downloader.clone();
    let mut run = tokio::spawn(async move { runner.run().await });

    tokio::select! {
        report = &mut run => report.unwrap_or_else(|_| empty_report()),
        () = wait_for_signal() => {
            downloader.cancel();
            // Let in-flight items drain and the report assemble
            run.await.unwrap_or_else(|_| empty_report())
        }
    }
}

/// Report for a run whose task failed to produce one
fn empty_report() -> RunReport {
    let now = chrono::Utc::now();
    RunReport {
        postal_table: None,
        office_table: None,
        position_batch: None,
        archives_on_disk: 0,
        started_at: now,
        finished_at: now,
    }
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Handler registration can fail in minimal containers, so degrade one
    // signal at a time before falling back to ctrl_c
    match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("SIGTERM received, cancelling the run");
                }
                _ = sigint.recv() => {
                    tracing::info!("SIGINT received, cancelling the run");
                }
            }
        }
        (Err(e), _) => {
            tracing::warn!(error = %e, "no SIGTERM handler available, listening for SIGINT alone");
            if let Ok(mut sigint) = signal(SignalKind::interrupt()) {
                sigint.recv().await;
                tracing::info!("SIGINT received, cancelling the run");
            } else {
                tracing::error!("no unix signal handlers available, falling back to ctrl_c");
                tokio::signal::ctrl_c().await.ok();
            }
        }
        (_, Err(e)) => {
            tracing::warn!(error = %e, "no SIGINT handler available, listening for SIGTERM alone");
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
                tracing::info!("SIGTERM received, cancelling the run");
            } else {
                tracing::error!("no unix signal handlers available, falling back to ctrl_c");
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Ctrl+C received, cancelling the run"),
        Err(e) => tracing::error!(error = %e, "could not listen for Ctrl+C"),
    }
}
