//! Top-level acquisition engine

use crate::batch::{BatchJob, count_archives};
use crate::config::Config;
use crate::error::Result;
use crate::fetcher::Fetcher;
use crate::job::SourceJob;
use crate::types::{BatchSummary, Event, JobOutcome, RunReport};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Capacity of the event broadcast channel
const EVENT_CHANNEL_CAPACITY: usize = 1000;

/// Main acquisition engine (cloneable - all fields are Arc-wrapped or cheap)
///
/// Owns the shared HTTP client, the event broadcast channel, and the
/// cancellation token. One instance drives any number of runs; a run fetches
/// the sources the configuration selects and reports what happened without
/// ever escalating a single source's failure.
#[derive(Clone)]
pub struct SourceDownloader {
    /// Configuration (wrapped in Arc for sharing across tasks)
    config: Arc<Config>,
    /// Shared HTTP fetcher
    fetcher: Fetcher,
    /// Event broadcast channel sender (multiple subscribers supported)
    event_tx: broadcast::Sender<Event>,
    /// Cancellation token checked at item boundaries
    cancel: CancellationToken,
}

impl SourceDownloader {
    /// Create a new SourceDownloader instance
    ///
    /// Validates the configuration and builds the HTTP client, so a bad URL
    /// template or an unusable concurrency cap surfaces here rather than
    /// mid-run.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let fetcher = Fetcher::new(config.fetch.fetch_timeout)?;
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Ok(Self {
            config: Arc::new(config),
            fetcher,
            event_tx,
            cancel: CancellationToken::new(),
        })
    }

    /// Subscribe to acquisition events
    ///
    /// Each subscriber gets every event from the moment of subscription.
    /// Slow subscribers that fall more than the channel capacity behind
    /// miss events rather than blocking the engine.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Request cancellation of the current run
    ///
    /// In-flight fetches complete or time out; no new item starts. Completed
    /// items stay on disk, so a later run resumes past them.
    pub fn cancel(&self) {
        info!("cancellation requested");
        self.cancel.cancel();
        self.event_tx.send(Event::Cancelled).ok();
    }

    /// The configuration this engine was built with
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Run every source the configuration selects
    ///
    /// The two Japan Post tables run first, sequentially, then the
    /// position-reference batch on the worker pool. Each unit's outcome is
    /// recorded independently; nothing a single unit does prevents the
    /// others from being attempted. The archive count in the report comes
    /// from scanning the batch directory, so it also reflects files saved
    /// by earlier interrupted runs.
    pub async fn run(&self) -> RunReport {
        let started_at = chrono::Utc::now();
        info!(output_dir = %self.config.output_dir().display(), "starting acquisition run");
        self.event_tx
            .send(Event::RunStarted {
                output_dir: self.config.output_dir().clone(),
            })
            .ok();

        let (postal_table, office_table) = if self.config.fetch.skip_postal_data {
            info!("postal tables skipped by configuration");
            (None, None)
        } else {
            // Cancellation is honored at unit boundaries: a table fetch
            // already in flight finishes, the next one does not start
            let postal = if self.cancelled("postal code table") {
                None
            } else {
                Some(self.fetch_postal_table().await)
            };
            let office = if self.cancelled("business office table") {
                None
            } else {
                Some(self.fetch_office_table().await)
            };
            (postal, office)
        };

        let position_batch = if self.config.fetch.skip_position_data {
            info!("position-reference batch skipped by configuration");
            None
        } else if self.cancelled("position-reference batch") {
            None
        } else {
            Some(self.fetch_position_data().await)
        };

        let archives_on_disk = count_archives(&self.config.position_dir()).await;
        if position_batch.is_some() {
            info!(archives_on_disk, "position archives on disk after run");
        }

        let report = RunReport {
            postal_table,
            office_table,
            position_batch,
            archives_on_disk,
            started_at,
            finished_at: chrono::Utc::now(),
        };
        if !report.is_success(self.config.failure_policy) {
            warn!(policy = ?self.config.failure_policy, "run finished with failures");
        }
        self.event_tx
            .send(Event::RunCompleted { archives_on_disk })
            .ok();
        report
    }

    /// Fetch the postal-code table
    ///
    /// Always re-fetched, never resumed: the table is small and updated
    /// monthly, so staleness costs more than the download.
    pub async fn fetch_postal_table(&self) -> JobOutcome {
        let spec = self.config.sources.postal_spec(self.config.output_dir());
        self.source_job().run(&spec).await
    }

    /// Fetch the business-office postal-code table
    ///
    /// Always re-fetched for the same reason as the postal-code table.
    pub async fn fetch_office_table(&self) -> JobOutcome {
        let spec = self.config.sources.office_spec(self.config.output_dir());
        self.source_job().run(&spec).await
    }

    /// Fetch the position-reference batch
    ///
    /// Ninety-four archives (47 prefectures, two editions each) through the
    /// bounded worker pool, with resume checks and continue-past-failure.
    pub async fn fetch_position_data(&self) -> BatchSummary {
        let specs = self.config.sources.position_specs(self.config.output_dir());
        let batch = BatchJob::new(
            self.source_job(),
            self.config.fetch.max_concurrent_fetches,
            self.cancel.clone(),
            self.event_tx.clone(),
        );
        batch.run(specs).await
    }

    fn source_job(&self) -> SourceJob {
        SourceJob::new(self.fetcher.clone(), self.event_tx.clone())
    }

    fn cancelled(&self, unit: &str) -> bool {
        let cancelled = self.cancel.is_cancelled();
        if cancelled {
            warn!(unit, "cancellation requested, unit not started");
        }
        cancelled
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FailurePolicy;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config_for(dir: &std::path::Path) -> Config {
        let mut config = Config::default();
        config.fetch.output_dir = dir.to_path_buf();
        config.fetch.skip_position_data = false;
        config
    }

    #[test]
    fn new_rejects_an_invalid_configuration() {
        let mut config = Config::default();
        config.sources.postal_table_url = "not a url".into();
        assert!(SourceDownloader::new(config).is_err());
    }

    #[test]
    fn new_accepts_the_default_configuration() {
        let downloader = SourceDownloader::new(Config::default()).unwrap();
        assert_eq!(
            downloader.config().fetch.max_concurrent_fetches,
            4,
            "defaults must survive construction unchanged"
        );
    }

    #[tokio::test]
    async fn run_with_everything_skipped_touches_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config_for(dir.path());
        config.fetch.skip_postal_data = true;
        config.fetch.skip_position_data = true;

        let downloader = SourceDownloader::new(config).unwrap();
        let report = downloader.run().await;

        assert!(report.postal_table.is_none());
        assert!(report.office_table.is_none());
        assert!(report.position_batch.is_none());
        assert_eq!(report.archives_on_disk, 0);
        assert!(report.is_success(FailurePolicy::Strict));
        assert!(
            std::fs::read_dir(dir.path()).unwrap().next().is_none(),
            "a fully skipped run must not create any files"
        );
    }

    #[tokio::test]
    async fn run_emits_start_and_completion_events() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config_for(dir.path());
        config.fetch.skip_postal_data = true;
        config.fetch.skip_position_data = true;

        let downloader = SourceDownloader::new(config).unwrap();
        let mut events = downloader.subscribe();
        downloader.run().await;

        match events.try_recv().unwrap() {
            Event::RunStarted { output_dir } => {
                assert_eq!(output_dir, dir.path().to_path_buf());
            }
            other => panic!("expected RunStarted first, got {other:?}"),
        }
        let mut saw_completed = false;
        while let Ok(event) = events.try_recv() {
            if matches!(event, Event::RunCompleted { .. }) {
                saw_completed = true;
            }
        }
        assert!(saw_completed);
    }

    #[tokio::test]
    async fn archive_census_survives_a_restart() {
        // Files left by a previous run are counted even when this run skips
        // the batch entirely.
        let dir = tempfile::tempdir().unwrap();
        let batch_dir = dir.path().join("mlit_raw");
        std::fs::create_dir_all(&batch_dir).unwrap();
        std::fs::write(batch_dir.join("01000-23.0a.zip"), b"a").unwrap();
        std::fs::write(batch_dir.join("01000-18.0b.zip"), b"b").unwrap();

        let mut config = config_for(dir.path());
        config.fetch.skip_postal_data = true;
        config.fetch.skip_position_data = true;

        let downloader = SourceDownloader::new(config).unwrap();
        let report = downloader.run().await;
        assert_eq!(report.archives_on_disk, 2);
    }

    #[tokio::test]
    async fn cancelled_engine_starts_no_unit() {
        let server = MockServer::start().await;
        // No unit may reach the network once cancellation is in effect
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let mut config = config_for(dir.path());
        config.sources.postal_table_url = format!("{}/utf_ken_all.zip", server.uri());
        config.sources.office_table_url = format!("{}/jigyosyo.zip", server.uri());
        config.sources.position_url_template =
            format!("{}/{{version}}/{{pref_code}}-{{version}}.zip", server.uri());

        let downloader = SourceDownloader::new(config).unwrap();
        downloader.cancel();
        let report = downloader.run().await;

        assert!(
            report.postal_table.is_none(),
            "the postal table must not be fetched after cancellation"
        );
        assert!(report.office_table.is_none());
        assert!(report.position_batch.is_none());
        assert!(
            std::fs::read_dir(dir.path()).unwrap().next().is_none(),
            "a cancelled run must not write anything"
        );
        // expect(0) on the catch-all mock is verified when the server drops
    }

    #[test]
    fn cancel_broadcasts_the_cancellation() {
        let downloader = SourceDownloader::new(Config::default()).unwrap();
        let mut events = downloader.subscribe();
        downloader.cancel();
        assert!(matches!(events.try_recv().unwrap(), Event::Cancelled));
    }

    #[test]
    fn downloader_clones_share_the_event_channel() {
        let downloader = SourceDownloader::new(Config::default()).unwrap();
        let clone = downloader.clone();
        let mut events = downloader.subscribe();
        clone
            .event_tx
            .send(Event::RunCompleted { archives_on_disk: 0 })
            .unwrap();
        assert!(matches!(
            events.try_recv().unwrap(),
            Event::RunCompleted { .. }
        ));
    }
}
