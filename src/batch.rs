//! Bounded fan-out over the position-reference batch

use crate::job::SourceJob;
use crate::resume::ResumeGuard;
use crate::types::{BatchSummary, Event, JobOutcome, SourceSpec};
use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{Mutex, broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Drives a list of specs through a fixed-size worker pool
///
/// Items are independent: a failure is recorded in the summary and the rest
/// of the batch continues. Each item is resume-checked first, so archives
/// already on disk cost no network request. Total outbound concurrency is
/// capped by the pool size.
pub struct BatchJob {
    job: SourceJob,
    workers: usize,
    cancel: CancellationToken,
    event_tx: broadcast::Sender<Event>,
}

impl BatchJob {
    /// Create a batch runner with at most `workers` concurrent fetches
    pub fn new(
        job: SourceJob,
        workers: usize,
        cancel: CancellationToken,
        event_tx: broadcast::Sender<Event>,
    ) -> Self {
        Self {
            job,
            workers: workers.max(1),
            cancel,
            event_tx,
        }
    }

    /// Process every spec and aggregate the outcomes
    ///
    /// The summary is assembled in spec order after all workers finish, so
    /// counts and `failed_labels` are deterministic regardless of how the
    /// items were scheduled. Cancellation stops workers from picking up new
    /// items; whatever already completed stays recorded.
    pub async fn run(&self, specs: Vec<SourceSpec>) -> BatchSummary {
        if specs.is_empty() {
            debug!("batch contains no items");
            return BatchSummary::default();
        }

        let total = specs.len();
        let workers = self.workers.min(total);
        info!(total, workers, "starting batch");
        self.event_tx
            .send(Event::BatchStarted { total, workers })
            .ok();

        let queue: Arc<Mutex<VecDeque<(usize, SourceSpec)>>> =
            Arc::new(Mutex::new(specs.into_iter().enumerate().collect()));
        let (results_tx, mut results_rx) = mpsc::unbounded_channel();

        let mut handles = Vec::with_capacity(workers);
        for worker_id in 0..workers {
            let queue = Arc::clone(&queue);
            let results = results_tx.clone();
            let job = self.job.clone();
            let cancel = self.cancel.clone();
            let event_tx = self.event_tx.clone();

            handles.push(tokio::spawn(async move {
                loop {
                    if cancel.is_cancelled() {
                        debug!(worker_id, "cancellation requested, worker stopping");
                        break;
                    }

                    let next = queue.lock().await.pop_front();
                    let Some((index, spec)) = next else {
                        break;
                    };

                    let outcome = if ResumeGuard::should_fetch(&spec.destination) {
                        job.run(&spec).await
                    } else {
                        info!(label = %spec.label, "already downloaded, skipping");
                        event_tx
                            .send(Event::ItemSkipped {
                                label: spec.label.clone(),
                                path: spec.destination.clone(),
                            })
                            .ok();
                        JobOutcome::Skipped {
                            path: spec.destination.clone(),
                        }
                    };

                    if results.send((index, spec.label, outcome)).is_err() {
                        break;
                    }
                }
            }));
        }
        drop(results_tx);

        let mut records: Vec<(usize, String, JobOutcome)> = Vec::with_capacity(total);
        while let Some(record) = results_rx.recv().await {
            records.push(record);
        }
        for handle in handles {
            if handle.await.is_err() {
                warn!("batch worker terminated abnormally");
            }
        }
        records.sort_by_key(|(index, _, _)| *index);

        let mut summary = BatchSummary {
            attempted: records.len(),
            ..Default::default()
        };
        for (_, label, outcome) in &records {
            match outcome {
                JobOutcome::Saved { .. } => summary.saved += 1,
                JobOutcome::Skipped { .. } => summary.skipped += 1,
                JobOutcome::Failed { .. } => {
                    summary.failed += 1;
                    summary.failed_labels.push(label.clone());
                }
            }
        }

        info!(
            attempted = summary.attempted,
            saved = summary.saved,
            skipped = summary.skipped,
            failed = summary.failed,
            "batch finished"
        );
        self.event_tx
            .send(Event::BatchCompleted {
                summary: summary.clone(),
            })
            .ok();
        summary
    }
}

/// Count `.zip` archives directly inside `dir`
///
/// Reads the directory fresh rather than trusting in-memory counters, so a
/// re-run after a partial batch reports what is actually on disk. A missing
/// directory counts as zero.
pub async fn count_archives(dir: &Path) -> usize {
    let Ok(mut entries) = tokio::fs::read_dir(dir).await else {
        return 0;
    };

    let mut count = 0;
    while let Ok(Some(entry)) = entries.next_entry().await {
        let is_file = entry.file_type().await.is_ok_and(|kind| kind.is_file());
        if is_file && entry.path().extension().is_some_and(|ext| ext == "zip") {
            count += 1;
        }
    }
    count
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetcher::Fetcher;
    use std::io::{Cursor, Write};
    use std::time::Duration;
    use wiremock::matchers::{method, path as url_path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn small_zip() -> Vec<u8> {
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = zip::ZipWriter::new(&mut cursor);
            let options = zip::write::FileOptions::default()
                .compression_method(zip::CompressionMethod::Stored);
            writer.start_file("payload.csv", options).unwrap();
            writer.write_all(b"data").unwrap();
            writer.finish().unwrap();
        }
        cursor.into_inner()
    }

    fn batch_job(workers: usize) -> (BatchJob, broadcast::Receiver<Event>, CancellationToken) {
        let (tx, rx) = broadcast::channel(500);
        let cancel = CancellationToken::new();
        let fetcher = Fetcher::new(Duration::from_secs(5)).unwrap();
        let job = SourceJob::new(fetcher, tx.clone());
        (BatchJob::new(job, workers, cancel.clone(), tx), rx, cancel)
    }

    fn spec(server_uri: &str, name: &str, dir: &Path) -> SourceSpec {
        SourceSpec {
            label: format!("prefecture {name}"),
            url: format!("{server_uri}/{name}.zip"),
            expected_entry: None,
            destination: dir.join(format!("{name}.zip")),
        }
    }

    async fn mount_ok(server: &MockServer, name: &str) {
        Mock::given(method("GET"))
            .and(url_path(format!("/{name}.zip")))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(small_zip()))
            .mount(server)
            .await;
    }

    async fn mount_error(server: &MockServer, name: &str, status: u16) {
        Mock::given(method("GET"))
            .and(url_path(format!("/{name}.zip")))
            .respond_with(ResponseTemplate::new(status))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn one_failure_does_not_stop_the_rest() {
        let server = MockServer::start().await;
        mount_ok(&server, "01").await;
        mount_error(&server, "02", 500).await;
        mount_ok(&server, "03").await;
        mount_ok(&server, "04").await;

        let dir = tempfile::tempdir().unwrap();
        let specs: Vec<_> = ["01", "02", "03", "04"]
            .iter()
            .map(|name| spec(&server.uri(), name, dir.path()))
            .collect();

        let (batch, _rx, _cancel) = batch_job(4);
        let summary = batch.run(specs).await;

        assert_eq!(summary.attempted, 4);
        assert_eq!(summary.saved, 3);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.failed_labels, vec!["prefecture 02".to_string()]);
        assert!(dir.path().join("01.zip").is_file());
        assert!(!dir.path().join("02.zip").exists());
        assert!(dir.path().join("04.zip").is_file());
    }

    #[tokio::test]
    async fn failed_labels_keep_spec_order_under_concurrency() {
        let server = MockServer::start().await;
        mount_error(&server, "01", 500).await;
        mount_ok(&server, "02").await;
        mount_ok(&server, "03").await;
        mount_error(&server, "04", 404).await;

        let dir = tempfile::tempdir().unwrap();
        let specs: Vec<_> = ["01", "02", "03", "04"]
            .iter()
            .map(|name| spec(&server.uri(), name, dir.path()))
            .collect();

        let (batch, _rx, _cancel) = batch_job(4);
        let summary = batch.run(specs).await;

        assert_eq!(
            summary.failed_labels,
            vec!["prefecture 01".to_string(), "prefecture 04".to_string()],
            "label order must follow spec order, not completion order"
        );
    }

    #[tokio::test]
    async fn already_present_items_issue_no_request() {
        let server = MockServer::start().await;
        mount_ok(&server, "01").await;
        // The pre-seeded item must never be requested
        Mock::given(method("GET"))
            .and(url_path("/02.zip"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;
        mount_ok(&server, "03").await;

        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("02.zip"), b"from a previous run").unwrap();

        let specs: Vec<_> = ["01", "02", "03"]
            .iter()
            .map(|name| spec(&server.uri(), name, dir.path()))
            .collect();

        let (batch, mut rx, _cancel) = batch_job(2);
        let summary = batch.run(specs).await;

        assert_eq!(summary.attempted, 3);
        assert_eq!(summary.saved, 2);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.failed, 0);
        assert_eq!(
            std::fs::read(dir.path().join("02.zip")).unwrap(),
            b"from a previous run",
            "a skipped destination must not be touched"
        );

        let mut saw_skip = false;
        while let Ok(event) = rx.try_recv() {
            if let Event::ItemSkipped { label, .. } = event {
                assert_eq!(label, "prefecture 02");
                saw_skip = true;
            }
        }
        assert!(saw_skip, "the skip must be announced on the event channel");
    }

    #[tokio::test]
    async fn a_single_worker_processes_everything_sequentially() {
        let server = MockServer::start().await;
        for name in ["01", "02", "03"] {
            mount_ok(&server, name).await;
        }

        let dir = tempfile::tempdir().unwrap();
        let specs: Vec<_> = ["01", "02", "03"]
            .iter()
            .map(|name| spec(&server.uri(), name, dir.path()))
            .collect();

        let (batch, _rx, _cancel) = batch_job(1);
        let summary = batch.run(specs).await;

        assert_eq!(summary.saved, 3);
        assert!(summary.failed_labels.is_empty());
    }

    #[tokio::test]
    async fn cancellation_before_the_run_fetches_nothing() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(small_zip()))
            .expect(0)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let specs: Vec<_> = ["01", "02", "03"]
            .iter()
            .map(|name| spec(&server.uri(), name, dir.path()))
            .collect();

        let (batch, _rx, cancel) = batch_job(2);
        cancel.cancel();
        let summary = batch.run(specs).await;

        assert_eq!(summary.attempted, 0, "no item may start after cancellation");
        assert_eq!(summary.saved, 0);
    }

    #[tokio::test]
    async fn mid_run_cancellation_keeps_completed_items() {
        let server = MockServer::start().await;
        mount_ok(&server, "01").await;
        // The later items respond slowly so the cancel lands while the
        // single worker is still busy
        for name in ["02", "03"] {
            Mock::given(method("GET"))
                .and(url_path(format!("/{name}.zip")))
                .respond_with(
                    ResponseTemplate::new(200)
                        .set_body_bytes(small_zip())
                        .set_delay(Duration::from_millis(200)),
                )
                .mount(&server)
                .await;
        }

        let dir = tempfile::tempdir().unwrap();
        let specs: Vec<_> = ["01", "02", "03"]
            .iter()
            .map(|name| spec(&server.uri(), name, dir.path()))
            .collect();

        let (batch, mut rx, cancel) = batch_job(1);
        let run = tokio::spawn(async move { batch.run(specs).await });

        // Cancel as soon as the first item has landed
        loop {
            match rx.recv().await.unwrap() {
                Event::ItemSaved { label, .. } if label == "prefecture 01" => break,
                _ => {}
            }
        }
        cancel.cancel();
        let summary = run.await.unwrap();

        assert!(summary.saved >= 1, "completed items must stay recorded");
        assert_eq!(summary.failed, 0);
        assert_eq!(
            summary.attempted, summary.saved,
            "in-flight items finish, nothing is half-done"
        );
        assert!(
            summary.attempted < 3,
            "the tail of the queue must not start after cancellation"
        );
        assert!(dir.path().join("01.zip").is_file());
        assert!(!dir.path().join("03.zip").exists());
    }

    #[tokio::test]
    async fn empty_batch_returns_the_default_summary() {
        let (batch, _rx, _cancel) = batch_job(4);
        let summary = batch.run(Vec::new()).await;
        assert_eq!(summary, BatchSummary::default());
    }

    // --- count_archives ---

    #[tokio::test]
    async fn census_counts_only_zip_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("01000-23.0a.zip"), b"a").unwrap();
        std::fs::write(dir.path().join("02000-23.0a.zip"), b"b").unwrap();
        std::fs::write(dir.path().join("03000-23.0a.zip.part"), b"staging").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"c").unwrap();
        std::fs::create_dir(dir.path().join("nested.zip")).unwrap();

        assert_eq!(count_archives(dir.path()).await, 2);
    }

    #[tokio::test]
    async fn census_of_a_missing_directory_is_zero() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(count_archives(&dir.path().join("absent")).await, 0);
    }
}
