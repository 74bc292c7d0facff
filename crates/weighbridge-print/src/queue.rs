// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// In-memory print job queue with a single worker.
//
// Submissions are recorded as `Pending` and pushed onto an unbounded FIFO;
// one worker task pops them in order, so two jobs are never `Running` at
// once.  Per job the worker writes a scratch copy, archives an immutable
// copy to history, runs the print executable and deletes the scratch copy.
// A failing job is recorded as `Failed` and the worker moves on.
//
// Job records live until the process exits.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument};

use weighbridge_core::error::{Result, WeighbridgeError};
use weighbridge_core::types::{JobId, JobStatus, PrintJob, QueueSnapshot};

use crate::archive::{HistoryArchive, TempArtifact, sanitize_document_name};
use crate::digest::hash_bytes;
use crate::runner::PrintRunner;

/// Where the worker puts files.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub temp_dir: PathBuf,
    pub history_dir: PathBuf,
}

/// A queued document.  The bytes travel with the work item, not the record.
struct WorkItem {
    id: JobId,
    document_name: String,
    printer_name: String,
    content: Vec<u8>,
}

struct Shared {
    jobs: Mutex<HashMap<JobId, PrintJob>>,
    worker_running: AtomicBool,
}

impl Shared {
    fn jobs(&self) -> MutexGuard<'_, HashMap<JobId, PrintJob>> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn update(&self, id: JobId, f: impl FnOnce(&mut PrintJob)) {
        if let Some(job) = self.jobs().get_mut(&id) {
            f(job);
        }
    }
}

/// Clears `worker_running` when the worker exits, including by panic.
struct RunningFlag<'a>(&'a AtomicBool);

impl Drop for RunningFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Print job queue.  Create with [`JobQueue::start`] inside a Tokio runtime.
pub struct JobQueue {
    shared: Arc<Shared>,
    /// Taken by `shutdown`; submissions after that are refused.
    tx: Mutex<Option<mpsc::UnboundedSender<WorkItem>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl JobQueue {
    /// Create the queue and spawn its worker.
    pub fn start<R: PrintRunner>(config: QueueConfig, runner: R) -> Self {
        let shared = Arc::new(Shared {
            jobs: Mutex::new(HashMap::new()),
            worker_running: AtomicBool::new(true),
        });
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = tokio::spawn(run_worker(Arc::clone(&shared), config, runner, rx));
        Self {
            shared,
            tx: Mutex::new(Some(tx)),
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Queue a document for printing and return its id immediately.
    ///
    /// Only empty content is refused.  An empty `printer_name` selects the
    /// system default printer.
    #[instrument(skip(self, content), fields(size = content.len()))]
    pub fn submit(
        &self,
        content: Vec<u8>,
        document_name: &str,
        printer_name: &str,
    ) -> Result<JobId> {
        if content.is_empty() {
            return Err(WeighbridgeError::EmptyDocument);
        }

        let document_name = sanitize_document_name(document_name);
        let job = PrintJob::new(
            document_name.clone(),
            printer_name.to_owned(),
            content.len() as u64,
            hash_bytes(&content),
        );
        let id = job.id;
        self.shared.jobs().insert(id, job);

        let item = WorkItem {
            id,
            document_name,
            printer_name: printer_name.to_owned(),
            content,
        };
        let queued = self
            .tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|tx| tx.send(item).is_ok());
        if !queued {
            let reason = "print worker is not running";
            self.shared.update(id, |job| {
                job.status = JobStatus::Failed;
                job.finished_at = Some(Utc::now());
                job.error = Some(reason.to_owned());
            });
            return Err(WeighbridgeError::Server(reason.into()));
        }

        info!(job_id = %id, "print job queued");
        Ok(id)
    }

    /// Current record of one job.
    pub fn status(&self, id: JobId) -> Option<PrintJob> {
        self.shared.jobs().get(&id).cloned()
    }

    /// All job records, oldest first.
    pub fn jobs(&self) -> Vec<PrintJob> {
        let mut jobs: Vec<PrintJob> = self.shared.jobs().values().cloned().collect();
        jobs.sort_by_key(|job| job.created_at);
        jobs
    }

    /// Counts by status.
    pub fn snapshot(&self) -> QueueSnapshot {
        let jobs = self.shared.jobs();
        let mut snapshot = QueueSnapshot {
            total: jobs.len(),
            worker_running: self.shared.worker_running.load(Ordering::SeqCst),
            ..QueueSnapshot::default()
        };
        for job in jobs.values() {
            match job.status {
                JobStatus::Pending => snapshot.pending += 1,
                JobStatus::Running => snapshot.running += 1,
                JobStatus::Completed => snapshot.completed += 1,
                JobStatus::Failed => snapshot.failed += 1,
            }
        }
        snapshot
    }

    /// Stop accepting work, let the worker finish what is queued and wait
    /// for it.  Later calls return immediately.
    pub async fn shutdown(&self) {
        drop(self.tx.lock().unwrap_or_else(PoisonError::into_inner).take());
        let worker = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                error!(error = %e, "print worker ended abnormally");
            }
        }
    }
}

async fn run_worker<R: PrintRunner>(
    shared: Arc<Shared>,
    config: QueueConfig,
    runner: R,
    mut rx: mpsc::UnboundedReceiver<WorkItem>,
) {
    let _running = RunningFlag(&shared.worker_running);
    let archive = HistoryArchive::new(&config.history_dir);
    info!(
        temp_dir = %config.temp_dir.display(),
        history_dir = %config.history_dir.display(),
        "print worker started"
    );

    while let Some(item) = rx.recv().await {
        execute(&shared, &config, &archive, &runner, item).await;
    }

    info!("print worker stopped");
}

#[instrument(skip_all, fields(job_id = %item.id, document = %item.document_name))]
async fn execute<R: PrintRunner>(
    shared: &Shared,
    config: &QueueConfig,
    archive: &HistoryArchive,
    runner: &R,
    item: WorkItem,
) {
    shared.update(item.id, |job| {
        job.status = JobStatus::Running;
        job.started_at = Some(Utc::now());
    });
    info!(printer = %item.printer_name, "print job started");

    let outcome = print_document(shared, config, archive, runner, &item).await;

    shared.update(item.id, |job| {
        job.finished_at = Some(Utc::now());
        match &outcome {
            Ok(()) => job.status = JobStatus::Completed,
            Err(e) => {
                job.status = JobStatus::Failed;
                job.error = Some(e.to_string());
            }
        }
    });
    match outcome {
        Ok(()) => info!("print job completed"),
        Err(e) => error!(error = %e, "print job failed"),
    }
}

/// Scratch copy, history copy, print.  The scratch copy is removed on every
/// path once it exists.
async fn print_document<R: PrintRunner>(
    shared: &Shared,
    config: &QueueConfig,
    archive: &HistoryArchive,
    runner: &R,
    item: &WorkItem,
) -> Result<()> {
    let artifact = TempArtifact::create(&config.temp_dir, &item.document_name, &item.content).await?;

    match archive.store(&item.document_name, &item.content).await {
        Ok(path) => {
            debug!(history = %path.display(), "document archived");
            let path = path.display().to_string();
            shared.update(item.id, |job| job.history_path = Some(path));
        }
        Err(e) => {
            artifact.remove().await;
            return Err(e);
        }
    }

    let started = Instant::now();
    let printed = runner.print(artifact.path(), &item.printer_name).await;
    let elapsed_ms = started.elapsed().as_millis() as u64;
    shared.update(item.id, |job| job.duration_ms = Some(elapsed_ms));

    artifact.remove().await;
    printed
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use async_trait::async_trait;
    use tempfile::TempDir;

    /// What the fake printer saw for one job.
    #[derive(Debug, Clone)]
    struct Printed {
        content: Vec<u8>,
        printer: String,
    }

    /// Records calls; fails any document whose content starts with `FAIL`.
    #[derive(Default)]
    struct FakePrinter {
        printed: Mutex<Vec<Printed>>,
        active: AtomicUsize,
        max_active: AtomicUsize,
    }

    #[async_trait]
    impl PrintRunner for Arc<FakePrinter> {
        async fn print(&self, document: &Path, printer: &str) -> Result<()> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(now, Ordering::SeqCst);

            let content = tokio::fs::read(document).await.expect("artifact readable");
            tokio::time::sleep(Duration::from_millis(15)).await;
            self.printed.lock().unwrap().push(Printed {
                content: content.clone(),
                printer: printer.to_owned(),
            });

            self.active.fetch_sub(1, Ordering::SeqCst);
            if content.starts_with(b"FAIL") {
                return Err(WeighbridgeError::PrintFailed("exit code 1: paper jam".into()));
            }
            Ok(())
        }
    }

    struct Fixture {
        _root: TempDir,
        temp_dir: PathBuf,
        history_dir: PathBuf,
        printer: Arc<FakePrinter>,
        queue: JobQueue,
    }

    fn fixture() -> Fixture {
        let root = tempfile::tempdir().expect("tempdir");
        let temp_dir = root.path().join("tmp");
        let history_dir = root.path().join("history");
        std::fs::create_dir_all(&temp_dir).expect("mkdir tmp");
        std::fs::create_dir_all(&history_dir).expect("mkdir history");
        let printer = Arc::new(FakePrinter::default());
        let queue = JobQueue::start(
            QueueConfig {
                temp_dir: temp_dir.clone(),
                history_dir: history_dir.clone(),
            },
            Arc::clone(&printer),
        );
        Fixture {
            _root: root,
            temp_dir,
            history_dir,
            printer,
            queue,
        }
    }

    async fn wait_for_terminal(queue: &JobQueue, ids: &[JobId]) {
        for _ in 0..500 {
            if ids
                .iter()
                .all(|id| queue.status(*id).is_some_and(|job| job.status.is_terminal()))
            {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("jobs did not finish");
    }

    fn dir_entries(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .expect("read_dir")
            .map(|entry| entry.expect("entry").file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[tokio::test]
    async fn jobs_run_in_submission_order_one_at_a_time() {
        let f = fixture();
        let ids: Vec<JobId> = ["j1", "j2", "j3"]
            .iter()
            .map(|name| {
                f.queue
                    .submit(name.as_bytes().to_vec(), &format!("{name}.pdf"), "")
                    .expect("submit")
            })
            .collect();

        let mut saw_running = false;
        for _ in 0..500 {
            let snapshot = f.queue.snapshot();
            assert!(snapshot.running <= 1, "two jobs running: {snapshot:?}");
            saw_running |= snapshot.running == 1;
            if snapshot.completed == ids.len() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        assert!(saw_running);
        wait_for_terminal(&f.queue, &ids).await;

        let printed: Vec<Vec<u8>> = f
            .printer
            .printed
            .lock()
            .unwrap()
            .iter()
            .map(|p| p.content.clone())
            .collect();
        assert_eq!(printed, vec![b"j1".to_vec(), b"j2".to_vec(), b"j3".to_vec()]);
        assert_eq!(f.printer.max_active.load(Ordering::SeqCst), 1);

        let finished: Vec<_> = ids
            .iter()
            .map(|id| f.queue.status(*id).unwrap().finished_at.unwrap())
            .collect();
        assert!(finished[0] <= finished[1] && finished[1] <= finished[2]);

        let snapshot = f.queue.snapshot();
        assert_eq!(snapshot.total, 3);
        assert_eq!(snapshot.completed, 3);
        assert_eq!(snapshot.running, 0);
        assert!(snapshot.worker_running);
    }

    #[tokio::test]
    async fn failed_job_does_not_stop_the_worker() {
        let f = fixture();
        let bad = f.queue.submit(b"FAIL".to_vec(), "bad.pdf", "").expect("submit");
        let good = f.queue.submit(b"ok".to_vec(), "good.pdf", "").expect("submit");
        wait_for_terminal(&f.queue, &[bad, good]).await;

        let bad = f.queue.status(bad).unwrap();
        assert_eq!(bad.status, JobStatus::Failed);
        assert!(bad.error.as_deref().is_some_and(|e| e.contains("paper jam")));

        let good = f.queue.status(good).unwrap();
        assert_eq!(good.status, JobStatus::Completed);
        assert!(good.error.is_none());

        let snapshot = f.queue.snapshot();
        assert_eq!((snapshot.completed, snapshot.failed), (1, 1));
        assert!(snapshot.worker_running);
    }

    #[tokio::test]
    async fn resubmitted_name_is_archived_under_a_new_name() {
        let f = fixture();
        let first = f.queue.submit(b"v1".to_vec(), "report.pdf", "").expect("submit");
        let second = f.queue.submit(b"v2".to_vec(), "report.pdf", "").expect("submit");
        wait_for_terminal(&f.queue, &[first, second]).await;

        assert_eq!(dir_entries(&f.history_dir), vec!["report(1).pdf", "report.pdf"]);
        assert_eq!(std::fs::read(f.history_dir.join("report.pdf")).unwrap(), b"v1");
        assert_eq!(std::fs::read(f.history_dir.join("report(1).pdf")).unwrap(), b"v2");

        let second = f.queue.status(second).unwrap();
        assert!(second.history_path.unwrap().ends_with("report(1).pdf"));
    }

    #[tokio::test]
    async fn temp_artifacts_are_removed_after_success_and_failure() {
        let f = fixture();
        let ids = [
            f.queue.submit(b"ok".to_vec(), "a.pdf", "").expect("submit"),
            f.queue.submit(b"FAIL".to_vec(), "b.pdf", "").expect("submit"),
        ];
        wait_for_terminal(&f.queue, &ids).await;
        assert!(dir_entries(&f.temp_dir).is_empty());
    }

    #[tokio::test]
    async fn history_failure_fails_the_job() {
        let f = fixture();
        std::fs::remove_dir_all(&f.history_dir).expect("remove history");
        let id = f.queue.submit(b"x".to_vec(), "a.pdf", "").expect("submit");
        wait_for_terminal(&f.queue, &[id]).await;

        let job = f.queue.status(id).unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.error.unwrap().contains("history"));
        assert!(f.printer.printed.lock().unwrap().is_empty());
        assert!(dir_entries(&f.temp_dir).is_empty());
    }

    #[tokio::test]
    async fn job_record_carries_metadata() {
        let f = fixture();
        let id = f
            .queue
            .submit(b"hello".to_vec(), "ticket", "Yard Printer")
            .expect("submit");

        let queued = f.queue.status(id).expect("known job");
        assert_eq!(queued.document_name, "ticket.pdf");
        assert_eq!(queued.size_bytes, 5);
        assert_eq!(queued.sha256, hash_bytes(b"hello"));
        assert_eq!(queued.printer_name, "Yard Printer");

        wait_for_terminal(&f.queue, &[id]).await;
        let done = f.queue.status(id).unwrap();
        assert!(done.started_at.is_some());
        assert!(done.duration_ms.is_some());
        assert_eq!(f.printer.printed.lock().unwrap()[0].printer, "Yard Printer");
    }

    #[tokio::test]
    async fn empty_document_is_refused() {
        let f = fixture();
        let err = f.queue.submit(Vec::new(), "a.pdf", "").unwrap_err();
        assert!(matches!(err, WeighbridgeError::EmptyDocument));
        assert_eq!(f.queue.snapshot().total, 0);
    }

    #[tokio::test]
    async fn unknown_job_is_none() {
        let f = fixture();
        assert!(f.queue.status(JobId::new()).is_none());
        assert!(f.queue.jobs().is_empty());
    }

    #[tokio::test]
    async fn shutdown_drains_queue_and_stops_worker() {
        let f = fixture();
        let id = f.queue.submit(b"last".to_vec(), "a.pdf", "").expect("submit");
        f.queue.shutdown().await;

        assert_eq!(f.queue.status(id).map(|job| job.status), Some(JobStatus::Completed));
        assert!(!f.queue.snapshot().worker_running);
    }

    #[tokio::test]
    async fn shutdown_through_shared_handle_waits_for_running_job() {
        let f = fixture();
        let queue = Arc::new(f.queue);
        let held = Arc::clone(&queue);
        let ids = [
            queue.submit(b"one".to_vec(), "a.pdf", "").expect("submit"),
            queue.submit(b"two".to_vec(), "b.pdf", "").expect("submit"),
        ];

        queue.shutdown().await;
        for id in ids {
            assert_eq!(held.status(id).map(|job| job.status), Some(JobStatus::Completed));
        }
        assert!(!held.snapshot().worker_running);

        let err = held.submit(b"late".to_vec(), "c.pdf", "").unwrap_err();
        assert!(matches!(err, WeighbridgeError::Server(_)));
        held.shutdown().await;
    }
}
