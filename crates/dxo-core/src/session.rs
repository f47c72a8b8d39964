//! Session workflow.
//!
//! A [`Session`] owns the remote client handle, the dataset source and the order ledger
//! for one validated user session. Each user action maps to one sequential method that
//! returns a result; progress is reported through [`WorkflowEvent`]s so the presentation
//! layer can update itself without being interleaved with the work.

use crate::config::CoreConfig;
use crate::dataset::{Dataset, DatasetSource};
use crate::error::{RemoteError, SessionError, SessionResult};
use crate::ledger::{JsonFileStore, LedgerStore, OrderLedger};
use crate::remote::{JobService, JobStatus};
use crate::report::{write_report, ReportDownload, ReportFormat};
use dxo_types::{OrderId, SubjectId};
use std::fmt;
use std::path::Path;

/// Steps of a submission, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitStage {
    CreatingJob,
    Uploading,
    Running,
    Recording,
}

impl fmt::Display for SubmitStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            SubmitStage::CreatingJob => "Creating order...",
            SubmitStage::Uploading => "Uploading... (this may take a few minutes)",
            SubmitStage::Running => "Running order...",
            SubmitStage::Recording => "Saving order...",
        };
        f.write_str(text)
    }
}

/// Lifecycle notifications emitted while a submission runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkflowEvent {
    Started { subject: SubjectId },
    Progress { stage: SubmitStage },
    Completed { order_id: OrderId, subject: SubjectId },
    Failed { message: String },
}

/// Status of one tracked order after a refresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderState {
    Status(JobStatus),
    /// The status query failed for a reason other than expiry.
    Unavailable(String),
}

/// One line of the order listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderRow {
    pub order_id: OrderId,
    pub subject_id: SubjectId,
    pub state: OrderState,
}

impl OrderRow {
    /// Reports can only be downloaded once the job reached 100%.
    pub fn report_ready(&self) -> bool {
        matches!(&self.state, OrderState::Status(status) if status.is_complete())
    }

    pub fn info(&self) -> &str {
        match &self.state {
            OrderState::Status(status) => &status.info,
            OrderState::Unavailable(reason) => reason,
        }
    }

    pub fn progress_label(&self) -> String {
        match &self.state {
            OrderState::Status(status) => status.progress_label(),
            OrderState::Unavailable(_) => "-".into(),
        }
    }
}

/// Result of [`Session::refresh`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Refresh {
    /// Orders still known to the service (or whose status is temporarily unavailable).
    pub rows: Vec<OrderRow>,
    /// Orders dropped from the ledger because the service no longer knows them.
    pub expired: Vec<OrderId>,
}

pub struct Session<C, D, S = JsonFileStore> {
    cfg: CoreConfig,
    client: C,
    datasets: D,
    ledger: OrderLedger<S>,
}

impl<C: JobService, D: DatasetSource> Session<C, D, JsonFileStore> {
    /// Opens the ledger at the configured path, then authenticates the client.
    ///
    /// # Errors
    ///
    /// - [`SessionError::Storage`] if the ledger directory cannot be prepared
    /// - [`SessionError::Remote`] if the client fails to connect
    pub fn open(cfg: CoreConfig, client: C, datasets: D) -> SessionResult<Self> {
        let ledger = OrderLedger::load(cfg.ledger_path())?;
        Self::from_parts(cfg, client, datasets, ledger)
    }
}

impl<C: JobService, D: DatasetSource, S: LedgerStore> Session<C, D, S> {
    /// Builds a session around an already loaded ledger and connects the client.
    pub fn from_parts(
        cfg: CoreConfig,
        client: C,
        datasets: D,
        ledger: OrderLedger<S>,
    ) -> SessionResult<Self> {
        client.connect()?;
        tracing::info!(
            "session opened with {} tracked orders ({})",
            ledger.len(),
            ledger.location().display()
        );

        Ok(Self {
            cfg,
            client,
            datasets,
            ledger,
        })
    }

    /// Datasets available for submission.
    pub fn datasets(&self) -> SessionResult<Vec<Dataset>> {
        self.datasets.datasets()
    }

    /// Submits `selection` for analysis and records the new order.
    ///
    /// Runs job creation, upload and start in sequence. On success the order is
    /// written to the ledger and its id returned. `on_event` receives `Started`, one
    /// `Progress` per stage, then `Completed`, or `Failed` as soon as a step fails.
    ///
    /// # Errors
    ///
    /// - [`SessionError::InvalidSelection`] when nothing usable is selected; no remote
    ///   call is made
    /// - [`SessionError::Remote`] if any remote step fails
    /// - [`SessionError::Storage`] if the order could not be saved (it is still held in
    ///   memory and will be written by the next successful save)
    pub fn submit<F>(
        &mut self,
        selection: Option<&Dataset>,
        mut on_event: F,
    ) -> SessionResult<OrderId>
    where
        F: FnMut(&WorkflowEvent),
    {
        let result = self.run_submission(selection, &mut on_event);
        if let Err(e) = &result {
            tracing::error!("failed to run analysis: {}", e);
            on_event(&WorkflowEvent::Failed {
                message: e.user_message(),
            });
        }
        result
    }

    fn run_submission<F>(
        &mut self,
        selection: Option<&Dataset>,
        on_event: &mut F,
    ) -> SessionResult<OrderId>
    where
        F: FnMut(&WorkflowEvent),
    {
        let dataset = selection
            .ok_or_else(|| SessionError::InvalidSelection("No dataset selected.".into()))?;
        if !dataset.path.is_dir() {
            return Err(SessionError::InvalidSelection(format!(
                "Dataset directory {} does not exist.",
                dataset.path.display()
            )));
        }

        on_event(&WorkflowEvent::Started {
            subject: dataset.subject.clone(),
        });

        on_event(&WorkflowEvent::Progress {
            stage: SubmitStage::CreatingJob,
        });
        let order_id = self.client.new_job()?;
        tracing::info!("order {} created", order_id);

        on_event(&WorkflowEvent::Progress {
            stage: SubmitStage::Uploading,
        });
        self.client.upload_dataset(&order_id, &dataset.path)?;
        tracing::info!("dataset {} uploaded", dataset.path.display());

        on_event(&WorkflowEvent::Progress {
            stage: SubmitStage::Running,
        });
        self.client.run_job(&order_id, self.cfg.protocol())?;
        tracing::info!("order {} started with protocol {}", order_id, self.cfg.protocol());

        on_event(&WorkflowEvent::Progress {
            stage: SubmitStage::Recording,
        });
        self.ledger.add(order_id.clone(), dataset.subject.clone())?;
        tracing::info!("order {} saved for {}", order_id, dataset.subject);

        on_event(&WorkflowEvent::Completed {
            order_id: order_id.clone(),
            subject: dataset.subject.clone(),
        });
        Ok(order_id)
    }

    /// Queries the status of every tracked order.
    ///
    /// Orders the service reports as expired are removed from the ledger in one save
    /// and left out of the listing. Other failures keep the order and show up as
    /// [`OrderState::Unavailable`].
    pub fn refresh(&mut self) -> SessionResult<Refresh> {
        let mut refresh = Refresh::default();

        for (order_id, subject_id) in self.ledger.iter() {
            let state = match self.client.check_status(order_id) {
                Ok(status) => OrderState::Status(status),
                Err(RemoteError::NotFound(_)) => {
                    refresh.expired.push(order_id.clone());
                    continue;
                }
                Err(RemoteError::Transient(reason)) => {
                    tracing::warn!("status check for order {} failed: {}", order_id, reason);
                    OrderState::Unavailable(reason)
                }
            };

            refresh.rows.push(OrderRow {
                order_id: order_id.clone(),
                subject_id: subject_id.clone(),
                state,
            });
        }

        if !refresh.expired.is_empty() {
            self.ledger.sweep(&refresh.expired)?;
        }

        tracing::info!(
            "refreshed {} orders ({} expired)",
            refresh.rows.len(),
            refresh.expired.len()
        );
        Ok(refresh)
    }

    /// Stops tracking `order_id`. Unknown ids are ignored.
    pub fn delete(&mut self, order_id: &str) -> SessionResult<Option<SubjectId>> {
        let removed = self.ledger.remove(order_id)?;
        match &removed {
            Some(subject) => tracing::info!("order {} for {} deleted", order_id, subject),
            None => tracing::debug!("order {} was not tracked, nothing to delete", order_id),
        }
        Ok(removed)
    }

    /// Downloads the report for a tracked order into `dest_dir` as
    /// `<prefix>_<order id>.<ext>`.
    pub fn download_report(
        &self,
        order_id: &OrderId,
        format: ReportFormat,
        dest_dir: &Path,
    ) -> SessionResult<ReportDownload> {
        let path = dest_dir.join(format.file_name(self.cfg.report_prefix(), order_id));
        self.download_report_to(order_id, format, &path)
    }

    /// Downloads the report for a tracked order to an explicit file path.
    pub fn download_report_to(
        &self,
        order_id: &OrderId,
        format: ReportFormat,
        path: &Path,
    ) -> SessionResult<ReportDownload> {
        if !self.ledger.contains(order_id.as_str()) {
            return Err(SessionError::UnknownOrder(order_id.clone()));
        }

        let payload = self.client.get_results(order_id, format)?;
        write_report(order_id, format, &payload, path)
    }

    pub fn ledger(&self) -> &OrderLedger<S> {
        &self.ledger
    }

    pub fn config(&self) -> &CoreConfig {
        &self.cfg
    }

    pub fn client(&self) -> &C {
        &self.client
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::DirectoryDatasetSource;
    use crate::error::RemoteResult;
    use crate::report::ReportPayload;
    use std::cell::RefCell;
    use std::collections::HashMap;
    use std::fs;
    use tempfile::TempDir;

    /// Scripted stand-in for the vendor client that records every call.
    #[derive(Default)]
    struct FakeJobService {
        calls: RefCell<Vec<String>>,
        next_ids: RefCell<Vec<&'static str>>,
        statuses: HashMap<String, RemoteResult<JobStatus>>,
        fail_step: Option<&'static str>,
        connect_error: Option<RemoteError>,
    }

    impl FakeJobService {
        fn with_ids(ids: &[&'static str]) -> Self {
            let mut ids = ids.to_vec();
            ids.reverse();
            Self {
                next_ids: RefCell::new(ids),
                ..Default::default()
            }
        }

        fn status(mut self, order: &str, status: RemoteResult<JobStatus>) -> Self {
            self.statuses.insert(order.to_string(), status);
            self
        }

        fn record(&self, call: &str) -> RemoteResult<()> {
            self.calls.borrow_mut().push(call.to_string());
            match self.fail_step {
                Some(step) if step == call => Err(RemoteError::Transient(format!("{call} failed"))),
                _ => Ok(()),
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.borrow().clone()
        }
    }

    impl JobService for FakeJobService {
        fn connect(&self) -> RemoteResult<()> {
            self.record("connect")?;
            match &self.connect_error {
                Some(e) => Err(e.clone()),
                None => Ok(()),
            }
        }

        fn new_job(&self) -> RemoteResult<OrderId> {
            self.record("new_job")?;
            let id = self.next_ids.borrow_mut().pop().unwrap_or("generated");
            Ok(OrderId::new(id).unwrap())
        }

        fn upload_dataset(&self, _order_id: &OrderId, _dataset_dir: &Path) -> RemoteResult<()> {
            self.record("upload_dataset")
        }

        fn run_job(&self, _order_id: &OrderId, protocol: &str) -> RemoteResult<()> {
            self.record("run_job")?;
            self.calls.borrow_mut().push(format!("protocol={protocol}"));
            Ok(())
        }

        fn check_status(&self, order_id: &OrderId) -> RemoteResult<JobStatus> {
            self.record("check_status")?;
            self.statuses
                .get(order_id.as_str())
                .cloned()
                .unwrap_or_else(|| Ok(JobStatus::new("Queued", 0)))
        }

        fn get_results(
            &self,
            order_id: &OrderId,
            format: ReportFormat,
        ) -> RemoteResult<ReportPayload> {
            self.record("get_results")?;
            Ok(if format.is_binary() {
                ReportPayload::Binary(vec![1, 2, 3])
            } else {
                ReportPayload::Text(format!("report for {order_id}"))
            })
        }
    }

    struct Fixture {
        temp: TempDir,
        ledger_path: std::path::PathBuf,
    }

    impl Fixture {
        fn new() -> Self {
            let temp = TempDir::new().unwrap();
            let ledger_path = temp.path().join("orders.config");
            Self { temp, ledger_path }
        }

        fn write_ledger(&self, json: &str) {
            fs::write(&self.ledger_path, json).unwrap();
        }

        fn data_root(&self) -> std::path::PathBuf {
            self.temp.path().join("datasets")
        }

        fn dataset(&self, subject: &str) -> Dataset {
            let path = self.data_root().join(subject);
            fs::create_dir_all(&path).unwrap();
            fs::write(path.join("IM0001.dcm"), b"DICM").unwrap();
            Dataset {
                subject: SubjectId::new(subject).unwrap(),
                path,
            }
        }

        fn open(&self, client: FakeJobService) -> Session<FakeJobService, DirectoryDatasetSource> {
            let cfg = CoreConfig::with_ledger_path(self.ledger_path.clone()).unwrap();
            Session::open(cfg, client, DirectoryDatasetSource::new(self.data_root())).unwrap()
        }

        fn document(&self) -> serde_json::Value {
            serde_json::from_str(&fs::read_to_string(&self.ledger_path).unwrap()).unwrap()
        }
    }

    fn oid(s: &str) -> OrderId {
        OrderId::new(s).unwrap()
    }

    #[test]
    fn open_initialises_ledger_and_connects() {
        let fx = Fixture::new();
        let session = fx.open(FakeJobService::default());

        assert!(session.ledger().is_empty());
        assert_eq!(fx.document(), serde_json::json!({}));
        assert_eq!(session.client().calls(), vec!["connect"]);
    }

    #[test]
    fn open_reports_connect_failure() {
        let fx = Fixture::new();
        let client = FakeJobService {
            connect_error: Some(RemoteError::Transient("invalid API key".into())),
            ..Default::default()
        };
        let cfg = CoreConfig::with_ledger_path(fx.ledger_path.clone()).unwrap();

        let result = Session::open(cfg, client, DirectoryDatasetSource::new(fx.data_root()));

        assert!(matches!(
            result,
            Err(SessionError::Remote(RemoteError::Transient(_)))
        ));
    }

    #[test]
    fn submit_runs_steps_in_order_and_records_order() {
        let fx = Fixture::new();
        let dataset = fx.dataset("Alice");
        let mut session = fx.open(FakeJobService::with_ids(&["j1"]));
        let mut events = Vec::new();

        let order_id = session
            .submit(Some(&dataset), |e| events.push(e.clone()))
            .unwrap();

        assert_eq!(order_id, oid("j1"));
        assert_eq!(
            session.client().calls(),
            vec![
                "connect",
                "new_job",
                "upload_dataset",
                "run_job",
                "protocol=Atypical/MSAp/PSP-v1.0",
            ]
        );
        assert_eq!(fx.document(), serde_json::json!({"j1": "Alice"}));

        let alice = SubjectId::new("Alice").unwrap();
        assert_eq!(
            events,
            vec![
                WorkflowEvent::Started {
                    subject: alice.clone()
                },
                WorkflowEvent::Progress {
                    stage: SubmitStage::CreatingJob
                },
                WorkflowEvent::Progress {
                    stage: SubmitStage::Uploading
                },
                WorkflowEvent::Progress {
                    stage: SubmitStage::Running
                },
                WorkflowEvent::Progress {
                    stage: SubmitStage::Recording
                },
                WorkflowEvent::Completed {
                    order_id: oid("j1"),
                    subject: alice,
                },
            ]
        );
    }

    #[test]
    fn submit_without_selection_makes_no_remote_call() {
        let fx = Fixture::new();
        let mut session = fx.open(FakeJobService::default());
        let mut events = Vec::new();

        let err = session.submit(None, |e| events.push(e.clone())).unwrap_err();

        assert!(matches!(err, SessionError::InvalidSelection(_)));
        assert_eq!(session.client().calls(), vec!["connect"]);
        assert_eq!(
            events,
            vec![WorkflowEvent::Failed {
                message: "No dataset selected.".into()
            }]
        );
    }

    #[test]
    fn submit_with_missing_directory_is_invalid_selection() {
        let fx = Fixture::new();
        let mut session = fx.open(FakeJobService::default());
        let dataset = Dataset {
            subject: SubjectId::new("Ghost").unwrap(),
            path: fx.temp.path().join("nowhere"),
        };

        let err = session.submit(Some(&dataset), |_| {}).unwrap_err();

        assert!(matches!(err, SessionError::InvalidSelection(_)));
        assert_eq!(session.client().calls(), vec!["connect"]);
    }

    #[test]
    fn failed_upload_does_not_record_order() {
        let fx = Fixture::new();
        let dataset = fx.dataset("Alice");
        let client = FakeJobService {
            fail_step: Some("upload_dataset"),
            ..FakeJobService::with_ids(&["j1"])
        };
        let mut session = fx.open(client);
        let mut events = Vec::new();

        let err = session
            .submit(Some(&dataset), |e| events.push(e.clone()))
            .unwrap_err();

        assert!(matches!(err, SessionError::Remote(RemoteError::Transient(_))));
        assert!(session.ledger().is_empty());
        assert!(!session.client().calls().contains(&"run_job".to_string()));
        assert!(matches!(events.last(), Some(WorkflowEvent::Failed { .. })));
    }

    #[test]
    fn refresh_lists_orders_with_status() {
        let fx = Fixture::new();
        fx.write_ledger(r#"{"j1":"Alice","j2":"Bob"}"#);
        let client = FakeJobService::default()
            .status("j1", Ok(JobStatus::new("Finished", 100)))
            .status("j2", Ok(JobStatus::new("Processing", 40)));
        let mut session = fx.open(client);

        let refresh = session.refresh().unwrap();

        assert!(refresh.expired.is_empty());
        assert_eq!(refresh.rows.len(), 2);
        assert_eq!(refresh.rows[0].order_id, oid("j1"));
        assert!(refresh.rows[0].report_ready());
        assert_eq!(refresh.rows[1].info(), "Processing");
        assert_eq!(refresh.rows[1].progress_label(), "40%");
        assert!(!refresh.rows[1].report_ready());
    }

    #[test]
    fn refresh_sweeps_expired_orders() {
        let fx = Fixture::new();
        fx.write_ledger(r#"{"X":"Alice","Z":"Carol"}"#);
        let client = FakeJobService::default()
            .status("X", Err(RemoteError::classify("Bucket not found")));
        let mut session = fx.open(client);

        let refresh = session.refresh().unwrap();

        assert_eq!(refresh.expired, vec![oid("X")]);
        assert!(refresh.rows.iter().all(|r| r.order_id != oid("X")));
        assert!(!session.ledger().contains("X"));
        assert_eq!(fx.document(), serde_json::json!({"Z": "Carol"}));
    }

    #[test]
    fn refresh_keeps_orders_on_transient_failure() {
        let fx = Fixture::new();
        fx.write_ledger(r#"{"Y":"Bob"}"#);
        let client = FakeJobService::default()
            .status("Y", Err(RemoteError::classify("connection timed out")));
        let mut session = fx.open(client);

        let refresh = session.refresh().unwrap();

        assert!(refresh.expired.is_empty());
        assert_eq!(refresh.rows.len(), 1);
        assert_eq!(
            refresh.rows[0].state,
            OrderState::Unavailable("connection timed out".into())
        );
        assert_eq!(refresh.rows[0].progress_label(), "-");
        assert!(session.ledger().contains("Y"));
        assert_eq!(fx.document(), serde_json::json!({"Y": "Bob"}));
    }

    #[test]
    fn delete_removes_order_and_ignores_unknown_ids() {
        let fx = Fixture::new();
        fx.write_ledger(r#"{"j1":"Alice","j2":"Bob"}"#);
        let mut session = fx.open(FakeJobService::default());

        assert_eq!(
            session.delete("j1").unwrap(),
            Some(SubjectId::new("Alice").unwrap())
        );
        assert_eq!(session.delete("unknown").unwrap(), None);
        assert_eq!(fx.document(), serde_json::json!({"j2": "Bob"}));
    }

    #[derive(Clone, Default)]
    struct CapturedLog(std::sync::Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for CapturedLog {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    /// Runs `f` with INFO-level events written to a buffer and returns that output.
    fn logged_info<R>(f: impl FnOnce() -> R) -> (R, String) {
        let log = CapturedLog::default();
        let writer = log.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        let result = tracing::subscriber::with_default(subscriber, f);
        let text = String::from_utf8(log.0.lock().unwrap().clone()).unwrap();
        (result, text)
    }

    #[test]
    fn delete_only_reports_orders_that_were_tracked() {
        let fx = Fixture::new();
        fx.write_ledger(r#"{"j1":"Alice"}"#);
        let mut session = fx.open(FakeJobService::default());

        let (removed, log) = logged_info(|| session.delete("unknown").unwrap());
        assert_eq!(removed, None);
        assert!(!log.contains("deleted"), "{log}");

        let (removed, log) = logged_info(|| session.delete("j1").unwrap());
        assert!(removed.is_some());
        assert!(log.contains("order j1 for Alice deleted"), "{log}");
    }

    #[test]
    fn download_report_writes_named_file() {
        let fx = Fixture::new();
        fx.write_ledger(r#"{"j1":"Alice"}"#);
        let session = fx.open(FakeJobService::default());
        let out = fx.temp.path().join("reports");

        let download = session
            .download_report(&oid("j1"), ReportFormat::Json, &out)
            .unwrap();

        assert_eq!(download.path, out.join("diagnostic_j1.json"));
        assert_eq!(
            fs::read_to_string(&download.path).unwrap(),
            "report for j1"
        );
    }

    #[test]
    fn download_report_for_untracked_order_is_rejected() {
        let fx = Fixture::new();
        let session = fx.open(FakeJobService::default());

        let err = session
            .download_report(&oid("nope"), ReportFormat::Png, fx.temp.path())
            .unwrap_err();

        assert!(matches!(err, SessionError::UnknownOrder(_)));
        assert!(!session.client().calls().contains(&"get_results".to_string()));
    }

    #[test]
    fn datasets_come_from_the_source() {
        let fx = Fixture::new();
        fx.dataset("Alice");
        fx.dataset("Bob");
        let session = fx.open(FakeJobService::default());

        let datasets = session.datasets().unwrap();
        assert_eq!(datasets.len(), 2);
        assert_eq!(datasets[1].subject.as_str(), "Bob");
    }

    #[test]
    fn submit_then_refresh_shows_new_order() {
        let fx = Fixture::new();
        let dataset = fx.dataset("Alice");
        let mut session = fx.open(FakeJobService::with_ids(&["j1", "j2"]));

        session.submit(Some(&dataset), |_| {}).unwrap();
        session.submit(Some(&dataset), |_| {}).unwrap();
        let refresh = session.refresh().unwrap();

        let ids: Vec<&str> = refresh.rows.iter().map(|r| r.order_id.as_str()).collect();
        assert_eq!(ids, vec!["j1", "j2"]);
        assert_eq!(refresh.rows[0].progress_label(), "0%");
    }
}
