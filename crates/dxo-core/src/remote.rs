//! Boundary to the remote job service.
//!
//! The vendor client performs authentication, upload, job orchestration and report
//! rendering. This crate only consumes it through [`JobService`]; implementations are
//! expected to map their failures with
//! [`RemoteError::classify`](crate::RemoteError::classify) so that expired jobs are
//! distinguishable from transient failures.

use crate::error::RemoteResult;
use crate::report::{ReportFormat, ReportPayload};
use dxo_types::OrderId;
use std::path::Path;

/// Operations offered by the remote analysis service client.
pub trait JobService {
    /// Authenticates the client. Called once when a session is opened.
    fn connect(&self) -> RemoteResult<()>;

    /// Creates a new job and returns its vendor-issued id.
    fn new_job(&self) -> RemoteResult<OrderId>;

    /// Uploads the imaging dataset stored under `dataset_dir`.
    fn upload_dataset(&self, order_id: &OrderId, dataset_dir: &Path) -> RemoteResult<()>;

    /// Starts analysis of the uploaded dataset with the named protocol.
    fn run_job(&self, order_id: &OrderId, protocol: &str) -> RemoteResult<()>;

    /// Current status of a job.
    ///
    /// Fails with [`RemoteError::NotFound`](crate::RemoteError::NotFound) once the job has
    /// expired server-side.
    fn check_status(&self, order_id: &OrderId) -> RemoteResult<JobStatus>;

    /// Fetches the finished report in the requested format.
    fn get_results(&self, order_id: &OrderId, format: ReportFormat) -> RemoteResult<ReportPayload>;
}

/// Job status as reported by the service.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct JobStatus {
    /// Human-readable stage description
    pub info: String,
    /// Completion percentage in `0..=100`
    pub progress: u8,
}

impl JobStatus {
    /// Builds a status, clamping `progress` to 100.
    pub fn new(info: impl Into<String>, progress: u8) -> Self {
        Self {
            info: info.into(),
            progress: progress.min(100),
        }
    }

    /// Whether the report can be downloaded.
    pub fn is_complete(&self) -> bool {
        self.progress >= 100
    }

    /// Progress formatted for display, e.g. `"42%"`.
    pub fn progress_label(&self) -> String {
        format!("{}%", self.progress.min(100))
    }
}
