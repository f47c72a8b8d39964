//! # dxo core
//!
//! Local logic for submitting imaging datasets to a remote diagnostic-analysis service
//! and keeping track of the resulting orders.
//!
//! This crate contains:
//! - The persistent order ledger (order id -> subject id) with write-through saves
//! - The boundary to the remote job service ([`remote::JobService`]) and its error
//!   classification (expired vs transient)
//! - Dataset enumeration ([`dataset::DatasetSource`])
//! - Report formats and report file writing
//! - The [`session::Session`] workflow tying these together
//!
//! **No transport concerns**: the vendor client (authentication, upload protocol, job
//! scheduling) and any presentation layer live outside this crate and plug in through
//! traits.

pub mod config;
pub mod constants;
pub mod dataset;
pub mod error;
pub mod ledger;
pub mod remote;
pub mod report;
pub mod session;

pub use config::CoreConfig;
pub use dataset::{Dataset, DatasetSource, DirectoryDatasetSource};
pub use error::{
    LedgerError, LedgerResult, RemoteError, RemoteResult, SessionError, SessionResult,
};
pub use ledger::{JsonFileStore, LedgerStore, OrderLedger};
pub use remote::{JobService, JobStatus};
pub use report::{ReportDownload, ReportFormat, ReportPayload};
pub use session::{OrderRow, OrderState, Refresh, Session, SubmitStage, WorkflowEvent};

pub use dxo_types::{OrderId, SubjectId, TextError};
