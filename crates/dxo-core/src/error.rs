use crate::constants::EXPIRED_JOB_SIGNAL;
use dxo_types::{OrderId, TextError};
use std::path::PathBuf;

/// Failures reading or writing the order ledger file.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("failed to create ledger directory {path}: {source}", path = path.display())]
    DirCreation {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("no write permission in ledger directory {path}", path = path.display())]
    NotWritable { path: PathBuf },
    #[error("failed to read ledger file {path}: {source}", path = path.display())]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write ledger file {path}: {source}", path = path.display())]
    FileWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialise ledger: {0}")]
    Serialization(serde_json::Error),
}

pub type LedgerResult<T> = std::result::Result<T, LedgerError>;

/// Failures reported by the remote job service.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RemoteError {
    /// The service no longer knows the job; its state has been garbage-collected.
    #[error("remote job not found: {0}")]
    NotFound(String),
    /// Any other failure (network, authentication, server error). Safe to retry.
    #[error("remote request failed: {0}")]
    Transient(String),
}

impl RemoteError {
    /// Maps a vendor error message onto the local taxonomy.
    ///
    /// Only messages carrying the expired-storage signal are treated as `NotFound`;
    /// everything else is transient and must never cause ledger entries to be dropped.
    pub fn classify(message: impl Into<String>) -> Self {
        let message = message.into();
        if message.contains(EXPIRED_JOB_SIGNAL) {
            RemoteError::NotFound(message)
        } else {
            RemoteError::Transient(message)
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, RemoteError::NotFound(_))
    }
}

pub type RemoteResult<T> = std::result::Result<T, RemoteError>;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("ledger storage error: {0}")]
    Storage(#[from] LedgerError),
    #[error(transparent)]
    Remote(#[from] RemoteError),
    #[error("invalid selection: {0}")]
    InvalidSelection(String),
    #[error("invalid identifier: {0}")]
    InvalidIdentifier(#[from] TextError),
    #[error("order {0} is not tracked in the ledger")]
    UnknownOrder(OrderId),
    #[error("failed to write report {path}: {source}", path = path.display())]
    ReportWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to read datasets under {path}: {source}", path = path.display())]
    DatasetRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl SessionError {
    /// One-line status text suitable for showing next to the action that failed.
    pub fn user_message(&self) -> String {
        match self {
            SessionError::Storage(e) => format!("Could not update the order file: {e}"),
            SessionError::Remote(RemoteError::NotFound(_)) => {
                "The order has expired on the analysis service.".into()
            }
            SessionError::Remote(RemoteError::Transient(msg)) => {
                format!("The analysis service request failed: {msg}")
            }
            SessionError::InvalidSelection(msg) => msg.clone(),
            other => other.to_string(),
        }
    }
}

pub type SessionResult<T> = std::result::Result<T, SessionError>;
