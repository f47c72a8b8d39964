//! Core runtime configuration.
//!
//! Configuration is resolved once at startup and handed to the [`Session`](crate::Session).
//! Nothing in this crate reads process-wide settings or environment variables while
//! handling a user action.

use crate::constants::{DEFAULT_LEDGER_FILENAME, DEFAULT_PROTOCOL, DEFAULT_REPORT_PREFIX};
use crate::error::{SessionError, SessionResult};
use std::path::{Path, PathBuf};

/// Core configuration resolved at startup.
#[derive(Clone, Debug)]
pub struct CoreConfig {
    ledger_path: PathBuf,
    protocol: String,
    report_prefix: String,
}

impl CoreConfig {
    /// Create a new `CoreConfig`.
    ///
    /// `protocol` is the analysis protocol requested for every submitted job and
    /// `report_prefix` names downloaded reports. Both must be non-blank; the prefix must
    /// also be usable inside a filename.
    pub fn new(
        ledger_path: PathBuf,
        protocol: impl Into<String>,
        report_prefix: impl Into<String>,
    ) -> SessionResult<Self> {
        let protocol = protocol.into().trim().to_string();
        let report_prefix = report_prefix.into().trim().to_string();

        if ledger_path.as_os_str().is_empty() {
            return Err(SessionError::InvalidConfig(
                "ledger path cannot be empty".into(),
            ));
        }
        if protocol.is_empty() {
            return Err(SessionError::InvalidConfig(
                "protocol cannot be empty".into(),
            ));
        }
        if report_prefix.is_empty() {
            return Err(SessionError::InvalidConfig(
                "report prefix cannot be empty".into(),
            ));
        }
        if report_prefix.contains(['/', '\\']) {
            return Err(SessionError::InvalidConfig(
                "report prefix must not contain path separators".into(),
            ));
        }

        Ok(Self {
            ledger_path,
            protocol,
            report_prefix,
        })
    }

    /// Configuration with the default protocol and report prefix.
    pub fn with_ledger_path(ledger_path: PathBuf) -> SessionResult<Self> {
        Self::new(ledger_path, DEFAULT_PROTOCOL, DEFAULT_REPORT_PREFIX)
    }

    pub fn ledger_path(&self) -> &Path {
        &self.ledger_path
    }

    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    pub fn report_prefix(&self) -> &str {
        &self.report_prefix
    }
}

/// Resolve the default ledger location.
///
/// Prefers the user's documents directory, then the home directory, then the current
/// working directory.
pub fn default_ledger_path() -> PathBuf {
    dirs::document_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(DEFAULT_LEDGER_FILENAME)
}

/// Pick the ledger path: an explicit, non-blank override wins over the default.
pub fn resolve_ledger_path(override_path: Option<PathBuf>) -> PathBuf {
    override_path
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(default_ledger_path)
}
