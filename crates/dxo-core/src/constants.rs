//! Constants used throughout the dxo core crate.

/// Filename of the order ledger when no explicit path is configured.
pub const DEFAULT_LEDGER_FILENAME: &str = "diagnostic_orders.config";

/// Analysis protocol requested for every submitted job unless configured otherwise.
pub const DEFAULT_PROTOCOL: &str = "Atypical/MSAp/PSP-v1.0";

/// Prefix for downloaded report filenames: `<prefix>_<order id>.<ext>`.
pub const DEFAULT_REPORT_PREFIX: &str = "diagnostic";

/// Error text the remote service returns once a job's backing storage has been
/// garbage-collected. Status queries failing with this text mark the order as expired.
pub const EXPIRED_JOB_SIGNAL: &str = "Bucket not found";

/// Contents written when a ledger file is first created.
pub const EMPTY_LEDGER_DOCUMENT: &str = "{}";
