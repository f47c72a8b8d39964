//! Report formats and report file output.

use crate::error::{SessionError, SessionResult};
use chrono::{DateTime, Utc};
use dxo_types::OrderId;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Formats the analysis service can render a report in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    Png,
    Txt,
    Json,
    Xml,
}

impl ReportFormat {
    pub const ALL: [ReportFormat; 4] = [
        ReportFormat::Png,
        ReportFormat::Txt,
        ReportFormat::Json,
        ReportFormat::Xml,
    ];

    /// File extension, also the format name the service expects.
    pub fn extension(&self) -> &'static str {
        match self {
            ReportFormat::Png => "png",
            ReportFormat::Txt => "txt",
            ReportFormat::Json => "json",
            ReportFormat::Xml => "xml",
        }
    }

    /// Whether the service returns this format as raw bytes rather than text.
    pub fn is_binary(&self) -> bool {
        matches!(self, ReportFormat::Png)
    }

    /// Default report filename: `<prefix>_<order id>.<ext>`.
    pub fn file_name(&self, prefix: &str, order_id: &OrderId) -> String {
        format!("{}_{}.{}", prefix, order_id, self.extension())
    }
}

impl fmt::Display for ReportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unsupported report format '{0}' (expected png, txt, json or xml)")]
pub struct UnknownReportFormat(pub String);

impl FromStr for ReportFormat {
    type Err = UnknownReportFormat;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        ReportFormat::ALL
            .into_iter()
            .find(|f| f.extension() == wanted)
            .ok_or_else(|| UnknownReportFormat(s.to_string()))
    }
}

/// Report contents as returned by the service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportPayload {
    Binary(Vec<u8>),
    Text(String),
}

impl ReportPayload {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            ReportPayload::Binary(bytes) => bytes,
            ReportPayload::Text(text) => text.as_bytes(),
        }
    }

    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.as_bytes().is_empty()
    }
}

/// Record of a report written to disk.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ReportDownload {
    pub order_id: OrderId,
    pub format: ReportFormat,
    pub path: PathBuf,
    pub size_bytes: u64,
    pub saved_at: DateTime<Utc>,
}

/// Writes `payload` to `path`, replacing any existing file.
pub fn write_report(
    order_id: &OrderId,
    format: ReportFormat,
    payload: &ReportPayload,
    path: &Path,
) -> SessionResult<ReportDownload> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|source| SessionError::ReportWrite {
            path: parent.to_path_buf(),
            source,
        })?;
    }

    fs::write(path, payload.as_bytes()).map_err(|source| SessionError::ReportWrite {
        path: path.to_path_buf(),
        source,
    })?;

    tracing::info!(
        "report {} for order {} saved to {}",
        format,
        order_id,
        path.display()
    );

    Ok(ReportDownload {
        order_id: order_id.clone(),
        format,
        path: path.to_path_buf(),
        size_bytes: payload.len() as u64,
        saved_at: Utc::now(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn parses_formats_case_insensitively() {
        assert_eq!("PNG".parse::<ReportFormat>().unwrap(), ReportFormat::Png);
        assert_eq!(" json ".parse::<ReportFormat>().unwrap(), ReportFormat::Json);
        assert!("pdf".parse::<ReportFormat>().is_err());
    }

    #[test]
    fn only_png_is_binary() {
        let binary: Vec<_> = ReportFormat::ALL.iter().filter(|f| f.is_binary()).collect();
        assert_eq!(binary, vec![&ReportFormat::Png]);
    }

    #[test]
    fn file_name_combines_prefix_order_and_extension() {
        let order = OrderId::new("abc123").unwrap();
        assert_eq!(
            ReportFormat::Xml.file_name("diagnostic", &order),
            "diagnostic_abc123.xml"
        );
    }

    #[test]
    fn writes_binary_payload() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("reports").join("r.png");
        let order = OrderId::new("o1").unwrap();
        let payload = ReportPayload::Binary(vec![0x89, b'P', b'N', b'G']);

        let download = write_report(&order, ReportFormat::Png, &payload, &path).unwrap();

        assert_eq!(fs::read(&path).unwrap(), vec![0x89, b'P', b'N', b'G']);
        assert_eq!(download.size_bytes, 4);
        assert_eq!(download.format, ReportFormat::Png);
    }

    #[test]
    fn writes_text_payload() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("r.txt");
        let order = OrderId::new("o1").unwrap();
        let payload = ReportPayload::Text("MSAp probability: 0.12".into());

        write_report(&order, ReportFormat::Txt, &payload, &path).unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "MSAp probability: 0.12");
    }

    #[test]
    fn write_into_a_directory_path_fails() {
        let temp = TempDir::new().unwrap();
        let order = OrderId::new("o1").unwrap();
        let payload = ReportPayload::Text("x".into());

        let err = write_report(&order, ReportFormat::Txt, &payload, temp.path()).unwrap_err();
        assert!(matches!(err, SessionError::ReportWrite { .. }));
    }
}
