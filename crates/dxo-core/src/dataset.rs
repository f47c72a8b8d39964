//! Local imaging datasets available for submission.

use crate::error::{SessionError, SessionResult};
use dxo_types::SubjectId;
use std::fs;
use std::path::{Path, PathBuf};

/// A dataset that can be uploaded: the subject it belongs to and the directory holding
/// its image files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dataset {
    pub subject: SubjectId,
    pub path: PathBuf,
}

/// Something that can enumerate uploadable datasets.
pub trait DatasetSource {
    fn datasets(&self) -> SessionResult<Vec<Dataset>>;
}

/// Datasets laid out as one directory per subject:
///
/// ```text
/// <root>/
/// ├── Patient_042/
/// │   └── study1/
/// │       └── series1/     <- first directory holding files is uploaded
/// │           ├── IM0001.dcm
/// │           └── IM0002.dcm
/// └── Patient_043/
///     └── IM0001.dcm       <- files directly in the subject directory
/// ```
///
/// Hidden entries (names starting with `.`) are ignored. Subject directories with no
/// files anywhere beneath them are skipped.
#[derive(Debug, Clone)]
pub struct DirectoryDatasetSource {
    root: PathBuf,
}

impl DirectoryDatasetSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl DatasetSource for DirectoryDatasetSource {
    fn datasets(&self) -> SessionResult<Vec<Dataset>> {
        let mut datasets = Vec::new();

        for entry in sorted_entries(&self.root)? {
            if !entry.is_dir() || is_hidden(&entry) {
                continue;
            }

            let Some(name) = entry.file_name().and_then(|n| n.to_str()) else {
                tracing::warn!("skipping non UTF-8 dataset directory {}", entry.display());
                continue;
            };
            let subject = match SubjectId::new(name) {
                Ok(subject) => subject,
                Err(e) => {
                    tracing::warn!("skipping dataset directory {}: {}", entry.display(), e);
                    continue;
                }
            };

            match first_dir_with_files(&entry)? {
                Some(path) => datasets.push(Dataset { subject, path }),
                None => tracing::debug!("no files under {}, skipping", entry.display()),
            }
        }

        Ok(datasets)
    }
}

fn sorted_entries(dir: &Path) -> SessionResult<Vec<PathBuf>> {
    let read_err = |source: std::io::Error| SessionError::DatasetRead {
        path: dir.to_path_buf(),
        source,
    };

    let mut entries = fs::read_dir(dir)
        .map_err(read_err)?
        .map(|e| e.map(|e| e.path()))
        .collect::<Result<Vec<_>, _>>()
        .map_err(read_err)?;
    entries.sort();
    Ok(entries)
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with('.'))
}

/// Depth-first search (in name order) for the first directory that directly contains
/// a regular, non-hidden file.
fn first_dir_with_files(dir: &Path) -> SessionResult<Option<PathBuf>> {
    let entries = sorted_entries(dir)?;

    if entries.iter().any(|p| p.is_file() && !is_hidden(p)) {
        return Ok(Some(dir.to_path_buf()));
    }

    for child in entries.iter().filter(|p| p.is_dir() && !is_hidden(p)) {
        if let Some(found) = first_dir_with_files(child)? {
            return Ok(Some(found));
        }
    }

    Ok(None)
}
