//! Persistent order ledger.
//!
//! The ledger maps remote order ids to the local subject each order was submitted for.
//! It is loaded once per session and written through to storage after every mutation,
//! so it survives restarts and crashes between user actions.
//!
//! # On-disk format
//!
//! A single flat JSON object:
//!
//! ```text
//! {"order-abc123":"Patient_042","order-def456":"Patient_043"}
//! ```
//!
//! # Load policy
//!
//! - Missing file: created with `{}`, ledger starts empty.
//! - Empty file, or a document that is not a JSON object: ledger starts empty and the
//!   file is left untouched until the next mutation overwrites it.
//! - Otherwise every entry is returned verbatim. Individual entries that are not valid
//!   identifiers (blank, non-string, control characters) are skipped with a warning and
//!   the rest are kept.
//!
//! Writes replace the file atomically (temporary file in the same directory, then
//! rename), so a crash mid-save leaves either the old or the new document.

use crate::constants::EMPTY_LEDGER_DOCUMENT;
use crate::error::{LedgerError, LedgerResult};
use dxo_types::{OrderId, SubjectId};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

pub type LedgerEntries = BTreeMap<OrderId, SubjectId>;

/// Backing storage for an [`OrderLedger`].
pub trait LedgerStore {
    /// Location shown to users in messages.
    fn location(&self) -> &Path;

    /// Reads the persisted entries, applying the load policy.
    fn read(&self) -> LedgerResult<LedgerEntries>;

    /// Replaces the persisted entries with `entries`.
    fn write(&self, entries: &LedgerEntries) -> LedgerResult<()>;
}

/// JSON file storage for the ledger.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    /// Prepares storage at `path`.
    ///
    /// Creates the parent directory if needed and checks it is writable.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::DirCreation`] if the directory cannot be created
    /// - [`LedgerError::NotWritable`] if the directory is read-only
    pub fn open(path: impl Into<PathBuf>) -> LedgerResult<Self> {
        let path = path.into();
        let dir = parent_dir(&path);

        if !dir.is_dir() {
            fs::create_dir_all(&dir).map_err(|source| LedgerError::DirCreation {
                path: dir.clone(),
                source,
            })?;
            tracing::info!("created ledger directory {}", dir.display());
        }

        let metadata = fs::metadata(&dir).map_err(|source| LedgerError::FileRead {
            path: dir.clone(),
            source,
        })?;
        if metadata.permissions().readonly() {
            return Err(LedgerError::NotWritable { path: dir });
        }

        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl LedgerStore for JsonFileStore {
    fn location(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> LedgerResult<LedgerEntries> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                fs::write(&self.path, EMPTY_LEDGER_DOCUMENT).map_err(|source| {
                    LedgerError::FileWrite {
                        path: self.path.clone(),
                        source,
                    }
                })?;
                tracing::info!("created ledger file {}", self.path.display());
                return Ok(LedgerEntries::new());
            }
            Err(source) => {
                return Err(LedgerError::FileRead {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        if contents.trim().is_empty() {
            tracing::warn!(
                "ledger file {} is empty, starting with no orders",
                self.path.display()
            );
            return Ok(LedgerEntries::new());
        }

        let document = match serde_json::from_str::<Map<String, Value>>(&contents) {
            Ok(document) => document,
            Err(e) => {
                tracing::warn!(
                    "ledger file {} is not a JSON object ({}), starting with no orders",
                    self.path.display(),
                    e
                );
                return Ok(LedgerEntries::new());
            }
        };

        Ok(document
            .into_iter()
            .filter_map(|(key, value)| match stored_entry(key.clone(), value) {
                Ok(entry) => Some(entry),
                Err(reason) => {
                    tracing::warn!(
                        "skipping ledger entry {:?} in {}: {}",
                        key,
                        self.path.display(),
                        reason
                    );
                    None
                }
            })
            .collect())
    }

    fn write(&self, entries: &LedgerEntries) -> LedgerResult<()> {
        let document = serde_json::to_string(entries).map_err(LedgerError::Serialization)?;
        let write_err = |source: std::io::Error| LedgerError::FileWrite {
            path: self.path.clone(),
            source,
        };

        let mut tmp = tempfile::NamedTempFile::new_in(parent_dir(&self.path)).map_err(write_err)?;
        tmp.write_all(document.as_bytes()).map_err(write_err)?;
        tmp.as_file().sync_all().map_err(write_err)?;
        tmp.persist(&self.path).map_err(|e| write_err(e.error))?;

        tracing::debug!(
            "saved {} orders to {}",
            entries.len(),
            self.path.display()
        );
        Ok(())
    }
}

/// Converts one persisted key/value pair, keeping both strings exactly as written.
fn stored_entry(key: String, value: Value) -> Result<(OrderId, SubjectId), String> {
    let subject = match value {
        Value::String(subject) => subject,
        other => return Err(format!("expected a string subject id, found {other}")),
    };
    let order_id = OrderId::from_stored(key).map_err(|e| e.to_string())?;
    let subject_id = SubjectId::from_stored(subject).map_err(|e| e.to_string())?;
    Ok((order_id, subject_id))
}

fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// In-memory view of the order ledger with write-through persistence.
///
/// When a save fails the in-memory change is kept and the error returned, so the
/// caller can report it and a later mutation will retry the write.
#[derive(Debug)]
pub struct OrderLedger<S = JsonFileStore> {
    entries: LedgerEntries,
    store: S,
}

impl OrderLedger<JsonFileStore> {
    /// Opens the JSON ledger at `path`, creating it if missing.
    pub fn load(path: impl Into<PathBuf>) -> LedgerResult<Self> {
        Self::with_store(JsonFileStore::open(path)?)
    }
}

impl<S: LedgerStore> OrderLedger<S> {
    /// Loads entries from `store`.
    pub fn with_store(store: S) -> LedgerResult<Self> {
        let entries = store.read()?;
        tracing::debug!(
            "loaded {} orders from {}",
            entries.len(),
            store.location().display()
        );
        Ok(Self { entries, store })
    }

    /// Writes the full mapping to storage.
    pub fn save(&self) -> LedgerResult<()> {
        self.store.write(&self.entries)
    }

    /// Records `order_id` as belonging to `subject_id` and saves.
    ///
    /// An existing entry for the same order is replaced; the previous subject is
    /// returned.
    pub fn add(
        &mut self,
        order_id: OrderId,
        subject_id: SubjectId,
    ) -> LedgerResult<Option<SubjectId>> {
        let previous = self.entries.insert(order_id, subject_id);
        self.save()?;
        Ok(previous)
    }

    /// Removes `order_id` if present and saves. Absent ids are not an error.
    pub fn remove(&mut self, order_id: &str) -> LedgerResult<Option<SubjectId>> {
        let removed = self.entries.remove(order_id);
        self.save()?;
        Ok(removed)
    }

    /// Removes every id in `expired` that is present, then saves once.
    ///
    /// Returns how many entries were removed.
    pub fn sweep<'a, I>(&mut self, expired: I) -> LedgerResult<usize>
    where
        I: IntoIterator<Item = &'a OrderId>,
    {
        let mut removed = 0;
        for order_id in expired {
            if self.entries.remove(order_id).is_some() {
                tracing::info!("order {} expired, removed from ledger", order_id);
                removed += 1;
            }
        }
        self.save()?;
        Ok(removed)
    }

    /// Subject for `order_id`, if tracked.
    pub fn get(&self, order_id: &str) -> Option<&SubjectId> {
        self.entries.get(order_id)
    }

    pub fn contains(&self, order_id: &str) -> bool {
        self.entries.contains_key(order_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in order-id order.
    pub fn iter(&self) -> impl Iterator<Item = (&OrderId, &SubjectId)> {
        self.entries.iter()
    }

    pub fn entries(&self) -> &LedgerEntries {
        &self.entries
    }

    pub fn location(&self) -> &Path {
        self.store.location()
    }

    pub fn store(&self) -> &S {
        &self.store
    }
}
