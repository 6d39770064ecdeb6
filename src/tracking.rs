//! Persisted record of processed ids.
//!
//! The whole store is read at startup and rewritten in full after every
//! update, so a crash mid-batch loses at most the item in flight.

use crate::error::TrackingError;
use crate::model::TrackingRecord;
use std::collections::{BTreeMap, HashSet};
use std::io::Write;
use std::path::{Path, PathBuf};

pub const GENERATED_FILE_NAME: &str = ".invite-merge-generated.json";
pub const SENT_FILE_NAME: &str = "sent.json";

/// Anything that can answer "was this id already processed?".
pub trait ProcessedLookup {
    fn was_processed(&self, id: &str) -> bool;
}

impl ProcessedLookup for HashSet<String> {
    fn was_processed(&self, id: &str) -> bool {
        self.contains(id)
    }
}

#[derive(Debug)]
pub struct TrackingStore {
    path: PathBuf,
    records: BTreeMap<String, TrackingRecord>,
    // Set when the file on disk could not be parsed; it is backed up before the first rewrite.
    corrupt: bool,
}

impl TrackingStore {
    /// Load the store at `path`. A missing file yields an empty store; an
    /// unreadable or unparsable one is logged and also yields an empty store,
    /// and is backed up to `<file>.corrupt` before the first rewrite.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut store = Self {
            path,
            records: BTreeMap::new(),
            corrupt: false,
        };
        match std::fs::read(&store.path) {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => {}
            Ok(bytes) => match serde_json::from_slice::<BTreeMap<String, TrackingRecord>>(&bytes) {
                Ok(records) => store.records = records,
                Err(e) => {
                    log::warn!(
                        "tracking file {} is not valid ({e}); starting with an empty record",
                        store.path.display()
                    );
                    store.corrupt = true;
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                log::warn!(
                    "could not read tracking file {} ({e}); starting with an empty record",
                    store.path.display()
                );
                store.corrupt = true;
            }
        }
        store
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn was_processed(&self, id: &str) -> bool {
        self.records.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<&TrackingRecord> {
        self.records.get(id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> impl Iterator<Item = (&String, &TrackingRecord)> {
        self.records.iter()
    }

    pub fn processed_ids(&self) -> HashSet<String> {
        self.records.keys().cloned().collect()
    }

    /// Insert or overwrite the record for `id`, then rewrite the file.
    ///
    /// The in-memory record is kept even when the write fails.
    pub fn mark_processed(
        &mut self,
        id: impl Into<String>,
        record: TrackingRecord,
    ) -> Result<(), TrackingError> {
        self.records.insert(id.into(), record);
        self.persist()
    }

    fn persist(&mut self) -> Result<(), TrackingError> {
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir).map_err(|source| TrackingError::CreateDir {
            path: dir.clone(),
            source,
        })?;

        // Never overwrite a file we could not read until a copy of it exists.
        if self.corrupt {
            let backup = corrupt_backup_path(&self.path);
            match std::fs::copy(&self.path, &backup) {
                Ok(_) => {
                    log::warn!("previous tracking file preserved at {}", backup.display());
                    self.corrupt = false;
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => self.corrupt = false,
                Err(source) => return Err(TrackingError::Backup { path: backup, source }),
            }
        }

        let json = serde_json::to_string_pretty(&self.records)?;
        let write_err = |source| TrackingError::Write {
            path: self.path.clone(),
            source,
        };
        let mut tmp = tempfile::NamedTempFile::new_in(&dir).map_err(write_err)?;
        tmp.write_all(json.as_bytes()).map_err(write_err)?;
        tmp.write_all(b"\n").map_err(write_err)?;
        tmp.as_file().sync_all().map_err(write_err)?;
        tmp.persist(&self.path).map_err(|e| write_err(e.error))?;
        Ok(())
    }
}

impl ProcessedLookup for TrackingStore {
    fn was_processed(&self, id: &str) -> bool {
        TrackingStore::was_processed(self, id)
    }
}

fn corrupt_backup_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".corrupt");
    path.with_file_name(name)
}

/// Default tracking file for the generation tool: next to the generated files.
pub fn default_generated_path(output_dir: &Path) -> PathBuf {
    output_dir.join(GENERATED_FILE_NAME)
}

/// Default tracking file for the sending tool, shared across image folders.
pub fn default_sent_path() -> PathBuf {
    dirs::data_dir()
        .map(|d| d.join("invite-merge").join(SENT_FILE_NAME))
        .unwrap_or_else(|| PathBuf::from(".invite-merge-sent.json"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = TrackingStore::load(dir.path().join("absent.json"));
        assert!(store.is_empty());
    }

    #[test]
    fn records_round_trip_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("generated.json");
        let mut store = TrackingStore::load(&path);
        store
            .mark_processed("Anna B Lee", TrackingRecord::output("out/Invitation - Anna B Lee.png"))
            .unwrap();

        let reloaded = TrackingStore::load(&path);
        assert!(reloaded.was_processed("Anna B Lee"));
        assert_eq!(
            reloaded.get("Anna B Lee").and_then(|r| r.output.as_deref()),
            Some("out/Invitation - Anna B Lee.png")
        );
    }

    #[test]
    fn backup_path_appends_suffix() {
        assert_eq!(
            corrupt_backup_path(Path::new("/tmp/sent.json")),
            PathBuf::from("/tmp/sent.json.corrupt")
        );
    }
}
