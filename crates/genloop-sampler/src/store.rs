//! Atomic, corruption-tolerant JSON document storage.
//!
//! Writes go to a sibling temp file which is fsynced, renamed over the
//! target, and followed by a parent-directory sync, so readers see either the
//! old document or the new one. Loads never fail the caller: a missing file
//! is an empty document and a malformed one is logged and discarded.

use std::fs::{self, File};
use std::io::{self, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use genloop_core::{GenError, GenResult};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

/// One JSON document at a fixed path.
#[derive(Debug, Clone)]
pub struct JsonStore<T> {
    path: PathBuf,
    _doc: PhantomData<fn() -> T>,
}

impl<T> JsonStore<T>
where
    T: Serialize + DeserializeOwned + Default,
{
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            _doc: PhantomData,
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the document; missing or malformed files yield `T::default()`.
    #[must_use]
    pub fn load(&self) -> T {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(error) if error.kind() == io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no persisted document; starting empty");
                return T::default();
            }
            Err(error) => {
                warn!(path = %self.path.display(), %error, "could not read persisted document");
                return T::default();
            }
        };

        match serde_json::from_slice(&bytes) {
            Ok(doc) => doc,
            Err(error) => {
                let corrupted = GenError::HistoryCorrupted {
                    path: self.path.clone(),
                    detail: error.to_string(),
                };
                warn!(error = %corrupted, "discarding corrupted document");
                T::default()
            }
        }
    }

    /// Atomically replace the document.
    ///
    /// # Errors
    ///
    /// Returns `GenError::Serialization` if `doc` cannot be encoded and
    /// `GenError::Io` if any filesystem step fails. The previous document is
    /// left intact on failure.
    pub fn save(&self, doc: &T) -> GenResult<()> {
        let bytes = serde_json::to_vec_pretty(doc).map_err(|error| GenError::Serialization {
            detail: error.to_string(),
        })?;

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }

        let tmp_path = self.temp_path();
        let written = write_synced(&tmp_path, &bytes)
            .and_then(|()| fs::rename(&tmp_path, &self.path))
            .and_then(|()| sync_parent_directory(&self.path));
        if let Err(error) = written {
            let _ = fs::remove_file(&tmp_path);
            return Err(error.into());
        }
        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        let file_name = self
            .path
            .file_name()
            .map_or_else(|| "store".into(), |name| name.to_string_lossy().into_owned());
        self.path
            .with_file_name(format!(".{file_name}.tmp.{}", std::process::id()))
    }
}

fn write_synced(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

#[cfg(unix)]
fn sync_parent_directory(path: &Path) -> io::Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => File::open(parent)?.sync_all(),
        _ => Ok(()),
    }
}

#[cfg(not(unix))]
fn sync_parent_directory(_path: &Path) -> io::Result<()> {
    Ok(())
}

/// Milliseconds since the Unix epoch, for `saved_at` stamps.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn now_unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_millis() as u64)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use serde::Deserialize;

    use super::*;

    #[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
    struct Doc {
        counts: BTreeMap<String, u64>,
    }

    fn doc(pairs: &[(&str, u64)]) -> Doc {
        Doc {
            counts: pairs.iter().map(|(k, v)| ((*k).to_owned(), *v)).collect(),
        }
    }

    #[test]
    fn missing_file_loads_default() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store: JsonStore<Doc> = JsonStore::new(dir.path().join("absent.json"));
        assert_eq!(store.load(), Doc::default());
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = JsonStore::new(dir.path().join("doc.json"));
        let original = doc(&[("a", 2), ("b", 5)]);
        store.save(&original).expect("save");
        assert_eq!(store.load(), original);
    }

    #[test]
    fn malformed_file_loads_default() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("doc.json");
        fs::write(&path, b"{\"counts\": {\"a\": ").expect("write garbage");
        let store: JsonStore<Doc> = JsonStore::new(&path);
        assert_eq!(store.load(), Doc::default());
    }

    #[test]
    fn save_creates_missing_parent_directories() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = JsonStore::new(dir.path().join("nested").join("deeper").join("doc.json"));
        store.save(&doc(&[("x", 1)])).expect("save");
        assert_eq!(store.load(), doc(&[("x", 1)]));
    }

    #[test]
    fn save_replaces_previous_document_and_leaves_no_temp_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = JsonStore::new(dir.path().join("doc.json"));
        store.save(&doc(&[("a", 1)])).expect("first save");
        store.save(&doc(&[("a", 2)])).expect("second save");
        assert_eq!(store.load(), doc(&[("a", 2)]));

        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .expect("read dir")
            .filter_map(Result::ok)
            .filter(|entry| entry.file_name().to_string_lossy().contains(".tmp."))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn save_into_unwritable_location_reports_io_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, b"file, not a directory").expect("write blocker");
        let store = JsonStore::new(blocker.join("doc.json"));
        assert!(matches!(
            store.save(&doc(&[("a", 1)])),
            Err(GenError::Io(_))
        ));
    }
}
