//! Durable bubble position and counter.
//!
//! The store is a small JSON document namespaced under one storage domain:
//!
//! ```json
//! { "spark_overlay_prefs": { "last_count": 7, "bubble_x": 22, "bubble_y": 330 } }
//! ```
//!
//! Keys are additive only. Unknown keys and domains are preserved on write.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tracing::{debug, warn};

use crate::geometry::Point;

pub const STORE_DOMAIN: &str = "spark_overlay_prefs";
pub const STORE_FILE_NAME: &str = "overlay.json";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to access overlay store at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to encode overlay store: {0}")]
    Encode(#[from] serde_json::Error),
}

/// The persisted fields of the bubble
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverlayPrefs {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bubble_x: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bubble_y: Option<i32>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl OverlayPrefs {
    pub fn bubble_position(&self) -> Option<Point> {
        Some(Point::new(self.bubble_x?, self.bubble_y?))
    }
}

#[derive(Debug, Default)]
struct StoreInner {
    prefs: OverlayPrefs,
    /// Other storage domains found in the file
    foreign: Map<String, Value>,
}

/// Shared handle to the durable overlay state.
///
/// Cloning is cheap; all clones see the same data. A store without a path
/// keeps everything in memory.
#[derive(Debug, Clone)]
pub struct PositionStore {
    path: Option<PathBuf>,
    inner: Arc<Mutex<StoreInner>>,
}

impl PositionStore {
    /// Open (or lazily create) the store file inside `dir`.
    ///
    /// A missing file yields empty prefs; a corrupt file is logged and
    /// replaced on the next write.
    pub fn open(dir: &Path) -> Result<Self, StoreError> {
        let path = dir.join(STORE_FILE_NAME);
        let inner = match fs::read(&path) {
            Ok(bytes) => parse_document(&bytes).unwrap_or_else(|e| {
                warn!("Ignoring unreadable overlay store {:?}: {}", path, e);
                StoreInner::default()
            }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => StoreInner::default(),
            Err(source) => return Err(StoreError::Io { path, source }),
        };
        debug!("Overlay store loaded from {:?}: {:?}", path, inner.prefs);
        Ok(Self {
            path: Some(path),
            inner: Arc::new(Mutex::new(inner)),
        })
    }

    pub fn in_memory() -> Self {
        Self {
            path: None,
            inner: Arc::new(Mutex::new(StoreInner::default())),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn prefs(&self) -> OverlayPrefs {
        self.lock().prefs.clone()
    }

    pub fn last_count(&self) -> u32 {
        self.lock().prefs.last_count.unwrap_or(0)
    }

    pub fn bubble_position(&self) -> Option<Point> {
        self.lock().prefs.bubble_position()
    }

    pub fn save_count(&self, count: u32) -> Result<(), StoreError> {
        let mut inner = self.lock();
        inner.prefs.last_count = Some(count);
        self.flush(&inner)
    }

    pub fn save_position(&self, position: Point) -> Result<(), StoreError> {
        let mut inner = self.lock();
        inner.prefs.bubble_x = Some(position.x);
        inner.prefs.bubble_y = Some(position.y);
        self.flush(&inner)
    }

    fn lock(&self) -> MutexGuard<'_, StoreInner> {
        // A poisoned lock only means a writer panicked mid-update; the data is still usable.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn flush(&self, inner: &StoreInner) -> Result<(), StoreError> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let mut document = inner.foreign.clone();
        document.insert(STORE_DOMAIN.to_string(), serde_json::to_value(&inner.prefs)?);
        let bytes = serde_json::to_vec_pretty(&Value::Object(document))?;

        let io_err = |source| StoreError::Io {
            path: path.clone(),
            source,
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        // Write-then-rename so a crash never leaves a truncated file behind
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, bytes).map_err(io_err)?;
        fs::rename(&tmp, path).map_err(io_err)?;
        Ok(())
    }
}

fn parse_document(bytes: &[u8]) -> Result<StoreInner, serde_json::Error> {
    let mut document: Map<String, Value> = serde_json::from_slice(bytes)?;
    let prefs = match document.remove(STORE_DOMAIN) {
        Some(value) => serde_json::from_value(value)?,
        None => OverlayPrefs::default(),
    };
    Ok(StoreInner {
        prefs,
        foreign: document,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_store_has_no_position_and_zero_count() {
        let dir = tempfile::tempdir().unwrap();
        let store = PositionStore::open(dir.path()).unwrap();
        assert_eq!(store.last_count(), 0);
        assert_eq!(store.bubble_position(), None);
    }

    #[test]
    fn values_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let store = PositionStore::open(dir.path()).unwrap();
        store.save_count(7).unwrap();
        store.save_position(Point::new(8, 300)).unwrap();

        let reopened = PositionStore::open(dir.path()).unwrap();
        assert_eq!(reopened.last_count(), 7);
        assert_eq!(reopened.bubble_position(), Some(Point::new(8, 300)));
    }

    #[test]
    fn file_is_namespaced_and_keeps_unknown_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(STORE_FILE_NAME);
        fs::write(
            &path,
            r#"{"other_domain":{"a":1},"spark_overlay_prefs":{"last_count":3,"theme":"dark"}}"#,
        )
        .unwrap();

        let store = PositionStore::open(dir.path()).unwrap();
        assert_eq!(store.last_count(), 3);
        store.save_position(Point::new(10, 20)).unwrap();

        let written: Value = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        assert_eq!(written["other_domain"]["a"], 1);
        let domain = &written[STORE_DOMAIN];
        assert_eq!(domain["last_count"], 3);
        assert_eq!(domain["bubble_x"], 10);
        assert_eq!(domain["bubble_y"], 20);
        assert_eq!(domain["theme"], "dark");
    }

    #[test]
    fn corrupt_file_is_replaced_on_write() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(STORE_FILE_NAME), b"{not json").unwrap();

        let store = PositionStore::open(dir.path()).unwrap();
        assert_eq!(store.last_count(), 0);
        store.save_count(2).unwrap();
        assert_eq!(PositionStore::open(dir.path()).unwrap().last_count(), 2);
    }

    #[test]
    fn partial_position_is_not_reported() {
        let store = PositionStore::in_memory();
        {
            let mut inner = store.lock();
            inner.prefs.bubble_x = Some(4);
        }
        assert_eq!(store.bubble_position(), None);
    }

    #[test]
    fn clones_share_state() {
        let store = PositionStore::in_memory();
        let other = store.clone();
        other.save_count(11).unwrap();
        assert_eq!(store.last_count(), 11);
    }
}
