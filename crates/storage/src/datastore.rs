//! DataStore (§4.7): the registry of open collections, each its own
//! [`Index`] rooted at a subdirectory of the data root.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use regex::Regex;
use tracing::{debug, warn};

use cdxd_core::{Error, Limits, Result};

use crate::index::Index;
use crate::wal::DurabilityMode;

/// Collection names are restricted to this pattern so a name can never
/// escape the data root as a path component (no `.`, `/`, or `\`).
fn name_pattern() -> &'static Regex {
    static RE: once_cell_lite::Lazy<Regex> =
        once_cell_lite::Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-]{1,64}$").unwrap());
    &RE
}

/// Minimal lazily-initialized static, grounded on the pattern used
/// throughout the corpus for regex statics without pulling in `once_cell`
/// as a full workspace dependency for one call site.
mod once_cell_lite {
    use std::sync::OnceLock;

    pub struct Lazy<T> {
        cell: OnceLock<T>,
        init: fn() -> T,
    }

    impl<T> Lazy<T> {
        pub const fn new(init: fn() -> T) -> Self {
            Lazy {
                cell: OnceLock::new(),
                init,
            }
        }
    }

    impl<T> std::ops::Deref for Lazy<T> {
        type Target = T;
        fn deref(&self) -> &T {
            self.cell.get_or_init(self.init)
        }
    }
}

struct Handle {
    index: Arc<Index>,
}

/// Registry of named collections, each backed by its own [`Index`] rooted
/// at `<data_root>/<name>/`. Bounds the number of simultaneously open
/// handles to [`Limits::max_open_collections`], evicting idle read-only
/// handles least-recently-used first.
pub struct DataStore {
    data_root: PathBuf,
    limits: Limits,
    mode: DurabilityMode,
    handles: RwLock<HashMap<String, Handle>>,
    lru: RwLock<Vec<String>>,
}

impl DataStore {
    /// Open a data store rooted at `data_root`. Does not eagerly open any
    /// collection; collections on disk are discovered lazily via
    /// [`DataStore::get_index`] or [`DataStore::list_collections`].
    pub fn open(data_root: impl Into<PathBuf>, limits: Limits, mode: DurabilityMode) -> Result<Self> {
        let data_root = data_root.into();
        std::fs::create_dir_all(&data_root).map_err(|e| Error::StorageError(e.to_string()))?;
        Ok(DataStore {
            data_root,
            limits,
            mode,
            handles: RwLock::new(HashMap::new()),
            lru: RwLock::new(Vec::new()),
        })
    }

    fn validate_name(name: &str) -> Result<()> {
        if !name_pattern().is_match(name) {
            return Err(Error::BadRequest(format!(
                "invalid collection name: {name:?}"
            )));
        }
        Ok(())
    }

    /// Get (optionally creating) the collection named `name`.
    ///
    /// Returns [`Error::NotFound`] if `create` is false and no such
    /// collection exists on disk yet.
    pub fn get_index(&self, name: &str, create: bool) -> Result<Arc<Index>> {
        Self::validate_name(name)?;

        if let Some(handle) = self.handles.read().get(name) {
            self.touch(name);
            return Ok(handle.index.clone());
        }

        let dir = self.data_root.join(name);
        if !create && !dir.exists() {
            return Err(Error::NotFound(format!("no such collection: {name}")));
        }

        self.evict_if_needed();

        let index = Arc::new(Index::open(&dir, self.limits.clone(), self.mode)?);
        self.handles
            .write()
            .insert(name.to_string(), Handle { index: index.clone() });
        self.touch(name);
        debug!(collection = name, "collection handle opened");
        Ok(index)
    }

    fn touch(&self, name: &str) {
        let mut lru = self.lru.write();
        lru.retain(|n| n != name);
        lru.push(name.to_string());
    }

    /// Every caller of [`DataStore::get_index`] gets its own `Arc<Index>`
    /// clone. `Index::begin_update`/`captures_range`/etc. all materialize
    /// their results eagerly rather than borrowing from the index, so the
    /// only way a collection can still be "in use" across calls is an
    /// outstanding clone of that `Arc` — which is exactly what
    /// `Arc::strong_count` counts. A handle is idle, and therefore safe to
    /// evict, only when the registry's own clone is the last one standing.
    fn is_idle(handle: &Handle) -> bool {
        Arc::strong_count(&handle.index) <= 1
    }

    fn evict_if_needed(&self) {
        loop {
            let over_limit = self.handles.read().len() >= self.limits.max_open_collections;
            if !over_limit {
                return;
            }
            let victim = {
                let lru = self.lru.read();
                let handles = self.handles.read();
                lru.iter()
                    .find(|name| handles.get(*name).map(Self::is_idle).unwrap_or(false))
                    .cloned()
            };
            match victim {
                Some(name) => {
                    self.handles.write().remove(&name);
                    self.lru.write().retain(|n| n != &name);
                    debug!(collection = %name, "evicted idle collection handle");
                }
                None => {
                    warn!("max_open_collections reached and no idle handle to evict");
                    return;
                }
            }
        }
    }

    /// List collection names known on disk under the data root.
    pub fn list_collections(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let entries =
            std::fs::read_dir(&self.data_root).map_err(|e| Error::StorageError(e.to_string()))?;
        for entry in entries {
            let entry = entry.map_err(|e| Error::StorageError(e.to_string()))?;
            if entry.path().is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    /// Path of the collection's directory on disk, without opening it.
    pub fn collection_dir(&self, name: &str) -> PathBuf {
        self.data_root.join(name)
    }

    /// Root directory this store manages.
    pub fn data_root(&self) -> &Path {
        &self.data_root
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn create_and_fetch_same_handle() {
        let dir = tempdir().unwrap();
        let store = DataStore::open(dir.path(), Limits::default(), DurabilityMode::Strict).unwrap();
        let a = store.get_index("prod", true).unwrap();
        let b = store.get_index("prod", false).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn missing_collection_without_create_is_not_found() {
        let dir = tempdir().unwrap();
        let store = DataStore::open(dir.path(), Limits::default(), DurabilityMode::Strict).unwrap();
        let err = store.get_index("absent", false).unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn rejects_path_traversal_names() {
        let dir = tempdir().unwrap();
        let store = DataStore::open(dir.path(), Limits::default(), DurabilityMode::Strict).unwrap();
        for bad in ["../escape", "a/b", "a\\b", "", "has space"] {
            let err = store.get_index(bad, true).unwrap_err();
            assert!(matches!(err, Error::BadRequest(_)), "name {bad:?} should be rejected");
        }
    }

    #[test]
    fn list_collections_reflects_created_ones() {
        let dir = tempdir().unwrap();
        let store = DataStore::open(dir.path(), Limits::default(), DurabilityMode::Strict).unwrap();
        store.get_index("prod", true).unwrap();
        store.get_index("staging", true).unwrap();
        let mut names = store.list_collections().unwrap();
        names.sort();
        assert_eq!(names, vec!["prod".to_string(), "staging".to_string()]);
    }

    #[test]
    fn evicts_idle_handle_when_over_limit() {
        let dir = tempdir().unwrap();
        let limits = Limits {
            max_open_collections: 1,
            ..Limits::default()
        };
        let store = DataStore::open(dir.path(), limits, DurabilityMode::Strict).unwrap();
        let first = store.get_index("a", true).unwrap();
        let first_ptr = Arc::as_ptr(&first);
        drop(first);
        store.get_index("b", true).unwrap();
        // `a` had no outstanding clone and was evicted; refetching it opens a fresh handle.
        let refetched = store.get_index("a", true).unwrap();
        assert_ne!(Arc::as_ptr(&refetched), first_ptr);
    }

    #[test]
    fn a_handle_with_an_outstanding_clone_is_never_evicted() {
        let dir = tempdir().unwrap();
        let limits = Limits {
            max_open_collections: 1,
            ..Limits::default()
        };
        let store = DataStore::open(dir.path(), limits, DurabilityMode::Strict).unwrap();
        let held = store.get_index("a", true).unwrap();
        // `a` has an outstanding clone (`held`), so opening `b` cannot evict it;
        // the store is allowed to temporarily exceed `max_open_collections`.
        store.get_index("b", true).unwrap();
        let a_again = store.get_index("a", true).unwrap();
        assert!(Arc::ptr_eq(&held, &a_again));
    }
}
