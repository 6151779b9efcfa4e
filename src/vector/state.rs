//! Per-workspace mutable state owned by the engine's registry.

use crate::vector::models::{CollectionKind, StoreState};
use crate::vector::table::CollectionTable;
use crate::vector::workspace::WorkspaceKey;

use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Everything the engine tracks for one workspace. Locks are never held
/// across an await point.
pub struct WorkspaceState {
    key: WorkspaceKey,
    store_dir: PathBuf,
    /// Physical name -> provisioned collection. `try_get_with` joins
    /// concurrent provisioning of the same name and caches only successes.
    pub(crate) collections: moka::future::Cache<String, CollectionTable>,
    deferred: Mutex<HashSet<CollectionKind>>,
    indexed: Mutex<HashSet<CollectionKind>>,
    status: Mutex<StoreState>,
    /// Physical create-or-open runs of collection provisioning.
    provisions: AtomicUsize,
    /// IVF-PQ build attempts.
    index_builds: AtomicUsize,
}

impl WorkspaceState {
    pub(crate) fn new(key: WorkspaceKey, store_dir: PathBuf) -> Self {
        let status = StoreState {
            workspace: key.id().to_string(),
            ..Default::default()
        };
        Self {
            key,
            store_dir,
            collections: moka::future::Cache::builder().build(),
            deferred: Mutex::new(HashSet::new()),
            indexed: Mutex::new(HashSet::new()),
            status: Mutex::new(status),
            provisions: AtomicUsize::new(0),
            index_builds: AtomicUsize::new(0),
        }
    }

    pub fn key(&self) -> &WorkspaceKey {
        &self.key
    }

    /// Directory of this workspace's private store.
    pub fn store_dir(&self) -> &Path {
        &self.store_dir
    }

    pub fn is_deferred(&self, kind: &CollectionKind) -> bool {
        self.deferred.lock().contains(kind)
    }

    pub(crate) fn set_deferred(&self, kind: &CollectionKind, deferred: bool) -> bool {
        let mut set = self.deferred.lock();
        if deferred {
            set.insert(kind.clone())
        } else {
            set.remove(kind)
        }
    }

    /// Known this session to have an ANN index.
    pub fn is_indexed(&self, kind: &CollectionKind) -> bool {
        self.indexed.lock().contains(kind)
    }

    pub(crate) fn mark_indexed(&self, kind: &CollectionKind) {
        self.indexed.lock().insert(kind.clone());
    }

    pub(crate) fn forget_index(&self, kind: &CollectionKind) {
        self.indexed.lock().remove(kind);
    }

    /// Count one provisioning run; returns the running total.
    pub(crate) fn record_provision(&self) -> usize {
        self.provisions.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Count one index build attempt; returns the running total.
    pub(crate) fn record_index_build(&self) -> usize {
        self.index_builds.fetch_add(1, Ordering::Relaxed) + 1
    }

    #[cfg(test)]
    pub(crate) fn provisions(&self) -> usize {
        self.provisions.load(Ordering::Relaxed)
    }

    #[cfg(test)]
    pub(crate) fn index_builds(&self) -> usize {
        self.index_builds.load(Ordering::Relaxed)
    }

    /// Copy of the current status snapshot.
    pub fn snapshot(&self) -> StoreState {
        self.status.lock().clone()
    }

    /// Mutate the status under its lock and return the resulting snapshot.
    pub(crate) fn update_status(&self, update: impl FnOnce(&mut StoreState)) -> StoreState {
        let mut status = self.status.lock();
        update(&mut status);
        status.clone()
    }
}

/// Registry keyed by workspace hash: one state and one connection per
/// workspace.
pub(crate) struct WorkspaceRegistry {
    workspaces: Mutex<HashMap<String, Arc<WorkspaceState>>>,
    /// Workspace hash -> open connection, with in-flight deduplication.
    pub(crate) connections: moka::future::Cache<String, lancedb::Connection>,
}

impl WorkspaceRegistry {
    pub(crate) fn new() -> Self {
        Self {
            workspaces: Mutex::new(HashMap::new()),
            connections: moka::future::Cache::builder().build(),
        }
    }

    /// State for `key`, created on first use.
    pub(crate) fn get_or_insert(
        &self,
        key: WorkspaceKey,
        store_dir: impl FnOnce(&WorkspaceKey) -> PathBuf,
    ) -> Arc<WorkspaceState> {
        let mut workspaces = self.workspaces.lock();
        if let Some(state) = workspaces.get(key.hash()) {
            return state.clone();
        }
        let dir = store_dir(&key);
        let state = Arc::new(WorkspaceState::new(key, dir));
        workspaces.insert(state.key().hash().to_string(), state.clone());
        state
    }
}
