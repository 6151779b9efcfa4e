//! The engine: workspace registry, connection lifecycle and the public
//! entry points used by the indexing pipeline, search tools and status UI.

use crate::config::StoreConfig;
use crate::embedding::Embedder;
use crate::error::{DbError, Error, Result};
use crate::vector::filter::quote_identifiers;
use crate::vector::models::{CollectionKind, StoreState};
use crate::vector::state::{WorkspaceRegistry, WorkspaceState};
use crate::vector::status::Notifier;
use crate::vector::table::CollectionTable;
use crate::vector::workspace::WorkspaceKey;

use std::path::Path;
use std::sync::Arc;

/// Semantic vector store over per-workspace LanceDB databases.
///
/// One engine instance owns the registry of every workspace it has seen;
/// it is meant to be shared behind an `Arc` by all callers.
pub struct VectorEngine {
    pub(crate) config: StoreConfig,
    pub(crate) embedder: Arc<dyn Embedder>,
    pub(crate) notifier: Arc<dyn Notifier>,
    registry: WorkspaceRegistry,
}

impl VectorEngine {
    pub fn new(config: StoreConfig, embedder: Arc<dyn Embedder>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            config,
            embedder,
            notifier,
            registry: WorkspaceRegistry::new(),
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// State for a workspace root, created on first use.
    pub fn workspace(&self, root: &Path) -> Result<Arc<WorkspaceState>> {
        let key = WorkspaceKey::resolve(root)?;
        let storage_dir = self.config.storage_dir.as_deref();
        Ok(self
            .registry
            .get_or_insert(key, |key| key.store_dir(storage_dir)))
    }

    /// Open the workspace's connection, exactly once under concurrent first
    /// use. A failed attempt is reported to all of its waiters and is not
    /// cached, so the next call retries.
    pub(crate) async fn ensure_open(&self, workspace: &WorkspaceState) -> Result<lancedb::Connection> {
        let store_dir = workspace.store_dir().to_path_buf();
        self.registry
            .connections
            .try_get_with(workspace.key().hash().to_string(), async move {
                tokio::fs::create_dir_all(&store_dir).await?;
                let uri = store_dir.to_string_lossy().into_owned();
                let connection = lancedb::connect(&uri).execute().await.map_err(|e| {
                    DbError::Connect {
                        path: store_dir.clone(),
                        reason: e.to_string(),
                    }
                })?;
                tracing::info!(path = %store_dir.display(), "vector store opened");
                Ok::<_, Error>(connection)
            })
            .await
            .map_err(Error::shared)
    }

    /// Open the store, provision every configured collection and publish
    /// initial statistics.
    pub async fn init(&self, root: &Path) -> Result<StoreState> {
        let workspace = self.workspace(root)?;
        self.ensure_open(&workspace).await?;
        for kind in self.config.kinds() {
            self.collection(&workspace, kind).await?;
        }
        Ok(self.publish_stats(&workspace).await)
    }

    /// Last published snapshot for a workspace. Performs no I/O.
    pub fn get_state(&self, root: &Path) -> Result<StoreState> {
        Ok(self.workspace(root)?.snapshot())
    }

    /// Open a collection only if it already exists on disk. Unlike
    /// provisioning this never creates, migrates or caches the table.
    pub(crate) async fn existing_collection(
        &self,
        workspace: &WorkspaceState,
        kind: &CollectionKind,
    ) -> Result<Option<CollectionTable>> {
        let name = workspace.key().physical_name(kind);
        if let Some(table) = workspace.collections.get(&name).await {
            return Ok(Some(table));
        }
        let connection = self.ensure_open(workspace).await?;
        if !table_exists(&connection, &name).await? {
            return Ok(None);
        }
        let table = connection
            .open_table(&name)
            .execute()
            .await
            .map_err(|e| DbError::table(&name, e))?;
        let dimension = CollectionTable::declared_dimension(&table)
            .await?
            .unwrap_or_default();
        Ok(Some(CollectionTable::new(table, name, kind.clone(), dimension)))
    }

    /// Delete the records of one collection matching a filter expression.
    /// Failures are logged, not returned, so a reindex can continue.
    pub async fn delete_items(&self, root: &Path, kind: &CollectionKind, filter: &str) {
        let workspace = match self.workspace(root) {
            Ok(workspace) => workspace,
            Err(error) => {
                tracing::warn!(%error, root = %root.display(), "delete skipped, workspace unresolved");
                return;
            }
        };

        let predicate = quote_identifiers(filter);
        match self.existing_collection(&workspace, kind).await {
            Ok(Some(table)) => {
                if let Err(error) = table.delete_where(&predicate).await {
                    tracing::warn!(%error, %kind, filter = %predicate, "failed to delete vector records");
                }
            }
            Ok(None) => {
                tracing::debug!(%kind, "delete skipped, collection does not exist");
            }
            Err(error) => {
                tracing::warn!(%error, %kind, "failed to open collection for delete");
            }
        }

        self.publish_stats(&workspace).await;
    }

    /// Distinct source file paths stored in a collection.
    pub async fn get_indexed_paths(&self, root: &Path, kind: &CollectionKind) -> Result<Vec<String>> {
        let workspace = self.workspace(root)?;
        match self.existing_collection(&workspace, kind).await? {
            Some(table) => table.indexed_paths().await,
            None => Ok(Vec::new()),
        }
    }

    /// Drop one collection, or every configured collection when `kind` is
    /// `None`. Failures are logged, not returned.
    pub async fn purge(&self, root: &Path, kind: Option<&CollectionKind>) {
        let workspace = match self.workspace(root) {
            Ok(workspace) => workspace,
            Err(error) => {
                tracing::warn!(%error, root = %root.display(), "purge skipped, workspace unresolved");
                return;
            }
        };
        let connection = match self.ensure_open(&workspace).await {
            Ok(connection) => connection,
            Err(error) => {
                tracing::warn!(%error, "purge skipped, store unavailable");
                return;
            }
        };

        let kinds: Vec<CollectionKind> = match kind {
            Some(kind) => vec![kind.clone()],
            None => self.config.kinds().cloned().collect(),
        };

        for kind in kinds {
            let name = workspace.key().physical_name(&kind);
            workspace.collections.invalidate(&name).await;
            workspace.forget_index(&kind);

            match table_exists(&connection, &name).await {
                Ok(true) => match connection.drop_table(&name, &[]).await {
                    Ok(()) => tracing::info!(%kind, table = %name, "collection purged"),
                    Err(error) => tracing::warn!(%error, %kind, "failed to drop collection"),
                },
                Ok(false) => {}
                Err(error) => tracing::warn!(%error, %kind, "failed to list collections for purge"),
            }
        }

        self.publish_stats(&workspace).await;
    }

    /// Compact and prune old versions of every existing collection. Each
    /// append creates a new lance version; without this the count grows
    /// with every ingestion batch.
    pub async fn optimize(&self, root: &Path) -> Result<()> {
        let workspace = self.workspace(root)?;
        for kind in self.config.kinds() {
            let Some(table) = self.existing_collection(&workspace, kind).await? else {
                continue;
            };
            if let Err(error) = table.optimize().await {
                tracing::warn!(%error, %kind, "failed to optimize collection");
            }
        }
        Ok(())
    }
}

pub(crate) async fn table_exists(connection: &lancedb::Connection, name: &str) -> Result<bool> {
    let names = connection
        .table_names()
        .execute()
        .await
        .map_err(|e| DbError::table(name, e))?;
    Ok(names.iter().any(|existing| existing == name))
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::embedding::testing::HashEmbedder;
    use crate::vector::status::testing::CollectingNotifier;

    pub struct Harness {
        pub temp: tempfile::TempDir,
        pub embedder: Arc<HashEmbedder>,
        pub notifier: Arc<CollectingNotifier>,
        pub engine: Arc<VectorEngine>,
    }

    impl Harness {
        pub fn root(&self) -> &Path {
            self.temp.path()
        }

        /// Physical tables currently present in the workspace store.
        pub async fn table_names(&self) -> Vec<String> {
            let workspace = self.engine.workspace(self.root()).expect("workspace");
            let connection = self.engine.ensure_open(&workspace).await.expect("connection");
            connection.table_names().execute().await.expect("table names")
        }
    }

    pub fn harness(dimension: usize) -> Harness {
        harness_with(dimension, StoreConfig::default())
    }

    pub fn harness_with(dimension: usize, config: StoreConfig) -> Harness {
        let temp = tempfile::tempdir().expect("tempdir");
        let embedder = Arc::new(HashEmbedder::new(dimension));
        let notifier = Arc::new(CollectingNotifier::default());
        let engine = Arc::new(VectorEngine::new(
            config,
            embedder.clone(),
            notifier.clone(),
        ));
        Harness {
            temp,
            embedder,
            notifier,
            engine,
        }
    }
}
