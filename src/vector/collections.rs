//! Collection provisioning: create on first use, migrate on dimension change.

use crate::error::{DbError, Error, Result};
use crate::vector::engine::{VectorEngine, table_exists};
use crate::vector::models::CollectionKind;
use crate::vector::state::WorkspaceState;
use crate::vector::table::CollectionTable;

use std::path::Path;

impl VectorEngine {
    /// Open or create a collection for the workspace at `root`.
    pub async fn ensure_collection(
        &self,
        root: &Path,
        kind: &CollectionKind,
    ) -> Result<CollectionTable> {
        let workspace = self.workspace(root)?;
        self.collection(&workspace, kind).await
    }

    /// Provision a collection whose vector width matches the embedder's
    /// current dimension for `kind`.
    ///
    /// Concurrent callers for the same collection share a single attempt.
    /// An existing table of another width is dropped and recreated empty;
    /// the caller is expected to reindex.
    pub(crate) async fn collection(
        &self,
        workspace: &WorkspaceState,
        kind: &CollectionKind,
    ) -> Result<CollectionTable> {
        if !self.config.is_configured(kind) {
            return Err(Error::UnknownCollection(kind.to_string()));
        }
        let name = workspace.key().physical_name(kind);
        let dimension = self.embedder.dimension(Some(kind));

        if let Some(table) = workspace.collections.get(&name).await {
            if table.dimension() == dimension {
                return Ok(table);
            }
            tracing::info!(
                table = %name,
                cached = table.dimension(),
                current = dimension,
                "embedding dimension changed, re-provisioning collection"
            );
            workspace.collections.invalidate(&name).await;
            workspace.forget_index(kind);
        }

        let connection = self.ensure_open(workspace).await?;
        workspace
            .collections
            .try_get_with(
                name.clone(),
                provision(workspace, connection, name.clone(), kind.clone(), dimension),
            )
            .await
            .map_err(Error::shared)
    }
}

async fn provision(
    workspace: &WorkspaceState,
    connection: lancedb::Connection,
    name: String,
    kind: CollectionKind,
    dimension: usize,
) -> Result<CollectionTable> {
    let runs = workspace.record_provision();
    tracing::debug!(table = %name, dimension, runs, "provisioning collection");

    if table_exists(&connection, &name).await? {
        let table = open_table(&connection, &name).await?;
        match CollectionTable::declared_dimension(&table).await? {
            Some(existing) if existing == dimension => {
                tracing::debug!(table = %name, dimension, "opened existing collection");
                return Ok(CollectionTable::new(table, name, kind, dimension));
            }
            existing => {
                tracing::warn!(
                    table = %name,
                    existing = ?existing,
                    expected = dimension,
                    "vector dimension changed, dropping collection for reindex"
                );
                connection
                    .drop_table(&name, &[])
                    .await
                    .map_err(|e| DbError::table(&name, e))?;
                workspace.forget_index(&kind);
            }
        }
    }

    let table = match CollectionTable::create(&connection, &name, &kind, dimension).await? {
        Some(table) => {
            tracing::info!(table = %name, dimension, "created collection");
            table
        }
        // Lost a creation race to another process; use theirs.
        None => {
            let table = open_table(&connection, &name).await?;
            let existing = CollectionTable::declared_dimension(&table).await?;
            if existing != Some(dimension) {
                return Err(DbError::DimensionMismatch {
                    table: name,
                    expected: dimension,
                    actual: existing.unwrap_or_default(),
                }
                .into());
            }
            table
        }
    };

    Ok(CollectionTable::new(table, name, kind, dimension))
}

async fn open_table(connection: &lancedb::Connection, name: &str) -> Result<lancedb::Table> {
    connection
        .open_table(name)
        .execute()
        .await
        .map_err(|e| DbError::table(name, e).into())
}
