//! Approximate nearest-neighbour index management.

use crate::error::Result;
use crate::vector::engine::VectorEngine;
use crate::vector::models::CollectionKind;
use crate::vector::state::WorkspaceState;
use crate::vector::table::{CollectionTable, IndexOutcome};

use std::path::Path;

impl VectorEngine {
    /// Build the IVF-PQ index for a collection once it holds enough rows.
    /// Safe to call repeatedly; only collection provisioning can fail.
    pub async fn ensure_index(&self, root: &Path, kind: &CollectionKind) -> Result<()> {
        let workspace = self.workspace(root)?;
        let table = self.collection(&workspace, kind).await?;
        self.build_index(&workspace, &table).await;
        Ok(())
    }

    pub(crate) async fn build_index(&self, workspace: &WorkspaceState, table: &CollectionTable) {
        let kind = table.kind();
        if workspace.is_indexed(kind) {
            return;
        }

        match table.has_vector_index().await {
            Ok(true) => {
                workspace.mark_indexed(kind);
                return;
            }
            Ok(false) => {}
            Err(error) => {
                tracing::debug!(%error, table = table.name(), "could not list indices, trying to build");
            }
        }

        let rows = match table.count_records().await {
            Ok(rows) => rows,
            Err(error) => {
                tracing::warn!(%error, table = table.name(), "failed to count rows for indexing");
                return;
            }
        };
        let min_rows = self.config.index.min_rows;
        if rows < min_rows {
            tracing::debug!(table = table.name(), rows, min_rows, "too few rows for an ANN index");
            return;
        }

        let attempts = workspace.record_index_build();
        tracing::debug!(table = table.name(), rows, attempts, "building IVF-PQ vector index");
        match table.create_vector_index(&self.config.index).await {
            Ok(IndexOutcome::Created) => {
                tracing::info!(table = table.name(), rows, "built IVF-PQ vector index");
                workspace.mark_indexed(kind);
            }
            Ok(IndexOutcome::AlreadyExists) => workspace.mark_indexed(kind),
            Err(error) => {
                tracing::warn!(%error, table = table.name(), "failed to build vector index");
            }
        }
    }
}
