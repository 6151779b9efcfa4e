//! Ingestion: embed records, append them, keep the ANN index current.

use crate::error::{DbError, Error, Result};
use crate::vector::engine::VectorEngine;
use crate::vector::models::{CollectionKind, Record};

use futures::{StreamExt, TryStreamExt};
use std::path::Path;

impl VectorEngine {
    /// Embed and store a batch of records. Returns the number stored.
    ///
    /// Embedding runs with bounded concurrency and preserves record order.
    /// A failure on any record aborts the whole batch before anything is
    /// written. Records are appended; replacing a record means deleting it
    /// first.
    pub async fn upsert(
        &self,
        root: &Path,
        kind: &CollectionKind,
        records: Vec<Record>,
    ) -> Result<usize> {
        let workspace = self.workspace(root)?;
        let table = self.collection(&workspace, kind).await?;
        if records.is_empty() {
            return Ok(0);
        }

        let dimension = table.dimension();
        let table_name = table.name();
        let embedder = &self.embedder;
        let vectors: Vec<Vec<f32>> = futures::stream::iter(records.iter().enumerate())
            .map(|(index, record)| async move {
                let vector = embedder
                    .embed(&record.text, Some(kind))
                    .await
                    .map_err(|source| Error::EmbedRecord {
                        index,
                        id: record.id.clone(),
                        source: Box::new(source),
                    })?;
                if vector.len() != dimension {
                    return Err(Error::EmbedRecord {
                        index,
                        id: record.id.clone(),
                        source: Box::new(
                            DbError::DimensionMismatch {
                                table: table_name.to_string(),
                                expected: dimension,
                                actual: vector.len(),
                            }
                            .into(),
                        ),
                    });
                }
                Ok(vector)
            })
            .buffered(self.config.embed_concurrency.max(1))
            .try_collect()
            .await?;

        table.append(&records, &vectors).await?;
        tracing::debug!(table = table_name, records = records.len(), "appended records");

        if !workspace.is_deferred(kind) {
            self.build_index(&workspace, &table).await;
        }
        self.publish_stats(&workspace).await;

        Ok(records.len())
    }

    /// Bulk-load records in batches of `batch_size` with index builds
    /// deferred until the end, reporting progress under `source`.
    ///
    /// Deferral is always lifted. A batch failure takes precedence over a
    /// failure to resume indexing, which is only logged in that case.
    pub async fn ingest(
        &self,
        root: &Path,
        kind: &CollectionKind,
        source: &str,
        records: Vec<Record>,
        batch_size: usize,
    ) -> Result<usize> {
        let total = records.len() as u64;
        self.begin_deferred_indexing(root, kind)?;

        let mut stored = 0;
        let mut batches = records.into_iter().peekable();
        let loaded = async {
            self.update_progress(root, source, 0, total)?;
            while batches.peek().is_some() {
                let batch: Vec<Record> = batches.by_ref().take(batch_size.max(1)).collect();
                stored += self.upsert(root, kind, batch).await?;
                self.update_progress(root, source, stored as u64, total)?;
            }
            Ok::<_, Error>(())
        }
        .await;

        let resumed = self.end_deferred_indexing(root, kind).await;
        match (loaded, resumed) {
            (Err(error), Err(resume_error)) => {
                tracing::warn!(%resume_error, %kind, "failed to resume indexing after a failed ingestion");
                Err(error)
            }
            (Err(error), Ok(())) | (Ok(()), Err(error)) => Err(error),
            (Ok(()), Ok(())) => Ok(stored),
        }
    }

    /// Suspend index builds for `kind` during a bulk ingestion.
    pub fn begin_deferred_indexing(&self, root: &Path, kind: &CollectionKind) -> Result<()> {
        let workspace = self.workspace(root)?;
        if workspace.set_deferred(kind, true) {
            tracing::debug!(%kind, "index builds deferred");
        }
        Ok(())
    }

    /// Resume index builds for `kind` and build once if now warranted.
    pub async fn end_deferred_indexing(&self, root: &Path, kind: &CollectionKind) -> Result<()> {
        let workspace = self.workspace(root)?;
        workspace.set_deferred(kind, false);
        let table = self.collection(&workspace, kind).await?;
        self.build_index(&workspace, &table).await;
        self.publish_stats(&workspace).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::error::Error;
    use crate::vector::engine::testing::harness;
    use crate::vector::models::{CollectionKind, Record};

    use std::sync::atomic::Ordering;

    #[tokio::test]
    async fn embedding_failure_aborts_the_batch() {
        let h = harness(8);
        let code = CollectionKind::code();
        h.embedder.fail_on("broken");

        let records = vec![
            Record::new("ok-1", "fine"),
            Record::new("bad", "broken"),
            Record::new("ok-2", "also fine"),
        ];
        let error = h
            .engine
            .upsert(h.root(), &code, records)
            .await
            .expect_err("batch must fail");

        match error {
            Error::EmbedRecord { index, id, .. } => {
                assert_eq!(index, 1);
                assert_eq!(id, "bad");
            }
            other => panic!("unexpected error: {other}"),
        }

        let state = h.engine.refresh_stats(h.root()).await.unwrap();
        assert_eq!(state.tables["code"].count, 0);
    }

    #[tokio::test]
    async fn unconfigured_kind_is_rejected_before_provisioning() {
        let h = harness(8);
        let typo = CollectionKind::new("memorys");

        let error = h
            .engine
            .upsert(h.root(), &typo, vec![Record::new("m", "remember")])
            .await
            .expect_err("unknown collection");
        assert!(matches!(error, Error::UnknownCollection(ref name) if name == "memorys"));
        assert_eq!(h.embedder.calls.load(Ordering::SeqCst), 0);

        assert!(h.engine.ensure_collection(h.root(), &typo).await.is_err());
        assert!(h.engine.end_deferred_indexing(h.root(), &typo).await.is_err());

        let names = h.table_names().await;
        assert!(names.iter().all(|name| !name.ends_with("_memorys")), "{names:?}");
    }

    #[tokio::test]
    async fn empty_batch_provisions_without_embedding() {
        let h = harness(8);
        let stored = h
            .engine
            .upsert(h.root(), &CollectionKind::knowledge(), Vec::new())
            .await
            .expect("upsert");
        assert_eq!(stored, 0);
        assert_eq!(h.embedder.calls.load(Ordering::SeqCst), 0);

        let state = h.engine.refresh_stats(h.root()).await.unwrap();
        assert!(state.tables["knowledge"].exists);
    }

    #[tokio::test]
    async fn records_use_the_kind_specific_dimension() {
        let h = harness(16);
        let tools = CollectionKind::tools();
        h.embedder.set_kind_dimension(tools.clone(), 8);

        h.engine
            .upsert(h.root(), &tools, vec![Record::new("t1", "list files")])
            .await
            .expect("upsert");

        let table = h.engine.ensure_collection(h.root(), &tools).await.unwrap();
        assert_eq!(table.dimension(), 8);
        assert_eq!(table.count_records().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn failed_ingestion_reports_the_batch_error_and_resumes_indexing() {
        let h = harness(8);
        let code = CollectionKind::code();
        h.embedder.fail_on("broken");

        let mut records: Vec<Record> = (0..4)
            .map(|i| Record::new(format!("r{i}"), format!("record {i}")))
            .collect();
        records.push(Record::new("bad", "broken"));

        let error = h
            .engine
            .ingest(h.root(), &code, "batch.jsonl", records, 2)
            .await
            .expect_err("second batch fails");
        assert!(matches!(error, Error::EmbedRecord { ref id, .. } if id == "bad"));

        let workspace = h.engine.workspace(h.root()).unwrap();
        assert!(!workspace.is_deferred(&code));

        let state = h.engine.get_state(h.root()).unwrap();
        assert_eq!(state.tables["code"].count, 4);
        assert_eq!(state.sources["batch.jsonl"].indexed, 4);
        assert_eq!(state.sources["batch.jsonl"].total, 5);
    }

    #[tokio::test]
    async fn ingestion_into_unknown_kind_reports_it() {
        let h = harness(8);
        let error = h
            .engine
            .ingest(
                h.root(),
                &CollectionKind::new("notes"),
                "stdin",
                vec![Record::new("n", "note")],
                16,
            )
            .await
            .expect_err("unknown collection");
        assert!(matches!(error, Error::UnknownCollection(_)));
    }

    #[tokio::test]
    async fn ingestion_in_batches_builds_the_index_once() {
        let h = harness(16);
        let code = CollectionKind::code();
        let records: Vec<Record> = (0..300)
            .map(|i| Record::new(format!("r{i}"), format!("record about topic {i}")))
            .collect();

        let stored = h
            .engine
            .ingest(h.root(), &code, "bulk", records, 64)
            .await
            .expect("ingest");
        assert_eq!(stored, 300);

        let workspace = h.engine.workspace(h.root()).unwrap();
        assert!(workspace.is_indexed(&code));
        assert_eq!(workspace.index_builds(), 1);
        assert_eq!(h.engine.get_state(h.root()).unwrap().progress, 100);
    }

    #[tokio::test]
    async fn deferral_toggles_per_kind() {
        let h = harness(8);
        let code = CollectionKind::code();
        let workspace = h.engine.workspace(h.root()).unwrap();

        h.engine.begin_deferred_indexing(h.root(), &code).unwrap();
        assert!(workspace.is_deferred(&code));
        assert!(!workspace.is_deferred(&CollectionKind::memories()));

        h.engine
            .upsert(h.root(), &code, vec![Record::new("a", "alpha")])
            .await
            .expect("upsert");
        h.engine.end_deferred_indexing(h.root(), &code).await.expect("end");
        assert!(!workspace.is_deferred(&code));
        // One row is far below the index threshold.
        assert!(!workspace.is_indexed(&code));
    }
}
