//! LanceDB table management for one collection: schema, seed row, batch
//! writes, nearest-neighbour queries and the IVF-PQ vector index.

use crate::config::IndexConfig;
use crate::error::{DbError, Result};
use crate::vector::models::{
    ArticleRef, CollectionKind, Record, SEED_ID, SourceLocation, SymbolInfo,
};

use arrow_array::cast::AsArray;
use arrow_array::types::{Float32Type, Int32Type};
use arrow_array::{Array, ArrayRef, FixedSizeListArray, Int32Array, RecordBatch, RecordBatchIterator, StringArray};
use arrow_schema::{DataType, Field, Schema};
use futures::TryStreamExt;
use lancedb::DistanceType;
use lancedb::index::Index;
use lancedb::index::vector::IvfPqIndexBuilder;
use lancedb::query::{ExecutableQuery, QueryBase, Select};
use std::collections::BTreeSet;
use std::sync::Arc;

pub const COL_ID: &str = "id";
pub const COL_VECTOR: &str = "vector";
pub const COL_TEXT: &str = "text";
pub const COL_KIND: &str = "kind";
pub const COL_METADATA: &str = "metadata";
pub const COL_FILE_PATH: &str = "filePath";
pub const COL_SYMBOL_NAME: &str = "symbolName";
pub const COL_SYMBOL_KIND: &str = "symbolKind";
pub const COL_START_LINE: &str = "startLine";
pub const COL_END_LINE: &str = "endLine";
pub const COL_KB_ID: &str = "kbId";
pub const COL_ARTICLE_TITLE: &str = "articleTitle";

/// Columns whose names must be backtick-quoted in filter expressions.
pub const CASE_SENSITIVE_COLUMNS: &[&str] = &[
    COL_FILE_PATH,
    COL_SYMBOL_NAME,
    COL_SYMBOL_KIND,
    COL_START_LINE,
    COL_END_LINE,
    COL_KB_ID,
    COL_ARTICLE_TITLE,
];

/// Distance column added by LanceDB to vector query results.
const DISTANCE_COLUMN: &str = "_distance";

/// Handle to one provisioned collection.
#[derive(Clone)]
pub struct CollectionTable {
    table: lancedb::Table,
    name: String,
    kind: CollectionKind,
    dimension: usize,
}

impl std::fmt::Debug for CollectionTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectionTable")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("dimension", &self.dimension)
            .finish()
    }
}

/// One row returned by a nearest-neighbour query, before ranking.
#[derive(Debug, Clone)]
pub struct RawHit {
    pub id: String,
    pub text: String,
    /// Metadata as stored: JSON text, unparsed.
    pub metadata: String,
    pub source: Option<SourceLocation>,
    pub symbol: Option<SymbolInfo>,
    pub article: Option<ArticleRef>,
    pub distance: f32,
}

/// Result of an index build request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexOutcome {
    Created,
    /// Another caller built it first.
    AlreadyExists,
}

/// Column values for one row of a write batch.
struct BatchRow<'a> {
    id: &'a str,
    vector: &'a [f32],
    text: &'a str,
    metadata: String,
    source: Option<&'a SourceLocation>,
    symbol: Option<&'a SymbolInfo>,
    article: Option<&'a ArticleRef>,
}

impl CollectionTable {
    pub(crate) fn new(
        table: lancedb::Table,
        name: String,
        kind: CollectionKind,
        dimension: usize,
    ) -> Self {
        Self {
            table,
            name,
            kind,
            dimension,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &CollectionKind {
        &self.kind
    }

    /// Declared vector width.
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Arrow schema shared by all collection kinds.
    pub fn schema(dimension: usize) -> Schema {
        Schema::new(vec![
            Field::new(COL_ID, DataType::Utf8, false),
            Field::new(
                COL_VECTOR,
                DataType::FixedSizeList(
                    Arc::new(Field::new("item", DataType::Float32, true)),
                    dimension as i32,
                ),
                false,
            ),
            Field::new(COL_TEXT, DataType::Utf8, false),
            Field::new(COL_KIND, DataType::Utf8, false),
            Field::new(COL_METADATA, DataType::Utf8, false),
            Field::new(COL_FILE_PATH, DataType::Utf8, true),
            Field::new(COL_SYMBOL_NAME, DataType::Utf8, true),
            Field::new(COL_SYMBOL_KIND, DataType::Utf8, true),
            Field::new(COL_START_LINE, DataType::Int32, true),
            Field::new(COL_END_LINE, DataType::Int32, true),
            Field::new(COL_KB_ID, DataType::Utf8, true),
            Field::new(COL_ARTICLE_TITLE, DataType::Utf8, true),
        ])
    }

    /// Vector width declared by an existing table's schema, if it has a
    /// fixed-size vector column.
    pub async fn declared_dimension(table: &lancedb::Table) -> Result<Option<usize>> {
        let schema = table
            .schema()
            .await
            .map_err(|e| DbError::table(table.name(), e))?;
        let dimension = schema
            .field_with_name(COL_VECTOR)
            .ok()
            .and_then(|field| match field.data_type() {
                DataType::FixedSizeList(_, size) => Some(*size as usize),
                _ => None,
            });
        Ok(dimension)
    }

    /// Create the physical table holding only the seed row. Returns `None`
    /// when a table of that name already exists.
    pub async fn create(
        connection: &lancedb::Connection,
        name: &str,
        kind: &CollectionKind,
        dimension: usize,
    ) -> Result<Option<lancedb::Table>> {
        let zeros = vec![0.0_f32; dimension];
        let seed = BatchRow {
            id: SEED_ID,
            vector: &zeros,
            text: "",
            metadata: "{}".to_string(),
            source: None,
            symbol: None,
            article: None,
        };
        let batch = build_batch(name, kind, dimension, &[seed])?;
        let batches = RecordBatchIterator::new(vec![Ok(batch)], Arc::new(Self::schema(dimension)));

        match connection
            .create_table(name, Box::new(batches))
            .execute()
            .await
        {
            Ok(table) => Ok(Some(table)),
            Err(error) if is_already_exists(&error) => Ok(None),
            Err(error) => Err(DbError::table(name, error).into()),
        }
    }

    /// Append records with their vectors in one write.
    pub async fn append(&self, records: &[Record], vectors: &[Vec<f32>]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        let rows: Vec<BatchRow<'_>> = records
            .iter()
            .zip(vectors)
            .map(|(record, vector)| BatchRow {
                id: &record.id,
                vector,
                text: &record.text,
                metadata: record.metadata.to_string(),
                source: record.source.as_ref(),
                symbol: record.symbol.as_ref(),
                article: record.article.as_ref(),
            })
            .collect();

        let batch = build_batch(&self.name, &self.kind, self.dimension, &rows)?;
        let batches =
            RecordBatchIterator::new(vec![Ok(batch)], Arc::new(Self::schema(self.dimension)));

        self.table
            .add(Box::new(batches))
            .execute()
            .await
            .map_err(|e| DbError::table(&self.name, e))?;

        Ok(())
    }

    /// Count data rows, excluding the seed row.
    pub async fn count_records(&self) -> Result<usize> {
        let total = self
            .table
            .count_rows(None)
            .await
            .map_err(|e| DbError::table(&self.name, e))?;
        let seeds = self
            .table
            .count_rows(Some(format!("{COL_ID} = '{SEED_ID}'")))
            .await
            .map_err(|e| DbError::table(&self.name, e))?;
        Ok(total.saturating_sub(seeds))
    }

    /// Delete every row matching a (already quoted) predicate.
    pub async fn delete_where(&self, predicate: &str) -> Result<()> {
        self.table
            .delete(predicate)
            .await
            .map_err(|e| DbError::table(&self.name, e))?;
        Ok(())
    }

    /// Nearest-neighbour query using cosine distance.
    /// Returns hits sorted by distance ascending.
    pub async fn nearest(
        &self,
        vector: &[f32],
        limit: usize,
        filter: Option<&str>,
    ) -> Result<Vec<RawHit>> {
        if vector.len() != self.dimension {
            return Err(DbError::DimensionMismatch {
                table: self.name.clone(),
                expected: self.dimension,
                actual: vector.len(),
            }
            .into());
        }

        let mut query = self
            .table
            .query()
            .nearest_to(vector)
            .map_err(|e| DbError::table(&self.name, e))?
            .distance_type(DistanceType::Cosine)
            .limit(limit);
        if let Some(filter) = filter {
            query = query.only_if(filter);
        }

        let results: Vec<RecordBatch> = query
            .execute()
            .await
            .map_err(|e| DbError::table(&self.name, e))?
            .try_collect()
            .await
            .map_err(|e| DbError::table(&self.name, e))?;

        let mut hits = Vec::new();
        for batch in results {
            let (Some(id_col), Some(text_col), Some(metadata_col), Some(dist_col)) = (
                batch.column_by_name(COL_ID),
                batch.column_by_name(COL_TEXT),
                batch.column_by_name(COL_METADATA),
                batch.column_by_name(DISTANCE_COLUMN),
            ) else {
                continue;
            };
            let ids = id_col.as_string::<i32>();
            let texts = text_col.as_string::<i32>();
            let metadata = metadata_col.as_string::<i32>();
            let distances = dist_col.as_primitive::<Float32Type>();

            for row in 0..batch.num_rows() {
                if !ids.is_valid(row) || !distances.is_valid(row) {
                    continue;
                }
                hits.push(RawHit {
                    id: ids.value(row).to_string(),
                    text: texts.value(row).to_string(),
                    metadata: if metadata.is_valid(row) {
                        metadata.value(row).to_string()
                    } else {
                        String::new()
                    },
                    source: source_at(&batch, row),
                    symbol: symbol_at(&batch, row),
                    article: article_at(&batch, row),
                    distance: distances.value(row),
                });
            }
        }

        Ok(hits)
    }

    /// Distinct source file paths stored in this collection, sorted.
    pub async fn indexed_paths(&self) -> Result<Vec<String>> {
        let results: Vec<RecordBatch> = self
            .table
            .query()
            .only_if(format!("`{COL_FILE_PATH}` IS NOT NULL"))
            .select(Select::columns(&[COL_FILE_PATH]))
            .execute()
            .await
            .map_err(|e| DbError::table(&self.name, e))?
            .try_collect()
            .await
            .map_err(|e| DbError::table(&self.name, e))?;

        let mut paths = BTreeSet::new();
        for batch in results {
            if let Some(path_col) = batch.column_by_name(COL_FILE_PATH) {
                let values = path_col.as_string::<i32>();
                for row in 0..values.len() {
                    if values.is_valid(row) {
                        paths.insert(values.value(row).to_string());
                    }
                }
            }
        }

        Ok(paths.into_iter().collect())
    }

    /// Whether an index already covers the vector column.
    pub async fn has_vector_index(&self) -> Result<bool> {
        let indices = self
            .table
            .list_indices()
            .await
            .map_err(|e| DbError::table(&self.name, e))?;
        Ok(indices
            .iter()
            .any(|index| index.columns.iter().any(|column| column == COL_VECTOR)))
    }

    /// Build an IVF-PQ index over the vector column.
    pub async fn create_vector_index(&self, config: &IndexConfig) -> Result<IndexOutcome> {
        let mut builder = IvfPqIndexBuilder::default()
            .distance_type(DistanceType::Cosine)
            .num_partitions(config.num_partitions);
        let sub_vectors = config.num_sub_vectors as usize;
        if sub_vectors > 0 && self.dimension % sub_vectors == 0 {
            builder = builder.num_sub_vectors(config.num_sub_vectors);
        } else {
            tracing::debug!(
                table = %self.name,
                dimension = self.dimension,
                sub_vectors,
                "sub-vector count does not divide dimension, using lance default"
            );
        }

        match self
            .table
            .create_index(&[COL_VECTOR], Index::IvfPq(builder))
            .execute()
            .await
        {
            Ok(()) => Ok(IndexOutcome::Created),
            Err(error) if is_already_exists(&error) => Ok(IndexOutcome::AlreadyExists),
            Err(error) => Err(DbError::table(&self.name, error).into()),
        }
    }

    /// Compact fragments and prune old versions.
    pub async fn optimize(&self) -> Result<()> {
        self.table
            .optimize(lancedb::table::OptimizeAction::All)
            .await
            .map_err(|e| DbError::table(&self.name, e))?;
        Ok(())
    }
}

/// "Already exists" style failures from table or index creation.
pub(crate) fn is_already_exists(error: &lancedb::Error) -> bool {
    if matches!(error, lancedb::Error::TableAlreadyExists { .. }) {
        return true;
    }
    let message = error.to_string().to_lowercase();
    message.contains("already exists") || message.contains("already indexed")
}

fn build_batch(
    table: &str,
    kind: &CollectionKind,
    dimension: usize,
    rows: &[BatchRow<'_>],
) -> Result<RecordBatch> {
    for row in rows {
        if row.vector.len() != dimension {
            return Err(DbError::DimensionMismatch {
                table: table.to_string(),
                expected: dimension,
                actual: row.vector.len(),
            }
            .into());
        }
    }

    let ids = StringArray::from(rows.iter().map(|r| r.id).collect::<Vec<_>>());
    let vectors = FixedSizeListArray::from_iter_primitive::<Float32Type, _, _>(
        rows.iter()
            .map(|r| Some(r.vector.iter().map(|v| Some(*v)).collect::<Vec<_>>())),
        dimension as i32,
    );
    let texts = StringArray::from(rows.iter().map(|r| r.text).collect::<Vec<_>>());
    let kinds = StringArray::from(vec![kind.as_str(); rows.len()]);
    let metadata = StringArray::from(
        rows.iter()
            .map(|r| r.metadata.as_str())
            .collect::<Vec<_>>(),
    );
    let file_paths = StringArray::from(
        rows.iter()
            .map(|r| r.source.map(|s| s.file_path.as_str()))
            .collect::<Vec<_>>(),
    );
    let symbol_names = StringArray::from(
        rows.iter()
            .map(|r| r.symbol.map(|s| s.name.as_str()))
            .collect::<Vec<_>>(),
    );
    let symbol_kinds = StringArray::from(
        rows.iter()
            .map(|r| r.symbol.map(|s| s.kind.as_str()))
            .collect::<Vec<_>>(),
    );
    let start_lines = Int32Array::from(
        rows.iter()
            .map(|r| r.source.and_then(|s| s.start_line))
            .collect::<Vec<_>>(),
    );
    let end_lines = Int32Array::from(
        rows.iter()
            .map(|r| r.source.and_then(|s| s.end_line))
            .collect::<Vec<_>>(),
    );
    let kb_ids = StringArray::from(
        rows.iter()
            .map(|r| r.article.map(|a| a.kb_id.as_str()))
            .collect::<Vec<_>>(),
    );
    let titles = StringArray::from(
        rows.iter()
            .map(|r| r.article.map(|a| a.title.as_str()))
            .collect::<Vec<_>>(),
    );

    RecordBatch::try_new(
        Arc::new(CollectionTable::schema(dimension)),
        vec![
            Arc::new(ids) as ArrayRef,
            Arc::new(vectors) as ArrayRef,
            Arc::new(texts) as ArrayRef,
            Arc::new(kinds) as ArrayRef,
            Arc::new(metadata) as ArrayRef,
            Arc::new(file_paths) as ArrayRef,
            Arc::new(symbol_names) as ArrayRef,
            Arc::new(symbol_kinds) as ArrayRef,
            Arc::new(start_lines) as ArrayRef,
            Arc::new(end_lines) as ArrayRef,
            Arc::new(kb_ids) as ArrayRef,
            Arc::new(titles) as ArrayRef,
        ],
    )
    .map_err(|e| DbError::table(table, e).into())
}

fn string_at(batch: &RecordBatch, column: &str, row: usize) -> Option<String> {
    let values = batch.column_by_name(column)?.as_string_opt::<i32>()?;
    values
        .is_valid(row)
        .then(|| values.value(row).to_string())
}

fn int_at(batch: &RecordBatch, column: &str, row: usize) -> Option<i32> {
    let values = batch
        .column_by_name(column)?
        .as_primitive_opt::<Int32Type>()?;
    values.is_valid(row).then(|| values.value(row))
}

fn source_at(batch: &RecordBatch, row: usize) -> Option<SourceLocation> {
    Some(SourceLocation {
        file_path: string_at(batch, COL_FILE_PATH, row)?,
        start_line: int_at(batch, COL_START_LINE, row),
        end_line: int_at(batch, COL_END_LINE, row),
    })
}

fn symbol_at(batch: &RecordBatch, row: usize) -> Option<SymbolInfo> {
    Some(SymbolInfo {
        name: string_at(batch, COL_SYMBOL_NAME, row)?,
        kind: string_at(batch, COL_SYMBOL_KIND, row).unwrap_or_default(),
    })
}

fn article_at(batch: &RecordBatch, row: usize) -> Option<ArticleRef> {
    Some(ArticleRef {
        kb_id: string_at(batch, COL_KB_ID, row)?,
        title: string_at(batch, COL_ARTICLE_TITLE, row).unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::testing::HashEmbedder;

    async fn fresh_table(dimension: usize) -> (tempfile::TempDir, CollectionTable) {
        let temp = tempfile::tempdir().expect("tempdir");
        let connection = lancedb::connect(temp.path().to_str().expect("path utf8"))
            .execute()
            .await
            .expect("connect lancedb");
        let kind = CollectionKind::code();
        let table = CollectionTable::create(&connection, "ws_test_code", &kind, dimension)
            .await
            .expect("create table")
            .expect("table did not exist");
        (
            temp,
            CollectionTable::new(table, "ws_test_code".into(), kind, dimension),
        )
    }

    fn records_with_vectors(texts: &[(&str, &str)], dimension: usize) -> (Vec<Record>, Vec<Vec<f32>>) {
        let records: Vec<Record> = texts
            .iter()
            .map(|(id, text)| {
                Record::new(*id, *text)
                    .with_source(format!("{id}.ts"), Some(1), Some(3))
                    .with_symbol(*id, "function")
            })
            .collect();
        let vectors = records
            .iter()
            .map(|r| HashEmbedder::vector(&r.text, dimension))
            .collect();
        (records, vectors)
    }

    #[tokio::test]
    async fn created_table_holds_only_the_seed() {
        let (_temp, table) = fresh_table(8).await;

        assert_eq!(table.count_records().await.expect("count"), 0);
        assert_eq!(
            CollectionTable::declared_dimension(&table.table)
                .await
                .expect("schema"),
            Some(8)
        );
        assert!(!table.has_vector_index().await.expect("list indices"));
    }

    #[tokio::test]
    async fn create_reports_existing_table() {
        let temp = tempfile::tempdir().expect("tempdir");
        let connection = lancedb::connect(temp.path().to_str().expect("path utf8"))
            .execute()
            .await
            .expect("connect lancedb");
        let kind = CollectionKind::memories();

        let first = CollectionTable::create(&connection, "dup", &kind, 4)
            .await
            .expect("first create");
        let second = CollectionTable::create(&connection, "dup", &kind, 4)
            .await
            .expect("second create");

        assert!(first.is_some());
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn append_then_nearest_finds_identical_text() {
        let (_temp, table) = fresh_table(16).await;
        let (records, vectors) = records_with_vectors(
            &[("parse", "fn parse(input: &str)"), ("render", "fn render(frame: &mut Frame)")],
            16,
        );
        table.append(&records, &vectors).await.expect("append");

        let hits = table.nearest(&vectors[1], 5, None).await.expect("nearest");
        let best = hits
            .iter()
            .filter(|hit| !crate::vector::models::is_seed_id(&hit.id))
            .min_by(|a, b| a.distance.total_cmp(&b.distance))
            .expect("at least one hit");
        assert_eq!(best.id, "render");
        assert!(best.distance.abs() < 1e-4);
        let source = best.source.as_ref().expect("source");
        assert_eq!(source.file_path, "render.ts");
        assert_eq!(source.start_line, Some(1));
        assert_eq!(best.symbol.as_ref().map(|s| s.kind.as_str()), Some("function"));
        assert!(best.article.is_none());
        assert_eq!(best.metadata, "{}");
    }

    #[tokio::test]
    async fn append_rejects_wrong_width() {
        let (_temp, table) = fresh_table(8).await;
        let records = vec![Record::new("a", "text")];
        let error = table
            .append(&records, &[vec![0.5; 4]])
            .await
            .expect_err("width mismatch");
        assert!(matches!(
            error,
            crate::Error::Db(DbError::DimensionMismatch {
                expected: 8,
                actual: 4,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn delete_and_paths_use_quoted_columns() {
        let (_temp, table) = fresh_table(8).await;
        let (records, vectors) =
            records_with_vectors(&[("a", "alpha"), ("b", "beta"), ("c", "gamma")], 8);
        table.append(&records, &vectors).await.expect("append");

        assert_eq!(
            table.indexed_paths().await.expect("paths"),
            vec!["a.ts".to_string(), "b.ts".to_string(), "c.ts".to_string()]
        );

        table
            .delete_where("`filePath` = 'b.ts'")
            .await
            .expect("delete");
        assert_eq!(table.count_records().await.expect("count"), 2);
        assert_eq!(
            table.indexed_paths().await.expect("paths"),
            vec!["a.ts".to_string(), "c.ts".to_string()]
        );
    }
}
