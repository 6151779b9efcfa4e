//! Collection kinds, records and search results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Identifier prefix marking rows that are not user data.
pub const SEED_PREFIX: &str = "__seed__";

/// Identifier of the placeholder row inserted when a collection is created.
pub const SEED_ID: &str = "__seed__schema";

/// Whether an identifier belongs to a seed row.
pub fn is_seed_id(id: &str) -> bool {
    id.starts_with(SEED_PREFIX)
}

/// Classification of a collection. The set of kinds is configuration; the
/// associated constructors cover the defaults.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct CollectionKind(String);

impl CollectionKind {
    /// Build a kind from a name. Names are lowercased and anything outside
    /// `[a-z0-9_]` becomes `_` so they can be embedded in table names.
    pub fn new(name: impl AsRef<str>) -> Self {
        let normalized = name
            .as_ref()
            .trim()
            .chars()
            .map(|c| {
                let c = c.to_ascii_lowercase();
                if c.is_ascii_alphanumeric() || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        Self(normalized)
    }

    /// Code symbols.
    pub fn code() -> Self {
        Self::new("code")
    }

    /// Knowledge-base articles.
    pub fn knowledge() -> Self {
        Self::new("knowledge")
    }

    /// Agent memories.
    pub fn memories() -> Self {
        Self::new("memories")
    }

    /// Tool descriptions.
    pub fn tools() -> Self {
        Self::new("tools")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for CollectionKind {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<&str> for CollectionKind {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<CollectionKind> for String {
    fn from(value: CollectionKind) -> Self {
        value.0
    }
}

impl std::fmt::Display for CollectionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where a record came from in the workspace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLocation {
    pub file_path: String,
    #[serde(default)]
    pub start_line: Option<i32>,
    #[serde(default)]
    pub end_line: Option<i32>,
}

/// Code symbol a record describes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolInfo {
    pub name: String,
    pub kind: String,
}

/// Knowledge-base article a record belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArticleRef {
    pub kb_id: String,
    pub title: String,
}

/// A unit of ingestion. The vector is produced by the embedder at upsert
/// time from `text`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    pub text: String,
    /// Free-form metadata, stored as JSON text.
    #[serde(default = "empty_metadata")]
    pub metadata: serde_json::Value,
    #[serde(default)]
    pub source: Option<SourceLocation>,
    #[serde(default)]
    pub symbol: Option<SymbolInfo>,
    #[serde(default)]
    pub article: Option<ArticleRef>,
}

fn empty_metadata() -> serde_json::Value {
    serde_json::Value::Object(Default::default())
}

impl Record {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            metadata: empty_metadata(),
            source: None,
            symbol: None,
            article: None,
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_source(
        mut self,
        file_path: impl Into<String>,
        start_line: Option<i32>,
        end_line: Option<i32>,
    ) -> Self {
        self.source = Some(SourceLocation {
            file_path: file_path.into(),
            start_line,
            end_line,
        });
        self
    }

    pub fn with_symbol(mut self, name: impl Into<String>, kind: impl Into<String>) -> Self {
        self.symbol = Some(SymbolInfo {
            name: name.into(),
            kind: kind.into(),
        });
        self
    }

    pub fn with_article(mut self, kb_id: impl Into<String>, title: impl Into<String>) -> Self {
        self.article = Some(ArticleRef {
            kb_id: kb_id.into(),
            title: title.into(),
        });
        self
    }
}

/// Which collections a search fans out to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum SearchScope {
    /// Every collection configured as searchable.
    #[default]
    All,
    /// Exactly these collections.
    Only(Vec<CollectionKind>),
}

impl From<CollectionKind> for SearchScope {
    fn from(kind: CollectionKind) -> Self {
        SearchScope::Only(vec![kind])
    }
}

impl From<Vec<CollectionKind>> for SearchScope {
    fn from(kinds: Vec<CollectionKind>) -> Self {
        if kinds.is_empty() {
            SearchScope::All
        } else {
            SearchScope::Only(kinds)
        }
    }
}

/// A ranked search result.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub id: String,
    pub kind: CollectionKind,
    pub text: String,
    /// Similarity in `[0, 1]`, higher is closer.
    pub score: f32,
    /// Raw cosine distance reported by the store.
    pub distance: f32,
    pub metadata: serde_json::Value,
    pub source: Option<SourceLocation>,
    pub symbol: Option<SymbolInfo>,
    pub article: Option<ArticleRef>,
}

/// Per-collection statistics reported to the status layer.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CollectionStats {
    /// Data rows, excluding the seed row.
    pub count: usize,
    pub exists: bool,
    pub last_indexed: Option<DateTime<Utc>>,
}

/// Progress counters reported by one indexing source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SourceProgress {
    pub indexed: u64,
    pub total: u64,
}

/// Snapshot of a workspace's store, as published to the notification sink.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StoreState {
    pub workspace: String,
    /// Keyed by collection kind name.
    pub tables: BTreeMap<String, CollectionStats>,
    pub indexing: bool,
    /// Aggregate progress over all sources, `0..=100`.
    pub progress: u8,
    pub sources: BTreeMap<String, SourceProgress>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_names_are_normalized_for_table_names() {
        assert_eq!(CollectionKind::new("Code").as_str(), "code");
        assert_eq!(CollectionKind::new(" kb-articles ").as_str(), "kb_articles");
        assert_eq!(CollectionKind::from("tools"), CollectionKind::tools());
    }

    #[test]
    fn seed_ids_are_recognized_by_prefix() {
        assert!(is_seed_id(SEED_ID));
        assert!(is_seed_id("__seed__other"));
        assert!(!is_seed_id("seed"));
        assert!(!is_seed_id("src/main.rs#main"));
    }

    #[test]
    fn record_deserializes_with_defaults() {
        let record: Record = serde_json::from_str(
            r#"{"id":"a","text":"fn main() {}","source":{"file_path":"src/main.rs"}}"#,
        )
        .unwrap();
        assert_eq!(record.metadata, serde_json::json!({}));
        let source = record.source.unwrap();
        assert_eq!(source.file_path, "src/main.rs");
        assert_eq!(source.start_line, None);
        assert!(record.symbol.is_none());
    }

    #[test]
    fn empty_kind_list_means_all() {
        assert_eq!(SearchScope::from(Vec::new()), SearchScope::All);
        assert_eq!(
            SearchScope::from(CollectionKind::code()),
            SearchScope::Only(vec![CollectionKind::code()])
        );
    }
}
