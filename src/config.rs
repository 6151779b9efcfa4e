//! Configuration for the vector store engine.
//!
//! Loaded from an optional TOML file layered with `SEMANTIC_STORE__*`
//! environment variables (double underscore separates nesting levels, e.g.
//! `SEMANTIC_STORE__INDEX__MIN_ROWS=512`).

use crate::error::Result;
use crate::vector::CollectionKind;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Environment variable prefix for configuration overrides.
pub const ENV_PREFIX: &str = "SEMANTIC_STORE";

/// Top-level engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Central directory holding one store per workspace hash. When unset,
    /// each workspace keeps its store under `<root>/.semantic-store/vectors`.
    pub storage_dir: Option<PathBuf>,
    /// Collections managed per workspace.
    pub collections: Vec<CollectionConfig>,
    pub index: IndexConfig,
    /// Number of records embedded concurrently during an upsert.
    pub embed_concurrency: usize,
    pub embedding: EmbeddingConfig,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            storage_dir: None,
            collections: vec![
                CollectionConfig::searchable(CollectionKind::code()),
                CollectionConfig::searchable(CollectionKind::knowledge()),
                CollectionConfig::searchable(CollectionKind::memories()),
                CollectionConfig {
                    name: CollectionKind::tools(),
                    searchable: false,
                },
            ],
            index: IndexConfig::default(),
            embed_concurrency: 4,
            embedding: EmbeddingConfig::default(),
        }
    }
}

impl StoreConfig {
    /// Load configuration from `path` (if given and present) and the
    /// environment, falling back to defaults for anything unset.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(::config::File::from(path).required(false));
        }
        let config = builder
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize::<Self>()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from TOML text.
    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(text).map_err(|e| crate::Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.collections.is_empty() {
            return Err(crate::Error::Config(
                "at least one collection must be configured".into(),
            ));
        }
        let mut seen = std::collections::HashSet::new();
        for collection in &self.collections {
            if collection.name.as_str().is_empty() {
                return Err(crate::Error::Config("collection name is empty".into()));
            }
            if !seen.insert(&collection.name) {
                return Err(crate::Error::Config(format!(
                    "collection {} is configured twice",
                    collection.name
                )));
            }
        }
        if self.embed_concurrency == 0 {
            return Err(crate::Error::Config(
                "embed_concurrency must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// All configured collection kinds, in configuration order.
    pub fn kinds(&self) -> impl Iterator<Item = &CollectionKind> {
        self.collections.iter().map(|c| &c.name)
    }

    pub fn is_configured(&self, kind: &CollectionKind) -> bool {
        self.kinds().any(|configured| configured == kind)
    }

    /// Kinds searched when the caller does not name any.
    pub fn searchable_kinds(&self) -> Vec<CollectionKind> {
        self.collections
            .iter()
            .filter(|c| c.searchable)
            .map(|c| c.name.clone())
            .collect()
    }
}

/// One managed collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionConfig {
    pub name: CollectionKind,
    /// Included in searches over all collections.
    #[serde(default = "default_true")]
    pub searchable: bool,
}

impl CollectionConfig {
    pub fn searchable(name: CollectionKind) -> Self {
        Self {
            name,
            searchable: true,
        }
    }
}

fn default_true() -> bool {
    true
}

/// ANN index construction parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Collections with fewer data rows are searched exhaustively.
    pub min_rows: usize,
    /// IVF partitions.
    pub num_partitions: u32,
    /// PQ sub-vectors; ignored when it does not divide the dimension.
    pub num_sub_vectors: u32,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            min_rows: 256,
            num_partitions: 16,
            num_sub_vectors: 8,
        }
    }
}

/// Settings for the bundled fastembed embedder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// fastembed model code used for queries and collections without an override.
    pub model: String,
    /// Per-collection model codes.
    pub overrides: BTreeMap<String, String>,
    /// Where downloaded model files are cached.
    pub cache_dir: Option<PathBuf>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: "Qdrant/all-MiniLM-L6-v2-onnx".into(),
            overrides: BTreeMap::new(),
            cache_dir: None,
        }
    }
}

impl EmbeddingConfig {
    /// Model cache directory, defaulting to the user cache dir.
    pub fn resolved_cache_dir(&self) -> PathBuf {
        self.cache_dir.clone().unwrap_or_else(|| {
            dirs::cache_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("semantic-store")
                .join("models")
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = StoreConfig::default();
        assert_eq!(config.index.min_rows, 256);
        assert_eq!(config.kinds().count(), 4);
        assert_eq!(
            config.searchable_kinds(),
            vec![
                CollectionKind::code(),
                CollectionKind::knowledge(),
                CollectionKind::memories()
            ]
        );
    }

    #[test]
    fn test_parse_config() {
        let toml_str = r#"
storage_dir = "/var/lib/semantic-store"
embed_concurrency = 8

[[collections]]
name = "code"

[[collections]]
name = "tools"
searchable = false

[index]
min_rows = 512

[embedding]
model = "BAAI/bge-small-en-v1.5"

[embedding.overrides]
tools = "Qdrant/all-MiniLM-L6-v2-onnx"
"#;

        let config = StoreConfig::from_toml(toml_str).unwrap();
        assert_eq!(
            config.storage_dir.as_deref(),
            Some(Path::new("/var/lib/semantic-store"))
        );
        assert_eq!(config.embed_concurrency, 8);
        assert_eq!(config.collections.len(), 2);
        assert!(config.collections[0].searchable);
        assert!(!config.collections[1].searchable);
        assert_eq!(config.index.min_rows, 512);
        assert_eq!(config.index.num_partitions, 16);
        assert_eq!(config.embedding.overrides["tools"], "Qdrant/all-MiniLM-L6-v2-onnx");
    }

    #[test]
    fn test_duplicate_collections_rejected() {
        let toml_str = r#"
[[collections]]
name = "code"

[[collections]]
name = "Code"
"#;
        assert!(StoreConfig::from_toml(toml_str).is_err());
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let config = StoreConfig::load(Some(&temp.path().join("absent.toml"))).unwrap();
        assert_eq!(config.collections.len(), 4);
    }
}
