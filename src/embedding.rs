//! Embedding collaborator interface and the bundled fastembed implementation.

use crate::config::EmbeddingConfig;
use crate::error::{LlmError, Result};
use crate::vector::CollectionKind;

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// Turns text into vectors. Different collection kinds may be served by
/// different models; `None` selects the default model used for queries.
///
/// `dimension` must be stable for a given kind at any instant. A changed
/// value is treated as a model upgrade and migrates the collection.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str, kind: Option<&CollectionKind>) -> Result<Vec<f32>>;

    fn dimension(&self, kind: Option<&CollectionKind>) -> usize;
}

/// A loaded fastembed model and its output width.
struct LoadedModel {
    code: String,
    dim: usize,
    model: Arc<fastembed::TextEmbedding>,
}

/// Embedder backed by local fastembed ONNX models.
///
/// fastembed's TextEmbedding is blocking, so calls go through
/// spawn_blocking and the model is shared behind an Arc.
pub struct FastEmbedder {
    default: Arc<LoadedModel>,
    overrides: HashMap<CollectionKind, Arc<LoadedModel>>,
}

impl FastEmbedder {
    /// Load the default model and any per-collection overrides, downloading
    /// model files into the configured cache directory on first use.
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        // Limit ONNX Runtime threads to prevent memory pressure.
        if std::env::var("OMP_NUM_THREADS").is_err() {
            // SAFETY: Called during single-threaded init before any ONNX
            // threads are spawned.
            unsafe { std::env::set_var("OMP_NUM_THREADS", "2") };
        }

        let cache_dir = config.resolved_cache_dir();
        let mut loaded: HashMap<String, Arc<LoadedModel>> = HashMap::new();
        let mut load = |code: &str| -> Result<Arc<LoadedModel>> {
            if let Some(model) = loaded.get(code) {
                return Ok(model.clone());
            }
            let info = fastembed::TextEmbedding::list_supported_models()
                .into_iter()
                .find(|info| info.model_code == code)
                .ok_or_else(|| LlmError::UnknownModel(code.to_string()))?;

            let options = fastembed::InitOptions::new(info.model.clone())
                .with_cache_dir(cache_dir.clone())
                .with_show_download_progress(true);
            let model = fastembed::TextEmbedding::try_new(options)
                .map_err(|e| LlmError::EmbeddingFailed(e.to_string()))?;

            tracing::info!(model = code, dim = info.dim, "embedding model loaded");
            let model = Arc::new(LoadedModel {
                code: code.to_string(),
                dim: info.dim,
                model: Arc::new(model),
            });
            loaded.insert(code.to_string(), model.clone());
            Ok(model)
        };

        let default = load(&config.model)?;
        let mut overrides = HashMap::new();
        for (kind, code) in &config.overrides {
            overrides.insert(CollectionKind::new(kind), load(code)?);
        }

        Ok(Self { default, overrides })
    }

    fn model_for(&self, kind: Option<&CollectionKind>) -> &Arc<LoadedModel> {
        kind.and_then(|kind| self.overrides.get(kind))
            .unwrap_or(&self.default)
    }

    /// Generate embeddings for multiple texts with the model for `kind`.
    pub async fn embed_batch(
        &self,
        texts: Vec<String>,
        kind: Option<&CollectionKind>,
    ) -> Result<Vec<Vec<f32>>> {
        let model = self.model_for(kind).model.clone();
        tokio::task::spawn_blocking(move || {
            model
                .embed(texts, None)
                .map_err(|e| crate::Error::from(LlmError::EmbeddingFailed(e.to_string())))
        })
        .await
        .map_err(|e| crate::Error::Other(anyhow::anyhow!("embedding task failed: {}", e)))?
    }
}

#[async_trait]
impl Embedder for FastEmbedder {
    async fn embed(&self, text: &str, kind: Option<&CollectionKind>) -> Result<Vec<f32>> {
        let loaded = self.model_for(kind);
        let embeddings = self.embed_batch(vec![text.to_string()], kind).await?;
        embeddings.into_iter().next().ok_or_else(|| {
            LlmError::EmbeddingFailed(format!("{} returned no embedding", loaded.code)).into()
        })
    }

    fn dimension(&self, kind: Option<&CollectionKind>) -> usize {
        self.model_for(kind).dim
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Deterministic embedder for tests: hashes text into a unit vector.

    use super::*;
    use std::collections::hash_map::DefaultHasher;
    use std::collections::HashSet;
    use std::hash::{Hash, Hasher};
    use std::sync::atomic::{AtomicUsize, Ordering};

    pub struct HashEmbedder {
        dim: AtomicUsize,
        kind_dims: parking_lot::Mutex<HashMap<CollectionKind, usize>>,
        failing: parking_lot::Mutex<HashSet<String>>,
        failing_kinds: parking_lot::Mutex<HashSet<CollectionKind>>,
        pub calls: AtomicUsize,
    }

    impl HashEmbedder {
        pub fn new(dim: usize) -> Self {
            Self {
                dim: AtomicUsize::new(dim),
                kind_dims: parking_lot::Mutex::new(HashMap::new()),
                failing: parking_lot::Mutex::new(HashSet::new()),
                failing_kinds: parking_lot::Mutex::new(HashSet::new()),
                calls: AtomicUsize::new(0),
            }
        }

        pub fn set_dimension(&self, dim: usize) {
            self.dim.store(dim, Ordering::SeqCst);
        }

        pub fn set_kind_dimension(&self, kind: CollectionKind, dim: usize) {
            self.kind_dims.lock().insert(kind, dim);
        }

        /// Make embedding of this exact text fail.
        pub fn fail_on(&self, text: &str) {
            self.failing.lock().insert(text.to_string());
        }

        /// Make every embedding requested for this collection kind fail.
        pub fn fail_kind(&self, kind: CollectionKind) {
            self.failing_kinds.lock().insert(kind);
        }

        pub fn vector(text: &str, dim: usize) -> Vec<f32> {
            let mut vector: Vec<f32> = (0..dim)
                .map(|i| {
                    let mut hasher = DefaultHasher::new();
                    text.hash(&mut hasher);
                    i.hash(&mut hasher);
                    (hasher.finish() % 2000) as f32 / 1000.0 - 1.0
                })
                .collect();
            let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
            if norm > 0.0 {
                vector.iter_mut().for_each(|v| *v /= norm);
            }
            vector
        }
    }

    #[async_trait]
    impl Embedder for HashEmbedder {
        async fn embed(&self, text: &str, kind: Option<&CollectionKind>) -> Result<Vec<f32>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let kind_fails = kind.is_some_and(|kind| self.failing_kinds.lock().contains(kind));
            if kind_fails || self.failing.lock().contains(text) {
                return Err(LlmError::EmbeddingFailed(format!("cannot embed {text:?}")).into());
            }
            Ok(Self::vector(text, self.dimension(kind)))
        }

        fn dimension(&self, kind: Option<&CollectionKind>) -> usize {
            kind.and_then(|kind| self.kind_dims.lock().get(kind).copied())
                .unwrap_or_else(|| self.dim.load(Ordering::SeqCst))
        }
    }
}
