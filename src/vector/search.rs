//! Fan-out semantic search across a workspace's collections.

use crate::error::Result;
use crate::vector::engine::VectorEngine;
use crate::vector::filter::quote_identifiers;
use crate::vector::models::{CollectionKind, SearchHit, SearchScope, is_seed_id};
use crate::vector::state::WorkspaceState;
use crate::vector::table::RawHit;

use std::collections::HashMap;
use std::path::Path;

impl VectorEngine {
    /// Search one or more collections of a workspace.
    ///
    /// 1. Embeds the query once with the default model.
    /// 2. Queries every target collection concurrently, re-embedding for
    ///    collections whose vector width differs from the default.
    /// 3. Merges, drops seed rows and keeps the best hit per (kind, id).
    /// 4. Sorts by similarity descending and truncates to `limit`.
    ///
    /// A collection that fails is logged and contributes no hits.
    pub async fn search(
        &self,
        root: &Path,
        query: &str,
        limit: usize,
        scope: impl Into<SearchScope>,
        filter: Option<&str>,
    ) -> Result<Vec<SearchHit>> {
        let query = query.trim();
        if query.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let workspace = self.workspace(root)?;
        let targets = match scope.into() {
            SearchScope::All => self.config.searchable_kinds(),
            SearchScope::Only(kinds) => kinds
                .into_iter()
                .filter(|kind| {
                    let configured = self.config.is_configured(kind);
                    if !configured {
                        tracing::warn!(%kind, "collection is not configured, skipping");
                    }
                    configured
                })
                .collect(),
        };
        if targets.is_empty() {
            return Ok(Vec::new());
        }
        let embedding = self.embedder.embed(query, None).await?;
        let filter = filter.map(quote_identifiers);

        let searches = targets.iter().map(|kind| {
            self.search_collection(&workspace, kind, query, &embedding, limit, filter.as_deref())
        });
        let results = futures::future::join_all(searches).await;

        let mut best: HashMap<(CollectionKind, String), SearchHit> = HashMap::new();
        for (kind, result) in targets.iter().zip(results) {
            let raw_hits = match result {
                Ok(hits) => hits,
                Err(error) => {
                    tracing::warn!(%error, %kind, "collection search failed, skipping");
                    continue;
                }
            };
            for raw in raw_hits {
                if is_seed_id(&raw.id) {
                    continue;
                }
                let hit = into_hit(kind.clone(), raw);
                let key = (hit.kind.clone(), hit.id.clone());
                match best.get(&key) {
                    Some(existing) if existing.score >= hit.score => {}
                    _ => {
                        best.insert(key, hit);
                    }
                }
            }
        }

        let mut hits: Vec<SearchHit> = best.into_values().collect();
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(limit);

        Ok(hits)
    }

    async fn search_collection(
        &self,
        workspace: &WorkspaceState,
        kind: &CollectionKind,
        query: &str,
        default_embedding: &[f32],
        limit: usize,
        filter: Option<&str>,
    ) -> Result<Vec<RawHit>> {
        let table = self.collection(workspace, kind).await?;
        // One extra candidate covers the seed row.
        let candidates = limit.saturating_add(1);
        if table.dimension() == default_embedding.len() {
            return table.nearest(default_embedding, candidates, filter).await;
        }
        let embedding = self.embedder.embed(query, Some(kind)).await?;
        table.nearest(&embedding, candidates, filter).await
    }
}

/// Map a cosine distance in `[0, 2]` to a similarity in `[0, 1]`.
pub fn similarity_from_distance(distance: f32) -> f32 {
    if distance.is_nan() {
        return 0.0;
    }
    (1.0 - distance / 2.0).clamp(0.0, 1.0)
}

fn into_hit(kind: CollectionKind, raw: RawHit) -> SearchHit {
    SearchHit {
        score: similarity_from_distance(raw.distance),
        distance: raw.distance,
        metadata: parse_metadata(&raw.metadata),
        id: raw.id,
        kind,
        text: raw.text,
        source: raw.source,
        symbol: raw.symbol,
        article: raw.article,
    }
}

/// Stored metadata is opaque JSON; anything but an object reads as empty.
fn parse_metadata(raw: &str) -> serde_json::Value {
    match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(value @ serde_json::Value::Object(_)) => value,
        _ => serde_json::Value::Object(serde_json::Map::new()),
    }
}
