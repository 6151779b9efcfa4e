//! Vector search tool for workspace retrieval.

use crate::vector::{CollectionKind, SearchHit, VectorEngine};

use rig::completion::ToolDefinition;
use rig::tool::Tool;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use std::path::PathBuf;
use std::sync::Arc;

/// Tool for searching one workspace's collections by semantic similarity.
#[derive(Clone)]
pub struct VectorSearchTool {
    engine: Arc<VectorEngine>,
    workspace_root: PathBuf,
}

impl VectorSearchTool {
    pub fn new(engine: Arc<VectorEngine>, workspace_root: impl Into<PathBuf>) -> Self {
        Self {
            engine,
            workspace_root: workspace_root.into(),
        }
    }
}

/// Error type for vector search tool.
#[derive(Debug, thiserror::Error)]
#[error("Vector search failed: {0}")]
pub struct VectorSearchError(String);

impl From<crate::error::Error> for VectorSearchError {
    fn from(e: crate::error::Error) -> Self {
        VectorSearchError(format!("{e}"))
    }
}

/// Arguments for the vector search tool.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct VectorSearchArgs {
    /// Natural language search query describing what you're looking for.
    pub query: String,
    /// Collections to search, e.g. "code", "knowledge", "memories". Empty searches all.
    #[serde(default)]
    pub collections: Vec<String>,
    /// Maximum number of results to return (1-20).
    #[serde(default = "default_limit")]
    pub limit: usize,
    /// Optional filter expression, e.g. "filePath = 'src/main.rs'".
    #[serde(default)]
    pub filter: Option<String>,
    /// Minimum relevance threshold (0.0-1.0). Results below this score are excluded.
    #[serde(default)]
    pub threshold: Option<f32>,
}

fn default_limit() -> usize {
    5
}

/// Output from the vector search tool.
#[derive(Debug, Serialize)]
pub struct VectorSearchOutput {
    pub results: Vec<SearchHit>,
    pub total_found: usize,
    pub query_time_ms: u64,
    /// Formatted summary of the results.
    pub summary: String,
}

impl Tool for VectorSearchTool {
    const NAME: &'static str = "vector_search";

    type Error = VectorSearchError;
    type Args = VectorSearchArgs;
    type Output = VectorSearchOutput;

    async fn definition(&self, _prompt: String) -> ToolDefinition {
        let collections: Vec<String> = self
            .engine
            .config()
            .kinds()
            .map(|kind| kind.to_string())
            .collect();

        ToolDefinition {
            name: Self::NAME.to_string(),
            description: "Search the workspace's indexed source code, knowledge articles and \
                memories using semantic similarity. Returns matching entries ranked by \
                relevance, with file locations and symbols where known."
                .to_string(),
            parameters: serde_json::json!({
                "type": "object",
                "required": ["query"],
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "Natural language search query. Describe what you're looking for."
                    },
                    "collections": {
                        "type": "array",
                        "items": { "type": "string", "enum": collections },
                        "description": "Collections to search. Omit to search every searchable collection."
                    },
                    "limit": {
                        "type": "integer",
                        "minimum": 1,
                        "maximum": 20,
                        "default": 5,
                        "description": "Maximum number of results to return."
                    },
                    "filter": {
                        "type": "string",
                        "description": "SQL-like filter over filePath, symbolName, symbolKind, startLine, endLine, kbId or articleTitle."
                    },
                    "threshold": {
                        "type": "number",
                        "minimum": 0.0,
                        "maximum": 1.0,
                        "description": "Minimum relevance threshold. Results below this score are excluded."
                    }
                }
            }),
        }
    }

    async fn call(&self, args: Self::Args) -> std::result::Result<Self::Output, Self::Error> {
        let start = std::time::Instant::now();

        if args.query.trim().is_empty() {
            return Err(VectorSearchError("query must not be empty".to_string()));
        }

        let limit = args.limit.clamp(1, 20);
        let kinds: Vec<CollectionKind> = args.collections.iter().map(CollectionKind::new).collect();

        let mut results = self
            .engine
            .search(
                &self.workspace_root,
                &args.query,
                limit,
                kinds,
                args.filter.as_deref(),
            )
            .await?;

        if let Some(threshold) = args.threshold {
            let threshold = threshold.clamp(0.0, 1.0);
            results.retain(|hit| hit.score >= threshold);
        }

        let summary = format_results(&results);

        Ok(VectorSearchOutput {
            total_found: results.len(),
            results,
            query_time_ms: start.elapsed().as_millis() as u64,
            summary,
        })
    }
}

/// Format search results for display to an agent.
fn format_results(results: &[SearchHit]) -> String {
    if results.is_empty() {
        return "No matching entries found.".to_string();
    }

    let mut output = String::from("## Search Results\n\n");

    for (i, hit) in results.iter().enumerate() {
        let title = hit
            .symbol
            .as_ref()
            .map(|symbol| format!("{} ({})", symbol.name, symbol.kind))
            .or_else(|| hit.article.as_ref().map(|article| article.title.clone()))
            .unwrap_or_else(|| hit.id.clone());

        output.push_str(&format!(
            "{}. **{}** [{}] (score: {:.2})\n   {}\n",
            i + 1,
            title,
            hit.kind,
            hit.score,
            build_highlight(&hit.text),
        ));
        if let Some(source) = &hit.source {
            match (source.start_line, source.end_line) {
                (Some(start), Some(end)) => {
                    output.push_str(&format!("   Path: {}:{start}-{end}\n", source.file_path))
                }
                (Some(line), None) | (None, Some(line)) => {
                    output.push_str(&format!("   Path: {}:{line}\n", source.file_path))
                }
                (None, None) => output.push_str(&format!("   Path: {}\n", source.file_path)),
            }
        }
        output.push('\n');
    }

    output
}

fn build_highlight(content: &str) -> String {
    if content.len() <= 200 {
        return content.to_string();
    }

    let mut end = 200;
    while !content.is_char_boundary(end) && end < content.len() {
        end += 1;
    }
    format!("{}...", &content[..end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector::{ArticleRef, SourceLocation, SymbolInfo};

    fn hit(id: &str, kind: CollectionKind, text: &str) -> SearchHit {
        SearchHit {
            id: id.to_string(),
            kind,
            text: text.to_string(),
            score: 0.9,
            distance: 0.25,
            metadata: serde_json::json!({}),
            source: None,
            symbol: None,
            article: None,
        }
    }

    #[test]
    fn empty_results_have_a_message() {
        assert_eq!(format_results(&[]), "No matching entries found.");
    }

    #[test]
    fn results_show_symbol_location_and_score() {
        let mut code = hit("sym:parse", CollectionKind::code(), "fn parse()");
        code.symbol = Some(SymbolInfo {
            name: "parse".into(),
            kind: "function".into(),
        });
        code.source = Some(SourceLocation {
            file_path: "src/parser.rs".into(),
            start_line: Some(10),
            end_line: Some(42),
        });
        let mut article = hit("kb:1", CollectionKind::knowledge(), "How parsing works");
        article.article = Some(ArticleRef {
            kb_id: "kb".into(),
            title: "Parsing guide".into(),
        });

        let output = format_results(&[code, article]);
        assert!(output.contains("1. **parse (function)** [code] (score: 0.90)"));
        assert!(output.contains("Path: src/parser.rs:10-42"));
        assert!(output.contains("2. **Parsing guide** [knowledge]"));
    }

    #[test]
    fn long_text_is_truncated_on_a_char_boundary() {
        let text = "é".repeat(150);
        let highlight = build_highlight(&text);
        assert!(highlight.ends_with("..."));
        assert!(highlight.len() < text.len() + 3);
    }

    #[tokio::test]
    async fn call_applies_threshold() {
        use crate::vector::Record;
        use crate::vector::engine::testing::harness;

        let h = harness(16);
        h.engine
            .upsert(
                h.root(),
                &CollectionKind::code(),
                vec![Record::new("a", "exact phrase"), Record::new("b", "unrelated words")],
            )
            .await
            .expect("upsert");

        let tool = VectorSearchTool::new(h.engine.clone(), h.root());
        let output = tool
            .call(VectorSearchArgs {
                query: "exact phrase".into(),
                collections: vec!["code".into()],
                limit: 5,
                filter: None,
                threshold: Some(0.99),
            })
            .await
            .expect("call");

        assert_eq!(output.total_found, 1);
        assert_eq!(output.results[0].id, "a");
        assert!(output.summary.contains("**a**"));
    }
}
