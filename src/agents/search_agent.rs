//! Search support agent. Contributes retrieval tools to the registry; it is
//! never chosen as a routing category itself.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::search::{SearchApi, SearchKind};
use crate::tools::{tool_fn, ToolRegistry};

use super::{channel_stream, str_param, Agent, Chunk, ChunkStream, GenerationContext};

const DESCRIPTION: &str = "\
Provides web, scholarly, and news search. Used as a supporting step for
other agents rather than as a content generator.";

pub struct SearchAgent {
    search: Arc<dyn SearchApi>,
}

impl SearchAgent {
    pub fn new(search: Arc<dyn SearchApi>) -> Self {
        Self { search }
    }

    fn search_tool(
        search: Arc<dyn SearchApi>,
        kind: SearchKind,
    ) -> Arc<dyn crate::tools::ToolFn> {
        tool_fn(move |params: Value| {
            let search = search.clone();
            async move {
                let query = str_param(&params, "query").unwrap_or_default();
                let results = search.search(&query, kind).await;
                Ok(serde_json::to_value(results)?)
            }
        })
    }
}

#[async_trait]
impl Agent for SearchAgent {
    fn label(&self) -> &str {
        "search"
    }

    fn description(&self) -> &str {
        DESCRIPTION
    }

    fn register_tools(&self, registry: &mut ToolRegistry) -> anyhow::Result<()> {
        let query_params = BTreeMap::from([(
            "query".to_string(),
            "Search query string".to_string(),
        )]);

        registry.register(
            "search",
            "general_search",
            "Search the web for general information",
            query_params.clone(),
            Self::search_tool(self.search.clone(), SearchKind::General),
        )?;

        registry.register(
            "search",
            "scholar_search",
            "Search academic papers and scholarly sources",
            query_params.clone(),
            Self::search_tool(self.search.clone(), SearchKind::Scholar),
        )?;

        registry.register(
            "search",
            "sentiment_search",
            "Search recent news and social coverage",
            query_params,
            Self::search_tool(self.search.clone(), SearchKind::Social),
        )?;

        Ok(())
    }

    async fn generate(&self, prompt: String, _context: GenerationContext) -> ChunkStream {
        let search = self.search.clone();
        let label = self.label().to_string();

        channel_stream(4, move |tx| async move {
            let results = search.search(&prompt, SearchKind::General).await;
            let summary = if results.is_empty() {
                json!({"query": prompt, "results": []}).to_string()
            } else {
                serde_json::to_string_pretty(&results)
                    .unwrap_or_else(|_| "[]".to_string())
            };
            let _ = tx.send(Chunk::content(&label, summary)).await;
        })
    }
}
