//! Data analysis agent. Records each tool analysis into shared memory.

use anyhow::Context;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::llm::{ChatApi, ChatMessage, ChatRequest};
use crate::memory::{MemoryKind, MemorySink};
use crate::tools::{tool_fn, ToolRegistry};

use super::{format_search_results, str_param, stream_chat, Agent, ChunkStream, GenerationContext};

const DESCRIPTION: &str = "\
Specialized in analyzing data and extracting insights. Best suited for:
- Statistical summaries and breakdowns
- Pattern and anomaly detection in text or data
- Comparative analysis
- Structured reporting on datasets
- Interpreting numbers and metrics";

const TEMPERATURE: f32 = 0.2;

const ANALYZE_PROMPT: &str = "\
Analyze the provided text or data. Identify:
1. Key themes and patterns
2. Notable statistics or figures
3. Anomalies or outliers
4. Actionable insights
Present findings as structured markdown.";

pub struct DataAnalysisAgent {
    chat: Arc<dyn ChatApi>,
    memory: Arc<dyn MemorySink>,
}

impl DataAnalysisAgent {
    pub fn new(chat: Arc<dyn ChatApi>, memory: Arc<dyn MemorySink>) -> Self {
        Self { chat, memory }
    }
}

#[async_trait]
impl Agent for DataAnalysisAgent {
    fn label(&self) -> &str {
        "data_analysis"
    }

    fn description(&self) -> &str {
        DESCRIPTION
    }

    fn register_tools(&self, registry: &mut ToolRegistry) -> anyhow::Result<()> {
        let chat = self.chat.clone();
        let memory = self.memory.clone();
        registry.register(
            "analysis",
            "analyze_text",
            "Analyze text or data and extract insights",
            BTreeMap::from([
                ("text".to_string(), "Text or data to analyze".to_string()),
                ("input_data".to_string(), "Optional previous step output".to_string()),
            ]),
            tool_fn(move |params: Value| {
                let chat = chat.clone();
                let memory = memory.clone();
                async move {
                    let text = str_param(&params, "text")
                        .or_else(|| str_param(&params, "input_data"))
                        .unwrap_or_default();

                    let request = ChatRequest::new(vec![
                        ChatMessage::system(ANALYZE_PROMPT),
                        ChatMessage::user(text.clone()),
                    ])
                    .with_temperature(TEMPERATURE);

                    let content = chat
                        .complete(request)
                        .await
                        .context("text analysis call failed")?;

                    memory
                        .append(
                            MemoryKind::Analysis,
                            json!({"tool": "analysis_analyze_text", "text_length": text.len()}),
                            None,
                        )
                        .await?;

                    Ok(json!({"type": "analysis", "content": content}))
                }
            }),
        )?;

        Ok(())
    }

    async fn generate(&self, prompt: String, context: GenerationContext) -> ChunkStream {
        let request = ChatRequest::new(vec![
            ChatMessage::system(ANALYZE_PROMPT),
            ChatMessage::user(format!(
                "Analyze: {prompt}\nSource Data:\n{}",
                format_search_results(&context.search_results)
            )),
        ])
        .with_temperature(TEMPERATURE);

        stream_chat(self.chat.clone(), self.label().to_string(), request)
    }
}
