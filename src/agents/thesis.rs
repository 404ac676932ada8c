//! Long-form academic content agent.

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::llm::{ChatApi, ChatMessage, ChatRequest};
use crate::tools::{tool_fn, ToolRegistry};

use super::{format_search_results, str_param, stream_chat, Agent, ChunkStream, GenerationContext};

const DESCRIPTION: &str = "\
Specialized in creating long-form academic and research content. Best suited for:
- Complex academic topics requiring detailed analysis
- Research papers and scholarly articles
- Literature reviews and systematic analyses
- Technical documentation and white papers
- In-depth explanatory content
- Topics requiring citations and references
- Multi-section structured documents
- Comprehensive study analyses";

const GENERATE_PROMPT: &str = "\
Generate a focused thesis following this structure:
# Title
## Abstract
## Introduction
## Methodology
## Results
## Discussion
## Conclusion
## References

IMPORTANT:
- Maintain academic tone and style
- Use evidence-based arguments
- Include critical analysis
- Ensure logical flow between sections";

const ANALYZE_PROMPT: &str = "\
Analyze these research sources and synthesize key findings:
1. Identify main themes and patterns
2. Note any conflicting information
3. Extract key statistics and data points
4. Highlight research gaps
Provide a structured analysis.";

pub struct ThesisAgent {
    chat: Arc<dyn ChatApi>,
}

impl ThesisAgent {
    pub fn new(chat: Arc<dyn ChatApi>) -> Self {
        Self { chat }
    }
}

#[async_trait]
impl Agent for ThesisAgent {
    fn label(&self) -> &str {
        "thesis"
    }

    fn description(&self) -> &str {
        DESCRIPTION
    }

    fn register_tools(&self, registry: &mut ToolRegistry) -> anyhow::Result<()> {
        let chat = self.chat.clone();
        registry.register(
            "thesis",
            "analyze_sources",
            "Analyze and synthesize research sources",
            BTreeMap::from([
                ("sources".to_string(), "List of research sources".to_string()),
                ("input_data".to_string(), "Optional previous analysis result".to_string()),
            ]),
            tool_fn(move |params: Value| {
                let chat = chat.clone();
                async move {
                    let sources = params.get("sources").cloned().unwrap_or(Value::Null);
                    let previous = str_param(&params, "input_data").unwrap_or_else(|| "None".to_string());
                    if sources.is_null() && previous == "None" {
                        return Ok(json!("No research sources available for analysis."));
                    }

                    let request = ChatRequest::new(vec![
                        ChatMessage::system(ANALYZE_PROMPT),
                        ChatMessage::user(format!(
                            "Analyze these sources:\n{}\nPrevious Analysis:\n{previous}",
                            serde_json::to_string_pretty(&sources)?
                        )),
                    ])
                    .with_temperature(0.7);

                    let content = chat
                        .complete(request)
                        .await
                        .context("source analysis call failed")?;
                    Ok(Value::String(content))
                }
            }),
        )?;

        let chat = self.chat.clone();
        registry.register(
            "thesis",
            "generate",
            "Generate structured thesis content",
            BTreeMap::from([
                ("topic".to_string(), "Main thesis topic".to_string()),
                ("analysis".to_string(), "Research analysis to base thesis on".to_string()),
                ("input_data".to_string(), "Optional previous content".to_string()),
            ]),
            tool_fn(move |params: Value| {
                let chat = chat.clone();
                async move {
                    let topic = str_param(&params, "topic")
                        .filter(|t| !t.trim().is_empty())
                        .ok_or_else(|| anyhow!("topic cannot be empty"))?;
                    let analysis = str_param(&params, "analysis").unwrap_or_default();
                    let previous = str_param(&params, "input_data").unwrap_or_else(|| "None".to_string());

                    let request = ChatRequest::new(vec![
                        ChatMessage::system(GENERATE_PROMPT),
                        ChatMessage::user(format!(
                            "Topic: {topic}\n\nResearch Analysis:\n{analysis}\n\nPrevious Content:\n{previous}\n\nPlease generate a comprehensive thesis following the structure provided."
                        )),
                    ])
                    .with_temperature(0.7);

                    let content = chat
                        .complete(request)
                        .await
                        .context("thesis generation call failed")?;
                    if content.trim().len() < 100 {
                        return Err(anyhow!("generated thesis content is too short"));
                    }
                    Ok(Value::String(content))
                }
            }),
        )?;

        Ok(())
    }

    async fn generate(&self, prompt: String, context: GenerationContext) -> ChunkStream {
        let request = ChatRequest::new(vec![
            ChatMessage::system(GENERATE_PROMPT),
            ChatMessage::user(format!(
                "Topic: {prompt}\n\nResearch Sources:\n{}",
                format_search_results(&context.search_results)
            )),
        ])
        .with_temperature(0.7);

        stream_chat(self.chat.clone(), self.label().to_string(), request)
    }
}
