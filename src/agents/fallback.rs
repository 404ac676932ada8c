//! Terminal recovery agent. Absorbs everything no specialist claims and
//! never escalates; a failure here becomes a polite clarification message.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::warn;

use crate::llm::{ChatApi, ChatMessage, ChatRequest};
use crate::tools::{tool_fn, ToolRegistry};

use super::{channel_stream, str_param, Agent, Chunk, ChunkStream, GenerationContext};

const DESCRIPTION: &str = "\
General-purpose assistant for requests that do not match a specialist. Best
suited for:
- Ambiguous or underspecified prompts
- General questions and conversation
- Requests outside every specialist's domain";

const SYSTEM_PROMPT: &str = "\
You are a helpful assistant. The request did not match any specialist, so
respond conversationally. If the request is ambiguous, begin by briefly
acknowledging the ambiguity, then offer your best interpretation and answer.";

const CLARIFY_PROMPT: &str = "\
The user request below is ambiguous. In one short paragraph, acknowledge the
ambiguity and list the most likely interpretations.";

const DEFAULT_CLARIFICATION: &str =
    "I'm not sure exactly what you're looking for. Could you rephrase or add more detail?";

fn interpretations(query: &str) -> Vec<String> {
    vec![
        format!("An explanation of \"{query}\""),
        format!("Content created about \"{query}\""),
        format!("An analysis of \"{query}\""),
        format!("Research or sources related to \"{query}\""),
    ]
}

pub struct FallbackAgent {
    chat: Arc<dyn ChatApi>,
}

impl FallbackAgent {
    pub fn new(chat: Arc<dyn ChatApi>) -> Self {
        Self { chat }
    }
}

#[async_trait]
impl Agent for FallbackAgent {
    fn label(&self) -> &str {
        "fallback"
    }

    fn description(&self) -> &str {
        DESCRIPTION
    }

    fn register_tools(&self, registry: &mut ToolRegistry) -> anyhow::Result<()> {
        let chat = self.chat.clone();
        registry.register(
            "fallback",
            "generate_clarification",
            "Produce a clarification message for an ambiguous request",
            BTreeMap::from([(
                "query".to_string(),
                "The ambiguous user request".to_string(),
            )]),
            tool_fn(move |params: Value| {
                let chat = chat.clone();
                async move {
                    let query = str_param(&params, "query").unwrap_or_default();

                    let request = ChatRequest::new(vec![
                        ChatMessage::system(CLARIFY_PROMPT),
                        ChatMessage::user(query.clone()),
                    ])
                    .with_temperature(0.7);

                    let message = match chat.complete(request).await {
                        Ok(text) => text,
                        Err(e) => {
                            warn!("clarification call failed, using canned message: {}", e);
                            DEFAULT_CLARIFICATION.to_string()
                        }
                    };

                    Ok(json!({
                        "message": message,
                        "possible_interpretations": interpretations(&query),
                    }))
                }
            }),
        )?;

        Ok(())
    }

    async fn generate(&self, prompt: String, _context: GenerationContext) -> ChunkStream {
        let chat = self.chat.clone();
        let label = self.label().to_string();

        channel_stream(16, move |tx| async move {
            let request = ChatRequest::new(vec![
                ChatMessage::system(SYSTEM_PROMPT),
                ChatMessage::user(prompt.clone()),
            ])
            .with_temperature(0.7);

            match chat.stream(request).await {
                Ok(mut deltas) => {
                    use futures::StreamExt;
                    let mut streamed_any = false;
                    while let Some(item) = deltas.next().await {
                        match item {
                            Ok(text) => {
                                streamed_any = true;
                                if tx.send(Chunk::content(&label, text)).await.is_err() {
                                    return;
                                }
                            }
                            Err(e) => {
                                warn!("fallback stream failed mid-flight: {}", e);
                                break;
                            }
                        }
                    }
                    if !streamed_any {
                        let _ = tx.send(Chunk::content(&label, DEFAULT_CLARIFICATION)).await;
                    }
                }
                Err(e) => {
                    warn!("fallback generation failed, emitting clarification: {}", e);
                    let _ = tx.send(Chunk::content(&label, DEFAULT_CLARIFICATION)).await;
                }
            }
        })
    }
}
