//! Product content agent: specs, marketing copy, and full descriptions.

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::llm::{ChatApi, ChatMessage, ChatRequest};
use crate::tools::{tool_fn, ToolRegistry};

use super::{format_search_results, str_param, stream_chat, Agent, ChunkStream, GenerationContext};

const DESCRIPTION: &str = "\
Specialized in creating compelling product content. Best suited for:
- Product descriptions and listings
- Technical specifications
- Marketing copy and feature highlights
- Product comparisons
- Launch announcements
- E-commerce content";

const SPECS_PROMPT: &str = "\
Generate detailed technical specifications for the product. Cover:
1. Core features and capabilities
2. Technical dimensions and requirements
3. Materials and build quality
4. Compatibility and integrations
Present the specifications as a structured list.";

const MARKETING_PROMPT: &str = "\
Write persuasive marketing copy for the product:
1. Lead with the strongest benefit
2. Translate features into customer value
3. Address likely objections
4. Close with a clear call to action";

const GENERATE_PROMPT: &str = "\
You are a product content writer. Combine the provided specifications and
marketing copy into a single polished product description with:
# Product Name
## Overview
## Key Features
## Specifications
## Why Choose This Product";

pub struct ProductAgent {
    chat: Arc<dyn ChatApi>,
}

impl ProductAgent {
    pub fn new(chat: Arc<dyn ChatApi>) -> Self {
        Self { chat }
    }
}

#[async_trait]
impl Agent for ProductAgent {
    fn label(&self) -> &str {
        "product"
    }

    fn description(&self) -> &str {
        DESCRIPTION
    }

    fn register_tools(&self, registry: &mut ToolRegistry) -> anyhow::Result<()> {
        let chat = self.chat.clone();
        registry.register(
            "product",
            "generate_specs",
            "Generate technical product specifications",
            BTreeMap::from([
                ("product_info".to_string(), "Product details to specify".to_string()),
                ("input_data".to_string(), "Optional previous step output".to_string()),
            ]),
            tool_fn(move |params: Value| {
                let chat = chat.clone();
                async move {
                    let info = str_param(&params, "product_info")
                        .or_else(|| str_param(&params, "input_data"))
                        .ok_or_else(|| anyhow!("product_info is required"))?;

                    let request = ChatRequest::new(vec![
                        ChatMessage::system(SPECS_PROMPT),
                        ChatMessage::user(format!("Product: {info}")),
                    ])
                    .with_temperature(0.7);

                    let content = chat
                        .complete(request)
                        .await
                        .context("spec generation call failed")?;
                    Ok(Value::String(content))
                }
            }),
        )?;

        let chat = self.chat.clone();
        registry.register(
            "product",
            "create_marketing_copy",
            "Write marketing copy for a product",
            BTreeMap::from([
                ("product_info".to_string(), "Product details to market".to_string()),
                ("tone".to_string(), "Desired tone of voice".to_string()),
                ("input_data".to_string(), "Optional previous step output".to_string()),
            ]),
            tool_fn(move |params: Value| {
                let chat = chat.clone();
                async move {
                    let info = str_param(&params, "product_info")
                        .or_else(|| str_param(&params, "input_data"))
                        .ok_or_else(|| anyhow!("product_info is required"))?;
                    let tone = str_param(&params, "tone").unwrap_or_else(|| "professional".to_string());

                    let request = ChatRequest::new(vec![
                        ChatMessage::system(MARKETING_PROMPT),
                        ChatMessage::user(format!("Product: {info}\nTone: {tone}")),
                    ])
                    .with_temperature(0.7);

                    let content = chat
                        .complete(request)
                        .await
                        .context("marketing copy call failed")?;
                    Ok(Value::String(content))
                }
            }),
        )?;

        let chat = self.chat.clone();
        registry.register(
            "product",
            "generate",
            "Compose the final product description",
            BTreeMap::from([
                ("product".to_string(), "Product name or summary".to_string()),
                ("specs".to_string(), "Technical specifications".to_string()),
                ("marketing".to_string(), "Marketing copy".to_string()),
                ("input_data".to_string(), "Optional previous step output".to_string()),
            ]),
            tool_fn(move |params: Value| {
                let chat = chat.clone();
                async move {
                    let product = str_param(&params, "product")
                        .filter(|p| !p.trim().is_empty())
                        .ok_or_else(|| anyhow!("product cannot be empty"))?;
                    let specs = str_param(&params, "specs").unwrap_or_default();
                    let marketing = str_param(&params, "marketing")
                        .or_else(|| str_param(&params, "input_data"))
                        .unwrap_or_default();

                    let request = ChatRequest::new(vec![
                        ChatMessage::system(GENERATE_PROMPT),
                        ChatMessage::user(format!(
                            "Product: {product}\n\nSpecifications:\n{specs}\n\nMarketing Copy:\n{marketing}"
                        )),
                    ])
                    .with_temperature(0.7);

                    let content = chat
                        .complete(request)
                        .await
                        .context("product description call failed")?;
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
                "Product: {prompt}\nSearch Results: {}",
                format_search_results(&context.search_results)
            )),
        ])
        .with_temperature(0.7);

        stream_chat(self.chat.clone(), self.label().to_string(), request)
    }
}
