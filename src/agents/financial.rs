//! Financial report agent. Lower temperature for more precise output.

use anyhow::Context;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::llm::{ChatApi, ChatMessage, ChatRequest};
use crate::tools::{tool_fn, ToolRegistry};

use super::{format_search_results, stream_chat, Agent, ChunkStream, GenerationContext};

const DESCRIPTION: &str = "\
Specialized in financial analysis and reporting. Best suited for:
- Financial statements and reports
- Ratio and trend analysis
- Market and investment commentary
- Budget summaries and forecasts
- Earnings overviews";

const TEMPERATURE: f32 = 0.2;

const RATIO_PROMPT: &str = "\
Analyze financial ratios including:
- Liquidity ratios
- Profitability ratios
- Solvency ratios
- Efficiency ratios

Return analysis in JSON format with insights.";

const TREND_PROMPT: &str = "\
Analyze historical financial trends including:
- Revenue growth
- Profit margins
- Cost structures
- Working capital

Return analysis in JSON format with forecasts.";

pub struct FinancialAgent {
    chat: Arc<dyn ChatApi>,
}

impl FinancialAgent {
    pub fn new(chat: Arc<dyn ChatApi>) -> Self {
        Self { chat }
    }

    fn analysis_tool(
        chat: Arc<dyn ChatApi>,
        system_prompt: &'static str,
        data_key: &'static str,
    ) -> Arc<dyn crate::tools::ToolFn> {
        tool_fn(move |params: Value| {
            let chat = chat.clone();
            async move {
                let data = params.get(data_key).cloned().unwrap_or(Value::Null);
                let request = ChatRequest::new(vec![
                    ChatMessage::system(system_prompt),
                    ChatMessage::user(format!(
                        "Analyze these financials: {}",
                        serde_json::to_string(&data)?
                    )),
                ])
                .with_temperature(TEMPERATURE);

                let content = chat
                    .complete(request)
                    .await
                    .context("financial analysis call failed")?;
                // The model is asked for JSON; fall back to the raw text when
                // it returns prose.
                Ok(serde_json::from_str(&content).unwrap_or(Value::String(content)))
            }
        })
    }
}

#[async_trait]
impl Agent for FinancialAgent {
    fn label(&self) -> &str {
        "financial"
    }

    fn description(&self) -> &str {
        DESCRIPTION
    }

    fn register_tools(&self, registry: &mut ToolRegistry) -> anyhow::Result<()> {
        registry.register(
            "financial",
            "ratio_analysis",
            "Calculate and analyze financial ratios",
            BTreeMap::from([(
                "financial_data".to_string(),
                "JSON financial data".to_string(),
            )]),
            Self::analysis_tool(self.chat.clone(), RATIO_PROMPT, "financial_data"),
        )?;

        registry.register(
            "financial",
            "trend_analysis",
            "Analyze financial trends over time",
            BTreeMap::from([(
                "historical_data".to_string(),
                "JSON historical financial data".to_string(),
            )]),
            Self::analysis_tool(self.chat.clone(), TREND_PROMPT, "historical_data"),
        )?;

        Ok(())
    }

    async fn generate(&self, prompt: String, context: GenerationContext) -> ChunkStream {
        let request = ChatRequest::new(vec![
            ChatMessage::system(
                "You are a financial analyst. Produce a clear, structured financial report \
                 with key figures, ratios, trends, and a concluding assessment.",
            ),
            ChatMessage::user(format!(
                "Prepare a financial report on: {prompt}\nSearch Results: {}",
                format_search_results(&context.search_results)
            )),
        ])
        .with_temperature(TEMPERATURE);

        stream_chat(self.chat.clone(), self.label().to_string(), request)
    }
}
