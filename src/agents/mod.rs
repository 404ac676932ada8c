//! Capability agents.
//!
//! Each agent wraps the shared chat-completion primitive with a
//! domain-specific instruction and exposes a uniform streaming `generate`
//! contract plus a set of tools registered into the shared registry. The
//! stream contract guarantees at least one terminal item (content or error)
//! and then ends; faults never propagate past an agent boundary.

use async_trait::async_trait;
use futures::{Future, Stream, StreamExt};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::warn;

use crate::llm::{ChatApi, ChatRequest};
use crate::search::SearchResult;
use crate::tools::ToolRegistry;

pub mod analysis;
pub mod fallback;
pub mod financial;
pub mod product;
pub mod search_agent;
pub mod thesis;
pub mod twitter;

pub use analysis::DataAnalysisAgent;
pub use fallback::FallbackAgent;
pub use financial::FinancialAgent;
pub use product::ProductAgent;
pub use search_agent::SearchAgent;
pub use thesis::ThesisAgent;
pub use twitter::TwitterAgent;

/// Category label of the terminal recovery agent.
pub const FALLBACK_LABEL: &str = "fallback";

/// Generation retry bound local to each agent's `generate`.
pub const GENERATE_ATTEMPTS: usize = 3;

const CONFIDENCE_STEP: f64 = 0.05;
const CONFIDENCE_FLOOR: f64 = 0.1;
const CONFIDENCE_CEILING: f64 = 1.0;

/// One streamed output item, tagged with the producing agent's domain.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<usize>,
}

impl Chunk {
    pub fn content(kind: &str, content: impl Into<String>) -> Self {
        Self { kind: kind.to_string(), content: Some(content.into()), error: None, step: None }
    }

    pub fn error(kind: &str, error: impl Into<String>) -> Self {
        Self { kind: kind.to_string(), content: None, error: Some(error.into()), step: None }
    }

    pub fn with_step(mut self, step: usize) -> Self {
        self.step = Some(step);
        self
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Finite, non-restartable stream of output chunks.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Chunk> + Send>>;

/// Context passed into `generate`: search enrichment gathered before the
/// agent runs.
#[derive(Debug, Clone, Default)]
pub struct GenerationContext {
    pub search_results: Vec<SearchResult>,
}

#[async_trait]
pub trait Agent: Send + Sync {
    /// Category label this agent handles.
    fn label(&self) -> &str;

    /// Specialization text used in classification prompts.
    fn description(&self) -> &str;

    /// Contribute owned tools to the shared registry. Called once at startup.
    fn register_tools(&self, _registry: &mut ToolRegistry) -> anyhow::Result<()> {
        Ok(())
    }

    /// Stream generated content for the prompt.
    async fn generate(&self, prompt: String, context: GenerationContext) -> ChunkStream;
}

/// Per-agent adaptive confidence signal in [0.1, 1.0], starting at 0.5.
///
/// Best-effort under concurrent requests: updates are atomic but not ordered
/// across requests.
pub struct AgentState {
    confidence: Mutex<f64>,
}

impl AgentState {
    pub fn new() -> Self {
        Self { confidence: Mutex::new(0.5) }
    }

    pub fn confidence(&self) -> f64 {
        *self.confidence.lock()
    }

    /// Nudge the score by a fixed step, clamped. Returns the new value.
    pub fn record(&self, success: bool) -> f64 {
        let mut score = self.confidence.lock();
        *score = if success {
            (*score + CONFIDENCE_STEP).min(CONFIDENCE_CEILING)
        } else {
            (*score - CONFIDENCE_STEP).max(CONFIDENCE_FLOOR)
        };
        *score
    }
}

impl Default for AgentState {
    fn default() -> Self {
        Self::new()
    }
}

/// Run a producer task feeding a bounded channel and expose the receiver as a
/// `ChunkStream`. Dropping the stream closes the channel, which the producer
/// observes as a failed send and treats as a signal to stop.
pub fn channel_stream<F, Fut>(capacity: usize, producer: F) -> ChunkStream
where
    F: FnOnce(mpsc::Sender<Chunk>) -> Fut,
    Fut: Future<Output = ()> + Send + 'static,
{
    let (tx, rx) = mpsc::channel(capacity);
    tokio::spawn(producer(tx));
    Box::pin(futures::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|chunk| (chunk, rx))
    }))
}

/// Shared streaming path: call the chat endpoint in streaming mode, tag each
/// delta with the agent's label, and retry the whole generation on request
/// failure up to the attempt bound. A mid-stream fault yields a final error
/// chunk instead of propagating.
pub(crate) fn stream_chat(chat: Arc<dyn ChatApi>, label: String, request: ChatRequest) -> ChunkStream {
    channel_stream(16, move |tx| async move {
        for attempt in 1..=GENERATE_ATTEMPTS {
            match chat.stream(request.clone()).await {
                Ok(mut deltas) => {
                    while let Some(item) = deltas.next().await {
                        match item {
                            Ok(text) => {
                                if tx.send(Chunk::content(&label, text)).await.is_err() {
                                    return;
                                }
                            }
                            Err(e) => {
                                warn!("{} stream failed mid-flight: {}", label, e);
                                let _ = tx.send(Chunk::error(&label, e.to_string())).await;
                                return;
                            }
                        }
                    }
                    return;
                }
                Err(e) => {
                    warn!("{} generation attempt {} failed: {}", label, attempt, e);
                    if attempt == GENERATE_ATTEMPTS {
                        let _ = tx.send(Chunk::error(&label, e.to_string())).await;
                    }
                }
            }
        }
    })
}

/// Render search results for inclusion in a prompt.
pub(crate) fn format_search_results(results: &[SearchResult]) -> String {
    if results.is_empty() {
        return "No search results available.".to_string();
    }
    serde_json::to_string_pretty(results).unwrap_or_else(|_| "[]".to_string())
}

/// Extract a string parameter from a tool's parameter object.
pub(crate) fn str_param(params: &serde_json::Value, key: &str) -> Option<String> {
    params.get(key).and_then(|v| match v {
        serde_json::Value::String(s) => Some(s.clone()),
        other if !other.is_null() => Some(other.to_string()),
        _ => None,
    })
}
