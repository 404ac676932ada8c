//! Request orchestration: classification, planning, and tool execution.
//!
//! Every prompt flows through `generate`: the orchestrator classifies it into
//! an agent category, asks the LLM for a tool execution plan, runs the plan
//! against the shared registry, and falls back to direct agent generation or
//! the fallback agent when any stage comes up empty. Classification is total:
//! it always yields a routable category, never an error.

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use crate::agents::{Agent, AgentState, Chunk, GenerationContext, FALLBACK_LABEL};
use crate::llm::{ChatApi, ChatMessage, ChatRequest};
use crate::memory::{MemoryKind, MemoryRecord, MemorySink};
use crate::plan::{parse_step_sequence, ExecutionStep};
use crate::search::{SearchApi, SearchKind};
use crate::settings::OrchestratorSettings;
use crate::tools::{ToolEnvelope, ToolRegistry};

static STEP_REF: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\$STEP\[(\d+)\]$").unwrap());
static CONTENT_TYPE_FALLBACK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""content_type"\s*:\s*"([^"]+)""#).unwrap());

const COMPLEXITY_PROMPT: &str = "\
Analyze the complexity of the user's content request. Respond with JSON:
{\"complexity\": \"low|medium|high\", \"topics\": [...], \"requires_research\": true|false}";

const CLASSIFY_TEMPERATURE: f32 = 0.3;

/// Running counters exposed on every memory snapshot.
#[derive(Debug, Default, Serialize)]
pub struct PerformanceMetrics {
    pub decisions_made: u64,
    pub successful_executions: u64,
    pub tool_usage: HashMap<String, u64>,
    pub average_confidence: f64,
}

impl PerformanceMetrics {
    fn note_decision(&mut self, confidence: f64) {
        self.decisions_made += 1;
        let n = self.decisions_made as f64;
        self.average_confidence += (confidence - self.average_confidence) / n;
    }

    fn note_tool(&mut self, tool_id: &str) {
        *self.tool_usage.entry(tool_id.to_string()).or_insert(0) += 1;
    }
}

#[derive(Deserialize)]
struct ClassificationReply {
    content_type: String,
    confidence: Option<f64>,
}

struct AgentHandle {
    agent: Arc<dyn Agent>,
    state: AgentState,
}

enum StreamOutcome {
    Success,
    Failed,
    Disconnected,
}

pub struct Orchestrator {
    chat: Arc<dyn ChatApi>,
    search: Arc<dyn SearchApi>,
    memory: Arc<dyn MemorySink>,
    registry: ToolRegistry,
    agents: HashMap<String, AgentHandle>,
    metrics: Mutex<PerformanceMetrics>,
    config: OrchestratorSettings,
}

impl Orchestrator {
    pub fn new(
        chat: Arc<dyn ChatApi>,
        search: Arc<dyn SearchApi>,
        memory: Arc<dyn MemorySink>,
        config: OrchestratorSettings,
    ) -> Self {
        Self {
            chat,
            search,
            memory,
            registry: ToolRegistry::new(),
            agents: HashMap::new(),
            metrics: Mutex::new(PerformanceMetrics::default()),
            config,
        }
    }

    /// Register a routable agent: its tools join the registry and its label
    /// becomes a classification category.
    pub fn register_agent(&mut self, agent: Arc<dyn Agent>) -> anyhow::Result<()> {
        agent.register_tools(&mut self.registry)?;
        let label = agent.label().to_string();
        info!("registered agent: {}", label);
        self.agents.insert(label, AgentHandle { agent, state: AgentState::new() });
        Ok(())
    }

    /// Register an agent for its tools only; it is never a routing target.
    pub fn register_support_agent(&mut self, agent: Arc<dyn Agent>) -> anyhow::Result<()> {
        agent.register_tools(&mut self.registry)?;
        info!("registered support agent: {}", agent.label());
        Ok(())
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn agent_confidence(&self, label: &str) -> Option<f64> {
        self.agents.get(label).map(|h| h.state.confidence())
    }

    pub fn metrics_snapshot(&self) -> Value {
        serde_json::to_value(&*self.metrics.lock()).unwrap_or(Value::Null)
    }

    /// Classify the prompt into a registered agent category. Total: any
    /// failure or low-confidence result routes to the fallback agent.
    #[instrument(skip_all)]
    pub async fn determine_content_type(&self, prompt: &str) -> String {
        let decisions = self
            .memory
            .recent_by_kind(MemoryKind::Decision, self.config.memory_context_limit)
            .await
            .unwrap_or_default();

        // First pass: complexity analysis, recorded for later classification
        // context. Failures degrade to an error marker, not an abort.
        let analysis = match self
            .chat
            .complete(
                ChatRequest::new(vec![
                    ChatMessage::system(COMPLEXITY_PROMPT),
                    ChatMessage::user(prompt.to_string()),
                ])
                .with_temperature(CLASSIFY_TEMPERATURE),
            )
            .await
        {
            Ok(text) => serde_json::from_str::<Value>(&text)
                .unwrap_or_else(|_| Value::String(text)),
            Err(e) => {
                warn!("complexity analysis failed: {}", e);
                json!({"error": e.to_string()})
            }
        };

        if let Err(e) = self
            .memory
            .append(
                MemoryKind::Analysis,
                json!({"prompt": prompt, "analysis": analysis}),
                Some(self.metrics_snapshot()),
            )
            .await
        {
            warn!("failed to record analysis memory: {}", e);
        }

        // Second pass: classification against the registered categories.
        let reply = match self
            .chat
            .complete(
                ChatRequest::new(vec![
                    ChatMessage::system(self.classification_prompt(&decisions, &analysis)),
                    ChatMessage::user(prompt.to_string()),
                ])
                .with_temperature(CLASSIFY_TEMPERATURE),
            )
            .await
        {
            Ok(text) => text,
            Err(e) => {
                warn!("classification call failed, using fallback: {}", e);
                return self.record_decision(prompt, FALLBACK_LABEL, 0.0).await;
            }
        };

        let (mut label, confidence) = match serde_json::from_str::<ClassificationReply>(&reply) {
            Ok(parsed) => (
                parsed.content_type.to_lowercase(),
                parsed.confidence.unwrap_or(0.0),
            ),
            Err(_) => match CONTENT_TYPE_FALLBACK.captures(&reply) {
                // Confidence is unrecoverable from a partial reply; treat the
                // extracted label as trusted.
                Some(caps) => (caps[1].to_lowercase(), 1.0),
                None => {
                    warn!("classification reply unparseable: {}", reply);
                    (FALLBACK_LABEL.to_string(), 0.0)
                }
            },
        };

        if confidence < self.config.confidence_threshold {
            debug!(
                "classification confidence {} below threshold, routing to fallback",
                confidence
            );
            label = FALLBACK_LABEL.to_string();
        }
        if !self.agents.contains_key(&label) {
            debug!("unknown content type '{}', routing to fallback", label);
            label = FALLBACK_LABEL.to_string();
        }

        self.record_decision(prompt, &label, confidence).await
    }

    async fn record_decision(&self, prompt: &str, label: &str, confidence: f64) -> String {
        self.metrics.lock().note_decision(confidence);
        if let Err(e) = self
            .memory
            .append(
                MemoryKind::Decision,
                json!({"prompt": prompt, "content_type": label, "confidence": confidence}),
                None,
            )
            .await
        {
            warn!("failed to record decision memory: {}", e);
        }
        label.to_string()
    }

    fn classification_prompt(&self, history: &[MemoryRecord], analysis: &Value) -> String {
        let mut categories = String::new();
        for (label, handle) in &self.agents {
            categories.push_str(&format!(
                "- {label} (confidence score {:.2}):\n{}\n",
                handle.state.confidence(),
                handle.agent.description()
            ));
        }

        let decisions: Vec<&Value> = history.iter().map(|r| &r.payload).collect();

        format!(
            "You are a routing classifier. Choose the best content type for the \
             user's request from these categories:\n{categories}\n\
             Task analysis: {analysis}\n\
             Recent routing decisions: {}\n\
             Respond with JSON only: {{\"content_type\": \"<category>\", \"confidence\": <0.0-1.0>}}",
            serde_json::to_string(&decisions).unwrap_or_else(|_| "[]".to_string()),
        )
    }

    /// Ask the LLM for a tool plan. Empty on any failure; never an error.
    #[instrument(skip_all, fields(category = category))]
    pub async fn build_execution_sequence(
        &self,
        prompt: &str,
        category: &str,
    ) -> Vec<ExecutionStep> {
        let tools = self.registry.describe_all();
        let system = format!(
            "You are a task planner. Available tools:\n{}\n\
             Plan a sequence of tool calls to satisfy the user's request, which \
             was classified as '{category}' content.\n\
             Guidelines:\n\
             - Put search tools FIRST when current information would help\n\
             - Reference a previous step's output as the string \"$STEP[n]\" (1-based)\n\
             - Keep the sequence minimal\n\
             Respond with a JSON array only. Each step must have exactly these \
             fields: tool_id, parameters, reason, expected_output.",
            serde_json::to_string_pretty(&tools).unwrap_or_else(|_| "{}".to_string()),
        );

        let reply = match self
            .chat
            .complete(
                ChatRequest::new(vec![
                    ChatMessage::system(system),
                    ChatMessage::user(prompt.to_string()),
                ])
                .with_temperature(CLASSIFY_TEMPERATURE),
            )
            .await
        {
            Ok(text) => text,
            Err(e) => {
                warn!("planning call failed: {}", e);
                return vec![];
            }
        };

        let steps = parse_step_sequence(&reply);
        if !steps.is_empty() {
            if let Err(e) = self
                .memory
                .append(
                    MemoryKind::Plan,
                    json!({"prompt": prompt, "content_type": category, "steps": steps}),
                    None,
                )
                .await
            {
                warn!("failed to record plan memory: {}", e);
            }
        }
        steps
    }

    /// Run a planned sequence in order. Unknown tools are skipped; a failing
    /// step emits an error chunk and execution continues. Only the final
    /// step's output becomes a content chunk.
    async fn execute_sequence(
        &self,
        steps: &[ExecutionStep],
        category: &str,
        tx: &mpsc::Sender<Chunk>,
    ) -> StreamOutcome {
        let total = steps.len();
        let mut step_outputs: HashMap<usize, Value> = HashMap::new();
        let mut carry_forward: Option<Value> = None;
        let mut all_succeeded = true;

        for (index, step) in steps.iter().enumerate() {
            let step_no = index + 1;
            let Some(tool) = self.registry.lookup(&step.tool_id) else {
                warn!("plan step {} references unknown tool '{}', skipping", step_no, step.tool_id);
                all_succeeded = false;
                continue;
            };

            let mut params = step.parameters.clone();
            for value in params.values_mut() {
                resolve_step_ref(value, &step_outputs);
            }
            if tool.descriptor.parameters.contains_key("input_data") {
                if let Some(previous) = &carry_forward {
                    params
                        .entry("input_data".to_string())
                        .or_insert_with(|| previous.clone());
                }
            }

            debug!("executing step {}/{}: {} ({})", step_no, total, step.tool_id, step.reason);
            self.metrics.lock().note_tool(&step.tool_id);

            match tool.callable.call(Value::Object(params)).await {
                Ok(raw) => {
                    let result = ToolEnvelope::from_value(raw).into_inner();
                    step_outputs.insert(step_no, result.clone());
                    carry_forward = Some(result.clone());

                    if step_no == total {
                        let text = value_to_text(&result);
                        if tx.send(Chunk::content(category, text)).await.is_err() {
                            return StreamOutcome::Disconnected;
                        }
                    }
                }
                Err(e) => {
                    warn!("step {} ({}) failed: {}", step_no, step.tool_id, e);
                    all_succeeded = false;
                    let chunk = Chunk::error(category, e.to_string()).with_step(step_no);
                    if tx.send(chunk).await.is_err() {
                        return StreamOutcome::Disconnected;
                    }
                }
            }
        }

        if all_succeeded {
            StreamOutcome::Success
        } else {
            StreamOutcome::Failed
        }
    }

    /// Gather search context and stream the named agent's output verbatim.
    async fn forward_agent_stream(
        &self,
        label: &str,
        prompt: &str,
        tx: &mpsc::Sender<Chunk>,
    ) -> anyhow::Result<StreamOutcome> {
        use futures::StreamExt;

        let handle = self
            .agents
            .get(label)
            .ok_or_else(|| anyhow::anyhow!("no agent registered for '{label}'"))?;

        let context = if label == FALLBACK_LABEL {
            GenerationContext::default()
        } else {
            let kind = match label {
                "thesis" | "data_analysis" => SearchKind::Scholar,
                _ => SearchKind::General,
            };
            GenerationContext { search_results: self.search.search(prompt, kind).await }
        };

        let mut stream = handle.agent.generate(prompt.to_string(), context).await;
        let mut saw_error = false;
        while let Some(chunk) = stream.next().await {
            if chunk.is_error() {
                saw_error = true;
            }
            if tx.send(chunk).await.is_err() {
                return Ok(StreamOutcome::Disconnected);
            }
        }

        Ok(if saw_error { StreamOutcome::Failed } else { StreamOutcome::Success })
    }

    async fn record_outcome(&self, label: &str, success: bool) {
        if success {
            self.metrics.lock().successful_executions += 1;
        }
        let confidence = match self.agents.get(label) {
            Some(handle) => handle.state.record(success),
            None => 0.0,
        };

        if let Err(e) = self
            .memory
            .append(
                MemoryKind::Performance,
                json!({
                    "agent": label,
                    "success": success,
                    "confidence_score": confidence,
                }),
                Some(self.metrics_snapshot()),
            )
            .await
        {
            warn!("failed to record performance memory: {}", e);
        }
    }

    async fn attempt(
        self: &Arc<Self>,
        prompt: &str,
        tx: &mpsc::Sender<Chunk>,
    ) -> anyhow::Result<StreamOutcome> {
        let category = self.determine_content_type(prompt).await;
        info!("routing request to '{}'", category);

        if category == FALLBACK_LABEL {
            let outcome = self.forward_agent_stream(FALLBACK_LABEL, prompt, tx).await?;
            self.record_outcome(FALLBACK_LABEL, matches!(outcome, StreamOutcome::Success))
                .await;
            return Ok(outcome);
        }

        let steps = self.build_execution_sequence(prompt, &category).await;
        let outcome = if steps.is_empty() {
            debug!("no execution plan, generating directly with '{}'", category);
            self.forward_agent_stream(&category, prompt, tx).await?
        } else {
            self.execute_sequence(&steps, &category, tx).await
        };

        self.record_outcome(&category, matches!(outcome, StreamOutcome::Success))
            .await;
        Ok(outcome)
    }

    /// Stream generated content for a prompt. Retries the full pipeline up to
    /// the configured bound, then hands the request to the fallback agent.
    pub fn generate(self: &Arc<Self>, prompt: String) -> crate::agents::ChunkStream {
        let orchestrator = self.clone();
        crate::agents::channel_stream(32, move |tx| async move {
            for attempt in 1..=orchestrator.config.max_retries {
                match orchestrator.attempt(&prompt, &tx).await {
                    Ok(StreamOutcome::Success) | Ok(StreamOutcome::Disconnected) => return,
                    Ok(StreamOutcome::Failed) => {
                        warn!("generation attempt {} failed", attempt);
                    }
                    Err(e) => {
                        warn!("generation attempt {} errored: {}", attempt, e);
                    }
                }
            }

            info!("all attempts exhausted, routing to fallback agent");
            match orchestrator
                .forward_agent_stream(FALLBACK_LABEL, &prompt, &tx)
                .await
            {
                Ok(outcome) => {
                    orchestrator
                        .record_outcome(FALLBACK_LABEL, matches!(outcome, StreamOutcome::Success))
                        .await;
                }
                Err(e) => {
                    warn!("fallback agent unavailable: {}", e);
                    let _ = tx
                        .send(Chunk::error(FALLBACK_LABEL, "content generation failed"))
                        .await;
                }
            }
        })
    }
}

/// Replace a whole parameter value of the form `"$STEP[n]"` with step n's
/// output. Unresolvable references are left literal.
fn resolve_step_ref(value: &mut Value, outputs: &HashMap<usize, Value>) {
    let Value::String(text) = value else { return };
    let Some(caps) = STEP_REF.captures(text) else { return };
    let Ok(index) = caps[1].parse::<usize>() else { return };
    match outputs.get(&index) {
        Some(output) => *value = output.clone(),
        None => warn!("step reference $STEP[{}] has no recorded output", index),
    }
}

fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
    }
}
