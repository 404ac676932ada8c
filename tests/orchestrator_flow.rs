//! End-to-end routing flows against scripted chat and search backends.

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use contentforge::agents::{
    channel_stream, Agent, Chunk, ChunkStream, FallbackAgent, GenerationContext, ThesisAgent,
    TwitterAgent,
};
use contentforge::agents::SearchAgent;
use contentforge::llm::{ChatApi, ChatRequest, DeltaStream, LlmError};
use contentforge::memory::{InMemorySink, MemoryKind, MemorySink};
use contentforge::orchestrator::Orchestrator;
use contentforge::search::{SearchApi, SearchKind, SearchResult};
use contentforge::settings::OrchestratorSettings;
use contentforge::tools::{tool_fn, ToolRegistry};

/// Scripted chat backend: `complete` pops from one queue, `stream` from
/// another. An exhausted script is a test bug surfaced as an error.
struct MockChat {
    completions: Mutex<VecDeque<Result<String, String>>>,
    streams: Mutex<VecDeque<Vec<String>>>,
}

impl MockChat {
    fn new(
        completions: Vec<Result<&str, &str>>,
        streams: Vec<Vec<&str>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            completions: Mutex::new(
                completions
                    .into_iter()
                    .map(|r| r.map(str::to_string).map_err(str::to_string))
                    .collect(),
            ),
            streams: Mutex::new(
                streams
                    .into_iter()
                    .map(|s| s.into_iter().map(str::to_string).collect())
                    .collect(),
            ),
        })
    }
}

#[async_trait]
impl ChatApi for MockChat {
    async fn complete(&self, _request: ChatRequest) -> Result<String, LlmError> {
        match self.completions.lock().pop_front() {
            Some(Ok(text)) => Ok(text),
            Some(Err(e)) => Err(LlmError::Transport(e)),
            None => Err(LlmError::Malformed("completion script exhausted".to_string())),
        }
    }

    async fn stream(&self, _request: ChatRequest) -> Result<DeltaStream, LlmError> {
        match self.streams.lock().pop_front() {
            Some(deltas) => Ok(Box::pin(futures::stream::iter(
                deltas.into_iter().map(Ok),
            ))),
            None => Err(LlmError::Transport("stream script exhausted".to_string())),
        }
    }
}

struct MockSearch {
    results: Vec<SearchResult>,
    queries: Mutex<Vec<(String, SearchKind)>>,
}

impl MockSearch {
    fn new(titles: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            results: titles
                .iter()
                .map(|t| SearchResult {
                    title: t.to_string(),
                    snippet: format!("about {t}"),
                    link: String::new(),
                })
                .collect(),
            queries: Mutex::new(vec![]),
        })
    }
}

#[async_trait]
impl SearchApi for MockSearch {
    async fn search(&self, query: &str, kind: SearchKind) -> Vec<SearchResult> {
        self.queries.lock().push((query.to_string(), kind));
        self.results.clone()
    }
}

const ANALYSIS_OK: Result<&str, &str> = Ok(r#"{"complexity": "medium", "requires_research": true}"#);

fn settings(max_retries: usize) -> OrchestratorSettings {
    OrchestratorSettings { max_retries, ..Default::default() }
}

const THESIS_TEXT: &str = "# Quantum Computing\n## Abstract\nThis thesis examines the state of \
quantum computation, surveying hardware progress, error correction, and the algorithms most \
likely to reach practical advantage within the decade.";

#[tokio::test]
async fn planned_thesis_flow_emits_single_final_chunk() {
    let plan = r#"[
        {"tool_id": "search_scholar_search",
         "parameters": {"query": "quantum computing"},
         "reason": "gather academic sources",
         "expected_output": "scholarly results"},
        {"tool_id": "thesis_generate",
         "parameters": {"topic": "quantum computing", "analysis": "$STEP[1]"},
         "reason": "write the thesis",
         "expected_output": "thesis text"}
    ]"#;

    let chat = MockChat::new(
        vec![
            ANALYSIS_OK,
            Ok(r#"{"content_type": "thesis", "confidence": 0.8}"#),
            Ok(plan),
            Ok(THESIS_TEXT),
        ],
        vec![],
    );
    let search = MockSearch::new(&["Quantum supremacy revisited"]);
    let memory: Arc<dyn MemorySink> = Arc::new(InMemorySink::new());

    let mut orchestrator =
        Orchestrator::new(chat.clone(), search.clone(), memory.clone(), settings(3));
    orchestrator.register_agent(Arc::new(ThesisAgent::new(chat.clone()))).unwrap();
    orchestrator.register_agent(Arc::new(FallbackAgent::new(chat.clone()))).unwrap();
    orchestrator.register_support_agent(Arc::new(SearchAgent::new(search.clone()))).unwrap();
    let orchestrator = Arc::new(orchestrator);

    let chunks: Vec<Chunk> =
        orchestrator.generate("write a thesis on quantum computing".to_string()).collect().await;

    assert_eq!(chunks.len(), 1, "only the final step's output is emitted");
    assert_eq!(chunks[0].kind, "thesis");
    assert_eq!(chunks[0].content.as_deref(), Some(THESIS_TEXT));
    assert!(!chunks[0].is_error());

    // Scholar search ran as the first planned step.
    let queries = search.queries.lock();
    assert!(queries.iter().any(|(q, k)| q == "quantum computing" && *k == SearchKind::Scholar));
    drop(queries);

    // Success nudged the thesis agent's confidence up.
    let confidence = orchestrator.agent_confidence("thesis").unwrap();
    assert!((confidence - 0.55).abs() < 1e-9);

    // Analysis, decision, plan, and performance records were written.
    let recent = memory.recent(10).await.unwrap();
    let kinds: Vec<MemoryKind> = recent.iter().map(|r| r.kind).collect();
    assert!(kinds.contains(&MemoryKind::Analysis));
    assert!(kinds.contains(&MemoryKind::Decision));
    assert!(kinds.contains(&MemoryKind::Plan));
    assert!(kinds.contains(&MemoryKind::Performance));
}

#[tokio::test]
async fn low_confidence_routes_to_fallback_stream() {
    let chat = MockChat::new(
        vec![
            ANALYSIS_OK,
            Ok(r#"{"content_type": "twitter", "confidence": 0.2}"#),
        ],
        vec![vec!["I wasn't sure what you meant, ", "so here is my best answer."]],
    );
    let search = MockSearch::new(&[]);
    let memory: Arc<dyn MemorySink> = Arc::new(InMemorySink::new());

    let mut orchestrator = Orchestrator::new(chat.clone(), search, memory.clone(), settings(3));
    orchestrator.register_agent(Arc::new(TwitterAgent::new(chat.clone()))).unwrap();
    orchestrator.register_agent(Arc::new(FallbackAgent::new(chat.clone()))).unwrap();
    let orchestrator = Arc::new(orchestrator);

    let chunks: Vec<Chunk> = orchestrator.generate("asdf".to_string()).collect().await;

    assert_eq!(chunks.len(), 2);
    assert!(chunks.iter().all(|c| c.kind == "fallback" && !c.is_error()));

    // The low-confidence decision was recorded against the fallback label.
    let recent = memory.recent(10).await.unwrap();
    let decision = recent.iter().find(|r| r.kind == MemoryKind::Decision).unwrap();
    assert_eq!(decision.payload["content_type"], "fallback");
}

#[tokio::test]
async fn unparseable_plan_degrades_to_direct_generation() {
    let chat = MockChat::new(
        vec![
            ANALYSIS_OK,
            Ok(r#"{"content_type": "thesis", "confidence": 0.9}"#),
            Ok("I could not produce a plan, sorry."),
        ],
        vec![vec!["# Thesis\n", "Direct generation output."]],
    );
    let search = MockSearch::new(&["A relevant paper"]);
    let memory: Arc<dyn MemorySink> = Arc::new(InMemorySink::new());

    let mut orchestrator =
        Orchestrator::new(chat.clone(), search.clone(), memory.clone(), settings(3));
    orchestrator.register_agent(Arc::new(ThesisAgent::new(chat.clone()))).unwrap();
    orchestrator.register_agent(Arc::new(FallbackAgent::new(chat.clone()))).unwrap();
    let orchestrator = Arc::new(orchestrator);

    let chunks: Vec<Chunk> =
        orchestrator.generate("write about dark matter".to_string()).collect().await;

    assert_eq!(chunks.len(), 2);
    assert!(chunks.iter().all(|c| c.kind == "thesis"));

    // Direct thesis generation pulls scholarly context.
    let queries = search.queries.lock();
    assert_eq!(queries.len(), 1);
    assert_eq!(queries[0].1, SearchKind::Scholar);
    drop(queries);

    // No plan record for an empty sequence.
    let recent = memory.recent(10).await.unwrap();
    assert!(recent.iter().all(|r| r.kind != MemoryKind::Plan));
}

#[tokio::test]
async fn regex_rescues_classification_from_prose_reply() {
    let chat = MockChat::new(
        vec![
            ANALYSIS_OK,
            // Prose plus a trailing comma defeats strict parsing.
            Ok(r#"Sure! Here you go: {"content_type": "twitter", "confidence": 0.9,}"#),
            Ok("not a plan"),
        ],
        vec![vec!["\u{1F9F5} 1/3 Big news today..."]],
    );
    let search = MockSearch::new(&[]);
    let memory: Arc<dyn MemorySink> = Arc::new(InMemorySink::new());

    let mut orchestrator = Orchestrator::new(chat.clone(), search, memory, settings(3));
    orchestrator.register_agent(Arc::new(TwitterAgent::new(chat.clone()))).unwrap();
    orchestrator.register_agent(Arc::new(FallbackAgent::new(chat.clone()))).unwrap();
    let orchestrator = Arc::new(orchestrator);

    let chunks: Vec<Chunk> =
        orchestrator.generate("thread about the launch".to_string()).collect().await;

    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].kind, "twitter");
}

#[tokio::test]
async fn classification_failure_is_absorbed_by_fallback() {
    let chat = MockChat::new(
        vec![Err("analysis endpoint down"), Err("classification endpoint down")],
        vec![vec!["Here is a general answer."]],
    );
    let search = MockSearch::new(&[]);
    let memory: Arc<dyn MemorySink> = Arc::new(InMemorySink::new());

    let mut orchestrator = Orchestrator::new(chat.clone(), search, memory, settings(3));
    orchestrator.register_agent(Arc::new(FallbackAgent::new(chat.clone()))).unwrap();
    let orchestrator = Arc::new(orchestrator);

    let chunks: Vec<Chunk> = orchestrator.generate("anything".to_string()).collect().await;

    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].kind, "fallback");
    assert!(!chunks[0].is_error());
}

#[tokio::test]
async fn exhausted_retries_without_fallback_emit_one_terminal_error() {
    // Every attempt classifies below the confidence threshold, and no
    // fallback agent is registered, so each attempt errors and the terminal
    // hand-off has nowhere to go. The stream must still end with exactly one
    // error chunk rather than hanging or ending silently.
    let chat = MockChat::new(
        vec![
            ANALYSIS_OK,
            Ok(r#"{"content_type": "twitter", "confidence": 0.2}"#),
            ANALYSIS_OK,
            Ok(r#"{"content_type": "twitter", "confidence": 0.2}"#),
        ],
        vec![],
    );
    let search = MockSearch::new(&[]);
    let memory: Arc<dyn MemorySink> = Arc::new(InMemorySink::new());

    let mut orchestrator = Orchestrator::new(chat.clone(), search, memory, settings(2));
    orchestrator.register_agent(Arc::new(TwitterAgent::new(chat.clone()))).unwrap();
    let orchestrator = Arc::new(orchestrator);

    let chunks: Vec<Chunk> = orchestrator.generate("asdf".to_string()).collect().await;

    assert_eq!(chunks.len(), 1, "exactly one terminal chunk");
    assert!(chunks[0].is_error());
    assert_eq!(chunks[0].kind, "fallback");
    assert_eq!(chunks[0].error.as_deref(), Some("content generation failed"));
}

/// Test agent with echo tools, used to observe parameter plumbing.
struct EchoAgent {
    captured: Arc<Mutex<Vec<Value>>>,
}

#[async_trait]
impl Agent for EchoAgent {
    fn label(&self) -> &str {
        "alpha"
    }

    fn description(&self) -> &str {
        "Echoes tool parameters for inspection."
    }

    fn register_tools(&self, registry: &mut ToolRegistry) -> anyhow::Result<()> {
        for name in ["one", "three"] {
            let captured = self.captured.clone();
            registry.register(
                "alpha",
                name,
                "echo parameters",
                BTreeMap::from([
                    ("q".to_string(), "query".to_string()),
                    ("input_data".to_string(), "previous output".to_string()),
                ]),
                tool_fn(move |params| {
                    let captured = captured.clone();
                    async move {
                        captured.lock().push(params.clone());
                        Ok(params)
                    }
                }),
            )?;
        }
        Ok(())
    }

    async fn generate(&self, _prompt: String, _context: GenerationContext) -> ChunkStream {
        channel_stream(1, |tx| async move {
            let _ = tx.send(Chunk::content("alpha", "direct")).await;
        })
    }
}

#[tokio::test]
async fn unknown_step_is_skipped_and_outputs_carry_forward() {
    let plan = r#"[
        {"tool_id": "alpha_one",
         "parameters": {"q": "first"},
         "reason": "start",
         "expected_output": "echo"},
        {"tool_id": "missing_tool",
         "parameters": {},
         "reason": "does not exist",
         "expected_output": "nothing"},
        {"tool_id": "alpha_three",
         "parameters": {"q": "$STEP[1]"},
         "reason": "finish",
         "expected_output": "echo"}
    ]"#;

    let chat = MockChat::new(
        vec![
            ANALYSIS_OK,
            Ok(r#"{"content_type": "alpha", "confidence": 0.9}"#),
            Ok(plan),
        ],
        // The skipped step fails the attempt; with a single retry the request
        // ends at the fallback agent.
        vec![vec!["fallback wrap-up"]],
    );
    let search = MockSearch::new(&[]);
    let memory: Arc<dyn MemorySink> = Arc::new(InMemorySink::new());
    let captured = Arc::new(Mutex::new(vec![]));

    let mut orchestrator = Orchestrator::new(chat.clone(), search, memory, settings(1));
    orchestrator
        .register_agent(Arc::new(EchoAgent { captured: captured.clone() }))
        .unwrap();
    orchestrator.register_agent(Arc::new(FallbackAgent::new(chat.clone()))).unwrap();
    let orchestrator = Arc::new(orchestrator);

    let chunks: Vec<Chunk> = orchestrator.generate("run the chain".to_string()).collect().await;

    // Final planned step still emitted, then the fallback stream.
    assert_eq!(chunks.len(), 2);
    assert_eq!(chunks[0].kind, "alpha");
    assert_eq!(chunks[1].kind, "fallback");

    let calls = captured.lock();
    assert_eq!(calls.len(), 2, "the unknown step never ran");
    assert_eq!(calls[0]["q"], json!("first"));
    // $STEP[1] resolved to step 1's full output, which also carried forward
    // through the declared input_data parameter.
    assert_eq!(calls[1]["q"], calls[0]);
    assert_eq!(calls[1]["input_data"], calls[0]);
}

#[tokio::test]
async fn failing_tool_emits_error_chunk_with_step_index() {
    struct BrokenAgent;

    #[async_trait]
    impl Agent for BrokenAgent {
        fn label(&self) -> &str {
            "broken"
        }

        fn description(&self) -> &str {
            "Always fails."
        }

        fn register_tools(&self, registry: &mut ToolRegistry) -> anyhow::Result<()> {
            registry.register(
                "broken",
                "explode",
                "always fails",
                BTreeMap::new(),
                tool_fn(|_params| async move {
                    Err::<Value, anyhow::Error>(anyhow::anyhow!("tool blew up"))
                }),
            )?;
            Ok(())
        }

        async fn generate(&self, _prompt: String, _context: GenerationContext) -> ChunkStream {
            channel_stream(1, |tx| async move {
                let _ = tx.send(Chunk::content("broken", "unused")).await;
            })
        }
    }

    let plan = r#"[
        {"tool_id": "broken_explode",
         "parameters": {},
         "reason": "boom",
         "expected_output": "none"}
    ]"#;

    let chat = MockChat::new(
        vec![
            ANALYSIS_OK,
            Ok(r#"{"content_type": "broken", "confidence": 0.9}"#),
            Ok(plan),
        ],
        vec![vec!["recovered"]],
    );
    let search = MockSearch::new(&[]);
    let memory: Arc<dyn MemorySink> = Arc::new(InMemorySink::new());

    let mut orchestrator = Orchestrator::new(chat.clone(), search, memory, settings(1));
    orchestrator.register_agent(Arc::new(BrokenAgent)).unwrap();
    orchestrator.register_agent(Arc::new(FallbackAgent::new(chat.clone()))).unwrap();
    let orchestrator = Arc::new(orchestrator);

    let chunks: Vec<Chunk> = orchestrator.generate("do it".to_string()).collect().await;

    assert_eq!(chunks.len(), 2);
    assert!(chunks[0].is_error());
    assert_eq!(chunks[0].step, Some(1));
    assert_eq!(chunks[1].kind, "fallback");
    assert_eq!(chunks[1].content.as_deref(), Some("recovered"));
}
