//! HTTP surface and composition root.
//!
//! `POST /api/generate` streams chunks as SSE events and finishes with a
//! literal `[DONE]` event; the accumulated content is persisted only after
//! the client has received the whole stream.

use anyhow::{Context, Result};
use axum::{
    extract::State,
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    routing::{get, post},
    Json, Router,
};
use futures::{Stream, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::agents::{
    DataAnalysisAgent, FallbackAgent, FinancialAgent, ProductAgent, SearchAgent, ThesisAgent,
    TwitterAgent,
};
use crate::llm::HttpChatClient;
use crate::memory::{ContentStore, MemorySink, SledMemoryStore};
use crate::middleware;
use crate::orchestrator::Orchestrator;
use crate::search::{HttpSearchClient, SearchApi};
use crate::settings::{ServerConfig, Settings};

const HISTORY_LIMIT: usize = 100;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub content: Arc<dyn ContentStore>,
}

#[derive(Deserialize)]
struct GenerateRequest {
    prompt: String,
}

pub fn create_router(state: AppState, config: &ServerConfig) -> Router {
    let rate_limiter = middleware::create_rate_limiter(config);

    Router::new()
        .route("/api/generate", post(generate_handler))
        .route("/api/history", get(history_handler))
        .route("/health", get(health_handler))
        .layer(axum::middleware::from_fn_with_state(
            rate_limiter,
            middleware::rate_limit_middleware,
        ))
        .layer(middleware::create_cors_layer(config))
        .layer(middleware::create_body_limit_layer(config.max_request_size_mb))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_handler(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    match state.content.recent_content(1).await {
        Ok(_) => (StatusCode::OK, Json(json!({"status": "ok", "store": "ok"}))),
        Err(e) => {
            error!("content store health check failed: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({"status": "degraded", "store": "unavailable"})),
            )
        }
    }
}

async fn history_handler(
    State(state): State<AppState>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    match state.content.recent_content(HISTORY_LIMIT).await {
        Ok(records) => Ok(Json(json!({"history": records}))),
        Err(e) => {
            error!("failed to read content history: {}", e);
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "failed to read history"})),
            ))
        }
    }
}

async fn generate_handler(
    State(state): State<AppState>,
    Json(request): Json<GenerateRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, (StatusCode, Json<Value>)> {
    let prompt = request.prompt.trim().to_string();
    if prompt.is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "prompt cannot be empty"})),
        ));
    }

    let request_id = Uuid::new_v4();
    info!(%request_id, "generate request received");

    let mut chunks = state.orchestrator.generate(prompt.clone());
    let content_store = state.content.clone();
    let (tx, rx) = mpsc::channel::<Event>(32);

    tokio::spawn(async move {
        let mut accumulated = String::new();
        let mut content_type = "unknown".to_string();

        while let Some(chunk) = chunks.next().await {
            if let Some(text) = &chunk.content {
                accumulated.push_str(text);
                content_type = chunk.kind.clone();
            }
            let payload = serde_json::to_string(&chunk).unwrap_or_else(|_| "{}".to_string());
            if tx.send(Event::default().data(payload)).await.is_err() {
                // Client disconnected; nothing complete to persist.
                info!(%request_id, "client disconnected mid-stream");
                return;
            }
        }

        let _ = tx.send(Event::default().data("[DONE]")).await;

        if !accumulated.is_empty() {
            let meta = json!({"request_id": request_id.to_string()});
            if let Err(e) = content_store
                .append_content(&prompt, &accumulated, &content_type, meta)
                .await
            {
                warn!(%request_id, "failed to persist generated content: {}", e);
            }
        }
    });

    let stream = futures::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|event| (Ok::<_, Infallible>(event), rx))
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

/// Wire up every component and serve until shutdown.
pub async fn serve(settings: Settings, addr_override: Option<SocketAddr>) -> Result<()> {
    let chat = Arc::new(HttpChatClient::new(&settings.llm)?);
    let search: Arc<dyn SearchApi> = Arc::new(HttpSearchClient::new(&settings.search)?);
    let store = Arc::new(
        SledMemoryStore::open(&settings.memory.path)?
            .with_retention(settings.orchestrator.memory_retention),
    );
    let memory: Arc<dyn MemorySink> = store.clone();
    let content: Arc<dyn ContentStore> = store;

    let mut orchestrator = Orchestrator::new(
        chat.clone(),
        search.clone(),
        memory.clone(),
        settings.orchestrator.clone(),
    );
    orchestrator.register_agent(Arc::new(TwitterAgent::new(chat.clone())))?;
    orchestrator.register_agent(Arc::new(ThesisAgent::new(chat.clone())))?;
    orchestrator.register_agent(Arc::new(FinancialAgent::new(chat.clone())))?;
    orchestrator.register_agent(Arc::new(ProductAgent::new(chat.clone())))?;
    orchestrator.register_agent(Arc::new(DataAnalysisAgent::new(chat.clone(), memory.clone())))?;
    orchestrator.register_agent(Arc::new(FallbackAgent::new(chat.clone())))?;
    orchestrator.register_support_agent(Arc::new(SearchAgent::new(search.clone())))?;

    let state = AppState { orchestrator: Arc::new(orchestrator), content };
    let router = create_router(state, &settings.server);

    let addr = match addr_override {
        Some(addr) => addr,
        None => format!("{}:{}", settings.server.host, settings.server.port)
            .parse()
            .context("invalid server address")?,
    };

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("listening on {}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("server shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to install ctrl-c handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => error!("failed to install SIGTERM handler: {}", e),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received ctrl-c, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
