//! Append-only memory sink and generated-content history.
//!
//! The orchestrator records classification analyses, plans, decisions, and
//! performance snapshots here. Memory records are retention-bounded (oldest
//! beyond the most recent N are pruned after each write); content records are
//! retained indefinitely.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

pub const DEFAULT_RETENTION: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryKind {
    Analysis,
    Plan,
    Decision,
    Performance,
}

impl MemoryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryKind::Analysis => "analysis",
            MemoryKind::Plan => "plan",
            MemoryKind::Decision => "decision",
            MemoryKind::Performance => "performance",
        }
    }
}

/// A typed, timestamped orchestration fact. Never mutated after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub id: u64,
    pub kind: MemoryKind,
    pub payload: Value,
    pub timestamp: DateTime<Utc>,
    pub metrics_snapshot: Option<Value>,
}

/// One row per completed request. Immutable, read-only history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentRecord {
    pub id: u64,
    pub prompt: String,
    pub content: String,
    pub content_type: String,
    pub created_at: DateTime<Utc>,
    pub meta: Value,
}

#[async_trait]
pub trait MemorySink: Send + Sync {
    /// Append a record; prunes entries beyond the retention bound afterwards.
    async fn append(
        &self,
        kind: MemoryKind,
        payload: Value,
        metrics_snapshot: Option<Value>,
    ) -> Result<u64>;

    /// Most recent records first.
    async fn recent(&self, limit: usize) -> Result<Vec<MemoryRecord>>;

    /// Most recent records of one kind, newest first.
    async fn recent_by_kind(&self, kind: MemoryKind, limit: usize) -> Result<Vec<MemoryRecord>>;

    async fn get(&self, id: u64) -> Result<Option<MemoryRecord>>;
}

#[async_trait]
pub trait ContentStore: Send + Sync {
    async fn append_content(
        &self,
        prompt: &str,
        content: &str,
        content_type: &str,
        meta: Value,
    ) -> Result<u64>;

    /// Most recent records first.
    async fn recent_content(&self, limit: usize) -> Result<Vec<ContentRecord>>;
}

/// In-memory implementation for tests and single-process use.
pub struct InMemorySink {
    records: Mutex<VecDeque<MemoryRecord>>,
    content: Mutex<VecDeque<ContentRecord>>,
    next_id: AtomicU64,
    retention: usize,
}

impl InMemorySink {
    pub fn new() -> Self {
        Self::with_retention(DEFAULT_RETENTION)
    }

    pub fn with_retention(retention: usize) -> Self {
        Self {
            records: Mutex::new(VecDeque::new()),
            content: Mutex::new(VecDeque::new()),
            next_id: AtomicU64::new(1),
            retention,
        }
    }
}

impl Default for InMemorySink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MemorySink for InMemorySink {
    async fn append(
        &self,
        kind: MemoryKind,
        payload: Value,
        metrics_snapshot: Option<Value>,
    ) -> Result<u64> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut records = self.records.lock();
        records.push_back(MemoryRecord {
            id,
            kind,
            payload,
            timestamp: Utc::now(),
            metrics_snapshot,
        });
        while records.len() > self.retention {
            records.pop_front();
        }
        Ok(id)
    }

    async fn recent(&self, limit: usize) -> Result<Vec<MemoryRecord>> {
        let records = self.records.lock();
        Ok(records.iter().rev().take(limit).cloned().collect())
    }

    async fn recent_by_kind(&self, kind: MemoryKind, limit: usize) -> Result<Vec<MemoryRecord>> {
        let records = self.records.lock();
        Ok(records
            .iter()
            .rev()
            .filter(|r| r.kind == kind)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn get(&self, id: u64) -> Result<Option<MemoryRecord>> {
        let records = self.records.lock();
        Ok(records.iter().find(|r| r.id == id).cloned())
    }
}

#[async_trait]
impl ContentStore for InMemorySink {
    async fn append_content(
        &self,
        prompt: &str,
        content: &str,
        content_type: &str,
        meta: Value,
    ) -> Result<u64> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.content.lock().push_back(ContentRecord {
            id,
            prompt: prompt.to_string(),
            content: content.to_string(),
            content_type: content_type.to_string(),
            created_at: Utc::now(),
            meta,
        });
        Ok(id)
    }

    async fn recent_content(&self, limit: usize) -> Result<Vec<ContentRecord>> {
        let content = self.content.lock();
        Ok(content.iter().rev().take(limit).cloned().collect())
    }
}

pub mod sled_store;
pub use sled_store::SledMemoryStore;
