//! Sled-backed persistence for memory records and generated content.
//!
//! Records are stored as JSON bytes under big-endian u64 keys so tree
//! iteration order is insertion order; pruning removes the oldest keys
//! first. JSON rather than a compact binary codec because record payloads
//! are free-form `serde_json::Value`s, which need a self-describing format
//! to deserialize. The append-then-prune sequence is not atomic: under
//! concurrent writers the guarantee is "at least the latest record
//! survives", not a strict bound.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::path::Path;
use tracing::debug;

use super::{ContentRecord, ContentStore, MemoryKind, MemoryRecord, MemorySink, DEFAULT_RETENTION};

pub struct SledMemoryStore {
    db: sled::Db,
    memory: sled::Tree,
    content: sled::Tree,
    retention: usize,
}

impl SledMemoryStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = sled::open(path).context("failed to open memory database")?;
        let memory = db.open_tree("agent_memory")?;
        let content = db.open_tree("generated_content")?;
        Ok(Self { db, memory, content, retention: DEFAULT_RETENTION })
    }

    pub fn with_retention(mut self, retention: usize) -> Self {
        self.retention = retention;
        self
    }

    fn next_id(&self) -> Result<u64> {
        Ok(self.db.generate_id()?)
    }

    fn prune(&self) -> Result<()> {
        while self.memory.len() > self.retention {
            match self.memory.pop_min()? {
                Some((key, _)) => {
                    let mut raw = [0u8; 8];
                    raw.copy_from_slice(&key);
                    debug!("pruned memory record {}", u64::from_be_bytes(raw));
                }
                None => break,
            }
        }
        Ok(())
    }
}

#[async_trait]
impl MemorySink for SledMemoryStore {
    async fn append(
        &self,
        kind: MemoryKind,
        payload: Value,
        metrics_snapshot: Option<Value>,
    ) -> Result<u64> {
        let id = self.next_id()?;
        let record = MemoryRecord {
            id,
            kind,
            payload,
            timestamp: Utc::now(),
            metrics_snapshot,
        };
        let encoded = serde_json::to_vec(&record).context("failed to encode memory record")?;
        self.memory.insert(id.to_be_bytes(), encoded)?;
        self.prune()?;
        Ok(id)
    }

    async fn recent(&self, limit: usize) -> Result<Vec<MemoryRecord>> {
        let mut out = Vec::with_capacity(limit.min(self.retention));
        for item in self.memory.iter().rev().take(limit) {
            let (_, raw) = item?;
            out.push(serde_json::from_slice(&raw).context("failed to decode memory record")?);
        }
        Ok(out)
    }

    async fn recent_by_kind(&self, kind: MemoryKind, limit: usize) -> Result<Vec<MemoryRecord>> {
        let mut out = Vec::with_capacity(limit);
        for item in self.memory.iter().rev() {
            let (_, raw) = item?;
            let record: MemoryRecord =
                serde_json::from_slice(&raw).context("failed to decode memory record")?;
            if record.kind == kind {
                out.push(record);
                if out.len() == limit {
                    break;
                }
            }
        }
        Ok(out)
    }

    async fn get(&self, id: u64) -> Result<Option<MemoryRecord>> {
        match self.memory.get(id.to_be_bytes())? {
            Some(raw) => Ok(Some(
                serde_json::from_slice(&raw).context("failed to decode memory record")?,
            )),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl ContentStore for SledMemoryStore {
    async fn append_content(
        &self,
        prompt: &str,
        content: &str,
        content_type: &str,
        meta: Value,
    ) -> Result<u64> {
        let id = self.next_id()?;
        let record = ContentRecord {
            id,
            prompt: prompt.to_string(),
            content: content.to_string(),
            content_type: content_type.to_string(),
            created_at: Utc::now(),
            meta,
        };
        let encoded = serde_json::to_vec(&record).context("failed to encode content record")?;
        self.content.insert(id.to_be_bytes(), encoded)?;
        Ok(id)
    }

    async fn recent_content(&self, limit: usize) -> Result<Vec<ContentRecord>> {
        let mut out = Vec::with_capacity(limit);
        for item in self.content.iter().rev().take(limit) {
            let (_, raw) = item?;
            out.push(serde_json::from_slice(&raw).context("failed to decode content record")?);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn open_temp() -> (tempfile::TempDir, SledMemoryStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = SledMemoryStore::open(dir.path().join("db")).unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn roundtrip_memory_record() {
        let (_dir, store) = open_temp();
        let id = store
            .append(MemoryKind::Decision, json!({"content_type": "thesis"}), None)
            .await
            .unwrap();

        let record = store.get(id).await.unwrap().unwrap();
        assert_eq!(record.kind, MemoryKind::Decision);
        assert_eq!(record.payload, json!({"content_type": "thesis"}));
    }

    #[tokio::test]
    async fn json_payloads_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db");

        let (memory_id, content_id) = {
            let store = SledMemoryStore::open(&path).unwrap();
            let memory_id = store
                .append(
                    MemoryKind::Performance,
                    json!({"agent": "thesis", "success": true}),
                    Some(json!({"decisions_made": 3, "tool_usage": {"thesis_generate": 2}})),
                )
                .await
                .unwrap();
            let content_id = store
                .append_content("p", "out", "thesis", json!({"request_id": "r1"}))
                .await
                .unwrap();
            (memory_id, content_id)
        };

        let store = SledMemoryStore::open(&path).unwrap();
        let record = store.get(memory_id).await.unwrap().unwrap();
        assert_eq!(record.payload["agent"], json!("thesis"));
        assert_eq!(
            record.metrics_snapshot,
            Some(json!({"decisions_made": 3, "tool_usage": {"thesis_generate": 2}}))
        );

        let content = store.recent_content(10).await.unwrap();
        assert_eq!(content[0].id, content_id);
        assert_eq!(content[0].meta, json!({"request_id": "r1"}));
    }

    #[tokio::test]
    async fn retention_prunes_oldest() {
        let (_dir, store) = open_temp();
        let store = store.with_retention(10);
        let mut ids = Vec::new();
        for i in 0..25 {
            ids.push(
                store
                    .append(MemoryKind::Analysis, json!({"n": i}), None)
                    .await
                    .unwrap(),
            );
        }

        let recent = store.recent(100).await.unwrap();
        assert_eq!(recent.len(), 10);
        assert_eq!(recent[0].payload, json!({"n": 24}));
        // The earliest records were pruned.
        assert!(store.get(ids[0]).await.unwrap().is_none());
        assert!(store.get(ids[24]).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn content_history_is_unbounded_and_ordered() {
        let (_dir, store) = open_temp();
        for i in 0..5 {
            store
                .append_content(&format!("prompt {i}"), "out", "twitter", json!({}))
                .await
                .unwrap();
        }

        let recent = store.recent_content(3).await.unwrap();
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].prompt, "prompt 4");
        assert_eq!(recent[2].prompt, "prompt 2");
    }
}
