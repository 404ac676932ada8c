//! Shared tool registry.
//!
//! Every agent contributes named, parameterized callables at startup; the
//! orchestrator resolves planned steps against this registry by qualified id
//! (`{owner}_{name}`). The registry is built once by the composition root and
//! is immutable afterwards; registration is intentionally not synchronized.

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

pub type ToolId = String;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("tool '{id}' is already registered with a different callable")]
    Duplicate { id: ToolId },
}

/// A unit of work invocable by id through the registry.
#[async_trait]
pub trait ToolFn: Send + Sync {
    async fn call(&self, params: Value) -> Result<Value>;
}

struct FnTool<F>(F);

#[async_trait]
impl<F, Fut> ToolFn for FnTool<F>
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value>> + Send + 'static,
{
    async fn call(&self, params: Value) -> Result<Value> {
        (self.0)(params).await
    }
}

/// Wrap an async closure as a registrable tool callable.
pub fn tool_fn<F, Fut>(f: F) -> Arc<dyn ToolFn>
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value>> + Send + 'static,
{
    Arc::new(FnTool(f))
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ToolDescriptor {
    pub id: ToolId,
    pub name: String,
    pub description: String,
    /// Parameter name -> human-readable semantic description.
    pub parameters: BTreeMap<String, String>,
    pub owner: String,
}

pub struct RegisteredTool {
    pub descriptor: ToolDescriptor,
    pub callable: Arc<dyn ToolFn>,
}

/// Process-wide mapping from qualified tool id to its descriptor and callable.
#[derive(Default)]
pub struct ToolRegistry {
    tools: BTreeMap<ToolId, RegisteredTool>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool under `{owner}_{name}`. Re-registering the identical
    /// tool is idempotent; a different callable under an existing id fails.
    pub fn register(
        &mut self,
        owner: &str,
        name: &str,
        description: &str,
        parameters: BTreeMap<String, String>,
        callable: Arc<dyn ToolFn>,
    ) -> Result<ToolId, RegistryError> {
        let id = format!("{owner}_{name}");
        let descriptor = ToolDescriptor {
            id: id.clone(),
            name: name.to_string(),
            description: description.to_string(),
            parameters,
            owner: owner.to_string(),
        };

        if let Some(existing) = self.tools.get(&id) {
            if existing.descriptor == descriptor && Arc::ptr_eq(&existing.callable, &callable) {
                return Ok(id);
            }
            return Err(RegistryError::Duplicate { id });
        }

        debug!("registered tool: {}", id);
        self.tools.insert(id.clone(), RegisteredTool { descriptor, callable });
        Ok(id)
    }

    pub fn lookup(&self, id: &str) -> Option<&RegisteredTool> {
        self.tools.get(id)
    }

    pub fn list_by_owner(&self, owner: &str) -> Vec<&ToolDescriptor> {
        self.tools
            .values()
            .filter(|t| t.descriptor.owner == owner)
            .map(|t| &t.descriptor)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Serialize all descriptors for the planning prompt.
    pub fn describe_all(&self) -> Value {
        let mut out = serde_json::Map::new();
        for tool in self.tools.values() {
            out.insert(
                tool.descriptor.id.clone(),
                serde_json::json!({
                    "description": tool.descriptor.description,
                    "parameters": tool.descriptor.parameters,
                    "agent_type": tool.descriptor.owner,
                }),
            );
        }
        Value::Object(out)
    }
}

/// Standard envelopes some tools wrap their payload in. The orchestrator
/// peels exactly these two shapes before carrying a result forward; anything
/// else passes through unchanged.
#[derive(Debug)]
pub enum ToolEnvelope {
    Status { data: Value },
    Clarification { message: Value },
    Raw(Value),
}

impl ToolEnvelope {
    pub fn from_value(value: Value) -> Self {
        if let Value::Object(map) = &value {
            if map.contains_key("status") && map.contains_key("data") {
                return ToolEnvelope::Status { data: map["data"].clone() };
            }
            if map.contains_key("message") && map.contains_key("possible_interpretations") {
                return ToolEnvelope::Clarification { message: map["message"].clone() };
            }
        }
        ToolEnvelope::Raw(value)
    }

    /// Unwrap to the inner payload.
    pub fn into_inner(self) -> Value {
        match self {
            ToolEnvelope::Status { data } => match data.get("message") {
                Some(message) => message.clone(),
                None => data,
            },
            ToolEnvelope::Clarification { message } => message,
            ToolEnvelope::Raw(value) => value,
        }
    }
}
