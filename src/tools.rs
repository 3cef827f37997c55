//! Tool registry seam
//!
//! Tool business logic lives outside this core; the dispatcher only needs
//! listing, metadata lookup and an execution call that fails with a typed
//! error. The registry is constructed explicitly and handed to the
//! dispatcher at startup.

use crate::error::{Result, ServerError};
use crate::types::ToolDescriptor;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// A single invokable tool.
#[async_trait]
pub trait Tool: Send + Sync {
    fn descriptor(&self) -> ToolDescriptor;

    /// Execute with the caller-supplied arguments object.
    async fn run(&self, args: Value) -> Result<Value>;
}

/// The dispatcher's view of the tool surface.
#[async_trait]
pub trait ToolRegistry: Send + Sync {
    fn list(&self) -> Vec<ToolDescriptor>;

    fn get(&self, name: &str) -> Option<ToolDescriptor>;

    /// Run a tool by name; execution failures come back as
    /// [`ServerError::ToolExecution`] with the original message preserved.
    async fn execute(&self, name: &str, args: Value) -> Result<Value>;
}

/// Registry over a fixed set of tools registered at startup.
#[derive(Default)]
pub struct StaticToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl StaticToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool; a later registration under the same name wins.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.descriptor().name;
        debug!("registered tool {}", name);
        self.tools.insert(name, tool);
    }
}

#[async_trait]
impl ToolRegistry for StaticToolRegistry {
    fn list(&self) -> Vec<ToolDescriptor> {
        self.tools.values().map(|tool| tool.descriptor()).collect()
    }

    fn get(&self, name: &str) -> Option<ToolDescriptor> {
        self.tools.get(name).map(|tool| tool.descriptor())
    }

    async fn execute(&self, name: &str, args: Value) -> Result<Value> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| ServerError::InvalidParams(format!("unknown tool: {}", name)))?;
        tool.run(args).await.map_err(|e| match e {
            // already typed; keep protocol-level errors as they are
            err @ ServerError::InvalidParams(_) => err,
            err => ServerError::ToolExecution(err.to_string()),
        })
    }
}
