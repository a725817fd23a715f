//! Agent 注册表
//!
//! 按注册顺序保存 descriptor；initialize 依次调用生命周期钩子，任一失败即整体失败（fail fast）。
//! 初始化成功后注册表只读，可在并发执行间共享。

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::agents::{Agent, AgentDescriptor};
use crate::core::AgentError;

#[derive(Debug, Default)]
pub struct AgentRegistry {
    agents: Vec<AgentDescriptor>,
    index: HashMap<String, usize>,
    initialized: AtomicBool,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册 Agent；名字冲突视为配置错误
    pub fn register(&mut self, descriptor: AgentDescriptor) -> Result<(), AgentError> {
        let name = descriptor.name().to_string();
        if self.index.contains_key(&name) {
            return Err(AgentError::Initialization(format!(
                "duplicate agent name '{}'",
                name
            )));
        }
        tracing::debug!(agent = %name, "Registering agent");
        self.index.insert(name, self.agents.len());
        self.agents.push(descriptor);
        Ok(())
    }

    /// 依注册顺序初始化所有 Managed Agent；重复调用为空操作
    pub async fn initialize(&self) -> Result<(), AgentError> {
        if self.is_initialized() {
            return Ok(());
        }

        for descriptor in &self.agents {
            if let Some(lifecycle) = descriptor.lifecycle() {
                lifecycle.initialize().await.map_err(|e| {
                    tracing::error!(agent = descriptor.name(), "Agent initialization failed: {}", e);
                    AgentError::Initialization(format!("agent '{}': {}", descriptor.name(), e))
                })?;
            }
            tracing::info!(agent = descriptor.name(), "Agent initialized");
        }

        self.initialized.store(true, Ordering::SeqCst);
        tracing::info!(count = self.agents.len(), "Agent registry initialized");
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    /// 未初始化或名字未知都视为找不到 Agent
    pub fn resolve(&self, name: &str) -> Result<Arc<dyn Agent>, AgentError> {
        if !self.is_initialized() {
            tracing::warn!(agent = %name, "Agent resolved before registry initialization");
            return Err(AgentError::AgentNotFound(name.to_string()));
        }
        self.index
            .get(name)
            .map(|&i| self.agents[i].agent())
            .ok_or_else(|| AgentError::AgentNotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// 注册顺序的名字列表
    pub fn names(&self) -> Vec<String> {
        self.agents.iter().map(|d| d.name().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    /// 逐个调用 shutdown 钩子；失败只记日志，不中断后续 Agent
    pub async fn shutdown(&self) {
        for descriptor in &self.agents {
            if let Some(lifecycle) = descriptor.lifecycle() {
                if let Err(e) = lifecycle.shutdown().await {
                    tracing::error!(agent = descriptor.name(), "Agent shutdown failed: {}", e);
                    continue;
                }
            }
            tracing::info!(agent = descriptor.name(), "Agent shut down");
        }
        self.initialized.store(false, Ordering::SeqCst);
    }
}
