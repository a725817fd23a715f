//! 编排引擎
//!
//! 显式构造的服务实例（不是全局单例），同时持有 Agent 注册表与上下文存储：
//! - execute_agent：解析 Agent、检查步数、记录输入、执行、原子提交结果
//! - execute_chain：多个 Agent 依次执行，共享同一个上下文与步数预算
//!
//! 同一上下文的步骤 3~7 在该上下文的写锁内完成；不同上下文互不影响。

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use crate::agents::{AgentInput, AgentOutput, AgentRegistry, AgentRequest};
use crate::context::{
    ContextStore, ContextSummary, ContextUpdate, Message, NewMessage, SessionContext,
    DEFAULT_HISTORY_LIMIT,
};
use crate::core::AgentError;
use crate::stream::ProgressWriter;

/// 单次执行的可选参数
#[derive(Clone, Debug, Default)]
pub struct ExecutionOptions {
    /// 进度 Writer；None 时所有中间信封只记日志
    pub writer: Option<ProgressWriter>,
    /// 覆盖默认的历史条数
    pub history_limit: Option<usize>,
}

impl ExecutionOptions {
    pub fn with_writer(writer: ProgressWriter) -> Self {
        Self {
            writer: Some(writer),
            ..Self::default()
        }
    }
}

/// 链中的一步
#[derive(Clone, Debug)]
pub struct ChainStep {
    pub agent: String,
    /// 为 true 时以上一步的回复作为本步输入（上一步回复为空或本步是第一步时退回原始输入）
    pub pass_result: bool,
    pub options: ExecutionOptions,
}

impl ChainStep {
    pub fn new(agent: impl Into<String>) -> Self {
        Self {
            agent: agent.into(),
            pass_result: false,
            options: ExecutionOptions::default(),
        }
    }

    pub fn pass_result(mut self) -> Self {
        self.pass_result = true;
        self
    }

    pub fn with_options(mut self, options: ExecutionOptions) -> Self {
        self.options = options;
        self
    }
}

/// execute_agent 的结果
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Execution {
    pub context_id: String,
    pub result: AgentOutput,
    pub context: ContextSummary,
}

/// execute_chain 的结果
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainExecution {
    pub context_id: String,
    pub chain: Vec<Execution>,
    pub final_result: AgentOutput,
}

#[derive(Clone, Debug, Serialize)]
pub struct AgentStatus {
    pub name: String,
    pub available: bool,
}

#[derive(Clone, Debug, Serialize)]
pub struct OrchestratorStatus {
    pub initialized: bool,
    pub agent_count: usize,
    pub context_count: usize,
    pub agents: Vec<AgentStatus>,
}

pub struct Orchestrator {
    registry: Arc<AgentRegistry>,
    store: Arc<ContextStore>,
    history_limit: usize,
}

impl Orchestrator {
    pub fn new(registry: Arc<AgentRegistry>, store: Arc<ContextStore>) -> Self {
        Self {
            registry,
            store,
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }

    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit;
        self
    }

    /// 初始化所有 Agent；失败时整个编排不可用
    pub async fn initialize(&self) -> Result<(), AgentError> {
        self.registry.initialize().await
    }

    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.registry
    }

    pub fn store(&self) -> &Arc<ContextStore> {
        &self.store
    }

    pub async fn create_context(&self, id: Option<String>) -> String {
        self.store.create(id).await
    }

    pub async fn get_context(&self, id: &str) -> Option<Arc<SessionContext>> {
        self.store.get(id).await
    }

    pub async fn update_context(
        &self,
        id: &str,
        update: ContextUpdate,
    ) -> Option<Arc<SessionContext>> {
        self.store.update(id, update).await
    }

    pub async fn append_message(&self, id: &str, message: NewMessage) -> bool {
        self.store.append_message(id, message).await
    }

    pub async fn history(&self, id: &str, limit: usize) -> Vec<Message> {
        self.store.history(id, limit).await
    }

    pub async fn cleanup(&self, max_age_hours: u64) -> usize {
        self.store.cleanup(max_age_hours).await
    }

    /// 长连接每一轮之前调用，返回本轮应使用的上下文 ID
    ///
    /// 上下文已被清理时以同一 ID 重新创建；步数用完时换一个新上下文，
    /// 并带上最近的历史消息与 metadata，让对话可以继续。
    pub async fn resume_context(&self, id: &str) -> String {
        let ctx = match self.store.get(id).await {
            Some(ctx) => ctx,
            None => {
                tracing::info!(context_id = id, "Context no longer exists, recreating");
                return self.store.create(Some(id.to_string())).await;
            }
        };
        if !ctx.is_exhausted() {
            return id.to_string();
        }

        let next = self.store.create(None).await;
        if let Some(lease) = self.store.lease(&next).await {
            if !ctx.metadata.is_empty() {
                lease.update(ContextUpdate::metadata(ctx.metadata.clone()));
            }
            let start = ctx.messages.len().saturating_sub(self.history_limit);
            for message in &ctx.messages[start..] {
                let mut carried = NewMessage::new(message.role, message.content.clone());
                if let Some(agent) = &message.agent {
                    carried = carried.with_agent(agent.clone());
                }
                lease.append(carried);
            }
        }
        tracing::info!(
            previous = id,
            context_id = %next,
            max_steps = ctx.max_steps,
            "Step budget used up, continuing in a new context"
        );
        next
    }

    /// 执行一个 Agent
    ///
    /// 1. 解析 Agent（AgentNotFound）
    /// 2. 未给 context_id 时新建上下文；给了但不存在返回 ContextNotFound
    /// 3. 步数已满返回 StepLimitExceeded，上下文不做任何修改
    /// 4. 文本输入记为 user 消息
    /// 5. 以有界历史与 Writer 调用 Agent
    /// 6. 成功：assistant 消息 + 步数 +1 + Agent 状态，一次原子提交
    /// 7. 失败：追加 system 审计消息后返回错误，步数不变
    pub async fn execute_agent(
        &self,
        agent_name: &str,
        input: impl Into<AgentInput>,
        context_id: Option<&str>,
        options: ExecutionOptions,
    ) -> Result<Execution, AgentError> {
        let input = input.into();

        let agent = match self.registry.resolve(agent_name) {
            Ok(agent) => agent,
            Err(e) => {
                if let Some(id) = context_id {
                    self.record_failure(id, agent_name, &e).await;
                }
                tracing::warn!(agent = agent_name, "Agent resolution failed: {}", e);
                return Err(e);
            }
        };

        let context_id = match context_id {
            Some(id) => id.to_string(),
            None => self.store.create(None).await,
        };
        let lease = self
            .store
            .lease(&context_id)
            .await
            .ok_or_else(|| AgentError::ContextNotFound(context_id.clone()))?;

        let snapshot = lease.snapshot();
        if snapshot.is_exhausted() {
            tracing::warn!(
                agent = agent_name,
                context_id = %context_id,
                step_count = snapshot.step_count,
                max_steps = snapshot.max_steps,
                "Step limit reached"
            );
            return Err(AgentError::StepLimitExceeded {
                context_id,
                max_steps: snapshot.max_steps,
            });
        }

        if let AgentInput::Text(text) = &input {
            lease.append(NewMessage::user(text.clone()));
        }

        let limit = options.history_limit.unwrap_or(self.history_limit);
        let request = AgentRequest {
            context_id: Some(context_id.clone()),
            history: lease.snapshot().history(limit),
            writer: options.writer,
        };

        tracing::info!(
            agent = agent_name,
            context_id = %context_id,
            step = snapshot.step_count + 1,
            "Executing agent"
        );
        match agent.execute(&input, request).await {
            Ok(result) => {
                let committed = lease.commit_success(agent_name, &result);
                tracing::info!(
                    agent = agent_name,
                    context_id = %context_id,
                    step_count = committed.step_count,
                    "Agent execution completed"
                );
                Ok(Execution {
                    context_id,
                    result,
                    context: committed.summary(),
                })
            }
            Err(e) => {
                tracing::error!(agent = agent_name, context_id = %context_id, "Agent execution failed: {}", e);
                lease.append(audit_message(agent_name, &e));
                Err(e)
            }
        }
    }

    /// 依次执行多个 Agent，所有步骤共享同一个上下文；任一步失败即中止，已完成步骤的修改保留
    pub async fn execute_chain(
        &self,
        steps: &[ChainStep],
        input: impl Into<AgentInput>,
        context_id: Option<&str>,
    ) -> Result<ChainExecution, AgentError> {
        if steps.is_empty() {
            return Err(AgentError::Execution("chain has no steps".to_string()));
        }
        let original = input.into();
        let mut context_id = context_id.map(String::from);
        let mut chain: Vec<Execution> = Vec::with_capacity(steps.len());

        for (index, step) in steps.iter().enumerate() {
            let step_input = match (step.pass_result, chain.last()) {
                (true, Some(prev)) if !prev.result.response.trim().is_empty() => {
                    AgentInput::Text(prev.result.response.clone())
                }
                (true, Some(_)) => {
                    tracing::debug!(step = index, "Previous step returned no text, passing original input");
                    original.clone()
                }
                _ => original.clone(),
            };

            tracing::debug!(step = index, agent = %step.agent, "Executing chain step");
            let execution = self
                .execute_agent(&step.agent, step_input, context_id.as_deref(), step.options.clone())
                .await
                .map_err(|e| {
                    tracing::warn!(step = index, agent = %step.agent, "Chain aborted: {}", e);
                    e
                })?;
            context_id = Some(execution.context_id.clone());
            chain.push(execution);
        }

        let last = chain
            .last()
            .ok_or_else(|| AgentError::Execution("chain produced no result".to_string()))?;
        Ok(ChainExecution {
            context_id: last.context_id.clone(),
            final_result: last.result.clone(),
            chain,
        })
    }

    pub async fn status(&self) -> OrchestratorStatus {
        let initialized = self.registry.is_initialized();
        let agents = self
            .registry
            .names()
            .into_iter()
            .map(|name| AgentStatus {
                name,
                available: initialized,
            })
            .collect::<Vec<_>>();
        OrchestratorStatus {
            initialized,
            agent_count: agents.len(),
            context_count: self.store.len().await,
            agents,
        }
    }

    /// 关闭所有 Agent 并清空上下文
    pub async fn shutdown(&self) {
        self.registry.shutdown().await;
        let cleared = self.store.clear().await;
        tracing::info!(cleared, "Orchestrator shut down");
    }

    async fn record_failure(&self, context_id: &str, agent_name: &str, err: &AgentError) {
        if !self
            .store
            .append_message(context_id, audit_message(agent_name, err))
            .await
        {
            tracing::debug!(context_id, "No context to record failure in");
        }
    }
}

fn audit_message(agent_name: &str, err: &AgentError) -> NewMessage {
    let mut metadata = serde_json::Map::new();
    metadata.insert("error".to_string(), Value::String(err.code().to_string()));
    NewMessage::system(format!("Error executing agent {}: {}", agent_name, err))
        .with_agent(agent_name)
        .with_metadata(metadata)
}
