//! 会话上下文存储
//!
//! 每个上下文一个槽位：异步互斥锁串行化所有写操作（读-改-写），
//! 快照以 `Arc<SessionContext>` 整体替换，读操作只克隆 Arc，不会读到半更新的状态。
//! 不同上下文之间完全独立。

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock as StdRwLock};

use chrono::{DateTime, Duration, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use super::types::{
    AgentState, ContextUpdate, Message, NewMessage, SessionContext, DEFAULT_MAX_STEPS,
};
use crate::agents::AgentOutput;

/// cleanup 接受的最大时长（约 114 年），超出按此截断
const MAX_AGE_HOURS_CAP: i64 = 1_000_000;

/// 单个上下文槽位：写锁 + 当前快照
struct ContextSlot {
    write_lock: Arc<Mutex<()>>,
    snapshot: StdRwLock<Arc<SessionContext>>,
}

impl ContextSlot {
    fn new(ctx: SessionContext) -> Self {
        Self {
            write_lock: Arc::new(Mutex::new(())),
            snapshot: StdRwLock::new(Arc::new(ctx)),
        }
    }

    fn load(&self) -> Arc<SessionContext> {
        self.snapshot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// 复制当前快照、修改、整体替换；调用方必须持有 write_lock
    fn swap<F>(&self, f: F) -> Arc<SessionContext>
    where
        F: FnOnce(&mut SessionContext),
    {
        let mut next = (*self.load()).clone();
        f(&mut next);
        let next = Arc::new(next);
        *self.snapshot.write().unwrap_or_else(PoisonError::into_inner) = Arc::clone(&next);
        next
    }
}

/// 持有某个上下文写锁期间的独占句柄；drop 时释放（包括出错返回时）
pub struct ContextLease {
    slot: Arc<ContextSlot>,
    _guard: OwnedMutexGuard<()>,
}

impl ContextLease {
    pub fn snapshot(&self) -> Arc<SessionContext> {
        self.slot.load()
    }

    pub fn append(&self, message: NewMessage) -> Arc<SessionContext> {
        self.slot.swap(|ctx| ctx.push_message(message))
    }

    pub fn update(&self, update: ContextUpdate) -> Arc<SessionContext> {
        self.slot.swap(|ctx| update.apply(ctx))
    }

    /// 一次成功执行的提交：追加 assistant 消息、步数 +1、记录 Agent 状态，作为一次原子替换
    pub fn commit_success(&self, agent: &str, output: &AgentOutput) -> Arc<SessionContext> {
        let now = Utc::now();
        self.slot.swap(|ctx| {
            let mut message = NewMessage::assistant(output.response.clone()).with_agent(agent);
            if !output.metadata.is_empty() {
                message = message.with_metadata(output.metadata.clone());
            }
            ctx.push_message(message);
            ctx.step_count += 1;
            ctx.last_execution = Some(now);
            ctx.agent_states.insert(
                agent.to_string(),
                AgentState {
                    last_executed_at: now,
                    last_result: output.clone(),
                },
            );
        })
    }
}

/// 进程内的上下文存储（由编排服务持有，不是全局单例）
pub struct ContextStore {
    slots: RwLock<HashMap<String, Arc<ContextSlot>>>,
    default_max_steps: u32,
}

impl ContextStore {
    pub fn new(default_max_steps: u32) -> Self {
        Self {
            slots: RwLock::new(HashMap::new()),
            default_max_steps,
        }
    }

    /// 创建上下文并返回 ID；未给 ID 时生成 `session_<毫秒>_<随机>`。
    /// 给定的 ID 已存在时原样返回，不重置已有状态。
    pub async fn create(&self, id: Option<String>) -> String {
        let id = id.unwrap_or_else(generate_context_id);
        let mut slots = self.slots.write().await;
        if slots.contains_key(&id) {
            tracing::debug!(context_id = %id, "Context already exists, reusing");
            return id;
        }
        slots.insert(
            id.clone(),
            Arc::new(ContextSlot::new(SessionContext::new(
                id.clone(),
                self.default_max_steps,
            ))),
        );
        tracing::debug!(context_id = %id, "Context created");
        id
    }

    /// 读取当前快照（可能早于并发中的写入，但不会是半更新状态）
    pub async fn get(&self, id: &str) -> Option<Arc<SessionContext>> {
        self.slot(id).await.map(|slot| slot.load())
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.slots.read().await.contains_key(id)
    }

    /// 获取某上下文的写锁；上下文不存在时返回 None
    ///
    /// 等锁期间槽位可能被 cleanup 移除或被同 ID 的新上下文替换，拿到锁后需确认仍是当前槽位。
    pub async fn lease(&self, id: &str) -> Option<ContextLease> {
        loop {
            let slot = self.slot(id).await?;
            let guard = Arc::clone(&slot.write_lock).lock_owned().await;
            match self.slot(id).await {
                Some(current) if Arc::ptr_eq(&current, &slot) => {
                    return Some(ContextLease {
                        slot,
                        _guard: guard,
                    });
                }
                Some(_) => continue,
                None => return None,
            }
        }
    }

    /// 浅合并调用方字段，不会绕过 step_count / messages 的不变式
    pub async fn update(&self, id: &str, update: ContextUpdate) -> Option<Arc<SessionContext>> {
        let lease = self.lease(id).await?;
        Some(lease.update(update))
    }

    /// 追加消息（分配 timestamp 与位置 ID）；上下文不存在时返回 false
    pub async fn append_message(&self, id: &str, message: NewMessage) -> bool {
        match self.lease(id).await {
            Some(lease) => {
                lease.append(message);
                true
            }
            None => false,
        }
    }

    /// 最近 `limit` 条消息的 role + content，按追加顺序
    pub async fn history(&self, id: &str, limit: usize) -> Vec<Message> {
        self.get(id)
            .await
            .map(|ctx| ctx.history(limit))
            .unwrap_or_default()
    }

    /// 移除创建时间早于 `now - max_age_hours` 或没有任何消息的上下文，返回移除数量
    pub async fn cleanup(&self, max_age_hours: u64) -> usize {
        let hours = i64::try_from(max_age_hours)
            .unwrap_or(MAX_AGE_HOURS_CAP)
            .min(MAX_AGE_HOURS_CAP);
        let cutoff = Utc::now() - Duration::hours(hours);
        self.cleanup_before(cutoff).await
    }

    /// 正被租用（执行中）的上下文不会被移除，留到下一次清理
    pub async fn cleanup_before(&self, cutoff: DateTime<Utc>) -> usize {
        let mut slots = self.slots.write().await;
        let before = slots.len();
        slots.retain(|_, slot| {
            if slot.write_lock.try_lock().is_err() {
                return true;
            }
            let ctx = slot.load();
            !(ctx.created_at < cutoff || ctx.messages.is_empty())
        });
        let removed = before - slots.len();
        tracing::info!(removed, remaining = slots.len(), "Cleaned up old contexts");
        removed
    }

    /// 清空所有上下文（关闭时调用），返回清除数量
    pub async fn clear(&self) -> usize {
        let mut slots = self.slots.write().await;
        let count = slots.len();
        slots.clear();
        count
    }

    pub async fn len(&self) -> usize {
        self.slots.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.slots.read().await.is_empty()
    }

    async fn slot(&self, id: &str) -> Option<Arc<ContextSlot>> {
        self.slots.read().await.get(id).cloned()
    }

    #[cfg(test)]
    pub(crate) async fn backdate(&self, id: &str, hours: i64) {
        if let Some(lease) = self.lease(id).await {
            lease
                .slot
                .swap(|ctx| ctx.created_at = ctx.created_at - Duration::hours(hours));
        }
    }
}

impl Default for ContextStore {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_STEPS)
    }
}

fn generate_context_id() -> String {
    let suffix: String = uuid::Uuid::new_v4().simple().to_string().chars().take(9).collect();
    format!("session_{}_{}", Utc::now().timestamp_millis(), suffix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::types::Role;

    #[tokio::test]
    async fn test_create_and_get() {
        let store = ContextStore::default();
        let id = store.create(None).await;
        assert!(id.starts_with("session_"));

        let ctx = store.get(&id).await.unwrap();
        assert_eq!(ctx.step_count, 0);
        assert_eq!(ctx.max_steps, DEFAULT_MAX_STEPS);
        assert!(ctx.messages.is_empty());
        assert!(store.get("missing").await.is_none());
    }

    #[tokio::test]
    async fn test_create_with_existing_id_keeps_state() {
        let store = ContextStore::default();
        let id = store.create(Some("chat-1".to_string())).await;
        assert!(store.append_message(&id, NewMessage::user("hi")).await);

        let again = store.create(Some("chat-1".to_string())).await;
        assert_eq!(again, "chat-1");
        assert_eq!(store.get("chat-1").await.unwrap().messages.len(), 1);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_append_assigns_position_ids() {
        let store = ContextStore::default();
        let id = store.create(None).await;
        store.append_message(&id, NewMessage::user("a")).await;
        store.append_message(&id, NewMessage::assistant("b").with_agent("main")).await;

        let ctx = store.get(&id).await.unwrap();
        assert_eq!(ctx.messages[0].id, "msg_0");
        assert_eq!(ctx.messages[1].id, "msg_1");
        assert_eq!(ctx.messages[1].agent.as_deref(), Some("main"));
        assert!(!store.append_message("missing", NewMessage::user("x")).await);
    }

    #[tokio::test]
    async fn test_history_returns_last_messages_in_order() {
        let store = ContextStore::default();
        let id = store.create(None).await;
        for i in 0..5 {
            store.append_message(&id, NewMessage::user(format!("m{}", i))).await;
        }

        let history = store.history(&id, 3).await;
        let contents: Vec<&str> = history.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["m2", "m3", "m4"]);
        assert!(history.iter().all(|m| m.role == Role::User));

        // 历史截断不影响存储
        assert_eq!(store.get(&id).await.unwrap().messages.len(), 5);
        assert!(store.history("missing", 3).await.is_empty());
    }

    #[tokio::test]
    async fn test_cleanup_by_age_and_emptiness() {
        let store = ContextStore::default();
        let a = store.create(Some("A".to_string())).await;
        for i in 0..3 {
            store.append_message(&a, NewMessage::user(format!("a{}", i))).await;
        }
        store.backdate(&a, 25).await;

        let b = store.create(Some("B".to_string())).await;
        store.backdate(&b, 1).await;

        let c = store.create(Some("C".to_string())).await;
        store.append_message(&c, NewMessage::user("keep me")).await;
        store.backdate(&c, 1).await;

        assert_eq!(store.cleanup(24).await, 2);
        assert!(store.get("A").await.is_none());
        assert!(store.get("B").await.is_none());
        assert!(store.get("C").await.is_some());
    }

    #[tokio::test]
    async fn test_cleanup_skips_leased_context() {
        let store = ContextStore::default();
        let id = store.create(None).await;
        let lease = store.lease(&id).await.unwrap();

        // 空上下文本该被移除，但正在执行
        assert_eq!(store.cleanup(24).await, 0);
        lease.commit_success("main", &AgentOutput::text("done"));
        drop(lease);

        let ctx = store.get(&id).await.unwrap();
        assert_eq!(ctx.step_count, 1);
    }

    #[tokio::test]
    async fn test_lease_waiting_on_removed_context_returns_none() {
        let store = Arc::new(ContextStore::default());
        let id = store.create(Some("gone".to_string())).await;
        let held = store.lease(&id).await.unwrap();

        let waiter = {
            let store = Arc::clone(&store);
            tokio::spawn(async move { store.lease("gone").await.is_some() })
        };
        tokio::task::yield_now().await;
        store.clear().await;
        drop(held);

        assert!(!waiter.await.unwrap());
    }

    #[tokio::test]
    async fn test_update_is_shallow_merge_and_clamped() {
        let store = ContextStore::default();
        let id = store.create(None).await;

        let mut meta = serde_json::Map::new();
        meta.insert("channel".to_string(), serde_json::json!("web"));
        let ctx = store.update(&id, ContextUpdate::metadata(meta)).await.unwrap();
        assert_eq!(ctx.metadata["channel"], "web");

        {
            let lease = store.lease(&id).await.unwrap();
            lease.commit_success("main", &AgentOutput::text("ok"));
            lease.commit_success("main", &AgentOutput::text("ok again"));
        }

        let ctx = store.update(&id, ContextUpdate::max_steps(1)).await.unwrap();
        assert_eq!(ctx.step_count, 2);
        assert_eq!(ctx.max_steps, 2);
        assert!(store.update("missing", ContextUpdate::default()).await.is_none());
    }

    #[tokio::test]
    async fn test_commit_success_records_agent_state() {
        let store = ContextStore::default();
        let id = store.create(None).await;
        let lease = store.lease(&id).await.unwrap();
        let ctx = lease.commit_success("product", &AgentOutput::text("found 3 products"));

        assert_eq!(ctx.step_count, 1);
        assert_eq!(ctx.messages.len(), 1);
        assert_eq!(ctx.messages[0].role, Role::Assistant);
        let state = ctx.agent_states.get("product").unwrap();
        assert_eq!(state.last_result.response, "found 3 products");
    }

    #[tokio::test]
    async fn test_snapshot_readers_see_whole_updates() {
        let store = ContextStore::default();
        let id = store.create(None).await;
        let before = store.get(&id).await.unwrap();

        let lease = store.lease(&id).await.unwrap();
        lease.commit_success("main", &AgentOutput::text("done"));
        drop(lease);

        // 旧快照保持不变，新快照包含整次提交
        assert_eq!(before.step_count, 0);
        assert!(before.messages.is_empty());
        let after = store.get(&id).await.unwrap();
        assert_eq!(after.step_count, 1);
        assert_eq!(after.messages.len(), 1);
    }

    #[tokio::test]
    async fn test_clear() {
        let store = ContextStore::default();
        store.create(None).await;
        store.create(None).await;
        assert_eq!(store.clear().await, 2);
        assert!(store.is_empty().await);
    }
}
