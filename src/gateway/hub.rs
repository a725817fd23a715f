//! WebSocket 网关
//!
//! 每个连接跟踪一个当前会话上下文；每条 chatMessage 在独立任务中执行 main Agent，
//! 客户端断开只会停止进度投递，不会打断上下文的修改。后台定时器按配置清理过期上下文，
//! 每轮开始前重新确认上下文（被清理则重建，步数用完则续到新上下文）。

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use super::message::{ClientFrame, ServerFrame, CHAT_MESSAGE_EVENT, INVALID_MESSAGE};
use super::validation::{RateLimiter, Sanitizer, ValidationError};
use crate::agents::MAIN_AGENT;
use crate::config::AppConfig;
use crate::core::{AgentError, ExecutionOptions, Orchestrator};
use crate::envelope::Envelope;
use crate::stream::{emit, ProgressWriter};

/// 执行前推送的两条 loading 信封及其后的停顿
const KICKOFF_STEPS: [(&str, u64); 2] = [
    ("쇼핑 에이전트 생각중...", 200),
    ("쇼핑 에이전트 분석중...", 300),
];

/// 上下文在确认与执行之间被清理或被并发轮次用完步数时的最多尝试次数
const MAX_TURN_ATTEMPTS: usize = 3;

/// 连接当前使用的上下文 ID；续到新上下文时更新
type ConnectionContext = Arc<Mutex<String>>;

/// 网关配置
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub bind_addr: String,
    pub max_message_chars: usize,
    pub rate_limit_window: Duration,
    pub rate_limit_max_requests: usize,
    pub cleanup_interval: Duration,
    pub context_max_age_hours: u64,
    pub drain_timeout: Duration,
    /// 两条 kick-off 信封之后是否停顿（测试中关闭）
    pub kickoff_delays: bool,
}

impl GatewayConfig {
    pub fn from_app(cfg: &AppConfig) -> Self {
        Self {
            bind_addr: cfg.gateway.bind_addr.clone(),
            max_message_chars: cfg.gateway.max_message_chars,
            rate_limit_window: Duration::from_secs(cfg.gateway.rate_limit_window_secs),
            rate_limit_max_requests: cfg.gateway.rate_limit_max_requests,
            cleanup_interval: Duration::from_secs(cfg.orchestrator.cleanup_interval_secs.max(1)),
            context_max_age_hours: cfg.orchestrator.context_max_age_hours,
            drain_timeout: Duration::from_secs(cfg.gateway.drain_timeout_secs),
            kickoff_delays: true,
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self::from_app(&AppConfig::default())
    }
}

pub struct Gateway {
    config: GatewayConfig,
    orchestrator: Arc<Orchestrator>,
    sanitizer: Sanitizer,
    limiter: RateLimiter,
    turns: TaskTracker,
}

impl Gateway {
    pub fn new(config: GatewayConfig, orchestrator: Arc<Orchestrator>) -> anyhow::Result<Self> {
        let sanitizer =
            Sanitizer::new(config.max_message_chars).context("failed to build sanitizer")?;
        let limiter = RateLimiter::new(config.rate_limit_window, config.rate_limit_max_requests);
        Ok(Self {
            config,
            orchestrator,
            sanitizer,
            limiter,
            turns: TaskTracker::new(),
        })
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// 绑定配置中的地址并运行，直到 shutdown 被取消
    pub async fn serve(self: Arc<Self>, shutdown: CancellationToken) -> anyhow::Result<()> {
        let listener = TcpListener::bind(&self.config.bind_addr)
            .await
            .with_context(|| format!("failed to bind {}", self.config.bind_addr))?;
        self.serve_listener(listener, shutdown).await
    }

    /// 在已绑定的 listener 上运行；返回前等待进行中的执行结束（有超时）
    pub async fn serve_listener(
        self: Arc<Self>,
        listener: TcpListener,
        shutdown: CancellationToken,
    ) -> anyhow::Result<()> {
        let addr = listener.local_addr().context("listener has no local address")?;
        tracing::info!("Gateway listening on ws://{}", addr);

        let mut cleanup_timer = tokio::time::interval(self.config.cleanup_interval);
        // 第一次 tick 立即返回
        cleanup_timer.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("Gateway stopping, no longer accepting connections");
                    break;
                }
                _ = cleanup_timer.tick() => {
                    let removed = self.orchestrator.cleanup(self.config.context_max_age_hours).await;
                    if removed > 0 {
                        tracing::info!(removed, "Cleaned up expired contexts");
                    }
                }
                result = listener.accept() => {
                    match result {
                        Ok((stream, peer)) => {
                            let gateway = Arc::clone(&self);
                            let token = shutdown.child_token();
                            tokio::spawn(async move {
                                if let Err(e) = gateway.handle_connection(stream, peer, token).await {
                                    tracing::error!("Connection error from {}: {:#}", peer, e);
                                }
                            });
                        }
                        Err(e) => {
                            tracing::error!("Accept error: {}", e);
                        }
                    }
                }
            }
        }

        self.drain().await;
        Ok(())
    }

    /// 等待所有进行中的执行
    pub async fn drain(&self) {
        self.turns.close();
        let pending = self.turns.len();
        if pending == 0 {
            return;
        }
        tracing::info!(pending, "Waiting for in-flight executions");
        if tokio::time::timeout(self.config.drain_timeout, self.turns.wait())
            .await
            .is_err()
        {
            tracing::warn!(
                remaining = self.turns.len(),
                "In-flight executions did not finish within {:?}",
                self.config.drain_timeout
            );
        }
    }

    async fn handle_connection(
        self: Arc<Self>,
        stream: TcpStream,
        peer: SocketAddr,
        shutdown: CancellationToken,
    ) -> anyhow::Result<()> {
        let ws_stream = tokio_tungstenite::accept_async(stream)
            .await
            .context("WebSocket handshake failed")?;
        let (mut ws_tx, mut ws_rx) = ws_stream.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<ServerFrame>();

        let context_id = self.orchestrator.create_context(None).await;
        tracing::info!(peer = %peer, context_id = %context_id, "User connected to chat");
        let session: ConnectionContext = Arc::new(Mutex::new(context_id));

        let sender = tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                let json = match frame.to_json() {
                    Ok(json) => json,
                    Err(e) => {
                        tracing::error!("Failed to serialize frame: {}", e);
                        continue;
                    }
                };
                if ws_tx.send(WsMessage::Text(json)).await.is_err() {
                    break;
                }
            }
            let _ = ws_tx.close().await;
        });

        loop {
            let msg = tokio::select! {
                _ = shutdown.cancelled() => break,
                msg = ws_rx.next() => msg,
            };
            let msg = match msg {
                Some(Ok(m)) => m,
                Some(Err(e)) => {
                    tracing::warn!(peer = %peer, "WebSocket receive error: {}", e);
                    break;
                }
                None => break,
            };

            match msg {
                WsMessage::Text(text) => self.handle_frame(&text, peer, &session, &tx),
                WsMessage::Close(_) => break,
                _ => {}
            }
        }

        drop(tx);
        let _ = sender.await;
        let context_id = session.lock().await.clone();
        tracing::info!(peer = %peer, context_id = %context_id, "User disconnected from chat");
        Ok(())
    }

    fn handle_frame(
        &self,
        text: &str,
        peer: SocketAddr,
        session: &ConnectionContext,
        tx: &mpsc::UnboundedSender<ServerFrame>,
    ) {
        let frame: ClientFrame = match serde_json::from_str(text) {
            Ok(f) => f,
            Err(e) => {
                tracing::debug!(peer = %peer, "Unparseable frame: {}", e);
                let _ = tx.send(ServerFrame::error(INVALID_MESSAGE));
                return;
            }
        };
        if frame.event != CHAT_MESSAGE_EVENT {
            tracing::debug!(peer = %peer, event = %frame.event, "Ignoring unknown event");
            return;
        }

        if let Err(e) = self.limiter.check(peer.ip()) {
            let _ = tx.send(ServerFrame::error(e.to_string()));
            return;
        }
        let message = match self.sanitizer.sanitize(frame.chat_text()) {
            Ok(m) => m,
            Err(ValidationError::InvalidMessage) => {
                let _ = tx.send(ServerFrame::error(INVALID_MESSAGE));
                return;
            }
            Err(e) => {
                let _ = tx.send(ServerFrame::error(e.to_string()));
                return;
            }
        };
        tracing::info!(peer = %peer, chars = message.chars().count(), "Received chat message");

        self.turns.spawn(run_turn(
            Arc::clone(&self.orchestrator),
            Arc::clone(session),
            message,
            tx.clone(),
            self.config.kickoff_delays,
        ));
    }
}

/// 一轮对话：kick-off 进度、执行 main Agent、转发所有进度后再发送最终结果
async fn run_turn(
    orchestrator: Arc<Orchestrator>,
    session: ConnectionContext,
    message: String,
    out: mpsc::UnboundedSender<ServerFrame>,
    kickoff_delays: bool,
) {
    let (writer, mut progress) = ProgressWriter::channel();
    let forward_out = out.clone();
    let forwarder = tokio::spawn(async move {
        while let Some(envelope) = progress.recv().await {
            if forward_out.send(ServerFrame::progress(envelope)).is_err() {
                break;
            }
        }
    });

    for (content, delay_ms) in KICKOFF_STEPS {
        emit(Some(&writer), Envelope::loading(content));
        if kickoff_delays {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        }
    }

    let mut attempt = 0;
    let (context_id, result) = loop {
        attempt += 1;
        let context_id = {
            let mut current = session.lock().await;
            let resumed = orchestrator.resume_context(&current).await;
            if *current != resumed {
                *current = resumed.clone();
            }
            resumed
        };
        let result = orchestrator
            .execute_agent(
                MAIN_AGENT,
                message.as_str(),
                Some(&context_id),
                ExecutionOptions::with_writer(writer.clone()),
            )
            .await;
        match result {
            // 这两种失败都发生在修改上下文之前，可以安全重试
            Err(AgentError::ContextNotFound(_)) | Err(AgentError::StepLimitExceeded { .. })
                if attempt < MAX_TURN_ATTEMPTS =>
            {
                tracing::debug!(context_id = %context_id, attempt, "Context changed before execution, retrying");
            }
            result => break (context_id, result),
        }
    };
    drop(writer);

    // Writer 的所有克隆都已释放，转发任务会在排空后结束
    if forwarder.await.is_err() {
        tracing::warn!(context_id = %context_id, "Progress forwarder panicked");
    }

    let frame = match result {
        Ok(execution) => ServerFrame::result(execution),
        Err(e) => {
            tracing::error!(context_id = %context_id, "[Chat] Error processing message: {}", e);
            ServerFrame::execution_error(&e)
        }
    };
    if out.send(frame).is_err() {
        tracing::debug!(context_id = %context_id, "Client gone before final response");
    }
}
