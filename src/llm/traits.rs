//! LLM 客户端抽象
//!
//! 所有后端（OpenAI 兼容 / Mock / Scripted）实现 LlmClient；RetryingLlmClient 为任意后端
//! 加上单次请求超时与有限次数的重试。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::context::Message;

/// LLM 调用错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LlmError {
    #[error("Request timed out after {0}s")]
    Timeout(u64),

    #[error("API error: {0}")]
    Api(String),

    #[error("Rate limited by provider: {0}")]
    RateLimited(String),

    /// 模型输出无法解析（例如格式错误的工具调用 JSON）
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Request rejected: {0}")]
    InvalidRequest(String),
}

impl LlmError {
    /// 超时 / 限流 / 上游 5xx 之类的瞬时错误才值得重试
    pub fn is_retryable(&self) -> bool {
        match self {
            LlmError::Timeout(_) | LlmError::RateLimited(_) => true,
            LlmError::Api(msg) => {
                let msg = msg.to_lowercase();
                !(msg.contains("401")
                    || msg.contains("invalid_api_key")
                    || msg.contains("incorrect api key"))
            }
            LlmError::InvalidResponse(_) | LlmError::InvalidRequest(_) => false,
        }
    }
}

/// LLM 客户端 trait
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// 非流式完成，返回首条 choice 的文本
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError>;

    /// 获取累计 token 使用统计：(prompt_tokens, completion_tokens, total_tokens)
    /// 默认返回 (0, 0, 0)，具体实现可覆盖
    fn token_usage(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }
}

/// 重试策略：固定次数 + 指数退避（带上限）
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// 总尝试次数（含首次）
    pub max_attempts: u32,
    /// 单次请求超时
    pub request_timeout: Duration,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            request_timeout: Duration::from_secs(60),
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(8),
        }
    }
}

impl RetryConfig {
    fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

/// 为内层客户端加超时与重试
pub struct RetryingLlmClient {
    inner: Arc<dyn LlmClient>,
    config: RetryConfig,
}

impl RetryingLlmClient {
    pub fn new(inner: Arc<dyn LlmClient>, config: RetryConfig) -> Self {
        Self { inner, config }
    }
}

#[async_trait]
impl LlmClient for RetryingLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError> {
        let max_attempts = self.config.max_attempts.max(1);
        let timeout_secs = self.config.request_timeout.as_secs();
        let mut attempt = 0;

        loop {
            attempt += 1;
            let result =
                match tokio::time::timeout(self.config.request_timeout, self.inner.complete(messages))
                    .await
                {
                    Ok(r) => r,
                    Err(_) => Err(LlmError::Timeout(timeout_secs)),
                };

            match result {
                Ok(content) => return Ok(content),
                Err(e) if attempt < max_attempts && e.is_retryable() => {
                    let delay = self.config.backoff_for(attempt);
                    tracing::warn!(
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        "LLM call failed, retrying: {}",
                        e
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    tracing::error!(attempt, "LLM call failed: {}", e);
                    return Err(e);
                }
            }
        }
    }

    fn token_usage(&self) -> (u64, u64, u64) {
        self.inner.token_usage()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyClient {
        calls: AtomicU32,
        failures: u32,
        error: LlmError,
    }

    #[async_trait]
    impl LlmClient for FlakyClient {
        async fn complete(&self, _messages: &[Message]) -> Result<String, LlmError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                Err(self.error.clone())
            } else {
                Ok("ok".to_string())
            }
        }
    }

    fn fast_config() -> RetryConfig {
        RetryConfig {
            max_attempts: 3,
            request_timeout: Duration::from_secs(5),
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(2),
        }
    }

    #[tokio::test]
    async fn test_retry_recovers_from_transient_errors() {
        let inner = Arc::new(FlakyClient {
            calls: AtomicU32::new(0),
            failures: 2,
            error: LlmError::Api("502 Bad Gateway".to_string()),
        });
        let client = RetryingLlmClient::new(inner.clone(), fast_config());
        let out = client.complete(&[Message::user("hi")]).await.unwrap();
        assert_eq!(out, "ok");
        assert_eq!(inner.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_gives_up_after_max_attempts() {
        let inner = Arc::new(FlakyClient {
            calls: AtomicU32::new(0),
            failures: 10,
            error: LlmError::RateLimited("429".to_string()),
        });
        let client = RetryingLlmClient::new(inner.clone(), fast_config());
        let err = client.complete(&[Message::user("hi")]).await.unwrap_err();
        assert!(matches!(err, LlmError::RateLimited(_)));
        assert_eq!(inner.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_error_fails_fast() {
        let inner = Arc::new(FlakyClient {
            calls: AtomicU32::new(0),
            failures: 10,
            error: LlmError::Api("401 invalid_api_key".to_string()),
        });
        let client = RetryingLlmClient::new(inner.clone(), fast_config());
        assert!(client.complete(&[Message::user("hi")]).await.is_err());
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_backoff_is_capped() {
        let cfg = RetryConfig::default();
        assert_eq!(cfg.backoff_for(1), Duration::from_millis(500));
        assert_eq!(cfg.backoff_for(2), Duration::from_secs(1));
        assert_eq!(cfg.backoff_for(10), Duration::from_secs(8));
    }
}
