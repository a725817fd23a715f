//! 输入校验：长度上限、HTML / 脚本清洗、按 IP 的滑动窗口限流

use std::collections::{HashMap, VecDeque};
use std::net::IpAddr;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use regex::Regex;
use thiserror::Error;

/// 超过这个数量的 IP 记录时顺带清理过期条目
const PRUNE_THRESHOLD: usize = 10_000;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// 缺失、不是字符串或超长
    #[error("Invalid message")]
    InvalidMessage,

    #[error("Message cannot be empty")]
    Empty,

    #[error("Rate limit exceeded. Please try again later.")]
    RateLimited,
}

/// 聊天文本清洗
pub struct Sanitizer {
    script: Regex,
    tag: Regex,
    js_url: Regex,
    handler: Regex,
    max_chars: usize,
}

impl Sanitizer {
    pub fn new(max_chars: usize) -> Result<Self, regex::Error> {
        Ok(Self {
            script: Regex::new(r"(?is)<script[^>]*>.*?</script>")?,
            tag: Regex::new(r"<[^>]*>")?,
            js_url: Regex::new(r"(?i)javascript:")?,
            handler: Regex::new(r#"(?i)\bon\w+=['"\s]*[^'"\s>]*"#)?,
            max_chars,
        })
    }

    /// 先按原文检查长度，再去掉脚本块、标签、javascript: 与内联事件处理器，最后 trim
    pub fn sanitize(&self, raw: Option<&str>) -> Result<String, ValidationError> {
        let raw = raw.ok_or(ValidationError::InvalidMessage)?;
        if raw.is_empty() || raw.chars().count() > self.max_chars {
            return Err(ValidationError::InvalidMessage);
        }
        let cleaned = self.script.replace_all(raw, "");
        let cleaned = self.tag.replace_all(&cleaned, "");
        let cleaned = self.js_url.replace_all(&cleaned, "");
        let cleaned = self.handler.replace_all(&cleaned, "");
        let cleaned = cleaned.trim();
        if cleaned.is_empty() {
            return Err(ValidationError::Empty);
        }
        Ok(cleaned.to_string())
    }
}

/// 滑动窗口限流：每个 IP 在 window 内最多 max_requests 次
pub struct RateLimiter {
    window: Duration,
    max_requests: usize,
    requests: Mutex<HashMap<IpAddr, VecDeque<Instant>>>,
}

impl RateLimiter {
    pub fn new(window: Duration, max_requests: usize) -> Self {
        Self {
            window,
            max_requests,
            requests: Mutex::new(HashMap::new()),
        }
    }

    pub fn check(&self, ip: IpAddr) -> Result<(), ValidationError> {
        self.check_at(ip, Instant::now())
    }

    /// 被拒绝的请求不计入窗口
    pub fn check_at(&self, ip: IpAddr, now: Instant) -> Result<(), ValidationError> {
        let mut requests = match self.requests.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        let window = self.window;
        let expired = |t: &Instant| now.saturating_duration_since(*t) >= window;

        let entry = requests.entry(ip).or_default();
        while entry.front().is_some_and(expired) {
            entry.pop_front();
        }
        if entry.len() >= self.max_requests {
            tracing::warn!(ip = %ip, limit = self.max_requests, "Rate limit exceeded");
            return Err(ValidationError::RateLimited);
        }
        entry.push_back(now);

        if requests.len() > PRUNE_THRESHOLD {
            requests.retain(|_, times| times.back().is_some_and(|t| !expired(t)));
        }
        Ok(())
    }

    pub fn tracked_clients(&self) -> usize {
        match self.requests.lock() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_strips_markup() {
        let s = Sanitizer::new(1000).unwrap();
        assert_eq!(
            s.sanitize(Some("  <script>alert(1)</script><b>선크림</b> 추천  ")).unwrap(),
            "선크림 추천"
        );
        assert_eq!(
            s.sanitize(Some("<a href=\"javascript:void(0)\">link</a>")).unwrap(),
            "link"
        );
        assert_eq!(s.sanitize(Some("hi onclick=evil() there")).unwrap(), "hi  there");
        assert_eq!(s.sanitize(Some("ONLOAD=x 보습")).unwrap(), "보습");
        // 普通单词中间的 on 不是事件处理器
        assert_eq!(
            s.sanitize(Some("conditioner=2 sunscreen=1")).unwrap(),
            "conditioner=2 sunscreen=1"
        );
    }

    #[test]
    fn test_sanitize_rejects_invalid() {
        let s = Sanitizer::new(5).unwrap();
        assert_eq!(s.sanitize(None), Err(ValidationError::InvalidMessage));
        assert_eq!(s.sanitize(Some("")), Err(ValidationError::InvalidMessage));
        assert_eq!(s.sanitize(Some("abcdef")), Err(ValidationError::InvalidMessage));
        assert_eq!(s.sanitize(Some("<p>")), Err(ValidationError::Empty));
        // 按字符计数
        assert_eq!(s.sanitize(Some("가나다라마")).unwrap(), "가나다라마");
    }

    #[test]
    fn test_rate_limiter_window() {
        let limiter = RateLimiter::new(Duration::from_secs(60), 2);
        let ip: IpAddr = "10.0.0.1".parse().unwrap();
        let other: IpAddr = "10.0.0.2".parse().unwrap();
        let t0 = Instant::now();

        assert!(limiter.check_at(ip, t0).is_ok());
        assert!(limiter.check_at(ip, t0 + Duration::from_secs(1)).is_ok());
        assert_eq!(
            limiter.check_at(ip, t0 + Duration::from_secs(2)),
            Err(ValidationError::RateLimited)
        );
        assert!(limiter.check_at(other, t0 + Duration::from_secs(2)).is_ok());

        // 第一条请求滑出窗口后放行一次
        assert!(limiter.check_at(ip, t0 + Duration::from_secs(60)).is_ok());
        assert_eq!(
            limiter.check_at(ip, t0 + Duration::from_secs(60)),
            Err(ValidationError::RateLimited)
        );
        assert_eq!(limiter.tracked_clients(), 2);
    }
}
