//! WebSocket 网关
//!
//! 浏览器客户端通过 `chatMessage` 事件发起对话，网关把进度信封与最终结果
//! 以 `response` / `error` 事件推回同一连接。

mod hub;
mod message;
mod validation;

pub use hub::{Gateway, GatewayConfig};
pub use message::{
    ClientFrame, ErrorPayload, ResponseBody, ResponsePayload, ServerFrame,
    GENERIC_ERROR_MESSAGE, INVALID_MESSAGE,
};
pub use validation::{RateLimiter, Sanitizer, ValidationError};
