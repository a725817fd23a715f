//! 进度流 Writer
//!
//! Agent / 工具在得到最终结果前推送 0..N 条中间信封。Writer 是显式的通道句柄，
//! 按值沿调用链传递（函数参数，而非隐式上下文）。投递失败（客户端已断开）只记日志，
//! 不会中止所属执行；没有 Writer 时一律静默。

use tokio::sync::mpsc;

use crate::core::AgentError;
use crate::envelope::Envelope;

/// 进度流 Writer：克隆后共享同一条有序通道
#[derive(Debug, Clone)]
pub struct ProgressWriter {
    tx: mpsc::UnboundedSender<Envelope>,
}

impl ProgressWriter {
    /// 创建 Writer 与对应的接收端（接收端由传输层持有）
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Envelope>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// 交给传输层即返回，不等待客户端确认。
    /// 接收端已关闭时返回 Transport 错误（已记日志），调用方不应因此中止执行。
    pub fn write(&self, envelope: Envelope) -> Result<(), AgentError> {
        let kind = envelope.kind();
        let id = envelope.id().to_string();
        match self.tx.send(envelope) {
            Ok(()) => {
                tracing::debug!(envelope_type = kind, envelope_id = %id, "Envelope handed to transport");
                Ok(())
            }
            Err(_) => {
                let err = AgentError::Transport(format!(
                    "progress receiver closed, {} envelope {} dropped",
                    kind, id
                ));
                tracing::warn!(envelope_type = kind, envelope_id = %id, "{}", err);
                Err(err)
            }
        }
    }

    /// 接收端是否已关闭（客户端断开）
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// 向可选 Writer 推送；没有 Writer 时只留一条 debug 日志
pub fn emit(writer: Option<&ProgressWriter>, envelope: Envelope) {
    match writer {
        Some(w) => {
            let _ = w.write(envelope);
        }
        None => {
            tracing::debug!(
                envelope_type = envelope.kind(),
                "No progress writer attached, envelope logged only"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_preserves_order() {
        let (writer, mut rx) = ProgressWriter::channel();
        let w2 = writer.clone();
        assert!(writer.write(Envelope::loading("one")).is_ok());
        assert!(w2.write(Envelope::loading("two")).is_ok());
        assert!(writer.write(Envelope::loading("three")).is_ok());

        let contents: Vec<String> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|e| match e {
                Envelope::Loading(l) => l.content,
                other => panic!("Unexpected envelope {:?}", other),
            })
            .collect();
        assert_eq!(contents, vec!["one", "two", "three"]);
    }

    #[test]
    fn test_write_after_disconnect_is_swallowed() {
        let (writer, rx) = ProgressWriter::channel();
        drop(rx);
        assert!(writer.is_closed());
        let err = writer.write(Envelope::loading("lost")).unwrap_err();
        assert!(matches!(err, AgentError::Transport(_)));
        assert_eq!(err.code(), "transport_error");
    }

    #[test]
    fn test_emit_without_writer_is_noop() {
        emit(None, Envelope::loading("nobody listening"));
    }
}
