//! Channel 传输
//!
//! 编排器只依赖 ChannelTransport::send(channel_id, text)。每个会话一个出站队列（mpsc），
//! 由专门的发送任务依次取出并投递；投递失败按退避重试，channel 短暂不可用时消息不会丢失。

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    #[error("channel '{0}' is not connected")]
    NotConnected(String),

    #[error("send to '{channel}' failed: {reason}")]
    SendFailed { channel: String, reason: String },

    #[error("outbound queue for '{0}' is closed")]
    Closed(String),
}

/// 外部传输层（WebSocket、终端等）
#[async_trait]
pub trait ChannelTransport: Send + Sync {
    async fn send(&self, channel_id: &str, text: &str) -> Result<(), ChannelError>;
}

/// `{"role": ..., "content": ...}` 形式的消息只发送 content，其余原样发送
pub fn format_outbound(message: &str) -> String {
    match serde_json::from_str::<Value>(message) {
        Ok(Value::Object(map)) if map.contains_key("role") && map.contains_key("content") => {
            match map.get("content") {
                Some(Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
                None => message.to_string(),
            }
        }
        _ => message.to_string(),
    }
}

/// 发送任务的重试参数
#[derive(Debug, Clone, Copy)]
pub struct SendRetry {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for SendRetry {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
        }
    }
}

/// 会话的出站队列句柄（可克隆）
#[derive(Debug, Clone)]
pub struct Outbound {
    channel_id: String,
    tx: mpsc::UnboundedSender<String>,
}

impl Outbound {
    pub fn channel_id(&self) -> &str {
        &self.channel_id
    }

    /// 入队，不等待投递
    pub fn send(&self, message: impl AsRef<str>) -> Result<(), ChannelError> {
        let formatted = format_outbound(message.as_ref());
        tracing::info!(channel = %self.channel_id, "sending response: {}", formatted);
        self.tx
            .send(formatted)
            .map_err(|_| ChannelError::Closed(self.channel_id.clone()))
    }
}

/// 创建出站队列并启动发送任务；队列的所有发送端释放后任务退出
pub fn spawn_sender(
    channel_id: impl Into<String>,
    transport: Arc<dyn ChannelTransport>,
    retry: SendRetry,
) -> (Outbound, JoinHandle<()>) {
    let channel_id = channel_id.into();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let task_channel = channel_id.clone();
    let handle = tokio::spawn(async move {
        while let Some(text) = rx.recv().await {
            deliver(transport.as_ref(), &task_channel, &text, retry).await;
        }
        tracing::debug!(channel = %task_channel, "outbound sender stopped");
    });
    (Outbound { channel_id, tx }, handle)
}

async fn deliver(transport: &dyn ChannelTransport, channel: &str, text: &str, retry: SendRetry) {
    let mut delay = retry.initial_delay;
    for attempt in 1..=retry.max_attempts.max(1) {
        match transport.send(channel, text).await {
            Ok(()) => return,
            Err(e) if attempt < retry.max_attempts => {
                tracing::warn!(channel = %channel, attempt, "send failed, retrying: {}", e);
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(retry.max_delay);
            }
            Err(e) => {
                tracing::error!(channel = %channel, "dropping message after {} attempts: {}", attempt, e);
            }
        }
    }
}

/// 内存传输：记录所有投递的消息；可设置前 N 次发送失败
#[derive(Debug, Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<(String, String)>>,
    failures_left: AtomicUsize,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// 前 n 次 send 返回 NotConnected
    pub fn failing_first(n: usize) -> Self {
        Self {
            failures_left: AtomicUsize::new(n),
            ..Self::default()
        }
    }

    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// 某个 channel 收到的消息，按投递顺序
    pub fn sent_to(&self, channel_id: &str) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter(|(c, _)| c == channel_id)
            .map(|(_, text)| text)
            .collect()
    }
}

#[async_trait]
impl ChannelTransport for RecordingTransport {
    async fn send(&self, channel_id: &str, text: &str) -> Result<(), ChannelError> {
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(ChannelError::NotConnected(channel_id.to_string()));
        }
        self.sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((channel_id.to_string(), text.to_string()));
        Ok(())
    }
}
