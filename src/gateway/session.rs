//! 会话：一个用户 / channel 的 flow 状态
//!
//! 持有取消令牌、出站队列、人工回复收件箱、待办任务队列、会话历史与每轮快照。
//! 同一会话内的变更只发生在运行 flow 的那个任务里；跨任务可见的字段用锁保护。
//! 关闭时释放出站队列的发送端并等待发送任务把已入队的消息投递完。

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::core::{FlowPhase, HistoryEntry, SessionSupervisor, SystemSnapshot};
use crate::gateway::{ChannelError, Outbound};

/// 会话 ID
pub type SessionId = String;

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

pub struct Session {
    id: SessionId,
    channel: String,
    supervisor: SessionSupervisor,
    /// 关闭后为 None
    outbound: Mutex<Option<Outbound>>,
    /// 出站队列的发送任务
    sender: tokio::sync::Mutex<Option<JoinHandle<()>>>,
    human_tx: mpsc::UnboundedSender<String>,
    human_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<String>>,
    expected_human: Mutex<Option<String>>,
    task_queue: Mutex<VecDeque<String>>,
    history: Mutex<Vec<HistoryEntry>>,
    snapshots: Mutex<Vec<SystemSnapshot>>,
    /// 当前 flow 的取消令牌
    flow_token: Mutex<Option<CancellationToken>>,
    running: AtomicBool,
    phase: Mutex<FlowPhase>,
}

impl Session {
    pub fn new(channel: impl Into<String>, outbound: Outbound, sender: JoinHandle<()>) -> Self {
        let (human_tx, human_rx) = mpsc::unbounded_channel();
        Self {
            id: format!("session_{}", uuid::Uuid::new_v4()),
            channel: channel.into(),
            supervisor: SessionSupervisor::new(),
            outbound: Mutex::new(Some(outbound)),
            sender: tokio::sync::Mutex::new(Some(sender)),
            human_tx,
            human_rx: tokio::sync::Mutex::new(human_rx),
            expected_human: Mutex::new(None),
            task_queue: Mutex::new(VecDeque::new()),
            history: Mutex::new(Vec::new()),
            snapshots: Mutex::new(Vec::new()),
            flow_token: Mutex::new(None),
            running: AtomicBool::new(false),
            phase: Mutex::new(FlowPhase::Idle),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// 发起会话的 channel
    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn supervisor(&self) -> &SessionSupervisor {
        &self.supervisor
    }

    /// 为新的 flow 创建子令牌（取消上一个 flow 的令牌）
    pub fn new_flow_token(&self) -> CancellationToken {
        let token = self.supervisor.child_token();
        if let Some(previous) = lock(&self.flow_token).replace(token.clone()) {
            previous.cancel();
        }
        token
    }

    /// 取消当前 flow；会话本身仍可运行下一个 flow
    pub fn cancel_flow(&self) -> bool {
        match lock(&self.flow_token).take() {
            Some(token) => {
                tracing::info!(session = %self.id, channel = %self.channel, "flow cancelled");
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// 关闭会话：取消所有 flow，出站队列不再接收新消息
    pub fn shutdown(&self) {
        tracing::info!(session = %self.id, channel = %self.channel, "session shut down");
        self.supervisor.cancel();
        lock(&self.outbound).take();
    }

    /// shutdown 并等待已入队的消息投递完成
    pub async fn close(&self) {
        self.shutdown();
        let sender = self.sender.lock().await.take();
        if let Some(handle) = sender {
            if let Err(e) = handle.await {
                tracing::warn!(session = %self.id, channel = %self.channel, "outbound sender failed: {}", e);
            }
            tracing::debug!(session = %self.id, channel = %self.channel, "outbound queue drained");
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.supervisor.is_cancelled()
    }

    /// 发送到本会话的 channel；会话关闭后返回 Closed
    pub fn send(&self, message: impl AsRef<str>) -> Result<(), ChannelError> {
        match lock(&self.outbound).as_ref() {
            Some(outbound) => outbound.send(message),
            None => Err(ChannelError::Closed(self.channel.clone())),
        }
    }

    /// 标记 flow 开始；已有 flow 在运行时返回 false
    pub fn try_begin_flow(&self) -> bool {
        self.running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub fn end_flow(&self) {
        self.set_expected_human(None);
        lock(&self.flow_token).take();
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn phase(&self) -> FlowPhase {
        *lock(&self.phase)
    }

    pub fn set_phase(&self, phase: FlowPhase) {
        let previous = std::mem::replace(&mut *lock(&self.phase), phase);
        if previous != phase {
            tracing::debug!(session = %self.id, from = ?previous, to = ?phase, "flow phase changed");
        }
    }

    pub fn expected_human(&self) -> Option<String> {
        lock(&self.expected_human).clone()
    }

    pub fn set_expected_human(&self, agent: Option<String>) {
        *lock(&self.expected_human) = agent;
    }

    /// 投递人工回复（至少一次）
    pub fn deliver_human_reply(&self, text: impl Into<String>) -> bool {
        self.human_tx.send(text.into()).is_ok()
    }

    /// 等待前丢弃过期的回复
    pub async fn clear_human_replies(&self) -> usize {
        let mut rx = self.human_rx.lock().await;
        let mut dropped = 0;
        while rx.try_recv().is_ok() {
            dropped += 1;
        }
        dropped
    }

    /// 等待下一条人工回复；只有运行 flow 的任务会调用
    pub async fn next_human_reply(&self) -> Option<String> {
        self.human_rx.lock().await.recv().await
    }

    pub fn push_task(&self, task: impl Into<String>) {
        lock(&self.task_queue).push_back(task.into());
    }

    pub fn pop_task(&self) -> Option<String> {
        lock(&self.task_queue).pop_front()
    }

    pub fn pending_tasks(&self) -> Vec<String> {
        lock(&self.task_queue).iter().cloned().collect()
    }

    pub fn append_history(&self, entry: HistoryEntry) {
        lock(&self.history).push(entry);
    }

    pub fn history(&self) -> Vec<HistoryEntry> {
        lock(&self.history).clone()
    }

    pub fn record_snapshot(&self, snapshot: SystemSnapshot) {
        lock(&self.snapshots).push(snapshot);
    }

    pub fn snapshots(&self) -> Vec<SystemSnapshot> {
        lock(&self.snapshots).clone()
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("channel", &self.channel)
            .field("running", &self.is_running())
            .field("phase", &self.phase())
            .field("expected_human", &self.expected_human())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{spawn_sender, RecordingTransport, SendRetry};
    use std::sync::Arc;

    fn session() -> Session {
        let (outbound, sender) =
            spawn_sender("alice", Arc::new(RecordingTransport::new()), SendRetry::default());
        Session::new("alice", outbound, sender)
    }

    #[tokio::test]
    async fn test_single_flow_at_a_time() {
        let s = session();
        assert_eq!(s.phase(), FlowPhase::Idle);
        assert!(s.try_begin_flow());
        assert!(!s.try_begin_flow());
        s.set_expected_human(Some("Reviewer".into()));
        s.end_flow();
        assert!(s.expected_human().is_none());
        assert!(s.try_begin_flow());
    }

    #[tokio::test]
    async fn test_stale_replies_are_cleared() {
        let s = session();
        assert!(s.deliver_human_reply("old"));
        assert_eq!(s.clear_human_replies().await, 1);
        s.deliver_human_reply("fresh");
        assert_eq!(s.next_human_reply().await.as_deref(), Some("fresh"));
    }

    #[tokio::test]
    async fn test_task_queue_is_fifo() {
        let s = session();
        s.push_task("a");
        s.push_task("b");
        assert_eq!(s.pending_tasks(), vec!["a", "b"]);
        assert_eq!(s.pop_task().as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn test_cancel_flow_then_start_again() {
        let s = session();
        let first = s.new_flow_token();
        assert!(s.cancel_flow());
        assert!(first.is_cancelled());
        assert!(!s.cancel_flow());

        let second = s.new_flow_token();
        assert!(!second.is_cancelled());
        s.shutdown();
        assert!(second.is_cancelled());
        assert!(s.is_shut_down());
    }

    #[tokio::test]
    async fn test_close_drains_queued_messages() {
        let transport = Arc::new(RecordingTransport::failing_first(2));
        let retry = SendRetry {
            max_attempts: 5,
            initial_delay: std::time::Duration::from_millis(1),
            max_delay: std::time::Duration::from_millis(4),
        };
        let (outbound, sender) = spawn_sender("alice", transport.clone(), retry);
        let s = Session::new("alice", outbound, sender);
        s.send("CAMEL_TASK_DONE").unwrap();
        s.send("The final answer.").unwrap();

        s.close().await;
        assert_eq!(
            transport.sent_to("alice"),
            vec!["CAMEL_TASK_DONE", "The final answer."]
        );
        assert!(matches!(s.send("late"), Err(ChannelError::Closed(_))));
        s.close().await;
    }
}
