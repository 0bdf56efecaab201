//! 会话注册表
//!
//! channel → Session 的映射（create-or-fetch），人工 agent → channel 的绑定，以及人工回复的路由：
//! 绑定到某个人工 agent 的 channel 发来的回复，投递给正在等待该 agent 的会话；
//! 未绑定的 channel 的回复投递给它自己的会话。

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::config::HumanBinding;
use crate::gateway::{spawn_sender, ChannelTransport, SendRetry, Session};

pub struct SessionRegistry {
    transport: Arc<dyn ChannelTransport>,
    send_retry: SendRetry,
    /// channel → 会话
    sessions: RwLock<HashMap<String, Arc<Session>>>,
    /// 人工 agent → channel
    bindings: RwLock<HashMap<String, String>>,
}

impl SessionRegistry {
    pub fn new(transport: Arc<dyn ChannelTransport>) -> Self {
        Self::with_retry(transport, SendRetry::default())
    }

    pub fn with_retry(transport: Arc<dyn ChannelTransport>, send_retry: SendRetry) -> Self {
        Self {
            transport,
            send_retry,
            sessions: RwLock::new(HashMap::new()),
            bindings: RwLock::new(HashMap::new()),
        }
    }

    pub async fn with_bindings(self, bindings: &[HumanBinding]) -> Self {
        for b in bindings {
            self.bind_human(&b.agent, &b.channel).await;
        }
        self
    }

    fn spawn_session(&self, channel: &str) -> Arc<Session> {
        let (outbound, sender) = spawn_sender(channel, self.transport.clone(), self.send_retry);
        let session = Arc::new(Session::new(channel, outbound, sender));
        tracing::info!(channel = %channel, session = %session.id(), "session created");
        session
    }

    /// 获取或创建 channel 的会话
    pub async fn get_or_create(&self, channel: &str) -> Arc<Session> {
        if let Some(session) = self.sessions.read().await.get(channel) {
            return session.clone();
        }
        let mut sessions = self.sessions.write().await;
        sessions
            .entry(channel.to_string())
            .or_insert_with(|| self.spawn_session(channel))
            .clone()
    }

    pub async fn get(&self, channel: &str) -> Option<Arc<Session>> {
        self.sessions.read().await.get(channel).cloned()
    }

    /// flow 结束后用新的会话替换旧会话；旧会话关闭并排空出站队列
    pub async fn replace(&self, channel: &str) -> Arc<Session> {
        let fresh = self.spawn_session(channel);
        let old = self
            .sessions
            .write()
            .await
            .insert(channel.to_string(), fresh.clone());
        if let Some(old) = old {
            old.close().await;
        }
        fresh
    }

    pub async fn remove(&self, channel: &str) -> Option<Arc<Session>> {
        let removed = self.sessions.write().await.remove(channel);
        if let Some(ref session) = removed {
            session.close().await;
        }
        removed
    }

    /// 关闭所有会话，等待各自的出站队列投递完
    pub async fn close_all(&self) {
        let sessions: Vec<Arc<Session>> = self
            .sessions
            .write()
            .await
            .drain()
            .map(|(_, session)| session)
            .collect();
        futures_util::future::join_all(sessions.iter().map(|s| s.close())).await;
        tracing::info!(sessions = sessions.len(), "all sessions closed");
    }

    pub async fn bind_human(&self, agent: &str, channel: &str) {
        tracing::info!(agent = %agent, channel = %channel, "human agent bound");
        self.bindings
            .write()
            .await
            .insert(agent.to_string(), channel.to_string());
    }

    /// 接收该人工 agent 任务的 channel
    pub async fn channel_for(&self, agent: &str) -> Option<String> {
        self.bindings.read().await.get(agent).cloned()
    }

    /// 绑定到该 channel 的人工 agent
    pub async fn agents_for_channel(&self, channel: &str) -> Vec<String> {
        let mut agents: Vec<String> = self
            .bindings
            .read()
            .await
            .iter()
            .filter(|(_, c)| c.as_str() == channel)
            .map(|(a, _)| a.clone())
            .collect();
        agents.sort();
        agents
    }

    /// 路由一条人工回复；返回接收回复的会话，没有会话在等待时返回 None
    pub async fn deliver_human_reply(&self, channel: &str, text: &str) -> Option<Arc<Session>> {
        let bound = self.agents_for_channel(channel).await;
        let target = {
            let sessions = self.sessions.read().await;
            let by_binding = sessions.values().find(|s| {
                s.expected_human()
                    .is_some_and(|expected| bound.iter().any(|a| *a == expected))
            });
            let own = sessions
                .get(channel)
                .filter(|s| s.expected_human().is_some());
            by_binding.or(own).cloned()
        };
        match target {
            Some(session) if session.deliver_human_reply(text) => {
                tracing::info!(
                    from = %channel,
                    session = %session.id(),
                    agent = ?session.expected_human(),
                    "human reply delivered"
                );
                Some(session)
            }
            _ => {
                tracing::debug!(from = %channel, "no session is waiting for a human reply");
                None
            }
        }
    }

    /// 取消 channel 上正在运行的 flow
    pub async fn cancel(&self, channel: &str) -> bool {
        match self.get(channel).await {
            Some(session) => session.cancel_flow(),
            None => false,
        }
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("send_retry", &self.send_retry)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::RecordingTransport;

    fn registry() -> SessionRegistry {
        SessionRegistry::new(Arc::new(RecordingTransport::new()))
    }

    #[tokio::test]
    async fn test_create_or_fetch() {
        let reg = registry();
        let a = reg.get_or_create("alice").await;
        let b = reg.get_or_create("alice").await;
        assert_eq!(a.id(), b.id());
        assert_eq!(reg.session_count().await, 1);

        let fresh = reg.replace("alice").await;
        assert_ne!(fresh.id(), a.id());
        assert!(a.is_shut_down());
    }

    #[tokio::test]
    async fn test_bound_reply_routes_to_waiting_session() {
        let reg = registry()
            .with_bindings(&[HumanBinding {
                agent: "Reviewer".into(),
                channel: "bob".into(),
            }])
            .await;
        let origin = reg.get_or_create("alice").await;
        reg.get_or_create("bob").await;
        assert_eq!(reg.channel_for("Reviewer").await.as_deref(), Some("bob"));

        assert!(reg.deliver_human_reply("bob", "too early").await.is_none());

        origin.set_expected_human(Some("Reviewer".into()));
        let target = reg.deliver_human_reply("bob", "42").await.unwrap();
        assert_eq!(target.id(), origin.id());
        assert_eq!(origin.next_human_reply().await.as_deref(), Some("42"));
    }

    #[tokio::test]
    async fn test_unbound_reply_goes_to_own_session() {
        let reg = registry();
        let session = reg.get_or_create("carol").await;
        session.set_expected_human(Some("Helper".into()));
        let target = reg.deliver_human_reply("carol", "done").await.unwrap();
        assert_eq!(target.id(), session.id());
    }

    #[tokio::test]
    async fn test_cancel_running_flow() {
        let reg = registry();
        let session = reg.get_or_create("dave").await;
        assert!(!reg.cancel("dave").await);
        let token = session.new_flow_token();
        assert!(reg.cancel("dave").await);
        assert!(token.is_cancelled());
        assert!(!reg.cancel("nobody").await);
    }

    #[tokio::test]
    async fn test_close_all_delivers_pending_messages() {
        let transport = Arc::new(RecordingTransport::failing_first(1));
        let reg = SessionRegistry::with_retry(
            transport.clone(),
            SendRetry {
                max_attempts: 3,
                initial_delay: std::time::Duration::from_millis(1),
                max_delay: std::time::Duration::from_millis(2),
            },
        );
        let alice = reg.get_or_create("alice").await;
        let bob = reg.get_or_create("bob").await;
        alice.send("fin").unwrap();
        bob.send("Task assigned to Reviewer: q").unwrap();

        reg.close_all().await;
        assert_eq!(transport.sent_to("alice"), vec!["fin"]);
        assert_eq!(transport.sent_to("bob"), vec!["Task assigned to Reviewer: q"]);
        assert_eq!(reg.session_count().await, 0);
        assert!(alice.is_shut_down());
    }
}
