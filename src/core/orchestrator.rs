//! 轮转编排器：execute_tasks 主控循环
//!
//! 一次 flow：克隆 coordinator 与参与者 → 循环 { coordinator 选下一个 actor → 派发 → actor 回复 }，
//! 直到 coordinator 输出 CAMEL_TASK_DONE 或达到 turn_limit；随后请求 Final Answer，
//! 最后对每个 agent 调用 end() 并释放本次 flow 的 agent 表。
//!
//! 所有挂起点（模型调用、人工等待、轮次边界）都检查 flow 的取消令牌。

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Map, Value};
use tokio_util::sync::CancellationToken;

use crate::agent::{Agent, AgentHandle, AgentFactory};
use crate::config::{AppConfig, FlowDefinition};
use crate::core::{
    run_cancellable, AgentError, FlowPhase, HistoryEntry, RecoveryAction, RecoveryEngine,
    SystemSnapshot, NO_SOLUTION_FALLBACK,
};
use crate::gateway::{Session, SessionRegistry};
use crate::memory::Message;
use crate::react::{parse_instruction, Instruction};

/// coordinator 表示任务完成的标记
pub const CAMEL_TASK_DONE: &str = "CAMEL_TASK_DONE";

const FINAL_ANSWER_PROMPT: &str = "Provide your Final Answer based on your system prompt.";

/// coordinator 调用出错后的等待
const COORDINATOR_ERROR_DELAY: Duration = Duration::from_secs(1);

/// flow 如何结束
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// coordinator 输出了 CAMEL_TASK_DONE
    Done,
    /// 达到 turn_limit
    TurnLimit,
}

/// 一次 flow 的结果
#[derive(Debug, Clone)]
pub struct FlowOutcome {
    pub flow: String,
    /// 已执行的 coordinator 轮次
    pub turns: usize,
    pub termination: Termination,
    pub final_answer: Option<String>,
    pub history: Vec<HistoryEntry>,
}

/// coordinator 一轮的结果
enum CoordinatorTurn {
    Done,
    Dispatch(Instruction),
}

pub struct Orchestrator {
    config: Arc<AppConfig>,
    /// 会话配置时创建的 agent 模板，每次 flow 克隆
    templates: BTreeMap<String, AgentHandle>,
    registry: Arc<SessionRegistry>,
    recovery: RecoveryEngine,
}

impl Orchestrator {
    pub fn new(
        config: Arc<AppConfig>,
        templates: BTreeMap<String, AgentHandle>,
        registry: Arc<SessionRegistry>,
    ) -> Self {
        Self {
            config,
            templates,
            registry,
            recovery: RecoveryEngine::new(),
        }
    }

    /// 用工厂构建全部模板
    pub fn from_factory(
        config: Arc<AppConfig>,
        factory: &AgentFactory,
        registry: Arc<SessionRegistry>,
    ) -> Result<Self, AgentError> {
        let templates = factory.build_all(&config)?;
        Ok(Self::new(config, templates, registry))
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// 在 channel 的会话上执行 flow；flow 结束后该会话被新会话替换
    pub async fn run(&self, channel: &str, flow_name: &str) -> Result<FlowOutcome, AgentError> {
        let session = self.registry.get_or_create(channel).await;
        let result = self.execute_tasks(&session, flow_name).await;
        self.registry.replace(channel).await;
        result
    }

    /// 主控循环
    pub async fn execute_tasks(
        &self,
        session: &Arc<Session>,
        flow_name: &str,
    ) -> Result<FlowOutcome, AgentError> {
        let (flow_name, flow) = match self.config.flow(flow_name) {
            Some((key, flow)) => (key.to_string(), flow.clone()),
            None => {
                tracing::error!(flow = %flow_name, "flow is missing from the configuration");
                broadcast(
                    session,
                    &format!("Configuration error: flow '{}' is missing.", flow_name),
                );
                return Err(AgentError::ConfigError(format!(
                    "flow '{}' is missing",
                    flow_name
                )));
            }
        };

        if !session.try_begin_flow() {
            return Err(AgentError::ConfigError(format!(
                "session {} is already running a flow",
                session.id()
            )));
        }
        let token = session.new_flow_token();
        session.set_phase(FlowPhase::Init);

        let mut agents = self.clone_agents(&flow).await;
        tracing::info!(
            flow = %flow_name,
            session = %session.id(),
            participants = ?flow.participants,
            turn_limit = flow.turn_limit,
            "flow started"
        );

        let result = self
            .run_turns(session, &token, &flow_name, &flow, &mut agents)
            .await;

        match &result {
            Ok(outcome) => tracing::info!(
                flow = %flow_name,
                turns = outcome.turns,
                termination = ?outcome.termination,
                "flow finished"
            ),
            Err(e) => {
                tracing::error!(flow = %flow_name, "flow aborted: {}", e);
                broadcast(session, &abort_message(&flow_name, e));
            }
        }

        finalize_agents(&mut agents).await;
        drop(agents);
        session.set_phase(FlowPhase::Terminated);
        session.end_flow();
        result
    }

    /// coordinator 加每个参与者各一份新副本
    async fn clone_agents(&self, flow: &FlowDefinition) -> BTreeMap<String, AgentHandle> {
        let coordinator = &self.config.orchestrator.coordinator;
        let mut agents = BTreeMap::new();
        for name in std::iter::once(coordinator).chain(flow.participants.iter()) {
            if agents.contains_key(name) {
                continue;
            }
            match self.templates.get(name) {
                Some(template) => {
                    let agent = template.clone_agent().await;
                    tracing::debug!(agent = %name, kind = ?agent.kind(), "agent cloned");
                    agents.insert(name.clone(), agent);
                }
                None => tracing::error!(agent = %name, "agent not found among the templates"),
            }
        }
        agents
    }

    async fn run_turns(
        &self,
        session: &Arc<Session>,
        token: &CancellationToken,
        flow_name: &str,
        flow: &FlowDefinition,
        agents: &mut BTreeMap<String, AgentHandle>,
    ) -> Result<FlowOutcome, AgentError> {
        let coordinator = self.config.orchestrator.coordinator.clone();
        if !agents.contains_key(&coordinator) {
            return Err(AgentError::ConfigError(format!(
                "coordinator '{}' is not available",
                coordinator
            )));
        }

        let mut inputs: Map<String, Value> = self
            .config
            .inputs
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        inputs.insert("goal".to_string(), Value::String(flow.goal.clone()));

        let mut previous_response: Option<String> = None;
        let mut termination = Termination::TurnLimit;
        let mut turn = 0;

        while turn < flow.turn_limit {
            if token.is_cancelled() {
                return Err(AgentError::Cancelled);
            }
            turn += 1;
            tracing::info!(flow = %flow_name, turn, "chat turn started");
            session.set_phase(FlowPhase::CoordinatorTurn);
            record_snapshot(session, turn, agents);

            let instruction = match self
                .coordinator_turn(session, token, agents, &coordinator, &inputs, &mut previous_response)
                .await?
            {
                CoordinatorTurn::Done => {
                    tracing::info!(flow = %flow_name, turn, "task done");
                    termination = Termination::Done;
                    break;
                }
                CoordinatorTurn::Dispatch(instruction) => instruction,
            };

            session.set_phase(FlowPhase::Dispatch);
            tracing::debug!(actor = %instruction.action, "dispatching");
            let actor_name = instruction.action.clone();
            let history_json = serde_json::to_string(&session.history()).unwrap_or_default();
            let mut content = format!(
                "Instruction: {}\nThought: {}\nAction Input: {}\nConversation History: {}\nInput: {}\nPrevious response: {}",
                instruction.question,
                instruction.thought,
                instruction.action_input,
                history_json,
                Value::Object(inputs.clone()),
                previous_response.as_deref().unwrap_or("None"),
            );
            session.append_history(HistoryEntry::new("Assistant", content.clone()));

            let is_human = agents.get(&actor_name).is_some_and(AgentHandle::is_human);
            if is_human {
                let reply = self
                    .wait_for_human(session, token, &actor_name, &instruction.action_input)
                    .await?;
                content.push_str(&format!("\nHuman response: {}", reply));
            }

            let actor = agents
                .get_mut(&actor_name)
                .ok_or_else(|| AgentError::UnknownAgent(actor_name.clone()))?;
            session.set_phase(FlowPhase::AgentTurn);
            let response = self.actor_turn(token, actor, content).await?;

            broadcast(session, &response);
            session.append_history(HistoryEntry::new(actor_name.clone(), response.clone()));
            inputs.insert(
                "previous_response".to_string(),
                Value::String(response.clone()),
            );
            previous_response = Some(response);
        }

        let final_answer = self
            .final_answer(session, token, flow_name, agents, &coordinator)
            .await?;

        Ok(FlowOutcome {
            flow: flow_name.to_string(),
            turns: turn,
            termination,
            final_answer,
            history: session.history(),
        })
    }

    /// 调用 coordinator，直到得到可派发的指令或完成标记；重试耗尽则终止 flow
    async fn coordinator_turn(
        &self,
        session: &Session,
        token: &CancellationToken,
        agents: &mut BTreeMap<String, AgentHandle>,
        coordinator: &str,
        inputs: &Map<String, Value>,
        previous_response: &mut Option<String>,
    ) -> Result<CoordinatorTurn, AgentError> {
        let retries = self.config.orchestrator.coordinator_retries.max(1);
        let mut last_error = None;

        for attempt in 1..=retries {
            let context = json!({
                "input": inputs,
                "previous_response": previous_response,
            });
            let agent = agents
                .get_mut(coordinator)
                .ok_or_else(|| AgentError::UnknownAgent(coordinator.to_string()))?;
            let output = match run_cancellable(token, agent.step(Message::user(context.to_string()))).await? {
                Ok(response) => response.to_content(),
                Err(e) => {
                    tracing::error!(attempt, "coordinator step failed: {}", e);
                    last_error = Some(e);
                    run_cancellable(token, tokio::time::sleep(COORDINATOR_ERROR_DELAY)).await?;
                    continue;
                }
            };

            broadcast(session, &output);
            session.append_history(HistoryEntry::new(coordinator, output.clone()));

            if output.contains(CAMEL_TASK_DONE) {
                return Ok(CoordinatorTurn::Done);
            }

            let err = match parse_instruction(&output) {
                Ok(instruction) if agents.contains_key(&instruction.action) => {
                    return Ok(CoordinatorTurn::Dispatch(instruction));
                }
                Ok(instruction) => {
                    tracing::info!(attempt, "no agent found with the name '{}'", instruction.action);
                    AgentError::UnknownAgent(instruction.action)
                }
                Err(e) => {
                    tracing::warn!(attempt, "coordinator instruction could not be parsed: {}", e);
                    e
                }
            };
            let context = previous_response.as_deref().unwrap_or("None").to_string();
            if let RecoveryAction::RetryWithPrompt(breadcrumb) = self.recovery.handle(&err, &context) {
                *previous_response = Some(breadcrumb);
            }
            last_error = Some(err);
        }

        let reason = last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "no instruction".to_string());
        Err(AgentError::ConfigError(format!(
            "coordinator did not name an available agent after {} attempts ({})",
            retries, reason
        )))
    }

    /// 把任务交给人工 agent 并等待回复
    async fn wait_for_human(
        &self,
        session: &Session,
        token: &CancellationToken,
        agent: &str,
        task: &str,
    ) -> Result<String, AgentError> {
        session.set_phase(FlowPhase::HumanWait);
        tracing::debug!(agent = %agent, "waiting for human");
        session.clear_human_replies().await;
        session.set_expected_human(Some(agent.to_string()));
        session.push_task(task);
        self.send_task_to_human(session, agent, task).await;

        let timeout_secs = self.config.orchestrator.human_timeout_secs;
        let waited = tokio::select! {
            biased;
            _ = token.cancelled() => Err(AgentError::Cancelled),
            reply = tokio::time::timeout(Duration::from_secs(timeout_secs), session.next_human_reply()) => {
                match reply {
                    Ok(Some(text)) => Ok(text),
                    Ok(None) => Err(AgentError::Cancelled),
                    Err(_) => Err(AgentError::HumanTimeout {
                        agent: agent.to_string(),
                        timeout_secs,
                    }),
                }
            }
        };

        session.set_expected_human(None);
        session.pop_task();
        match &waited {
            Ok(reply) => tracing::info!(agent = %agent, "received human response: {}", reply),
            Err(e) => tracing::error!(agent = %agent, "no human response: {}", e),
        }
        waited
    }

    /// 绑定的 channel 优先，否则发到发起 flow 的 channel
    async fn send_task_to_human(&self, session: &Session, agent: &str, task: &str) {
        let text = format!("Task assigned to {}: {}", agent, task);
        let sent = match self.registry.channel_for(agent).await {
            Some(channel) if channel != session.channel() => {
                self.registry.get_or_create(&channel).await.send(&text)
            }
            _ => session.send(&text),
        };
        match sent {
            Ok(()) => tracing::info!(agent = %agent, "task sent to human: {}", task),
            Err(e) => tracing::warn!(agent = %agent, "task could not be sent: {}", e),
        }
    }

    /// actor step，失败时把错误写在消息前面重试；耗尽则按最后一次错误决定兜底或终止
    async fn actor_turn(
        &self,
        token: &CancellationToken,
        actor: &mut AgentHandle,
        mut content: String,
    ) -> Result<String, AgentError> {
        tracing::debug!(actor = %actor.name(), "actor step");
        let retries = self.config.orchestrator.actor_retries.max(1);
        let mut last_error = None;
        for i in 0..retries {
            match run_cancellable(token, actor.step(Message::user(content.clone()))).await? {
                Ok(response) => {
                    tracing::info!(actor = %actor.name(), "assistant response: {}", response);
                    return Ok(response.to_content());
                }
                Err(e) => {
                    tracing::warn!(actor = %actor.name(), attempt = i, "assistant step failed: {}", e);
                    content = format!("Retry {} because of error: {} \n{}", i, e, content);
                    last_error = Some(e);
                }
            }
        }
        tracing::error!(actor = %actor.name(), "assistant step failed {} times", retries);
        match last_error {
            Some(err) => self.actor_fallback(err),
            None => Ok(NO_SOLUTION_FALLBACK.to_string()),
        }
    }

    /// actor 重试耗尽后的去向：可兜底的错误换成兜底回复，其余终止 flow
    fn actor_fallback(&self, err: AgentError) -> Result<String, AgentError> {
        match self.recovery.handle(&err, "") {
            RecoveryAction::Fallback(text) => Ok(text),
            RecoveryAction::Abort => Err(err),
            RecoveryAction::RetryWithPrompt(_) => Ok(NO_SOLUTION_FALLBACK.to_string()),
        }
    }

    /// 收尾：请求 Final Answer，写入 output_dir，记入历史并广播
    async fn final_answer(
        &self,
        session: &Session,
        token: &CancellationToken,
        flow_name: &str,
        agents: &mut BTreeMap<String, AgentHandle>,
        coordinator: &str,
    ) -> Result<Option<String>, AgentError> {
        let Some(agent) = agents.get_mut(coordinator) else {
            return Ok(None);
        };
        let answer = match run_cancellable(token, agent.step(Message::user(FINAL_ANSWER_PROMPT))).await? {
            Ok(response) => response.to_content(),
            Err(e) => {
                tracing::warn!(flow = %flow_name, "final answer failed: {}", e);
                return Ok(None);
            }
        };

        if let Some(dir) = &self.config.app.output_dir {
            if let Err(e) = write_final_answer(dir, flow_name, &answer).await {
                tracing::warn!(flow = %flow_name, "final answer could not be saved: {}", e);
            }
        }
        session.append_history(HistoryEntry::new(coordinator, answer.clone()));
        broadcast(session, &answer);
        Ok(Some(answer))
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("agents", &self.templates.keys().collect::<Vec<_>>())
            .field("flows", &self.config.flows.keys().collect::<Vec<_>>())
            .finish()
    }
}

fn broadcast(session: &Session, message: &str) {
    if let Err(e) = session.send(message) {
        tracing::warn!(session = %session.id(), "broadcast failed: {}", e);
    }
}

fn record_snapshot(session: &Session, turn: usize, agents: &BTreeMap<String, AgentHandle>) {
    session.record_snapshot(SystemSnapshot {
        timestamp: chrono::Utc::now(),
        turn,
        phase: session.phase(),
        agents: agents
            .iter()
            .map(|(name, agent)| (name.clone(), agent.get_state()))
            .collect(),
        expected_human: session.expected_human(),
    });
}

async fn write_final_answer(dir: &Path, flow_name: &str, answer: &str) -> std::io::Result<()> {
    tokio::fs::create_dir_all(dir).await?;
    let path = dir.join(format!("{}-final.md", flow_name));
    tokio::fs::write(&path, answer).await?;
    tracing::info!(path = %path.display(), "final answer saved");
    Ok(())
}

/// 发给 channel 的中止说明
fn abort_message(flow_name: &str, err: &AgentError) -> String {
    match err {
        AgentError::HumanTimeout { agent, timeout_secs } => format!(
            "No response received from {} within {}s. Flow '{}' was stopped.",
            agent, timeout_secs, flow_name
        ),
        AgentError::Cancelled => format!("Flow '{}' was cancelled.", flow_name),
        AgentError::ConfigError(reason) => format!("Configuration error: {}", reason),
        other => format!("Flow '{}' stopped: {}", flow_name, other),
    }
}

/// 每个 agent 的 end() 并发执行；失败只记录
async fn finalize_agents(agents: &mut BTreeMap<String, AgentHandle>) {
    let results = futures_util::future::join_all(agents.values_mut().map(|agent| async move {
        let name = agent.name().to_string();
        (name, agent.end().await)
    }))
    .await;
    for (name, result) in results {
        if let Err(e) = result {
            tracing::warn!(agent = %name, "end failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;
    use crate::gateway::RecordingTransport;
    use crate::llm::MockLlmClient;
    use tempfile::TempDir;

    fn setup(
        extra: &str,
        replies: Vec<&str>,
    ) -> (TempDir, Orchestrator, Arc<RecordingTransport>, Arc<MockLlmClient>) {
        let dir = TempDir::new().unwrap();
        let cfg = parse_config(&format!(
            r#"
[app]
memory_dir = "{mem}"

[llm]
provider = "mock"

[selection]
retry_delay_ms = 1

[[agents]]
name = "ChatManager"
system_prompt = "Coordinate."

[[agents]]
name = "Writer"
system_prompt = "Write."

[flows.poem]
goal = "Write a poem"
participants = ["Writer"]
turn_limit = 2
{extra}
"#,
            mem = dir.path().join("mem").display(),
        ))
        .unwrap();
        let cfg = Arc::new(cfg);
        let mock = Arc::new(MockLlmClient::with_replies(replies));
        let factory = AgentFactory::from_config_with_llm(&cfg, mock.clone());
        let transport = Arc::new(RecordingTransport::new());
        let registry = Arc::new(SessionRegistry::new(transport.clone()));
        let orch = Orchestrator::from_factory(cfg, &factory, registry).unwrap();
        (dir, orch, transport, mock)
    }

    const DISPATCH: &str = r#"{"Action": "Writer", "Question": "q", "Thought": "t", "Action Input": "write"}"#;

    #[tokio::test]
    async fn test_turn_limit_bounds_coordinator_turns() {
        let (_dir, orch, _, _) = setup("", vec![DISPATCH, "verse one", DISPATCH, "verse two", "final"]);
        let session = orch.registry().get_or_create("alice").await;
        let outcome = orch.execute_tasks(&session, "poem").await.unwrap();
        assert_eq!(outcome.turns, 2);
        assert_eq!(outcome.termination, Termination::TurnLimit);
        assert_eq!(outcome.final_answer.as_deref(), Some("final"));
        assert_eq!(session.snapshots().len(), 2);
        assert!(session
            .snapshots()
            .iter()
            .all(|snap| snap.phase == FlowPhase::CoordinatorTurn));
        assert!(!session.is_running());
    }

    #[tokio::test]
    async fn test_session_phase_follows_flow_lifecycle() {
        let (_dir, orch, _, _) = setup("", vec![DISPATCH, "verse", "CAMEL_TASK_DONE", "final"]);
        let session = orch.registry().get_or_create("alice").await;
        assert_eq!(session.phase(), FlowPhase::Idle);
        orch.execute_tasks(&session, "poem").await.unwrap();
        assert_eq!(session.phase(), FlowPhase::Terminated);
    }

    #[tokio::test]
    async fn test_actor_fallback_follows_last_error() {
        let (_dir, orch, _, _) = setup("", vec![]);
        let model_error = AgentError::LlmError(crate::llm::LlmError::Api("boom".into()));
        assert_eq!(orch.actor_fallback(model_error).unwrap(), NO_SOLUTION_FALLBACK);

        let fatal = AgentError::ConfigError("tool registry missing".into());
        assert!(matches!(
            orch.actor_fallback(fatal),
            Err(AgentError::ConfigError(ref m)) if m == "tool registry missing"
        ));
    }

    #[tokio::test]
    async fn test_actor_content_carries_instruction() {
        let (_dir, orch, _, mock) = setup("", vec![DISPATCH, "verse", "CAMEL_TASK_DONE", "final"]);
        let session = orch.registry().get_or_create("alice").await;
        let outcome = orch.execute_tasks(&session, "poem").await.unwrap();
        assert_eq!(outcome.termination, Termination::Done);

        let actor_call = &mock.calls()[1];
        let content = &actor_call.last().unwrap().content;
        assert!(content.starts_with("Instruction: q\nThought: t\nAction Input: write\n"));
        assert!(content.contains("Previous response: None"));

        let senders: Vec<_> = outcome.history.iter().map(|h| h.sender.as_str()).collect();
        assert_eq!(senders, vec!["ChatManager", "Assistant", "Writer", "ChatManager", "ChatManager"]);
    }

    #[tokio::test]
    async fn test_missing_flow_reports_configuration_error() {
        let (_dir, orch, transport, _) = setup("[flows.other]\nparticipants = [\"Writer\"]", vec![]);
        let session = orch.registry().get_or_create("alice").await;
        let err = orch.execute_tasks(&session, "ghost").await.unwrap_err();
        assert!(matches!(err, AgentError::ConfigError(_)));
        orch.registry().close_all().await;
        assert_eq!(
            transport.sent_to("alice"),
            vec!["Configuration error: flow 'ghost' is missing."]
        );
    }

    #[tokio::test]
    async fn test_single_flow_is_used_whatever_the_name() {
        let (_dir, orch, _, _) = setup("", vec!["CAMEL_TASK_DONE", "final"]);
        let session = orch.registry().get_or_create("alice").await;
        let outcome = orch.execute_tasks(&session, "anything").await.unwrap();
        assert_eq!(outcome.flow, "poem");
    }
}
