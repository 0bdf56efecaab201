//! LLM agent：react_prompt 状态机
//!
//! Receiving → PreProcessing → Generating → PostProcessing → Done
//!
//! - Receiving：输入以 LOW 优先级进入短期记忆（超长截断）
//! - PreProcessing：对输入运行工具选择协议，完成的工具结果以 MEDIUM 注入并记入工具历史
//! - Generating：检查上下文预算（先摘要后裁剪），把短期记忆整体发给模型，回复以 HIGH 记录；
//!   摘要后当前输入与注入的工具结果重新追加在摘要之后；注入的工具结果生成后撤回
//! - PostProcessing：对 `[输入, 输出]` 再跑一次协议，完成的工具结果拼接到输出末尾
//!
//! 工具执行失败或超时转为本次 step 的错误描述；模型错误向上返回，由编排器重试。

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::agent::{Agent, AgentHandle, AgentIdentity, AgentRuntime, StepResponse};
use crate::config::AgentKind;
use crate::core::{AgentError, AgentState, ReactPhase};
use crate::llm::ModelConfig;
use crate::memory::{Memory, Message, Priority};
use crate::react::{summarize_messages, ToolDecision, ToolSelector};
use crate::tools::Tool;

/// end() 时进入长期记忆的关键词
const LONG_TERM_KEYWORDS: [&str; 3] = ["Question", "Solution", "Instruction"];
/// 高于任何实际优先级：只有命中关键词的消息进入长期记忆
const LONG_TERM_MIN_PRIORITY: Priority = Priority(10);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ToolStage {
    Pre,
    Post,
}

impl ToolStage {
    fn failure(self) -> &'static str {
        match self {
            ToolStage::Pre => "Error applying pre-processing tool.",
            ToolStage::Post => "Error applying post-processing tool.",
        }
    }
}

/// 工具阶段的结果
enum StageOutcome {
    /// 某个工具完成，返回其结果
    Completed(String),
    /// 未使用工具（不需要或尝试耗尽）
    Skipped,
    /// 工具执行失败，本次 step 以错误描述结束
    Failed(AgentError),
}

pub struct LlmAgent {
    identity: AgentIdentity,
    system_message: Message,
    model: ModelConfig,
    runtime: AgentRuntime,
    selector: Arc<ToolSelector>,
    pre_processing_tools: Vec<Box<dyn Tool>>,
    post_processing_tools: Vec<Box<dyn Tool>>,
    memory: Memory,
    phase: ReactPhase,
}

impl LlmAgent {
    /// 模板实例：短期记忆只含 system 消息，不读磁盘
    pub fn new(
        identity: AgentIdentity,
        system_prompt: impl Into<String>,
        model: ModelConfig,
        runtime: AgentRuntime,
        pre_processing_tools: Vec<Box<dyn Tool>>,
        post_processing_tools: Vec<Box<dyn Tool>>,
    ) -> Self {
        let memory = Memory::new(identity.name.clone());
        Self::with_memory(
            identity,
            Message::system(system_prompt),
            model,
            runtime,
            pre_processing_tools,
            post_processing_tools,
            memory,
        )
    }

    fn with_memory(
        identity: AgentIdentity,
        system_message: Message,
        model: ModelConfig,
        runtime: AgentRuntime,
        pre_processing_tools: Vec<Box<dyn Tool>>,
        post_processing_tools: Vec<Box<dyn Tool>>,
        memory: Memory,
    ) -> Self {
        let selector = Arc::new(ToolSelector::new(
            runtime.llm.clone(),
            model.clone(),
            &runtime.selection,
        ));
        let mut agent = Self {
            identity,
            system_message,
            model,
            runtime,
            selector,
            pre_processing_tools,
            post_processing_tools,
            memory,
            phase: ReactPhase::Done,
        };
        agent.init_messages();
        tracing::info!(
            agent = %agent.identity.name,
            model = %agent.model.model,
            pre = ?tool_names(&agent.pre_processing_tools),
            post = ?tool_names(&agent.post_processing_tools),
            "llm agent initialized"
        );
        agent
    }

    fn init_messages(&mut self) {
        self.memory
            .add_to_short_term(self.system_message.clone(), Priority::LOW);
    }

    pub fn memory(&self) -> &Memory {
        &self.memory
    }

    pub fn phase(&self) -> ReactPhase {
        self.phase
    }

    pub fn system_message(&self) -> &Message {
        &self.system_message
    }

    fn remember(&mut self, message: Message, priority: Priority) {
        self.memory.add_to_short_term(message, priority);
    }

    /// 在给定上下文上运行工具选择协议，最多 tool_attempts 轮
    async fn run_tool_stage(&mut self, stage: ToolStage, context: &[Message]) -> StageOutcome {
        let tools = match stage {
            ToolStage::Pre => &self.pre_processing_tools,
            ToolStage::Post => &self.post_processing_tools,
        };
        let attempts = self.runtime.selection.tool_attempts.max(1);

        for attempt in 1..=attempts {
            let (tool_name, parameters) = match self.selector.select(context, tools).await {
                ToolDecision::NoToolNeeded => {
                    tracing::debug!(agent = %self.identity.name, ?stage, "no tool needed");
                    return StageOutcome::Skipped;
                }
                ToolDecision::Empty => {
                    tracing::debug!(agent = %self.identity.name, ?stage, attempt, "no actionable tool decision");
                    continue;
                }
                ToolDecision::Invoke { tool, parameters } => (tool, parameters),
            };

            let Some(tool) = tools.iter().find(|t| t.name() == tool_name) else {
                let err = AgentError::HallucinatedTool(tool_name.clone());
                tracing::warn!(agent = %self.identity.name, "{}", err);
                let note = format!(
                    "Tool {} is not available (available: {}), now use the model's internal knowledge.",
                    tool_name,
                    tool_names(tools).join(", ")
                );
                self.memory.add_to_short_term(Message::user(note), Priority::MEDIUM);
                continue;
            };

            let output = match self.runtime.executor.execute(tool.as_ref(), parameters).await {
                Ok(output) => output,
                Err(e) => {
                    tracing::error!(agent = %self.identity.name, tool = %tool_name, "{}: {}", stage.failure(), e);
                    return StageOutcome::Failed(e);
                }
            };

            if output.completed {
                tracing::info!(agent = %self.identity.name, tool = %tool_name, "tool result: {}", output.result);
                self.memory
                    .add_to_tool_history(Message::user(output.result.clone()));
                self.remember(Message::user(output.result.clone()), Priority::MEDIUM);
                return StageOutcome::Completed(output.result);
            }

            tracing::info!(agent = %self.identity.name, tool = %tool_name, "tool did not return any information");
            let note = format!(
                "Because {} did not return any information, now use the model's internal knowledge.",
                tool_name
            );
            self.memory.add_to_short_term(Message::user(note), Priority::MEDIUM);
        }
        StageOutcome::Skipped
    }

    /// react_prompt：一次完整的状态机
    async fn react_prompt(&mut self, input: Message) -> Result<StepResponse, AgentError> {
        self.phase = ReactPhase::Receiving;
        tracing::info!(agent = %self.identity.name, "received: {}", input.content);
        self.remember(input.clone(), Priority::LOW);
        // 截断后的输入，后续工具上下文使用同一内容
        let input = self
            .memory
            .last_short_term()
            .map(|e| e.message.clone())
            .unwrap_or(input);

        let mut injected: Option<Message> = None;
        if !self.pre_processing_tools.is_empty() {
            self.phase = ReactPhase::PreProcessing;
            match self.run_tool_stage(ToolStage::Pre, &[input.clone()]).await {
                StageOutcome::Completed(result) => injected = Some(Message::user(result)),
                StageOutcome::Skipped => {}
                StageOutcome::Failed(_) => {
                    self.phase = ReactPhase::Done;
                    return Ok(StepResponse::error(ToolStage::Pre.failure()));
                }
            }
        }

        self.phase = ReactPhase::Generating;
        let summarized = self
            .runtime
            .window
            .ensure_budget(
                &mut self.memory,
                &self.system_message,
                self.runtime.llm.as_ref(),
                &self.model,
            )
            .await;
        if summarized {
            self.remember(input.clone(), Priority::LOW);
            if let Some(tool_message) = &injected {
                self.remember(tool_message.clone(), Priority::MEDIUM);
            }
            self.runtime.window.trim(&mut self.memory);
        }
        let transcript = self.memory.get_short_term_messages();
        let mut output = match self.runtime.llm.complete(&transcript, &self.model).await {
            Ok(text) => text,
            Err(e) => {
                self.phase = ReactPhase::Done;
                tracing::warn!(agent = %self.identity.name, "model call failed: {}", e);
                return Err(e.into());
            }
        };

        if let Some(tool_message) = injected {
            if self.memory.last_short_term().map(|e| &e.message) == Some(&tool_message) {
                self.memory.remove_top_of_short_term();
            }
        }
        self.remember(Message::assistant(output.clone()), Priority::HIGH);

        if !self.post_processing_tools.is_empty() {
            self.phase = ReactPhase::PostProcessing;
            let context = [input, Message::assistant(output.clone())];
            match self.run_tool_stage(ToolStage::Post, &context).await {
                StageOutcome::Completed(result) => output.push_str(&result),
                StageOutcome::Skipped => {}
                StageOutcome::Failed(_) => {
                    self.phase = ReactPhase::Done;
                    return Ok(StepResponse::error(ToolStage::Post.failure()));
                }
            }
        }

        self.phase = ReactPhase::Done;
        tracing::info!(agent = %self.identity.name, "response: {}", output);
        Ok(StepResponse::Text(output))
    }
}

fn tool_names(tools: &[Box<dyn Tool>]) -> Vec<String> {
    tools.iter().map(|t| t.name().to_string()).collect()
}

impl fmt::Debug for LlmAgent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LlmAgent")
            .field("identity", &self.identity)
            .field("model", &self.model)
            .field("pre_processing_tools", &self.pre_processing_tools)
            .field("post_processing_tools", &self.post_processing_tools)
            .field("phase", &self.phase)
            .finish()
    }
}

#[async_trait]
impl Agent for LlmAgent {
    fn name(&self) -> &str {
        &self.identity.name
    }

    fn kind(&self) -> AgentKind {
        AgentKind::Llm
    }

    async fn step(&mut self, input: Message) -> Result<StepResponse, AgentError> {
        self.react_prompt(input).await
    }

    fn get_state(&self) -> AgentState {
        AgentState {
            name: self.identity.name.clone(),
            role: self.identity.role.clone(),
            kind: AgentKind::Llm,
            short_term_memory: self.memory.get_short_term_memory().to_vec(),
            tool_history: self.memory.get_tool_history(),
            model: Some(self.model.model.clone()),
            pre_processing_tools: tool_names(&self.pre_processing_tools),
            post_processing_tools: tool_names(&self.post_processing_tools),
        }
    }

    fn reset(&mut self) {
        self.memory.reset_short_term();
        self.init_messages();
    }

    async fn clone_agent(&self) -> AgentHandle {
        let memory = Memory::load(self.identity.name.clone(), &self.runtime.store).await;
        AgentHandle::Llm(Self::with_memory(
            self.identity.clone(),
            self.system_message.clone(),
            self.model.clone(),
            self.runtime.clone(),
            self.pre_processing_tools.clone(),
            self.post_processing_tools.clone(),
            memory,
        ))
    }

    async fn end(&mut self) -> Result<(), AgentError> {
        let filtered = Memory::filter_combined(
            self.memory.get_short_term_memory(),
            &LONG_TERM_KEYWORDS,
            LONG_TERM_MIN_PRIORITY,
        );
        if !filtered.is_empty() {
            match summarize_messages(self.runtime.llm.as_ref(), &self.model, &filtered).await {
                Ok(summary) => self.memory.add_to_long_term(summary),
                Err(e) => tracing::warn!(agent = %self.identity.name, "summary for long-term memory failed: {}", e),
            }
        }
        self.memory
            .save_long_term_memory(&self.runtime.store)
            .await?;
        tracing::info!(
            agent = %self.identity.name,
            filtered = filtered.len(),
            "short-term memory moved to long-term memory"
        );
        Ok(())
    }
}
