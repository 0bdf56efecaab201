//! Hive - 多智能体对话编排器
//!
//! 模块划分：
//! - **agent**: Agent 契约，LLM agent（react_prompt 状态机）与人工 agent，按配置构建
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 轮转编排、错误与恢复、状态快照、会话监管、阻塞任务调度
//! - **gateway**: 会话、会话注册表、channel 传输与出站队列
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / DeepSeek / Mock）
//! - **memory**: 短期记忆（优先级 FIFO）、长期记忆与持久化
//! - **react**: 工具选择协议、JSON 修复、指令解析、上下文窗口
//! - **tools**: 工具 trait、注册表、执行器与内置工具

pub mod agent;
pub mod config;
pub mod core;
pub mod gateway;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod react;
pub mod tools;
