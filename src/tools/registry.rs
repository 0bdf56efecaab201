//! 工具注册表
//!
//! 所有工具实现 Tool trait（name / description / parameters / run / clone）。
//! ToolRegistry 保存「工具名 → 构造函数」，在构建 agent 时按名字实例化；
//! 未知名字直接报配置错误，不做任何动态求值。

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::core::{AgentError, TaskScheduler};
use crate::tools::{EchoTool, ReadFileTool, SaveToFileTool};

/// 工具单次执行结果：结果文本 + 是否完成任务
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutput {
    pub result: String,
    pub completed: bool,
}

impl ToolOutput {
    pub fn completed(result: impl Into<String>) -> Self {
        Self {
            result: result.into(),
            completed: true,
        }
    }

    pub fn incomplete(result: impl Into<String>) -> Self {
        Self {
            result: result.into(),
            completed: false,
        }
    }
}

/// 工具 trait：名称、描述（供 LLM 理解）、参数 schema、异步执行（args 为 JSON 对象）
#[async_trait]
pub trait Tool: Send + Sync {
    /// 工具名称（对应决策 JSON 中的 "tool" 字段）
    fn name(&self) -> &str;

    /// 工具描述（供 LLM 理解功能）
    fn description(&self) -> &str;

    /// 参数 JSON Schema（供 LLM 生成正确的参数格式）
    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {},
            "required": []
        })
    }

    /// 执行工具；Err 表示执行异常
    async fn run(&self, args: Value) -> Result<ToolOutput, String>;

    /// 独立副本，两个会话之间不共享可变状态
    fn clone_tool(&self) -> Box<dyn Tool>;
}

impl Clone for Box<dyn Tool> {
    fn clone(&self) -> Self {
        self.clone_tool()
    }
}

impl std::fmt::Debug for dyn Tool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tool").field("name", &self.name()).finish()
    }
}

/// 工具构造时可用的依赖：沙箱根目录与阻塞任务池
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub workspace_root: PathBuf,
    pub scheduler: TaskScheduler,
}

impl ToolContext {
    pub fn new(workspace_root: impl Into<PathBuf>, scheduler: TaskScheduler) -> Self {
        Self {
            workspace_root: workspace_root.into(),
            scheduler,
        }
    }
}

type ToolFactory = Arc<dyn Fn(&ToolContext) -> Box<dyn Tool> + Send + Sync>;

/// 工具注册表：按名称存储构造函数，支持 register / create / resolve / tool_names
pub struct ToolRegistry {
    context: ToolContext,
    factories: BTreeMap<String, ToolFactory>,
}

impl ToolRegistry {
    /// 空注册表
    pub fn new(context: ToolContext) -> Self {
        Self {
            context,
            factories: BTreeMap::new(),
        }
    }

    /// 注册内置工具：EchoTool / ReadFileTool / SaveToFileTool
    pub fn with_builtins(context: ToolContext) -> Self {
        let mut registry = Self::new(context);
        registry.register("EchoTool", |_| Box::new(EchoTool));
        registry.register("ReadFileTool", |ctx| {
            Box::new(ReadFileTool::new(&ctx.workspace_root, ctx.scheduler.clone()))
        });
        registry.register("SaveToFileTool", |ctx| {
            Box::new(SaveToFileTool::new(&ctx.workspace_root, ctx.scheduler.clone()))
        });
        registry
    }

    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(&ToolContext) -> Box<dyn Tool> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Arc::new(factory));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// 按名字实例化；未知名字返回 ConfigError
    pub fn create(&self, name: &str) -> Result<Box<dyn Tool>, AgentError> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| AgentError::ConfigError(format!("unknown tool name '{}'", name)))?;
        Ok(factory(&self.context))
    }

    /// 按顺序实例化一组工具
    pub fn resolve(&self, names: &[String]) -> Result<Vec<Box<dyn Tool>>, AgentError> {
        names.iter().map(|n| self.create(n)).collect()
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.factories.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> ToolRegistry {
        ToolRegistry::with_builtins(ToolContext::new("workspace", TaskScheduler::new(1)))
    }

    #[test]
    fn test_builtins_registered() {
        let reg = registry();
        assert_eq!(
            reg.tool_names(),
            vec!["EchoTool", "ReadFileTool", "SaveToFileTool"]
        );
    }

    #[test]
    fn test_unknown_tool_fails_fast() {
        let reg = registry();
        let err = reg
            .resolve(&["EchoTool".to_string(), "SearchTool".to_string()])
            .err()
            .unwrap();
        assert!(matches!(err, AgentError::ConfigError(ref m) if m.contains("SearchTool")));
    }

    #[tokio::test]
    async fn test_custom_factory_and_clone() {
        let mut reg = registry();
        reg.register("Shout", |_| Box::new(EchoTool));
        let tool = reg.create("Shout").unwrap();
        let copy = tool.clone();
        let out = copy
            .run(serde_json::json!({"text": "hi"}))
            .await
            .unwrap();
        assert_eq!(out, ToolOutput::completed("hi"));
    }
}
