//! 工具层：Tool trait、按名实例化的注册表、带超时与审计日志的执行器、内置工具

pub mod echo;
pub mod executor;
pub mod filesystem;
pub mod registry;
pub mod schema;

pub use echo::EchoTool;
pub use executor::ToolExecutor;
pub use filesystem::{ReadFileTool, SafeFs, SaveToFileTool};
pub use registry::{Tool, ToolContext, ToolOutput, ToolRegistry};
pub use schema::tool_decision_schema;
