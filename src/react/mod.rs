//! 决策层：工具选择协议、JSON 提取与修复、协调者指令解析、上下文窗口管理

pub mod context_window;
pub mod instruction;
pub mod json_repair;
pub mod selection;

pub use context_window::{summarize_messages, ContextWindow};
pub use instruction::{parse_instruction, Instruction};
pub use json_repair::{auto_fix_json, extract_json, fix_json, is_valid_json};
pub use selection::{build_selection_prompt, interpret_response, ToolDecision, ToolSelector, NO_TOOL_NEEDED};
