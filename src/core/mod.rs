//! 核心编排层：错误与恢复、状态快照、会话监管、阻塞任务调度、轮转主控循环

pub mod error;
pub mod orchestrator;
pub mod recovery;
pub mod session_supervisor;
pub mod state;
pub mod task_scheduler;

pub use error::{AgentError, RecoveryAction};
pub use orchestrator::{FlowOutcome, Orchestrator, Termination, CAMEL_TASK_DONE};
pub use recovery::{RecoveryEngine, NO_SOLUTION_FALLBACK};
pub use session_supervisor::{run_cancellable, SessionSupervisor};
pub use state::{AgentState, FlowPhase, HistoryEntry, ReactPhase, SystemSnapshot};
pub use task_scheduler::TaskScheduler;
