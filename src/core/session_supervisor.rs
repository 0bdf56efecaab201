//! 会话监管：生命周期、中断管理
//!
//! 持有 CancellationToken；flow 的每个挂起点（模型调用、人工等待、轮次边界）都会检查它。
//! 每次 flow 使用一个子 token，取消会话即取消正在运行的 flow。

use tokio_util::sync::CancellationToken;

use crate::core::AgentError;

/// 会话级生命周期管理：取消令牌
#[derive(Debug, Clone)]
pub struct SessionSupervisor {
    cancel_token: CancellationToken,
}

impl SessionSupervisor {
    pub fn new() -> Self {
        Self {
            cancel_token: CancellationToken::new(),
        }
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    /// 触发取消
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// 创建子 token（用于单个 flow）
    pub fn child_token(&self) -> CancellationToken {
        self.cancel_token.child_token()
    }
}

impl Default for SessionSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

/// 在取消令牌下运行一个 future：先被取消则返回 AgentError::Cancelled
pub async fn run_cancellable<F, T>(token: &CancellationToken, fut: F) -> Result<T, AgentError>
where
    F: std::future::Future<Output = T>,
{
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(AgentError::Cancelled),
        out = fut => Ok(out),
    }
}
