//! 任务调度：阻塞型工具的执行池
//!
//! 同步工具（文件 I/O 等）经 spawn_blocking 运行，Semaphore 限制同时占用的阻塞线程数，
//! 保证编排循环所在的异步调度器不被阻塞。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::Semaphore;

use crate::core::AgentError;

/// 任务 ID
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct TaskId(u64);

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(0);

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskId {
    pub fn new() -> Self {
        Self(NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// 阻塞任务调度器（可克隆，克隆共享同一个 Semaphore）
#[derive(Clone, Debug)]
pub struct TaskScheduler {
    blocking_semaphore: Arc<Semaphore>,
}

impl TaskScheduler {
    pub fn new(max_blocking: usize) -> Self {
        Self {
            blocking_semaphore: Arc::new(Semaphore::new(max_blocking.max(1))),
        }
    }

    /// 在阻塞线程池中运行同步闭包；许可在闭包结束后释放
    pub async fn run_blocking<F, T>(&self, f: F) -> Result<T, AgentError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let permit = self
            .blocking_semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| AgentError::ToolExecutionFailed("blocking pool closed".to_string()))?;
        let id = TaskId::new();
        tracing::debug!(task = ?id, "blocking task started");
        let handle = tokio::task::spawn_blocking(move || {
            let out = f();
            drop(permit);
            out
        });
        handle
            .await
            .map_err(|e| AgentError::ToolExecutionFailed(format!("blocking task failed: {}", e)))
    }

    pub fn available_permits(&self) -> usize {
        self.blocking_semaphore.available_permits()
    }
}

impl Default for TaskScheduler {
    fn default() -> Self {
        Self::new(4)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[tokio::test]
    async fn test_run_blocking_returns_value() {
        let scheduler = TaskScheduler::new(2);
        let out = scheduler.run_blocking(|| 40 + 2).await.unwrap();
        assert_eq!(out, 42);
        assert_eq!(scheduler.available_permits(), 2);
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let scheduler = TaskScheduler::new(2);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();
        for _ in 0..6 {
            let scheduler = scheduler.clone();
            let running = running.clone();
            let peak = peak.clone();
            handles.push(tokio::spawn(async move {
                scheduler
                    .run_blocking(move || {
                        let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        std::thread::sleep(Duration::from_millis(30));
                        running.fetch_sub(1, Ordering::SeqCst);
                    })
                    .await
            }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_panic_becomes_error() {
        let scheduler = TaskScheduler::new(1);
        let result: Result<(), _> = scheduler.run_blocking(|| panic!("boom")).await;
        assert!(matches!(result, Err(AgentError::ToolExecutionFailed(_))));
        assert_eq!(scheduler.available_permits(), 1);
    }
}
