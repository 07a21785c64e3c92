//! 取消令牌
//!
//! 取消方与生成任务之间共享的唯一状态。
//! 一次性触发、幂等，字节读取循环在每个 chunk 处至少检查一次。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// 取消令牌
///
/// 用于取消正在进行的生成。克隆共享同一内部状态，
/// 允许从不同于生成任务的逻辑任务中触发取消。
#[derive(Debug, Clone)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancellationToken {
    /// 创建新的取消令牌
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            notify: Arc::new(Notify::new()),
        }
    }

    /// 触发取消
    ///
    /// 幂等：重复调用与首次调用效果相同。
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    /// 检查是否已取消
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// 等待取消信号
    pub async fn cancelled(&self) {
        // 已取消则立即返回
        if self.is_cancelled() {
            return;
        }
        loop {
            self.notify.notified().await;
            if self.is_cancelled() {
                return;
            }
        }
    }
}
