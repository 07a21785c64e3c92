//! 生成统计
//!
//! 每次增量到达时整体重算，不做带状态累积，
//! 因此任意时刻的统计都是 `(token 数, 起始时间, 当前时间, 结束原因)` 的纯函数。

use std::time::{Duration, Instant};

/// 生成统计
///
/// token 计数为近似值：每个内容增量记 1，不经过真实分词器。
#[derive(Debug, Clone, PartialEq, Default)]
pub struct GenerationStats {
    /// 累计 token 数
    pub total_tokens: u32,
    /// 每秒 token 数
    pub tokens_per_second: f64,
    /// 已耗时
    pub elapsed: Duration,
    /// 结束原因（仅终态设置）
    pub stop_reason: Option<String>,
}

impl GenerationStats {
    /// 由当前瞬时值重算统计
    pub fn compute(
        total_tokens: u32,
        started_at: Instant,
        now: Instant,
        stop_reason: Option<String>,
    ) -> Self {
        let elapsed = now.saturating_duration_since(started_at);
        let secs = elapsed.as_secs_f64();
        let tokens_per_second = if secs > f64::EPSILON {
            f64::from(total_tokens) / secs
        } else {
            0.0
        };
        Self {
            total_tokens,
            tokens_per_second,
            elapsed,
            stop_reason,
        }
    }
}
