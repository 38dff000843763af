//! 重试策略
//!
//! 提供指数退避的等待时间计算，用于瞬时故障（网络抖动、网关限流等）
//! 的自动恢复。投递引擎的重试由记录存储调度执行：失败时按本策略
//! 计算 next_retry_at 写回记录，由重试任务到期后重新入队。

use std::time::Duration;

use chrono::{DateTime, Utc};

/// 重试策略配置
///
/// 使用指数退避避免重试风暴：首次失败等 1 倍基数，第 2 次等 2 倍，
/// 第 3 次等 4 倍...直到达到最大间隔或最大重试次数。
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// 最大重试次数（不含首次执行）
    pub max_retries: u32,
    /// 首次重试前的等待时间
    pub initial_delay: Duration,
    /// 退避时间上限，防止等待过长
    pub max_delay: Duration,
    /// 每次重试的退避倍数
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    /// 默认策略：最多重试 3 次，初始等待 60 秒，最大等待 1 小时，倍数 2.0
    ///
    /// 投递重试以分钟为尺度，远大于进程内重试的秒级退避——
    /// 渠道故障（SMTP 限流、推送网关抖动）通常需要分钟级恢复时间。
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(60),
            max_delay: Duration::from_secs(3600),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// 计算第 N 次重试的等待时间（attempt 从 0 开始）
    ///
    /// 公式: initial_delay * multiplier^attempt，结果不超过 max_delay。
    /// 使用 f64 运算后再转回 Duration，接受微秒级精度损失——
    /// 对分钟级退避场景而言完全可接受。
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_ms = self.initial_delay.as_millis() as f64;
        let delay_ms = base_ms * self.multiplier.powi(attempt as i32);
        let capped_ms = delay_ms.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped_ms as u64)
    }

    /// 是否应继续重试
    ///
    /// attempt 表示已经失败的次数（从 0 开始计数的重试轮次），
    /// 当 attempt < max_retries 时返回 true。
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_retries
    }

    /// 计算下次重试的绝对时间点
    ///
    /// 已用尽重试次数时返回 None，记录进入永久失败态。
    pub fn next_retry_at(&self, now: DateTime<Utc>, attempt: u32) -> Option<DateTime<Utc>> {
        if !self.should_retry(attempt) {
            return None;
        }
        let delay = self.delay_for_attempt(attempt);
        Some(now + chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::zero()))
    }
}
