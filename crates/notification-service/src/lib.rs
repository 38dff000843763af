//! 通知投递引擎
//!
//! 把"就事件 X 通知该用户"的请求变成受追踪、可重试的多渠道投递：
//! 队列管理器持久化投递记录，调度任务按各自节奏推进记录状态
//! （提升、发送、重试、过期、清理），渠道分发器把发送结果映射为
//! 状态迁移，统计聚合器只读地回答管道运行状况。
//!
//! 所有跨实例协调都通过记录存储的行级状态完成，进程内不持有
//! 任何共享可变状态。

pub mod analytics;
pub mod callback;
pub mod content;
pub mod dispatch;
pub mod dto;
pub mod error;
pub mod handlers;
pub mod models;
pub mod notifier;
pub mod preferences;
pub mod queue;
pub mod routes;
pub mod state;
pub mod worker;

pub use error::{NotifyError, Result};
