//! 调度任务集合
//!
//! 五类调度职责拆分在四个独立节奏的 Worker 上：提升、发送、重试、
//! 过期/清理（后两者共享一个循环，清理按 24 小时自限频）。拆分的
//! 目的是避免单个慢任务饿死其他任务，并让重试流量始终小于首发流量。
//!
//! 每个 Worker 的循环在本轮工作全部完成后才休眠，天然保证同一任务
//! 不会重叠执行；跨实例的互斥由行级 `FOR UPDATE SKIP LOCKED` 保证，
//! 不依赖任何进程内锁。

pub mod cleanup_worker;
pub mod dispatch_worker;
pub mod promote_worker;
pub mod retry_worker;

pub use cleanup_worker::CleanupWorker;
pub use dispatch_worker::DispatchWorker;
pub use promote_worker::PromoteWorker;
pub use retry_worker::RetryWorker;
