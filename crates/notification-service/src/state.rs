//! 应用状态定义
//!
//! 包含 Axum 路由共享的应用状态

use std::sync::Arc;

use sqlx::PgPool;

use crate::analytics::DeliveryAnalytics;
use crate::callback::StatusCallback;
use crate::notifier::Notifier;
use crate::queue::DeliveryQueue;

/// Axum 应用共享状态
///
/// 包含数据库连接池与各服务组件，通过 Arc 在 handler 间共享
#[derive(Clone)]
pub struct AppState {
    /// PostgreSQL 连接池（历史查询等读路径直接使用）
    pub pool: PgPool,
    /// 投递队列管理器
    pub queue: Arc<DeliveryQueue>,
    /// 事件通知门面
    pub notifier: Arc<Notifier>,
    /// 统计聚合器
    pub analytics: Arc<DeliveryAnalytics>,
    /// 状态回调处理器
    pub callback: Arc<StatusCallback>,
}

impl AppState {
    /// 创建新的应用状态
    pub fn new(
        pool: PgPool,
        queue: Arc<DeliveryQueue>,
        notifier: Arc<Notifier>,
        analytics: Arc<DeliveryAnalytics>,
        callback: Arc<StatusCallback>,
    ) -> Self {
        Self {
            pool,
            queue,
            notifier,
            analytics,
            callback,
        }
    }
}
