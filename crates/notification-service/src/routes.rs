//! 路由配置模块
//!
//! 定义所有 REST API 端点的路由映射

use axum::{
    Router,
    routing::{get, post},
};

use crate::{handlers, state::AppState};

/// 构建通知服务的 API 路由
pub fn api_routes() -> Router<AppState> {
    Router::new()
        // 入队（生产方）
        .route("/deliveries", post(handlers::delivery::enqueue_delivery))
        .route("/deliveries/bulk", post(handlers::delivery::enqueue_bulk))
        .route("/notify", post(handlers::delivery::notify_event))
        // 查询与运营操作
        .route("/deliveries", get(handlers::delivery::list_deliveries))
        .route("/deliveries/{id}", get(handlers::delivery::get_delivery))
        .route(
            "/deliveries/{id}/retry",
            post(handlers::delivery::retry_delivery),
        )
        .route(
            "/deliveries/{id}/cancel",
            post(handlers::delivery::cancel_delivery),
        )
        // 渠道回调
        .route("/callbacks/status", post(handlers::delivery::status_callback))
        // 统计
        .route("/stats/overview", get(handlers::stats::get_overview))
        .route("/stats/rate", get(handlers::stats::get_rate))
        .route("/stats/health", get(handlers::stats::get_health))
}
