//! 通知投递服务
//!
//! 提供通知入队、投递调度、渠道分发、状态回调与统计查询。

use std::sync::Arc;

use axum::{Json, Router, http::HeaderValue, routing::get};
use edu_shared::{
    RetryPolicy,
    config::AppConfig,
    database::Database,
    observability,
};
use notification_service::{
    analytics::DeliveryAnalytics,
    callback::StatusCallback,
    content::TemplateContentResolver,
    dispatch::{ChannelDispatcher, default_senders},
    notifier::Notifier,
    preferences::AllowAllGate,
    queue::DeliveryQueue,
    routes,
    state::AppState,
    worker::{CleanupWorker, DispatchWorker, PromoteWorker, RetryWorker},
};
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 统一加载配置：从 config/{service_name}.toml 加载，包含可观测性配置
    let config = AppConfig::load("notification-service").unwrap_or_default();

    let obs_config = config
        .observability
        .clone()
        .with_service_name(&config.service_name);
    let _guard = observability::init(&obs_config).await?;

    info!("Starting notification-service on {}", config.server_addr());

    // 初始化数据库并应用迁移
    let db = Database::connect(&config.database).await?;
    sqlx::migrate!("../../migrations").run(db.pool()).await?;

    let notification_config = config.notification.clone();
    let retry_policy = RetryPolicy {
        max_retries: notification_config.max_retries.max(0) as u32,
        initial_delay: std::time::Duration::from_secs(notification_config.retry_base_delay_secs),
        ..RetryPolicy::default()
    };

    // 组装投递管道：发送器注册表 -> 分发器 -> 队列/门面
    let senders = default_senders(db.pool().clone());
    let dispatcher = Arc::new(ChannelDispatcher::new(
        db.pool().clone(),
        senders,
        retry_policy,
        notification_config.dispatch_chunk_size,
    ));

    // 偏好门禁当前为全量放行，偏好服务接入后在此注入其客户端实现
    let queue = Arc::new(DeliveryQueue::new(
        db.pool().clone(),
        Arc::new(AllowAllGate),
        notification_config.max_retries,
    ));
    let notifier = Arc::new(Notifier::new(
        queue.clone(),
        Arc::new(TemplateContentResolver),
    ));
    let analytics = Arc::new(DeliveryAnalytics::new(
        db.pool().clone(),
        notification_config.clone(),
    ));
    let callback = Arc::new(StatusCallback::new(db.pool().clone()));

    let state = AppState::new(
        db.pool().clone(),
        queue,
        notifier,
        analytics,
        callback,
    );

    // 启动定时记录提升 Worker
    let promote_pool = db.pool().clone();
    let promote_config = notification_config.clone();
    tokio::spawn(async move {
        let worker = PromoteWorker::new(promote_pool, &promote_config);
        worker.run().await;
    });

    // 启动待发送记录处理 Worker
    let dispatch_pool = db.pool().clone();
    let dispatch_config = notification_config.clone();
    let worker_dispatcher = dispatcher.clone();
    tokio::spawn(async move {
        let worker = DispatchWorker::new(dispatch_pool, worker_dispatcher, &dispatch_config);
        worker.run().await;
    });

    // 启动失败重试 Worker
    let retry_pool = db.pool().clone();
    let retry_config = notification_config.clone();
    tokio::spawn(async move {
        let worker = RetryWorker::new(retry_pool, &retry_config);
        worker.run().await;
    });

    // 启动过期与清理 Worker
    let cleanup_pool = db.pool().clone();
    let cleanup_config = notification_config.clone();
    tokio::spawn(async move {
        let worker = CleanupWorker::new(cleanup_pool, &cleanup_config);
        worker.run().await;
    });

    // CORS 配置：通过 EDU_CORS_ORIGINS 环境变量控制允许的来源
    let allowed_origins =
        std::env::var("EDU_CORS_ORIGINS").unwrap_or_else(|_| "http://localhost:5173".to_string());

    let cors = if allowed_origins == "*" {
        info!("CORS allowed_origins: * (all origins)");
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        info!("CORS allowed_origins: {}", allowed_origins);
        let origins: Vec<_> = allowed_origins
            .split(',')
            .filter_map(|s| s.trim().parse::<HeaderValue>().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    };

    let app = Router::new()
        .nest("/api/notify", routes::api_routes())
        .route("/health", get(health_check))
        .route(
            "/ready",
            get({
                let db_for_ready = db;
                move || readiness_check(db_for_ready.clone())
            }),
        )
        .layer(cors)
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state);

    let listener = TcpListener::bind(config.server_addr()).await?;
    info!("Listening on {}", config.server_addr());

    // 优雅关闭：收到 SIGTERM（K8s 停止 Pod）或 Ctrl+C 时，
    // 停止接收新连接并等待已有请求处理完毕
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");

    Ok(())
}

/// 监听关闭信号
///
/// K8s 通过 SIGTERM 通知 Pod 停止；本地开发通过 Ctrl+C。
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("注册 Ctrl+C 处理器失败");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("注册 SIGTERM 处理器失败")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, initiating graceful shutdown..."),
        _ = terminate => info!("Received SIGTERM, initiating graceful shutdown..."),
    }
}

/// 存活探针：服务进程正常即返回 ok
async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": "notification-service"
    }))
}

/// 就绪探针：检查数据库连接是否可用
async fn readiness_check(db: Database) -> Json<serde_json::Value> {
    let db_ok = db.health_check().await.is_ok();

    Json(serde_json::json!({
        "status": if db_ok { "ok" } else { "degraded" },
        "service": "notification-service",
        "checks": {
            "database": if db_ok { "ok" } else { "fail" }
        }
    }))
}
