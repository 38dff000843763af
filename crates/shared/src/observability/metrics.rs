//! Prometheus 指标模块
//!
//! 基于 metrics crate 和 metrics-exporter-prometheus 实现指标收集与导出。
//! 指标通过独立的 HTTP 端口暴露，供 Prometheus 抓取。

use anyhow::Result;
use axum::{Router, routing::get};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::sync::OnceLock;
use tokio::net::TcpListener;
use tracing::{error, info};

use super::ObservabilityConfig;

/// 全局 Prometheus handle，用于渲染指标
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Metrics 资源守卫
pub struct MetricsHandle {
    _server_handle: tokio::task::JoinHandle<()>,
}

/// 初始化 Prometheus 指标导出
///
/// 启动一个独立的 HTTP 服务器在指定端口暴露 `/metrics` 端点。
pub async fn init(config: &ObservabilityConfig) -> Result<MetricsHandle> {
    let builder = PrometheusBuilder::new();
    let handle = builder.install_recorder()?;

    let _ = PROMETHEUS_HANDLE.set(handle.clone());

    register_common_metrics(&config.service_name);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.metrics_port));
    let server_handle = start_metrics_server(addr, handle).await?;

    Ok(MetricsHandle {
        _server_handle: server_handle,
    })
}

/// 注册通用指标（预定义的业务指标）
fn register_common_metrics(service_name: &str) {
    // 这些描述会出现在 /metrics 端点的 HELP 注释中
    metrics::describe_counter!(
        "notification_enqueued_total",
        "Total number of delivery records enqueued"
    );
    metrics::describe_counter!(
        "notification_dispatched_total",
        "Total number of delivery attempts, labeled by channel and outcome"
    );
    metrics::describe_counter!(
        "notification_expired_total",
        "Total number of stale pending records expired"
    );
    metrics::describe_counter!(
        "notification_purged_total",
        "Total number of terminal records purged"
    );
    metrics::describe_counter!(
        "notification_status_callbacks_total",
        "Total number of external status callbacks processed"
    );
    metrics::describe_gauge!(
        "worker_last_run_timestamp",
        "Unix timestamp of each worker's last completed cycle"
    );

    // 记录服务启动
    metrics::counter!("service_starts_total", "service" => service_name.to_string()).increment(1);
}

/// 启动指标 HTTP 服务器
async fn start_metrics_server(
    addr: SocketAddr,
    handle: PrometheusHandle,
) -> Result<tokio::task::JoinHandle<()>> {
    let app = Router::new()
        .route("/metrics", get(move || std::future::ready(handle.render())))
        .route("/health", get(|| async { "OK" }));

    let listener = TcpListener::bind(addr).await?;
    info!("Metrics server listening on {}", addr);

    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("Metrics server error: {}", e);
        }
    });

    Ok(server_handle)
}

/// 获取全局 Prometheus handle（用于自定义渲染）
pub fn get_handle() -> Option<&'static PrometheusHandle> {
    PROMETHEUS_HANDLE.get()
}

// ============================================================================
// 便捷的指标记录函数
// ============================================================================

/// 记录 Worker 健康心跳，供 Prometheus 告警判断 Worker 是否存活
#[inline]
pub fn set_worker_last_run(worker_name: &str) {
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0);
    metrics::gauge!("worker_last_run_timestamp", "worker" => worker_name.to_string()).set(now);
}

/// 记录一次入队
#[inline]
pub fn record_enqueued(channel: &str) {
    metrics::counter!("notification_enqueued_total", "channel" => channel.to_string()).increment(1);
}

/// 记录一次投递尝试及其结果
#[inline]
pub fn record_dispatched(channel: &str, outcome: &str) {
    metrics::counter!(
        "notification_dispatched_total",
        "channel" => channel.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// 记录过期处理数量
#[inline]
pub fn record_expired(count: u64) {
    metrics::counter!("notification_expired_total").increment(count);
}

/// 记录清理删除数量
#[inline]
pub fn record_purged(count: u64) {
    metrics::counter!("notification_purged_total").increment(count);
}

/// 记录状态回调处理结果
#[inline]
pub fn record_status_callback(outcome: &str) {
    metrics::counter!(
        "notification_status_callbacks_total",
        "outcome" => outcome.to_string()
    )
    .increment(1);
}
