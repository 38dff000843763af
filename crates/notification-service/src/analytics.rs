//! 投递统计聚合
//!
//! 对投递记录做只读聚合：按状态计数、投递成功率、平均投递时延、
//! 按类型/渠道的分布，以及基于阈值的管道健康分级。本模块绝不
//! 修改记录，只回答"管道现在运转得怎么样"。

use chrono::{DateTime, Utc};
use edu_shared::config::NotificationConfig;
use serde::Serialize;
use sqlx::PgPool;
use tracing::instrument;

use crate::error::Result;

/// 按状态的计数
#[derive(Debug, Default, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct StatusCounts {
    pub scheduled: i64,
    pub pending: i64,
    pub processing: i64,
    pub sent: i64,
    pub delivered: i64,
    pub failed: i64,
    pub expired: i64,
    pub cancelled: i64,
}

/// 按通知类型或渠道的分布项
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct BreakdownItem {
    /// 维度取值（类型名或渠道名）
    pub key: String,
    pub total: i64,
    pub delivered: i64,
    pub failed: i64,
}

/// 时间窗口内的投递统计
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryStatistics {
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub total: i64,
    pub counts: StatusCounts,
    /// (sent + delivered) / total，窗口内无记录时为 1.0
    pub delivery_rate: f64,
    /// delivered 记录的平均投递时延（秒），无样本时为空
    pub avg_delivery_latency_secs: Option<f64>,
    pub by_type: Vec<BreakdownItem>,
    pub by_channel: Vec<BreakdownItem>,
}

/// 管道健康分级
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PipelineStatus {
    Healthy,
    Warning,
    Critical,
}

/// 管道健康报告
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineHealth {
    pub status: PipelineStatus,
    /// 当前 pending 积压量
    pub pending_backlog: i64,
    /// 近 24 小时内进入永久失败的记录数
    pub recent_failed: i64,
    /// 近 24 小时的投递成功率
    pub recent_delivery_rate: f64,
}

/// 投递统计聚合器
pub struct DeliveryAnalytics {
    pool: PgPool,
    config: NotificationConfig,
}

impl DeliveryAnalytics {
    pub fn new(pool: PgPool, config: NotificationConfig) -> Self {
        Self { pool, config }
    }

    /// 时间窗口内的完整统计
    #[instrument(skip(self))]
    pub async fn statistics(
        &self,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> Result<DeliveryStatistics> {
        let counts: StatusCounts = sqlx::query_as(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE status = 'scheduled')  AS scheduled,
                COUNT(*) FILTER (WHERE status = 'pending')    AS pending,
                COUNT(*) FILTER (WHERE status = 'processing') AS processing,
                COUNT(*) FILTER (WHERE status = 'sent')       AS sent,
                COUNT(*) FILTER (WHERE status = 'delivered')  AS delivered,
                COUNT(*) FILTER (WHERE status = 'failed')     AS failed,
                COUNT(*) FILTER (WHERE status = 'expired')    AS expired,
                COUNT(*) FILTER (WHERE status = 'cancelled')  AS cancelled
            FROM delivery_records
            WHERE created_at >= $1 AND created_at <= $2
            "#,
        )
        .bind(window_start)
        .bind(window_end)
        .fetch_one(&self.pool)
        .await?;

        let avg_latency: (Option<f64>,) = sqlx::query_as(
            r#"
            SELECT AVG(EXTRACT(EPOCH FROM (delivered_at - sent_at)))::float8
            FROM delivery_records
            WHERE created_at >= $1 AND created_at <= $2
              AND status = 'delivered'
              AND delivered_at IS NOT NULL
              AND sent_at IS NOT NULL
            "#,
        )
        .bind(window_start)
        .bind(window_end)
        .fetch_one(&self.pool)
        .await?;

        let by_type = self
            .breakdown("notification_type", window_start, window_end)
            .await?;
        let by_channel = self.breakdown("channel", window_start, window_end).await?;

        let total = total_of(&counts);

        Ok(DeliveryStatistics {
            window_start,
            window_end,
            total,
            delivery_rate: delivery_rate_of(&counts),
            avg_delivery_latency_secs: avg_latency.0,
            counts,
            by_type,
            by_channel,
        })
    }

    /// 时间窗口内的投递成功率
    #[instrument(skip(self))]
    pub async fn delivery_rate(
        &self,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> Result<f64> {
        let counts: StatusCounts = sqlx::query_as(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE status = 'scheduled')  AS scheduled,
                COUNT(*) FILTER (WHERE status = 'pending')    AS pending,
                COUNT(*) FILTER (WHERE status = 'processing') AS processing,
                COUNT(*) FILTER (WHERE status = 'sent')       AS sent,
                COUNT(*) FILTER (WHERE status = 'delivered')  AS delivered,
                COUNT(*) FILTER (WHERE status = 'failed')     AS failed,
                COUNT(*) FILTER (WHERE status = 'expired')    AS expired,
                COUNT(*) FILTER (WHERE status = 'cancelled')  AS cancelled
            FROM delivery_records
            WHERE created_at >= $1 AND created_at <= $2
            "#,
        )
        .bind(window_start)
        .bind(window_end)
        .fetch_one(&self.pool)
        .await?;

        Ok(delivery_rate_of(&counts))
    }

    /// 管道健康分级
    ///
    /// 基于三个维度：pending 积压、近 24 小时永久失败数、
    /// 近 24 小时投递成功率。任一维度越过严重阈值即 CRITICAL，
    /// 越过告警阈值即 WARNING。
    #[instrument(skip(self))]
    pub async fn health(&self) -> Result<PipelineHealth> {
        let now = Utc::now();
        let day_ago = now - chrono::Duration::hours(24);

        let pending_backlog: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM delivery_records WHERE status = 'pending'",
        )
        .fetch_one(&self.pool)
        .await?;

        let recent_failed: (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*)
            FROM delivery_records
            WHERE status = 'failed'
              AND retry_count >= max_retries
              AND failed_at >= $1
            "#,
        )
        .bind(day_ago)
        .fetch_one(&self.pool)
        .await?;

        let recent_rate = self.delivery_rate(day_ago, now).await?;

        let status = classify_health(
            pending_backlog.0,
            recent_failed.0,
            recent_rate,
            &self.config,
        );

        Ok(PipelineHealth {
            status,
            pending_backlog: pending_backlog.0,
            recent_failed: recent_failed.0,
            recent_delivery_rate: recent_rate,
        })
    }

    /// 按某一维度列聚合分布
    ///
    /// dimension 只接受内部常量（列名），不拼接任何外部输入。
    async fn breakdown(
        &self,
        dimension: &str,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> Result<Vec<BreakdownItem>> {
        let sql = format!(
            r#"
            SELECT
                {dimension}::text AS key,
                COUNT(*) AS total,
                COUNT(*) FILTER (WHERE status = 'delivered') AS delivered,
                COUNT(*) FILTER (WHERE status = 'failed')    AS failed
            FROM delivery_records
            WHERE created_at >= $1 AND created_at <= $2
            GROUP BY {dimension}
            ORDER BY total DESC
            "#
        );

        let rows = sqlx::query_as::<_, BreakdownItem>(&sql)
            .bind(window_start)
            .bind(window_end)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows)
    }
}

fn total_of(counts: &StatusCounts) -> i64 {
    counts.scheduled
        + counts.pending
        + counts.processing
        + counts.sent
        + counts.delivered
        + counts.failed
        + counts.expired
        + counts.cancelled
}

/// 投递成功率 = (sent + delivered) / total
///
/// 窗口内无记录时视为 1.0：没有流量不代表管道故障。
fn delivery_rate_of(counts: &StatusCounts) -> f64 {
    let total = total_of(counts);
    if total == 0 {
        return 1.0;
    }
    (counts.sent + counts.delivered) as f64 / total as f64
}

/// 阈值分级
fn classify_health(
    pending_backlog: i64,
    recent_failed: i64,
    recent_rate: f64,
    config: &NotificationConfig,
) -> PipelineStatus {
    if pending_backlog >= config.health_pending_critical
        || recent_failed >= config.health_failed_critical
        || recent_rate < config.health_rate_critical
    {
        return PipelineStatus::Critical;
    }
    if pending_backlog >= config.health_pending_warning
        || recent_failed >= config.health_failed_warning
        || recent_rate < config.health_rate_warning
    {
        return PipelineStatus::Warning;
    }
    PipelineStatus::Healthy
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counts(sent: i64, delivered: i64, failed: i64, pending: i64) -> StatusCounts {
        StatusCounts {
            sent,
            delivered,
            failed,
            pending,
            ..StatusCounts::default()
        }
    }

    #[test]
    fn test_delivery_rate_sent_plus_delivered_over_total() {
        // 10 sent + 0 delivered, 5 终态失败, 0 pending -> 10/15 ≈ 66.7%
        let c = counts(10, 0, 5, 0);
        let rate = delivery_rate_of(&c);
        assert!((rate - 10.0 / 15.0).abs() < 1e-9);
    }

    #[test]
    fn test_delivery_rate_empty_window_is_one() {
        let c = StatusCounts::default();
        assert_eq!(delivery_rate_of(&c), 1.0);
    }

    #[test]
    fn test_delivery_rate_counts_delivered() {
        let c = counts(3, 7, 0, 0);
        assert!((delivery_rate_of(&c) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_total_sums_all_statuses() {
        let c = StatusCounts {
            scheduled: 1,
            pending: 2,
            processing: 3,
            sent: 4,
            delivered: 5,
            failed: 6,
            expired: 7,
            cancelled: 8,
        };
        assert_eq!(total_of(&c), 36);
    }

    #[test]
    fn test_classify_healthy() {
        let config = NotificationConfig::default();
        assert_eq!(
            classify_health(0, 0, 1.0, &config),
            PipelineStatus::Healthy
        );
        assert_eq!(
            classify_health(499, 49, 0.96, &config),
            PipelineStatus::Healthy
        );
    }

    #[test]
    fn test_classify_warning_on_any_warning_threshold() {
        let config = NotificationConfig::default();
        // 积压越过告警线
        assert_eq!(
            classify_health(500, 0, 1.0, &config),
            PipelineStatus::Warning
        );
        // 失败数越过告警线
        assert_eq!(
            classify_health(0, 50, 1.0, &config),
            PipelineStatus::Warning
        );
        // 成功率低于告警线
        assert_eq!(
            classify_health(0, 0, 0.90, &config),
            PipelineStatus::Warning
        );
    }

    #[test]
    fn test_classify_critical_overrides_warning() {
        let config = NotificationConfig::default();
        assert_eq!(
            classify_health(2000, 0, 1.0, &config),
            PipelineStatus::Critical
        );
        assert_eq!(
            classify_health(0, 200, 1.0, &config),
            PipelineStatus::Critical
        );
        assert_eq!(
            classify_health(0, 0, 0.5, &config),
            PipelineStatus::Critical
        );
        // 多个维度同时越线时取最严重级别
        assert_eq!(
            classify_health(600, 300, 0.99, &config),
            PipelineStatus::Critical
        );
    }

    #[test]
    fn test_pipeline_status_serializes_screaming_case() {
        let json = serde_json::to_string(&PipelineStatus::Healthy).unwrap();
        assert_eq!(json, "\"HEALTHY\"");
    }
}
