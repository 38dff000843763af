//! 失败重试 Worker
//!
//! 轮询已到重试时间的 failed 记录，递增重试计数、清除重试排期后
//! 重新置为 pending，由 DispatchWorker 在下一轮领取发送。
//!
//! 重试批量刻意限制为首发批量的一半：渠道故障恢复初期，重试流量
//! 不应挤占新通知的首发流量，否则容易形成级联的失败风暴。

use std::time::Duration;

use chrono::Utc;
use edu_shared::config::NotificationConfig;
use edu_shared::observability::metrics;
use sqlx::PgPool;
use tracing::{error, info};
use uuid::Uuid;

/// 失败重试 Worker
pub struct RetryWorker {
    pool: PgPool,
    poll_interval: Duration,
    /// 每轮重新入队的最大记录数（首发批量的一半）
    batch_size: i64,
}

impl RetryWorker {
    pub fn new(pool: PgPool, config: &NotificationConfig) -> Self {
        Self {
            pool,
            poll_interval: Duration::from_secs(config.retry_interval_secs),
            batch_size: (config.batch_size / 2).max(1),
        }
    }

    /// 创建带自定义配置的 Worker（主要用于测试）
    #[allow(dead_code)]
    pub fn with_config(pool: PgPool, poll_secs: u64, batch_size: i64) -> Self {
        Self {
            pool,
            poll_interval: Duration::from_secs(poll_secs),
            batch_size,
        }
    }

    /// 主循环：持续处理到期重试直到进程退出
    pub async fn run(&self) {
        info!(
            poll_interval = ?self.poll_interval,
            batch_size = self.batch_size,
            "RetryWorker 已启动"
        );
        loop {
            if let Err(e) = self.requeue_due_retries().await {
                error!(error = %e, "失败重试处理出错");
            }

            metrics::set_worker_last_run("retry_worker");

            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// 把到期且仍有重试余量的 failed 记录重新入队
    ///
    /// 返回本轮重新入队的记录数。
    pub async fn requeue_due_retries(&self) -> Result<u64, sqlx::Error> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let ids: Vec<(Uuid,)> = sqlx::query_as(
            r#"
            SELECT id
            FROM delivery_records
            WHERE status = 'failed'
              AND next_retry_at IS NOT NULL
              AND next_retry_at <= $1
              AND retry_count < max_retries
            ORDER BY next_retry_at ASC
            LIMIT $2
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .bind(now)
        .bind(self.batch_size)
        .fetch_all(&mut *tx)
        .await?;

        if ids.is_empty() {
            tx.rollback().await?;
            return Ok(0);
        }

        let ids: Vec<Uuid> = ids.into_iter().map(|(id,)| id).collect();

        let result = sqlx::query(
            r#"
            UPDATE delivery_records
            SET status = 'pending', retry_count = retry_count + 1, next_retry_at = NULL
            WHERE id = ANY($1) AND status = 'failed'
            "#,
        )
        .bind(&ids)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        let requeued = result.rows_affected();
        info!(count = requeued, "到期的失败记录已重新入队");

        Ok(requeued)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_retry_batch_is_half_of_dispatch_batch() {
        let pool = sqlx::PgPool::connect_lazy("postgres://localhost/test").unwrap();
        let config = NotificationConfig::default();
        let worker = RetryWorker::new(pool, &config);

        assert_eq!(worker.batch_size, config.batch_size / 2);
        assert_eq!(worker.poll_interval.as_secs(), 900);
    }

    #[tokio::test]
    async fn test_retry_batch_floor_is_one() {
        let pool = sqlx::PgPool::connect_lazy("postgres://localhost/test").unwrap();
        let config = NotificationConfig {
            batch_size: 1,
            ..NotificationConfig::default()
        };
        let worker = RetryWorker::new(pool, &config);

        // 批量配置极小时仍保证每轮至少能处理一条
        assert_eq!(worker.batch_size, 1);
    }
}
