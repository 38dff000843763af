//! 定时记录提升 Worker
//!
//! 轮询 scheduled 状态的投递记录，到达 scheduled_at 后将其提升为
//! pending，由 DispatchWorker 领取执行实际发送。只提升回看窗口内
//! 到期的记录，避免单次循环扫到大量历史积压；窗口宽度可配置，
//! 实例停机超过一个轮询周期时可临时调大。
//!
//! 使用显式事务包裹 `FOR UPDATE SKIP LOCKED`，确保多实例部署时的
//! 互斥正确性。

use std::time::Duration;

use chrono::Utc;
use edu_shared::config::NotificationConfig;
use edu_shared::observability::metrics;
use sqlx::PgPool;
use tracing::{error, info};
use uuid::Uuid;

/// 定时记录提升 Worker
pub struct PromoteWorker {
    pool: PgPool,
    poll_interval: Duration,
    /// 回看窗口（秒）：只提升 scheduled_at ∈ (now - lookback, now] 的记录
    lookback_secs: i64,
    batch_size: i64,
}

impl PromoteWorker {
    pub fn new(pool: PgPool, config: &NotificationConfig) -> Self {
        Self {
            pool,
            poll_interval: Duration::from_secs(config.promote_interval_secs),
            lookback_secs: config.promote_lookback_secs,
            batch_size: config.batch_size,
        }
    }

    /// 创建带自定义配置的 Worker（主要用于测试）
    #[allow(dead_code)]
    pub fn with_config(pool: PgPool, poll_secs: u64, lookback_secs: i64, batch_size: i64) -> Self {
        Self {
            pool,
            poll_interval: Duration::from_secs(poll_secs),
            lookback_secs,
            batch_size,
        }
    }

    /// 主循环：持续检查到期的定时记录直到进程退出
    pub async fn run(&self) {
        info!(
            poll_interval = ?self.poll_interval,
            lookback_secs = self.lookback_secs,
            batch_size = self.batch_size,
            "PromoteWorker 已启动"
        );
        loop {
            if let Err(e) = self.promote_due_records().await {
                error!(error = %e, "定时记录提升出错");
            }

            // 记录 Worker 健康状态，供 Prometheus 告警判断 Worker 是否存活
            metrics::set_worker_last_run("promote_worker");

            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// 把回看窗口内到期的 scheduled 记录提升为 pending
    ///
    /// 返回本轮提升的记录数。
    pub async fn promote_due_records(&self) -> Result<u64, sqlx::Error> {
        let now = Utc::now();
        let window_start = now - chrono::Duration::seconds(self.lookback_secs);

        let mut tx = self.pool.begin().await?;

        let ids: Vec<(Uuid,)> = sqlx::query_as(
            r#"
            SELECT id
            FROM delivery_records
            WHERE status = 'scheduled'
              AND scheduled_at <= $1
              AND scheduled_at > $2
            ORDER BY scheduled_at ASC
            LIMIT $3
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .bind(now)
        .bind(window_start)
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
            SET status = 'pending'
            WHERE id = ANY($1) AND status = 'scheduled'
            "#,
        )
        .bind(&ids)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        let promoted = result.rows_affected();
        info!(count = promoted, "到期的定时记录已提升为 pending");

        Ok(promoted)
    }
}
