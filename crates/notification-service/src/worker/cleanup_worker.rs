//! 过期与清理 Worker
//!
//! 每小时扫描滞留超时的 pending 记录将其标记为 expired——过期与
//! 发送失败是两种不同的终态，前者的成因是管道停摆而非渠道错误。
//! 每 24 小时额外执行一次保留期清理，硬删除超过保留期的终态记录。
//!
//! 使用 `FOR UPDATE SKIP LOCKED` 保证多实例部署时不会重复处理。

use std::time::{Duration, Instant};

use chrono::Utc;
use edu_shared::config::NotificationConfig;
use edu_shared::observability::metrics;
use sqlx::PgPool;
use tracing::{error, info};
use uuid::Uuid;

/// pending 过期的标记原因，运营据此与渠道失败区分
const EXPIRE_REASON: &str = "expired after 24 hours";

/// 过期与清理 Worker
pub struct CleanupWorker {
    pool: PgPool,
    poll_interval: Duration,
    /// pending 记录的过期时限（小时）
    expire_after_hours: i64,
    /// 终态记录的保留天数
    retention_days: i64,
    batch_size: i64,
}

impl CleanupWorker {
    pub fn new(pool: PgPool, config: &NotificationConfig) -> Self {
        Self {
            pool,
            poll_interval: Duration::from_secs(config.cleanup_interval_secs),
            expire_after_hours: config.pending_expire_hours,
            retention_days: config.purge_retention_days,
            batch_size: config.batch_size,
        }
    }

    /// 创建带自定义配置的 Worker（主要用于测试）
    #[allow(dead_code)]
    pub fn with_config(
        pool: PgPool,
        poll_secs: u64,
        expire_after_hours: i64,
        retention_days: i64,
        batch_size: i64,
    ) -> Self {
        Self {
            pool,
            poll_interval: Duration::from_secs(poll_secs),
            expire_after_hours,
            retention_days,
            batch_size,
        }
    }

    /// 主循环：每轮执行过期标记，每 24 小时执行一次保留期清理
    pub async fn run(&self) {
        info!(
            poll_interval = ?self.poll_interval,
            expire_after_hours = self.expire_after_hours,
            retention_days = self.retention_days,
            "CleanupWorker 已启动"
        );

        let mut last_purge: Option<Instant> = None;

        loop {
            if let Err(e) = self.expire_stale_pending().await {
                error!(error = %e, "过期标记处理出错");
            }

            let purge_due = last_purge
                .map(|t| t.elapsed() >= Duration::from_secs(24 * 3600))
                .unwrap_or(true);
            if purge_due {
                match self.purge_old_terminal_records().await {
                    Ok(_) => last_purge = Some(Instant::now()),
                    Err(e) => error!(error = %e, "保留期清理出错"),
                }
            }

            metrics::set_worker_last_run("cleanup_worker");

            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// 把滞留超时的 pending 记录标记为 expired
    ///
    /// 过期记录不会再被任何调度任务领取；带状态守卫的领取逻辑
    /// 保证此后滞后的发送尝试也无法把它改回 sent。
    pub async fn expire_stale_pending(&self) -> Result<u64, sqlx::Error> {
        let cutoff = Utc::now() - chrono::Duration::hours(self.expire_after_hours);
        let mut tx = self.pool.begin().await?;

        let ids: Vec<(Uuid,)> = sqlx::query_as(
            r#"
            SELECT id
            FROM delivery_records
            WHERE status = 'pending'
              AND created_at < $1
            ORDER BY created_at ASC
            LIMIT $2
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .bind(cutoff)
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
            SET status = 'expired', last_failure_reason = $2
            WHERE id = ANY($1) AND status = 'pending'
            "#,
        )
        .bind(&ids)
        .bind(EXPIRE_REASON)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        let expired = result.rows_affected();
        metrics::record_expired(expired);
        info!(count = expired, "滞留超时的 pending 记录已标记为过期");

        Ok(expired)
    }

    /// 硬删除超过保留期的终态记录
    ///
    /// 投递记录从不单条删除，这里是唯一的删除路径。
    pub async fn purge_old_terminal_records(&self) -> Result<u64, sqlx::Error> {
        let cutoff = Utc::now() - chrono::Duration::days(self.retention_days);

        let result = sqlx::query(
            r#"
            DELETE FROM delivery_records
            WHERE status IN ('delivered', 'failed', 'cancelled', 'expired')
              AND created_at < $1
            "#,
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;

        let purged = result.rows_affected();
        if purged > 0 {
            metrics::record_purged(purged);
            info!(count = purged, retention_days = self.retention_days, "超过保留期的终态记录已清理");
        }

        Ok(purged)
    }
}
