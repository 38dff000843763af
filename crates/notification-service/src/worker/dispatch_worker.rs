//! 待发送记录处理 Worker
//!
//! 轮询 pending 状态的投递记录，在事务内批量领取并标记为 processing，
//! 然后交给渠道分发器并发发送。整批发送全部完成后才进入下一次休眠，
//! 因此单轮耗时受最慢的一条发送约束而非总和；渠道变慢时每单位时间
//! 的轮次自然变少，形成软背压，而不会出现轮次堆叠。
//!
//! 使用 `FOR UPDATE SKIP LOCKED` 保证多实例部署时记录不会被重复领取。

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use edu_shared::config::NotificationConfig;
use edu_shared::observability::metrics;
use sqlx::PgPool;
use tracing::{error, info};
use uuid::Uuid;

use crate::dispatch::ChannelDispatcher;
use crate::models::{DeliveryRecord, DeliveryStatus};

/// 待发送记录处理 Worker
pub struct DispatchWorker {
    pool: PgPool,
    dispatcher: Arc<ChannelDispatcher>,
    poll_interval: Duration,
    batch_size: i64,
}

impl DispatchWorker {
    pub fn new(pool: PgPool, dispatcher: Arc<ChannelDispatcher>, config: &NotificationConfig) -> Self {
        Self {
            pool,
            dispatcher,
            poll_interval: Duration::from_secs(config.dispatch_interval_secs),
            batch_size: config.batch_size,
        }
    }

    /// 创建带自定义配置的 Worker（主要用于测试）
    #[allow(dead_code)]
    pub fn with_config(
        pool: PgPool,
        dispatcher: Arc<ChannelDispatcher>,
        poll_secs: u64,
        batch_size: i64,
    ) -> Self {
        Self {
            pool,
            dispatcher,
            poll_interval: Duration::from_secs(poll_secs),
            batch_size,
        }
    }

    /// 主循环：持续领取并发送待处理记录直到进程退出
    pub async fn run(&self) {
        info!(
            poll_interval = ?self.poll_interval,
            batch_size = self.batch_size,
            "DispatchWorker 已启动"
        );
        loop {
            if let Err(e) = self.process_pending_batch().await {
                error!(error = %e, "待发送记录处理出错");
            }

            metrics::set_worker_last_run("dispatch_worker");

            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// 领取一批 pending 记录并全部发送完毕
    ///
    /// 领取（pending -> processing + 盖 sent_at 时间戳）在单个事务内
    /// 完成；实际发送在事务外执行，避免长事务锁住行。
    pub async fn process_pending_batch(&self) -> Result<(), sqlx::Error> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let mut records: Vec<DeliveryRecord> = sqlx::query_as(
            r#"
            SELECT *
            FROM delivery_records
            WHERE status = 'pending'
            ORDER BY created_at ASC
            LIMIT $1
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .bind(self.batch_size)
        .fetch_all(&mut *tx)
        .await?;

        if records.is_empty() {
            tx.rollback().await?;
            return Ok(());
        }

        let ids: Vec<Uuid> = records.iter().map(|r| r.id).collect();

        // sent_at 在离开 pending 时盖章，此后不再重置
        sqlx::query(
            r#"
            UPDATE delivery_records
            SET status = 'processing', sent_at = $2
            WHERE id = ANY($1) AND status = 'pending'
            "#,
        )
        .bind(&ids)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        info!(count = records.len(), "领取到待发送记录");

        // 同步内存中的记录状态，供发送器使用
        for record in &mut records {
            record.status = DeliveryStatus::Processing;
            record.sent_at = Some(now);
        }

        let (sent, failed) = self.dispatcher.dispatch_batch(records).await;

        info!(sent, failed, "本轮发送完成");

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::default_senders;
    use edu_shared::RetryPolicy;

    fn make_worker(poll_secs: u64, batch_size: i64) -> DispatchWorker {
        let pool = sqlx::PgPool::connect_lazy("postgres://localhost/test").unwrap();
        let dispatcher = Arc::new(ChannelDispatcher::new(
            pool.clone(),
            default_senders(pool.clone()),
            RetryPolicy::default(),
            25,
        ));
        DispatchWorker::with_config(pool, dispatcher, poll_secs, batch_size)
    }

    #[tokio::test]
    async fn test_worker_custom_config() {
        let worker = make_worker(10, 50);
        assert_eq!(worker.poll_interval.as_secs(), 10);
        assert_eq!(worker.batch_size, 50);
    }

    #[tokio::test]
    async fn test_worker_default_config() {
        let pool = sqlx::PgPool::connect_lazy("postgres://localhost/test").unwrap();
        let dispatcher = Arc::new(ChannelDispatcher::new(
            pool.clone(),
            default_senders(pool.clone()),
            RetryPolicy::default(),
            25,
        ));
        let worker = DispatchWorker::new(pool, dispatcher, &NotificationConfig::default());
        assert_eq!(worker.poll_interval.as_secs(), 300);
        assert_eq!(worker.batch_size, 100);
    }
}
