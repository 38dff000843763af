//! 渠道分发器
//!
//! 对一条已领取（processing）的投递记录，找到对应渠道的发送器执行
//! 发送，并把结果映射为状态迁移：成功 -> sent，失败 -> failed +
//! 指数退避排期。批量分发按分片并发执行，分片之间顺序推进以控制
//! 并发度，避免数据库连接池耗尽；记录之间相互独立，不保证顺序。
//!
//! 所有状态更新都带 `AND status = 'processing'` 守卫：记录若在
//! 发送期间被其他任务改动（如被过期任务标记），更新落空并记日志，
//! 过期/取消的记录绝不会被改回 sent。

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use sqlx::PgPool;
use tracing::{info, warn};

use edu_shared::RetryPolicy;
use edu_shared::observability::metrics;

use crate::error::NotifyError;
use crate::models::{DeliveryRecord, NotificationChannel};

use super::sender::ChannelSender;

/// 渠道分发器
pub struct ChannelDispatcher {
    pool: PgPool,
    senders: HashMap<NotificationChannel, Arc<dyn ChannelSender>>,
    retry_policy: RetryPolicy,
    /// 并发发送的分片大小
    chunk_size: usize,
}

impl ChannelDispatcher {
    pub fn new(
        pool: PgPool,
        senders: HashMap<NotificationChannel, Arc<dyn ChannelSender>>,
        retry_policy: RetryPolicy,
        chunk_size: usize,
    ) -> Self {
        Self {
            pool,
            senders,
            retry_policy,
            chunk_size: chunk_size.max(1),
        }
    }

    /// 并发分发一批已领取的记录，全部完成后返回 (成功数, 失败数)
    pub async fn dispatch_batch(&self, records: Vec<DeliveryRecord>) -> (usize, usize) {
        let mut sent_count = 0usize;
        let mut failed_count = 0usize;

        for chunk in records.chunks(self.chunk_size) {
            let futures: Vec<_> = chunk.iter().map(|record| self.dispatch_one(record)).collect();
            let results = futures::future::join_all(futures).await;

            for ok in results {
                if ok {
                    sent_count += 1;
                } else {
                    failed_count += 1;
                }
            }
        }

        (sent_count, failed_count)
    }

    /// 分发单条记录，返回是否发送成功
    ///
    /// 发送失败不向调用方抛出：失败原因写入记录，由重试任务按退避
    /// 排期接手，运营可通过投递历史和统计接口观察。
    pub async fn dispatch_one(&self, record: &DeliveryRecord) -> bool {
        let result = match self.senders.get(&record.channel) {
            Some(sender) => sender.send(record).await,
            // 未注册的渠道值按失败处理
            None => Err(NotifyError::SendFailed {
                channel: record.channel.to_string(),
                reason: "该渠道未注册发送器".to_string(),
            }),
        };

        match result {
            Ok(outcome) => {
                // 推送渠道必须拿到网关消息 ID 才能做回执关联，没有即视为失败
                if record.channel == NotificationChannel::Push && outcome.external_id.is_none() {
                    self.mark_failed(record, "推送网关未返回消息 ID").await;
                    return false;
                }
                self.mark_sent(record, outcome.external_id.as_deref()).await
            }
            Err(e) => {
                self.mark_failed(record, &e.to_string()).await;
                false
            }
        }
    }

    /// 发送成功：processing -> sent
    async fn mark_sent(&self, record: &DeliveryRecord, external_id: Option<&str>) -> bool {
        let result = sqlx::query(
            r#"
            UPDATE delivery_records
            SET status = 'sent', external_id = COALESCE($2, external_id)
            WHERE id = $1 AND status = 'processing'
            "#,
        )
        .bind(record.id)
        .bind(external_id)
        .execute(&self.pool)
        .await;

        match result {
            Ok(r) if r.rows_affected() > 0 => {
                metrics::record_dispatched(record.channel.as_str(), "sent");
                info!(
                    delivery_id = %record.id,
                    channel = %record.channel,
                    external_id = ?external_id,
                    "投递已发出"
                );
                true
            }
            Ok(_) => {
                // 发送期间状态被其他任务改动，放弃本次更新
                warn!(
                    delivery_id = %record.id,
                    "发送完成但记录已不在 processing 状态，跳过状态更新"
                );
                false
            }
            Err(e) => {
                warn!(delivery_id = %record.id, error = %e, "更新发送状态失败");
                false
            }
        }
    }

    /// 发送失败：processing -> failed，按退避排期下次重试
    ///
    /// 第 k 次失败后 next_retry_at = now + base * 2^k；
    /// 重试余量耗尽时不再排期，记录成为永久失败，仅运营可见。
    async fn mark_failed(&self, record: &DeliveryRecord, reason: &str) {
        let now = Utc::now();
        let next_retry_at = if record.retry_count < record.max_retries {
            let delay = self.retry_policy.delay_for_attempt(record.retry_count as u32);
            Some(now + chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::zero()))
        } else {
            None
        };

        let result = sqlx::query(
            r#"
            UPDATE delivery_records
            SET status = 'failed', failed_at = $2, last_failure_reason = $3, next_retry_at = $4
            WHERE id = $1 AND status = 'processing'
            "#,
        )
        .bind(record.id)
        .bind(now)
        .bind(reason)
        .bind(next_retry_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(r) if r.rows_affected() > 0 => {
                metrics::record_dispatched(record.channel.as_str(), "failed");
                warn!(
                    delivery_id = %record.id,
                    channel = %record.channel,
                    retry_count = record.retry_count,
                    max_retries = record.max_retries,
                    next_retry_at = ?next_retry_at,
                    reason = %reason,
                    "投递失败"
                );
            }
            Ok(_) => {
                warn!(
                    delivery_id = %record.id,
                    "发送失败但记录已不在 processing 状态，跳过状态更新"
                );
            }
            Err(e) => {
                warn!(delivery_id = %record.id, error = %e, "更新失败状态时出错");
            }
        }
    }
}
