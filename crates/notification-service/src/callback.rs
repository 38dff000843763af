//! 投递状态回调
//!
//! 异步投递的渠道（如推送网关的 webhook）以 (external_id, 新状态,
//! 原因) 回调本服务。按 external_id 找到记录后应用状态迁移：
//! delivered 盖送达时间戳，failed 盖失败时间戳和原因。
//!
//! 未知的 external_id 记日志后忽略——回调方无法对此做任何处理，
//! 不构成需要上抛的错误。

use chrono::Utc;
use sqlx::PgPool;
use tracing::{info, instrument, warn};

use edu_shared::observability::metrics;

use crate::error::{NotifyError, Result};
use crate::models::DeliveryStatus;

/// 状态回调处理器
pub struct StatusCallback {
    pool: PgPool,
}

impl StatusCallback {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 应用外部渠道上报的状态变更
    ///
    /// 仅接受 delivered / failed 两种目标状态；其余取值属于调用方
    /// 契约错误，同步拒绝。
    #[instrument(skip(self))]
    pub async fn update_status(
        &self,
        external_id: &str,
        status: DeliveryStatus,
        reason: Option<&str>,
    ) -> Result<()> {
        if external_id.trim().is_empty() {
            return Err(NotifyError::Validation("external_id 不能为空".to_string()));
        }
        if !matches!(status, DeliveryStatus::Delivered | DeliveryStatus::Failed) {
            return Err(NotifyError::Validation(format!(
                "回调不支持目标状态: {status}"
            )));
        }

        let row: Option<(uuid::Uuid, DeliveryStatus)> = sqlx::query_as(
            "SELECT id, status FROM delivery_records WHERE external_id = $1",
        )
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some((id, current)) = row else {
            // 网关可能回调早已清理或从未由本系统发出的消息
            warn!(external_id = %external_id, "收到未知 external_id 的状态回调，已忽略");
            metrics::record_status_callback("unknown");
            return Ok(());
        };

        let now = Utc::now();
        let result = match status {
            DeliveryStatus::Delivered => {
                sqlx::query(
                    r#"
                    UPDATE delivery_records
                    SET status = 'delivered', delivered_at = $2
                    WHERE id = $1 AND status IN ('sent', 'processing')
                    "#,
                )
                .bind(id)
                .bind(now)
                .execute(&self.pool)
                .await?
            }
            DeliveryStatus::Failed => {
                sqlx::query(
                    r#"
                    UPDATE delivery_records
                    SET status = 'failed', failed_at = $2, last_failure_reason = $3
                    WHERE id = $1 AND status IN ('sent', 'processing')
                    "#,
                )
                .bind(id)
                .bind(now)
                .bind(reason.unwrap_or("渠道回执上报失败"))
                .execute(&self.pool)
                .await?
            }
            _ => unreachable!("已在入口校验"),
        };

        if result.rows_affected() > 0 {
            metrics::record_status_callback(status.as_str());
            info!(
                delivery_id = %id,
                external_id = %external_id,
                status = %status,
                reason = ?reason,
                "状态回调已应用"
            );
        } else {
            // 记录已是终态（如重复回调），守卫使更新落空，保持幂等
            metrics::record_status_callback("noop");
            info!(
                delivery_id = %id,
                external_id = %external_id,
                current_status = %current,
                target_status = %status,
                "状态回调未产生变更（记录已处于终态或重复回调）"
            );
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_rejects_empty_external_id() {
        let pool = PgPool::connect_lazy("postgres://localhost/test").unwrap();
        let callback = StatusCallback::new(pool);

        let err = callback
            .update_status("  ", DeliveryStatus::Delivered, None)
            .await
            .unwrap_err();
        assert!(matches!(err, NotifyError::Validation(_)));
    }

    #[tokio::test]
    async fn test_rejects_unsupported_target_status() {
        let pool = PgPool::connect_lazy("postgres://localhost/test").unwrap();
        let callback = StatusCallback::new(pool);

        // 渠道回执只能上报 delivered / failed，不能把记录拉回 pending
        for status in [
            DeliveryStatus::Pending,
            DeliveryStatus::Scheduled,
            DeliveryStatus::Processing,
            DeliveryStatus::Sent,
            DeliveryStatus::Expired,
            DeliveryStatus::Cancelled,
        ] {
            let err = callback
                .update_status("ext-001", status, None)
                .await
                .unwrap_err();
            assert!(
                matches!(err, NotifyError::Validation(_)),
                "状态 {status} 应被拒绝"
            );
        }
    }
}
