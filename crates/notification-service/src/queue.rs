//! 投递队列管理器
//!
//! 接收已完全解析的通知（接收者 + 渲染后内容 + 渠道），经校验和
//! 偏好门禁后持久化为投递记录。定时通知以 scheduled 状态落库，
//! 由提升任务到期后转为 pending；即时通知直接落 pending。
//!
//! 队列管理器不做去重：同一逻辑通知的重复提交由调用方负责避免，
//! 这是文档化的限制而非保证。

use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, LocalResult, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tracing::{info, warn};
use uuid::Uuid;

use edu_shared::observability::metrics;

use crate::error::{NotifyError, Result};
use crate::models::{
    BulkEnqueueOutcome, DeliveryRecord, DeliveryStatus, EnqueueOutcome, NewDelivery,
    NotificationChannel, NotificationType,
};
use crate::preferences::PreferenceGate;

/// 批量入队的单个接收者
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkRecipient {
    pub recipient_id: String,
    pub recipient_address: Option<String>,
}

/// 批量入队输入：同一份内容发往多个接收者
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkDelivery {
    pub recipients: Vec<BulkRecipient>,
    pub notification_type: NotificationType,
    pub channel: NotificationChannel,
    pub subject: String,
    pub body: String,
    pub scheduled_at: Option<NaiveDateTime>,
    pub timezone: Option<String>,
    pub max_retries: Option<i32>,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

/// 投递队列管理器
pub struct DeliveryQueue {
    pool: PgPool,
    gate: Arc<dyn PreferenceGate>,
    /// 未显式指定时的默认最大重试次数
    default_max_retries: i32,
}

impl DeliveryQueue {
    pub fn new(pool: PgPool, gate: Arc<dyn PreferenceGate>, default_max_retries: i32) -> Self {
        Self {
            pool,
            gate,
            default_max_retries,
        }
    }

    /// 入队单条通知
    ///
    /// 校验失败同步返回错误且不产生记录；偏好门禁拦截返回 Skipped；
    /// 其余情况构造记录落库并返回。
    pub async fn enqueue(&self, input: NewDelivery) -> Result<EnqueueOutcome> {
        validate_new_delivery(&input)?;

        // 偏好门禁：类型未启用或不在接收时段时跳过入队
        if !self
            .gate
            .is_enabled(&input.recipient_id, input.notification_type)
            .await
        {
            return Ok(EnqueueOutcome::Skipped {
                reason: format!("用户已关闭 {} 类型通知", input.notification_type),
            });
        }
        if !self
            .gate
            .is_within_preferred_window(&input.recipient_id, input.notification_type)
            .await
        {
            return Ok(EnqueueOutcome::Skipped {
                reason: "当前不在用户偏好的接收时段".to_string(),
            });
        }

        let now = Utc::now();
        let mut metadata = match input.metadata {
            serde_json::Value::Object(map) => serde_json::Value::Object(map),
            serde_json::Value::Null => serde_json::json!({}),
            other => serde_json::json!({ "context": other }),
        };

        // 定时时间解析：墙钟时间 + 可选时区 -> 绝对时间点
        let scheduled_at = match input.scheduled_at {
            Some(naive) => {
                let (instant, fell_back) =
                    resolve_wall_clock(naive, input.timezone.as_deref());
                if let Some(tz) = &input.timezone {
                    metadata["timezone"] = serde_json::Value::String(tz.clone());
                }
                if fell_back {
                    // 回退是调用方错误的防御性默认，记录在元数据中便于测试和排查
                    warn!(
                        recipient_id = %input.recipient_id,
                        timezone = ?input.timezone,
                        "时区解析失败，按 UTC 解释定时时间"
                    );
                    metadata["timezone_fallback"] = serde_json::Value::Bool(true);
                }
                Some(instant)
            }
            None => None,
        };

        // 只有定时时间在未来才进入 scheduled，已过期的定时视同立即发送
        let status = match scheduled_at {
            Some(at) if at > now => DeliveryStatus::Scheduled,
            _ => DeliveryStatus::Pending,
        };

        let record = DeliveryRecord {
            id: Uuid::now_v7(),
            external_id: None,
            recipient_id: input.recipient_id,
            recipient_address: input.recipient_address,
            notification_type: input.notification_type,
            channel: input.channel,
            subject: input.subject,
            body: input.body,
            status,
            retry_count: 0,
            max_retries: input.max_retries.unwrap_or(self.default_max_retries),
            next_retry_at: None,
            last_failure_reason: None,
            metadata,
            created_at: now,
            scheduled_at,
            sent_at: None,
            delivered_at: None,
            failed_at: None,
        };

        self.insert_record(&record).await?;

        metrics::record_enqueued(record.channel.as_str());
        info!(
            delivery_id = %record.id,
            recipient_id = %record.recipient_id,
            channel = %record.channel,
            status = %record.status,
            scheduled_at = ?record.scheduled_at,
            "投递记录已入队"
        );

        Ok(EnqueueOutcome::Queued(Box::new(record)))
    }

    /// 批量入队
    ///
    /// 逐个接收者应用 [`enqueue`](Self::enqueue)；单个接收者的失败
    /// 不阻塞其余接收者，部分成功以计数上报。
    pub async fn enqueue_bulk(&self, input: BulkDelivery) -> Result<BulkEnqueueOutcome> {
        if input.recipients.is_empty() {
            return Err(NotifyError::Validation("接收者列表不能为空".to_string()));
        }

        let mut outcome = BulkEnqueueOutcome::default();

        for recipient in input.recipients {
            let single = NewDelivery {
                recipient_id: recipient.recipient_id.clone(),
                recipient_address: recipient.recipient_address,
                notification_type: input.notification_type,
                channel: input.channel,
                subject: input.subject.clone(),
                body: input.body.clone(),
                scheduled_at: input.scheduled_at,
                timezone: input.timezone.clone(),
                max_retries: input.max_retries,
                metadata: input.metadata.clone().unwrap_or_else(|| serde_json::json!({})),
            };

            match self.enqueue(single).await {
                Ok(EnqueueOutcome::Queued(record)) => outcome.created.push(*record),
                Ok(EnqueueOutcome::Skipped { reason }) => {
                    outcome.skipped += 1;
                    info!(
                        recipient_id = %recipient.recipient_id,
                        reason = %reason,
                        "批量入队：接收者被偏好门禁跳过"
                    );
                }
                Err(e) => {
                    outcome.failed += 1;
                    warn!(
                        recipient_id = %recipient.recipient_id,
                        error = %e,
                        "批量入队：单个接收者入队失败，继续处理其余接收者"
                    );
                }
            }
        }

        info!(
            created = outcome.created.len(),
            skipped = outcome.skipped,
            failed = outcome.failed,
            "批量入队完成"
        );

        Ok(outcome)
    }

    /// 按 ID 查询记录
    pub async fn get(&self, id: Uuid) -> Result<DeliveryRecord> {
        sqlx::query_as::<_, DeliveryRecord>("SELECT * FROM delivery_records WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(NotifyError::DeliveryNotFound(id))
    }

    /// 取消一条尚未进入发送流程的记录
    ///
    /// 仅 scheduled / pending 可取消；processing 及之后（含终态）拒绝。
    pub async fn cancel(&self, id: Uuid) -> Result<DeliveryRecord> {
        let record = self.get(id).await?;

        if !record.status.is_cancellable() {
            return Err(NotifyError::InvalidTransition {
                status: record.status,
                action: "cancel".to_string(),
            });
        }

        // 状态守卫防止与调度任务竞争：领取发生在查询之后时放弃取消
        let result = sqlx::query(
            r#"
            UPDATE delivery_records
            SET status = 'cancelled'
            WHERE id = $1 AND status IN ('scheduled', 'pending')
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            let current = self.get(id).await?;
            return Err(NotifyError::InvalidTransition {
                status: current.status,
                action: "cancel".to_string(),
            });
        }

        info!(delivery_id = %id, "投递记录已取消");
        self.get(id).await
    }

    /// 运营人员手动重试一条失败记录
    ///
    /// 重置重试计数并重新入队，适用于重试余量已耗尽的永久失败记录。
    pub async fn retry(&self, id: Uuid) -> Result<DeliveryRecord> {
        let record = self.get(id).await?;

        if record.status != DeliveryStatus::Failed {
            return Err(NotifyError::InvalidTransition {
                status: record.status,
                action: "retry".to_string(),
            });
        }

        let result = sqlx::query(
            r#"
            UPDATE delivery_records
            SET status = 'pending', retry_count = 0, next_retry_at = NULL
            WHERE id = $1 AND status = 'failed'
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            let current = self.get(id).await?;
            return Err(NotifyError::InvalidTransition {
                status: current.status,
                action: "retry".to_string(),
            });
        }

        info!(delivery_id = %id, "失败记录已重置并重新入队");
        self.get(id).await
    }

    /// 落库
    async fn insert_record(&self, record: &DeliveryRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO delivery_records (
                id, external_id, recipient_id, recipient_address,
                notification_type, channel, subject, body, status,
                retry_count, max_retries, next_retry_at, last_failure_reason,
                metadata, created_at, scheduled_at, sent_at, delivered_at, failed_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19)
            "#,
        )
        .bind(record.id)
        .bind(&record.external_id)
        .bind(&record.recipient_id)
        .bind(&record.recipient_address)
        .bind(record.notification_type)
        .bind(record.channel)
        .bind(&record.subject)
        .bind(&record.body)
        .bind(record.status)
        .bind(record.retry_count)
        .bind(record.max_retries)
        .bind(record.next_retry_at)
        .bind(&record.last_failure_reason)
        .bind(&record.metadata)
        .bind(record.created_at)
        .bind(record.scheduled_at)
        .bind(record.sent_at)
        .bind(record.delivered_at)
        .bind(record.failed_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

/// 入队校验
///
/// 校验失败不产生任何记录，同步返回给调用方。
fn validate_new_delivery(input: &NewDelivery) -> Result<()> {
    if input.recipient_id.trim().is_empty() {
        return Err(NotifyError::Validation("recipient_id 不能为空".to_string()));
    }
    if input.body.trim().is_empty() {
        return Err(NotifyError::Validation("通知正文不能为空".to_string()));
    }
    match input.channel {
        NotificationChannel::Email | NotificationChannel::Push => {
            let missing = input
                .recipient_address
                .as_deref()
                .map(|a| a.trim().is_empty())
                .unwrap_or(true);
            if missing {
                return Err(NotifyError::Validation(format!(
                    "渠道 {} 需要提供接收地址",
                    input.channel
                )));
            }
        }
        // 站内信直接写入用户收件箱，无需地址
        NotificationChannel::InApp => {}
    }
    if let Some(max_retries) = input.max_retries {
        if max_retries < 0 {
            return Err(NotifyError::Validation(
                "max_retries 不能为负数".to_string(),
            ));
        }
    }
    Ok(())
}

/// 把墙钟时间解析为绝对时间点
///
/// 提供时区时按该时区解释墙钟时间；时区名无效、或该墙钟时间因
/// 夏令时跳变而不存在时，回退为按 UTC 解释并返回 fell_back = true。
/// 夏令时回拨造成的二义时间取较早的一个。
fn resolve_wall_clock(naive: NaiveDateTime, timezone: Option<&str>) -> (DateTime<Utc>, bool) {
    let Some(tz_name) = timezone else {
        return (Utc.from_utc_datetime(&naive), false);
    };

    let Ok(tz) = Tz::from_str(tz_name) else {
        return (Utc.from_utc_datetime(&naive), true);
    };

    match tz.from_local_datetime(&naive) {
        LocalResult::Single(dt) => (dt.with_timezone(&Utc), false),
        LocalResult::Ambiguous(earliest, _latest) => (earliest.with_timezone(&Utc), false),
        LocalResult::None => (Utc.from_utc_datetime(&naive), true),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn make_input(channel: NotificationChannel) -> NewDelivery {
        NewDelivery {
            recipient_id: "user-001".to_string(),
            recipient_address: Some("student@example.com".to_string()),
            notification_type: NotificationType::QuizReminder,
            channel,
            subject: "测验提醒".to_string(),
            body: "「第三章自测」即将截止".to_string(),
            scheduled_at: None,
            timezone: None,
            max_retries: None,
            metadata: serde_json::json!({}),
        }
    }

    // ---- 校验 ----

    #[test]
    fn test_validate_accepts_complete_input() {
        assert!(validate_new_delivery(&make_input(NotificationChannel::Email)).is_ok());
    }

    #[test]
    fn test_validate_rejects_empty_recipient() {
        let mut input = make_input(NotificationChannel::Email);
        input.recipient_id = "  ".to_string();
        let err = validate_new_delivery(&input).unwrap_err();
        assert!(matches!(err, NotifyError::Validation(_)));
    }

    #[test]
    fn test_validate_rejects_empty_body() {
        let mut input = make_input(NotificationChannel::InApp);
        input.body = "".to_string();
        assert!(validate_new_delivery(&input).is_err());
    }

    #[test]
    fn test_validate_email_requires_address() {
        let mut input = make_input(NotificationChannel::Email);
        input.recipient_address = None;
        assert!(validate_new_delivery(&input).is_err());

        let mut input = make_input(NotificationChannel::Push);
        input.recipient_address = Some("".to_string());
        assert!(validate_new_delivery(&input).is_err());
    }

    #[test]
    fn test_validate_in_app_needs_no_address() {
        let mut input = make_input(NotificationChannel::InApp);
        input.recipient_address = None;
        assert!(validate_new_delivery(&input).is_ok());
    }

    #[test]
    fn test_validate_rejects_negative_max_retries() {
        let mut input = make_input(NotificationChannel::Email);
        input.max_retries = Some(-1);
        assert!(validate_new_delivery(&input).is_err());
    }

    // ---- 墙钟时间解析 ----

    fn naive(y: i32, m: u32, d: u32, h: u32, min: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, min, 0)
            .unwrap()
    }

    #[test]
    fn test_resolve_without_timezone_is_utc() {
        let (instant, fell_back) = resolve_wall_clock(naive(2025, 6, 1, 9, 0), None);
        assert!(!fell_back);
        assert_eq!(instant, Utc.with_ymd_and_hms(2025, 6, 1, 9, 0, 0).unwrap());
    }

    #[test]
    fn test_resolve_with_valid_timezone() {
        // 上海为 UTC+8，无夏令时
        let (instant, fell_back) =
            resolve_wall_clock(naive(2025, 6, 1, 9, 0), Some("Asia/Shanghai"));
        assert!(!fell_back);
        assert_eq!(instant, Utc.with_ymd_and_hms(2025, 6, 1, 1, 0, 0).unwrap());
    }

    #[test]
    fn test_resolve_with_invalid_timezone_falls_back() {
        let (instant, fell_back) =
            resolve_wall_clock(naive(2025, 6, 1, 9, 0), Some("Mars/Olympus"));
        assert!(fell_back);
        // 回退为按 UTC 解释原始墙钟时间，而非拒绝入队
        assert_eq!(instant, Utc.with_ymd_and_hms(2025, 6, 1, 9, 0, 0).unwrap());
    }

    #[test]
    fn test_resolve_dst_gap_falls_back() {
        // 纽约 2025-03-09 02:30 因夏令时跳变不存在
        let (instant, fell_back) =
            resolve_wall_clock(naive(2025, 3, 9, 2, 30), Some("America/New_York"));
        assert!(fell_back);
        assert_eq!(instant, Utc.with_ymd_and_hms(2025, 3, 9, 2, 30, 0).unwrap());
    }

    #[test]
    fn test_resolve_dst_ambiguous_takes_earliest() {
        // 纽约 2025-11-02 01:30 在夏令时回拨时出现两次，取较早的 EDT (UTC-4)
        let (instant, fell_back) =
            resolve_wall_clock(naive(2025, 11, 2, 1, 30), Some("America/New_York"));
        assert!(!fell_back);
        assert_eq!(instant, Utc.with_ymd_and_hms(2025, 11, 2, 5, 30, 0).unwrap());
    }

    // ---- 偏好门禁（mock） ----

    #[tokio::test]
    async fn test_enqueue_skipped_when_type_disabled() {
        use crate::preferences::MockPreferenceGate;

        let mut gate = MockPreferenceGate::new();
        gate.expect_is_enabled().returning(|_, _| false);
        gate.expect_is_within_preferred_window().returning(|_, _| true);

        let pool = PgPool::connect_lazy("postgres://localhost/test").unwrap();
        let queue = DeliveryQueue::new(pool, Arc::new(gate), 3);

        // 门禁在任何数据库操作之前拦截，connect_lazy 的池不会被触达
        let outcome = queue.enqueue(make_input(NotificationChannel::Email)).await.unwrap();
        match outcome {
            EnqueueOutcome::Skipped { reason } => assert!(reason.contains("关闭")),
            other => panic!("期望 Skipped，实际: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_enqueue_skipped_outside_preferred_window() {
        use crate::preferences::MockPreferenceGate;

        let mut gate = MockPreferenceGate::new();
        gate.expect_is_enabled().returning(|_, _| true);
        gate.expect_is_within_preferred_window().returning(|_, _| false);

        let pool = PgPool::connect_lazy("postgres://localhost/test").unwrap();
        let queue = DeliveryQueue::new(pool, Arc::new(gate), 3);

        let outcome = queue.enqueue(make_input(NotificationChannel::Email)).await.unwrap();
        match outcome {
            EnqueueOutcome::Skipped { reason } => assert!(reason.contains("接收时段")),
            other => panic!("期望 Skipped，实际: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_enqueue_validation_rejected_before_gate() {
        use crate::preferences::MockPreferenceGate;

        // 门禁不设置期望：校验失败时不应触达门禁
        let gate = MockPreferenceGate::new();
        let pool = PgPool::connect_lazy("postgres://localhost/test").unwrap();
        let queue = DeliveryQueue::new(pool, Arc::new(gate), 3);

        let mut input = make_input(NotificationChannel::Email);
        input.recipient_id = "".to_string();

        let err = queue.enqueue(input).await.unwrap_err();
        assert!(matches!(err, NotifyError::Validation(_)));
    }
}
