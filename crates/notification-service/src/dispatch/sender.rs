//! 多渠道发送器
//!
//! 通过 `ChannelSender` trait 抽象发送行为，各渠道（邮件、推送、站内信）
//! 提供独立实现。邮件与推送当前为模拟发送（仅记录日志），便于在无
//! 外部依赖的情况下验证投递管道的完整性；未来替换为真实 SMTP /
//! 推送网关调用时只需实现同一 trait。站内信为真实实现，同步写入
//! 用户收件箱表。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

use crate::error::NotifyError;
use crate::models::{DeliveryRecord, NotificationChannel};

/// 发送结果
///
/// 外部渠道返回的消息标识记入 external_id，用于异步回执关联。
#[derive(Debug, Clone)]
pub struct SendOutcome {
    pub external_id: Option<String>,
}

/// 渠道发送器 trait，各渠道实现具体的发送逻辑
#[async_trait]
pub trait ChannelSender: Send + Sync {
    /// 发送一条已领取（processing）的投递记录
    async fn send(&self, record: &DeliveryRecord) -> Result<SendOutcome, NotifyError>;

    /// 该发送器支持的渠道
    fn channel(&self) -> NotificationChannel;
}

// ---------------------------------------------------------------------------
// 邮件发送器
// ---------------------------------------------------------------------------

/// 模拟邮件发送器
///
/// 生产环境中替换为 SMTP 或邮件服务商（如 SendGrid）的 API 调用
pub struct EmailSender;

#[async_trait]
impl ChannelSender for EmailSender {
    async fn send(&self, record: &DeliveryRecord) -> Result<SendOutcome, NotifyError> {
        let address = record.recipient_address.as_deref().filter(|a| !a.is_empty());
        let Some(address) = address else {
            return Err(NotifyError::SendFailed {
                channel: "email".to_string(),
                reason: "缺少邮箱地址".to_string(),
            });
        };

        info!(
            channel = "EMAIL",
            delivery_id = %record.id,
            recipient_id = %record.recipient_id,
            address = %address,
            subject = %record.subject,
            "模拟发送邮件通知"
        );

        Ok(SendOutcome { external_id: None })
    }

    fn channel(&self) -> NotificationChannel {
        NotificationChannel::Email
    }
}

// ---------------------------------------------------------------------------
// 推送发送器
// ---------------------------------------------------------------------------

/// 模拟推送发送器
///
/// 生产环境中替换为 APNs / FCM 等推送服务的 SDK 调用。
/// 推送网关返回的消息 ID 记入 external_id，网关的投递回执
/// 经状态回调接口关联回本记录。
pub struct PushSender;

#[async_trait]
impl ChannelSender for PushSender {
    async fn send(&self, record: &DeliveryRecord) -> Result<SendOutcome, NotifyError> {
        let device = record.recipient_address.as_deref().filter(|a| !a.is_empty());
        let Some(device) = device else {
            return Err(NotifyError::SendFailed {
                channel: "push".to_string(),
                reason: "缺少设备 token 引用".to_string(),
            });
        };

        let message_id = Uuid::now_v7().to_string();

        info!(
            channel = "PUSH",
            delivery_id = %record.id,
            recipient_id = %record.recipient_id,
            device = %device,
            message_id = %message_id,
            title = %record.subject,
            "模拟发送推送通知"
        );

        Ok(SendOutcome {
            external_id: Some(message_id),
        })
    }

    fn channel(&self) -> NotificationChannel {
        NotificationChannel::Push
    }
}

// ---------------------------------------------------------------------------
// 站内信发送器
// ---------------------------------------------------------------------------

/// 站内信发送器
///
/// 同步写入用户收件箱表，仅在存储写入失败时才算发送失败。
/// 收件箱独立于投递记录存在，投递记录被保留期清理后收件箱消息仍可见。
pub struct InAppSender {
    pool: PgPool,
}

impl InAppSender {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ChannelSender for InAppSender {
    async fn send(&self, record: &DeliveryRecord) -> Result<SendOutcome, NotifyError> {
        sqlx::query(
            r#"
            INSERT INTO in_app_messages (id, user_id, delivery_id, notification_type, title, body, is_read, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, false, NOW())
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(&record.recipient_id)
        .bind(record.id)
        .bind(record.notification_type)
        .bind(&record.subject)
        .bind(&record.body)
        .execute(&self.pool)
        .await
        .map_err(|e| NotifyError::SendFailed {
            channel: "in_app".to_string(),
            reason: format!("收件箱写入失败: {e}"),
        })?;

        info!(
            channel = "IN_APP",
            delivery_id = %record.id,
            recipient_id = %record.recipient_id,
            "站内信已写入用户收件箱"
        );

        Ok(SendOutcome { external_id: None })
    }

    fn channel(&self) -> NotificationChannel {
        NotificationChannel::InApp
    }
}

/// 构建默认的渠道发送器注册表
pub fn default_senders(pool: PgPool) -> HashMap<NotificationChannel, Arc<dyn ChannelSender>> {
    let mut senders: HashMap<NotificationChannel, Arc<dyn ChannelSender>> = HashMap::new();
    senders.insert(NotificationChannel::Email, Arc::new(EmailSender));
    senders.insert(NotificationChannel::Push, Arc::new(PushSender));
    senders.insert(NotificationChannel::InApp, Arc::new(InAppSender::new(pool)));
    senders
}

// ---------------------------------------------------------------------------
// 测试
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DeliveryStatus, NotificationType};
    use chrono::Utc;

    /// 构造通用的测试投递记录
    fn make_test_record(channel: NotificationChannel) -> DeliveryRecord {
        DeliveryRecord {
            id: Uuid::now_v7(),
            external_id: None,
            recipient_id: "user-001".to_string(),
            recipient_address: Some("student@example.com".to_string()),
            notification_type: NotificationType::ContentUpdate,
            channel,
            subject: "课程内容更新".to_string(),
            body: "「Rust 系统编程」发布了新内容：第 4 章".to_string(),
            status: DeliveryStatus::Processing,
            retry_count: 0,
            max_retries: 3,
            next_retry_at: None,
            last_failure_reason: None,
            metadata: serde_json::json!({}),
            created_at: Utc::now(),
            scheduled_at: None,
            sent_at: Some(Utc::now()),
            delivered_at: None,
            failed_at: None,
        }
    }

    #[tokio::test]
    async fn test_email_send() {
        let sender = EmailSender;
        let record = make_test_record(NotificationChannel::Email);

        let outcome = sender.send(&record).await.unwrap();
        // 邮件渠道没有外部消息 ID
        assert!(outcome.external_id.is_none());
    }

    #[tokio::test]
    async fn test_email_send_without_address_fails() {
        let sender = EmailSender;
        let mut record = make_test_record(NotificationChannel::Email);
        record.recipient_address = None;

        let err = sender.send(&record).await.unwrap_err();
        match err {
            NotifyError::SendFailed { channel, reason } => {
                assert_eq!(channel, "email");
                assert!(reason.contains("邮箱"));
            }
            other => panic!("期望 SendFailed，实际: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_push_send_returns_external_id() {
        let sender = PushSender;
        let record = make_test_record(NotificationChannel::Push);

        let outcome = sender.send(&record).await.unwrap();
        assert!(outcome.external_id.is_some());
    }

    #[tokio::test]
    async fn test_push_send_without_device_fails() {
        let sender = PushSender;
        let mut record = make_test_record(NotificationChannel::Push);
        record.recipient_address = Some("".to_string());

        assert!(sender.send(&record).await.is_err());
    }

    #[tokio::test]
    async fn test_sender_channel_type() {
        let pool = PgPool::connect_lazy("postgres://localhost/test").unwrap();
        assert_eq!(EmailSender.channel(), NotificationChannel::Email);
        assert_eq!(PushSender.channel(), NotificationChannel::Push);
        assert_eq!(
            InAppSender::new(pool).channel(),
            NotificationChannel::InApp
        );
    }

    #[tokio::test]
    async fn test_default_senders_cover_all_channels() {
        let pool = PgPool::connect_lazy("postgres://localhost/test").unwrap();
        let senders = default_senders(pool);
        assert_eq!(senders.len(), 3);
        assert!(senders.contains_key(&NotificationChannel::Email));
        assert!(senders.contains_key(&NotificationChannel::Push));
        assert!(senders.contains_key(&NotificationChannel::InApp));
    }
}
