//! 投递记录模型
//!
//! delivery_records 表的行映射与入队输入结构。
//! 记录只由队列管理器创建、由调度任务和渠道分发器变更，
//! 单条记录从不删除——仅由清理任务按保留期批量清除。

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::{DeliveryStatus, NotificationChannel, NotificationType};

/// 投递记录
///
/// 每行对应 (接收者, 渠道, 逻辑通知) 的一次受追踪投递。
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryRecord {
    pub id: Uuid,
    /// 外部渠道返回的消息标识（如推送网关的 message id），用于回执关联
    pub external_id: Option<String>,
    pub recipient_id: String,
    /// 已解析的目标地址：邮箱地址或设备 token 引用，站内信为空
    pub recipient_address: Option<String>,
    pub notification_type: NotificationType,
    pub channel: NotificationChannel,
    /// 已渲染的最终文本，记录不保存模板引用
    pub subject: String,
    pub body: String,
    pub status: DeliveryStatus,
    pub retry_count: i32,
    pub max_retries: i32,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub last_failure_reason: Option<String>,
    /// 不透明元数据（locale、推送负载、调度所用时区等）
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub sent_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
}

impl DeliveryRecord {
    /// 是否已进入终态（调度器不再自动变更）
    ///
    /// failed 仅在重试余量耗尽后才是终态。
    pub fn is_terminal(&self) -> bool {
        match self.status {
            DeliveryStatus::Failed => self.retry_count >= self.max_retries,
            other => other.is_settled(),
        }
    }

    /// 失败后是否还会被重试任务重新入队
    pub fn is_retryable(&self) -> bool {
        self.status == DeliveryStatus::Failed
            && self.retry_count < self.max_retries
            && self.next_retry_at.is_some()
    }

    /// 剩余可重试次数
    pub fn remaining_retries(&self) -> i32 {
        (self.max_retries - self.retry_count).max(0)
    }
}

/// 入队输入
///
/// 队列管理器接收的已完全解析的通知：接收者 + 渲染后的内容 + 渠道。
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewDelivery {
    pub recipient_id: String,
    pub recipient_address: Option<String>,
    pub notification_type: NotificationType,
    pub channel: NotificationChannel,
    pub subject: String,
    pub body: String,
    /// 期望发送的墙钟时间；为空表示立即发送
    pub scheduled_at: Option<NaiveDateTime>,
    /// scheduled_at 的 IANA 时区名；无效时区回退为按 UTC 解释
    pub timezone: Option<String>,
    /// 覆盖默认最大重试次数
    pub max_retries: Option<i32>,
    #[serde(default = "default_metadata")]
    pub metadata: serde_json::Value,
}

fn default_metadata() -> serde_json::Value {
    serde_json::json!({})
}

/// 单条入队结果
///
/// 偏好门禁拦截不算错误：调用方需要区分「已入队」和「被用户偏好跳过」。
#[derive(Debug)]
pub enum EnqueueOutcome {
    Queued(Box<DeliveryRecord>),
    Skipped { reason: String },
}

impl EnqueueOutcome {
    pub fn record(&self) -> Option<&DeliveryRecord> {
        match self {
            Self::Queued(record) => Some(record),
            Self::Skipped { .. } => None,
        }
    }
}

/// 批量入队结果
///
/// 单个接收者失败不影响其余接收者，部分成功以计数形式上报。
#[derive(Debug, Default)]
pub struct BulkEnqueueOutcome {
    pub created: Vec<DeliveryRecord>,
    pub skipped: usize,
    pub failed: usize,
}

impl BulkEnqueueOutcome {
    pub fn total(&self) -> usize {
        self.created.len() + self.skipped + self.failed
    }
}
