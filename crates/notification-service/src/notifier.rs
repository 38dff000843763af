//! 通知入口门面
//!
//! 把"就事件 X 通知该用户"的请求翻译为各渠道的投递记录：按渠道
//! 渲染内容，逐渠道入队。各渠道独立投递，单个渠道入队失败不影响
//! 其他渠道。

use std::sync::Arc;

use chrono::NaiveDateTime;
use serde::Deserialize;
use tracing::{info, warn};

use crate::content::ContentResolver;
use crate::error::Result;
use crate::models::{BulkEnqueueOutcome, EnqueueOutcome, NewDelivery, NotificationChannel, NotificationType};
use crate::queue::DeliveryQueue;

/// 事件通知请求
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotifyRequest {
    pub recipient_id: String,
    /// 邮箱地址或设备 token 引用；仅 email / push 渠道需要
    pub recipient_address: Option<String>,
    pub notification_type: NotificationType,
    pub channels: Vec<NotificationChannel>,
    #[serde(default = "default_locale")]
    pub locale: String,
    /// 模板上下文，由内容解析器消费
    #[serde(default)]
    pub context: serde_json::Value,
    pub scheduled_at: Option<NaiveDateTime>,
    pub timezone: Option<String>,
}

fn default_locale() -> String {
    "zh-CN".to_string()
}

/// 通知门面
pub struct Notifier {
    queue: Arc<DeliveryQueue>,
    resolver: Arc<dyn ContentResolver>,
}

impl Notifier {
    pub fn new(queue: Arc<DeliveryQueue>, resolver: Arc<dyn ContentResolver>) -> Self {
        Self { queue, resolver }
    }

    /// 为请求的每个渠道渲染内容并入队
    ///
    /// 返回与批量入队一致的计数结果：created / skipped / failed。
    pub async fn notify(&self, request: NotifyRequest) -> Result<BulkEnqueueOutcome> {
        let mut outcome = BulkEnqueueOutcome::default();

        for channel in &request.channels {
            let content = match self.resolver.render(
                request.notification_type,
                *channel,
                &request.locale,
                &request.context,
            ) {
                Ok(content) => content,
                Err(e) => {
                    outcome.failed += 1;
                    warn!(
                        recipient_id = %request.recipient_id,
                        channel = %channel,
                        error = %e,
                        "内容渲染失败，跳过该渠道"
                    );
                    continue;
                }
            };

            let input = NewDelivery {
                recipient_id: request.recipient_id.clone(),
                recipient_address: request.recipient_address.clone(),
                notification_type: request.notification_type,
                channel: *channel,
                subject: content.subject,
                body: content.body,
                scheduled_at: request.scheduled_at,
                timezone: request.timezone.clone(),
                max_retries: None,
                metadata: serde_json::json!({ "locale": request.locale }),
            };

            match self.queue.enqueue(input).await {
                Ok(EnqueueOutcome::Queued(record)) => outcome.created.push(*record),
                Ok(EnqueueOutcome::Skipped { reason }) => {
                    outcome.skipped += 1;
                    info!(
                        recipient_id = %request.recipient_id,
                        channel = %channel,
                        reason = %reason,
                        "渠道入队被偏好门禁跳过"
                    );
                }
                Err(e) => {
                    outcome.failed += 1;
                    warn!(
                        recipient_id = %request.recipient_id,
                        channel = %channel,
                        error = %e,
                        "渠道入队失败，继续处理其余渠道"
                    );
                }
            }
        }

        Ok(outcome)
    }
}
