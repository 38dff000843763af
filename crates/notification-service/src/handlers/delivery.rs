//! 投递 API 处理器
//!
//! 生产方入队接口、运营查询/重试/取消接口与渠道状态回调。

use axum::{
    Json,
    extract::{Path, Query, State},
};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;
use validator::Validate;

use crate::{
    dto::{ApiResponse, PageResponse, PaginationParams},
    error::NotifyError,
    models::{
        BulkEnqueueOutcome, DeliveryRecord, DeliveryStatus, EnqueueOutcome, NewDelivery,
        NotificationChannel, NotificationType,
    },
    notifier::NotifyRequest,
    queue::{BulkDelivery, BulkRecipient},
    state::AppState,
};

// ═══════════════════════════════════════════════════════════════════════════
// DTO 定义
// ═══════════════════════════════════════════════════════════════════════════

/// 入队请求（内容已渲染）
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct EnqueueRequest {
    #[validate(length(min = 1, max = 64, message = "recipient_id 长度必须在1-64个字符之间"))]
    pub recipient_id: String,
    pub recipient_address: Option<String>,
    pub notification_type: NotificationType,
    pub channel: NotificationChannel,
    #[validate(length(max = 200, message = "标题不能超过200个字符"))]
    pub subject: String,
    #[validate(length(min = 1, message = "正文不能为空"))]
    pub body: String,
    pub scheduled_at: Option<NaiveDateTime>,
    pub timezone: Option<String>,
    #[validate(range(min = 0, max = 10, message = "重试次数必须在0-10之间"))]
    pub max_retries: Option<i32>,
    pub metadata: Option<serde_json::Value>,
}

/// 批量入队请求
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct BulkEnqueueRequest {
    #[validate(length(min = 1, max = 1000, message = "接收者数量必须在1-1000之间"))]
    pub recipients: Vec<BulkRecipient>,
    pub notification_type: NotificationType,
    pub channel: NotificationChannel,
    #[validate(length(max = 200, message = "标题不能超过200个字符"))]
    pub subject: String,
    #[validate(length(min = 1, message = "正文不能为空"))]
    pub body: String,
    pub scheduled_at: Option<NaiveDateTime>,
    pub timezone: Option<String>,
    #[validate(range(min = 0, max = 10, message = "重试次数必须在0-10之间"))]
    pub max_retries: Option<i32>,
    pub metadata: Option<serde_json::Value>,
}

/// 入队结果 DTO
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnqueueResultDto {
    pub queued: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skipped_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delivery: Option<DeliveryRecord>,
}

impl From<EnqueueOutcome> for EnqueueResultDto {
    fn from(outcome: EnqueueOutcome) -> Self {
        match outcome {
            EnqueueOutcome::Queued(record) => Self {
                queued: true,
                skipped_reason: None,
                delivery: Some(*record),
            },
            EnqueueOutcome::Skipped { reason } => Self {
                queued: false,
                skipped_reason: Some(reason),
                delivery: None,
            },
        }
    }
}

/// 批量入队结果 DTO
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkEnqueueResultDto {
    pub created_count: usize,
    pub skipped_count: usize,
    pub failed_count: usize,
    pub deliveries: Vec<DeliveryRecord>,
}

impl From<BulkEnqueueOutcome> for BulkEnqueueResultDto {
    fn from(outcome: BulkEnqueueOutcome) -> Self {
        Self {
            created_count: outcome.created.len(),
            skipped_count: outcome.skipped,
            failed_count: outcome.failed,
            deliveries: outcome.created,
        }
    }
}

/// 投递历史查询过滤
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryFilter {
    pub recipient_id: Option<String>,
    pub status: Option<DeliveryStatus>,
    pub channel: Option<NotificationChannel>,
    pub notification_type: Option<NotificationType>,
}

/// 渠道状态回调请求
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct StatusCallbackRequest {
    #[validate(length(min = 1, message = "external_id 不能为空"))]
    pub external_id: String,
    pub status: DeliveryStatus,
    pub reason: Option<String>,
}

// ═══════════════════════════════════════════════════════════════════════════
// API 处理器
// ═══════════════════════════════════════════════════════════════════════════

/// 入队单条通知（内容已渲染）
///
/// POST /api/notify/deliveries
pub async fn enqueue_delivery(
    State(state): State<AppState>,
    Json(req): Json<EnqueueRequest>,
) -> Result<Json<ApiResponse<EnqueueResultDto>>, NotifyError> {
    req.validate()?;

    let outcome = state
        .queue
        .enqueue(NewDelivery {
            recipient_id: req.recipient_id,
            recipient_address: req.recipient_address,
            notification_type: req.notification_type,
            channel: req.channel,
            subject: req.subject,
            body: req.body,
            scheduled_at: req.scheduled_at,
            timezone: req.timezone,
            max_retries: req.max_retries,
            metadata: req.metadata.unwrap_or_else(|| serde_json::json!({})),
        })
        .await?;

    Ok(Json(ApiResponse::success(outcome.into())))
}

/// 批量入队
///
/// POST /api/notify/deliveries/bulk
pub async fn enqueue_bulk(
    State(state): State<AppState>,
    Json(req): Json<BulkEnqueueRequest>,
) -> Result<Json<ApiResponse<BulkEnqueueResultDto>>, NotifyError> {
    req.validate()?;

    let outcome = state
        .queue
        .enqueue_bulk(BulkDelivery {
            recipients: req.recipients,
            notification_type: req.notification_type,
            channel: req.channel,
            subject: req.subject,
            body: req.body,
            scheduled_at: req.scheduled_at,
            timezone: req.timezone,
            max_retries: req.max_retries,
            metadata: req.metadata,
        })
        .await?;

    Ok(Json(ApiResponse::success(outcome.into())))
}

/// 按事件通知（由内容解析器渲染）
///
/// POST /api/notify/notify
pub async fn notify_event(
    State(state): State<AppState>,
    Json(req): Json<NotifyRequest>,
) -> Result<Json<ApiResponse<BulkEnqueueResultDto>>, NotifyError> {
    if req.channels.is_empty() {
        return Err(NotifyError::Validation("至少指定一个渠道".to_string()));
    }

    let outcome = state.notifier.notify(req).await?;
    Ok(Json(ApiResponse::success(outcome.into())))
}

/// 查询投递历史
///
/// GET /api/notify/deliveries
pub async fn list_deliveries(
    State(state): State<AppState>,
    Query(pagination): Query<PaginationParams>,
    Query(filter): Query<DeliveryFilter>,
) -> Result<Json<ApiResponse<PageResponse<DeliveryRecord>>>, NotifyError> {
    let offset = pagination.offset();
    let limit = pagination.limit();

    // 构建动态 WHERE 子句
    let mut conditions = Vec::new();
    let mut param_idx = 1;

    if filter.recipient_id.is_some() {
        conditions.push(format!("recipient_id = ${}", param_idx));
        param_idx += 1;
    }
    if filter.status.is_some() {
        conditions.push(format!("status = ${}", param_idx));
        param_idx += 1;
    }
    if filter.channel.is_some() {
        conditions.push(format!("channel = ${}", param_idx));
        param_idx += 1;
    }
    if filter.notification_type.is_some() {
        conditions.push(format!("notification_type = ${}", param_idx));
        param_idx += 1;
    }

    let where_clause = if conditions.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", conditions.join(" AND "))
    };

    // 统计总数
    let count_sql = format!("SELECT COUNT(*) FROM delivery_records {}", where_clause);
    let mut count_query = sqlx::query_as::<_, (i64,)>(&count_sql);

    if let Some(ref recipient_id) = filter.recipient_id {
        count_query = count_query.bind(recipient_id);
    }
    if let Some(status) = filter.status {
        count_query = count_query.bind(status);
    }
    if let Some(channel) = filter.channel {
        count_query = count_query.bind(channel);
    }
    if let Some(notification_type) = filter.notification_type {
        count_query = count_query.bind(notification_type);
    }

    let total = count_query.fetch_one(&state.pool).await?;

    if total.0 == 0 {
        return Ok(Json(ApiResponse::success(PageResponse::empty(
            pagination.page,
            pagination.page_size,
        ))));
    }

    // 查询数据
    let data_sql = format!(
        r#"
        SELECT *
        FROM delivery_records
        {}
        ORDER BY created_at DESC
        LIMIT ${} OFFSET ${}
        "#,
        where_clause,
        param_idx,
        param_idx + 1
    );

    let mut data_query = sqlx::query_as::<_, DeliveryRecord>(&data_sql);

    if let Some(ref recipient_id) = filter.recipient_id {
        data_query = data_query.bind(recipient_id);
    }
    if let Some(status) = filter.status {
        data_query = data_query.bind(status);
    }
    if let Some(channel) = filter.channel {
        data_query = data_query.bind(channel);
    }
    if let Some(notification_type) = filter.notification_type {
        data_query = data_query.bind(notification_type);
    }

    let rows = data_query
        .bind(limit)
        .bind(offset)
        .fetch_all(&state.pool)
        .await?;

    let response = PageResponse::new(rows, total.0, pagination.page, pagination.page_size);
    Ok(Json(ApiResponse::success(response)))
}

/// 查询投递详情
///
/// GET /api/notify/deliveries/:id
pub async fn get_delivery(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<DeliveryRecord>>, NotifyError> {
    let record = state.queue.get(id).await?;
    Ok(Json(ApiResponse::success(record)))
}

/// 运营手动重试失败记录
///
/// POST /api/notify/deliveries/:id/retry
pub async fn retry_delivery(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<DeliveryRecord>>, NotifyError> {
    let record = state.queue.retry(id).await?;
    info!(delivery_id = %id, "运营触发失败记录重试");
    Ok(Json(ApiResponse::success(record)))
}

/// 取消尚未发送的记录
///
/// POST /api/notify/deliveries/:id/cancel
pub async fn cancel_delivery(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<DeliveryRecord>>, NotifyError> {
    let record = state.queue.cancel(id).await?;
    Ok(Json(ApiResponse::success(record)))
}

/// 渠道投递状态回调
///
/// POST /api/notify/callbacks/status
pub async fn status_callback(
    State(state): State<AppState>,
    Json(req): Json<StatusCallbackRequest>,
) -> Result<Json<ApiResponse<()>>, NotifyError> {
    req.validate()?;

    state
        .callback
        .update_status(&req.external_id, req.status, req.reason.as_deref())
        .await?;

    Ok(Json(ApiResponse::<()>::success_empty()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_enqueue_request() -> EnqueueRequest {
        EnqueueRequest {
            recipient_id: "user-001".to_string(),
            recipient_address: Some("student@example.com".to_string()),
            notification_type: NotificationType::CourseAnnouncement,
            channel: NotificationChannel::Email,
            subject: "课程公告".to_string(),
            body: "「Rust 系统编程」有新公告".to_string(),
            scheduled_at: None,
            timezone: None,
            max_retries: Some(3),
            metadata: None,
        }
    }

    #[test]
    fn test_enqueue_request_validation() {
        assert!(make_enqueue_request().validate().is_ok());

        let mut invalid = make_enqueue_request();
        invalid.recipient_id = "".to_string();
        assert!(invalid.validate().is_err());

        let mut invalid = make_enqueue_request();
        invalid.body = "".to_string();
        assert!(invalid.validate().is_err());

        let mut invalid = make_enqueue_request();
        invalid.max_retries = Some(11);
        assert!(invalid.validate().is_err());
    }

    #[test]
    fn test_bulk_request_rejects_empty_recipients() {
        let req = BulkEnqueueRequest {
            recipients: vec![],
            notification_type: NotificationType::System,
            channel: NotificationChannel::InApp,
            subject: "s".to_string(),
            body: "b".to_string(),
            scheduled_at: None,
            timezone: None,
            max_retries: None,
            metadata: None,
        };
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_enqueue_result_dto_from_outcome() {
        let skipped = EnqueueOutcome::Skipped {
            reason: "用户已关闭该类型通知".to_string(),
        };
        let dto: EnqueueResultDto = skipped.into();
        assert!(!dto.queued);
        assert!(dto.delivery.is_none());
        assert!(dto.skipped_reason.unwrap().contains("关闭"));
    }

    #[test]
    fn test_delivery_filter_deserialize_from_query() {
        let filter: DeliveryFilter =
            serde_json::from_str(r#"{"status": "PENDING", "channel": "EMAIL"}"#).unwrap();
        assert_eq!(filter.status, Some(DeliveryStatus::Pending));
        assert_eq!(filter.channel, Some(NotificationChannel::Email));
        assert!(filter.recipient_id.is_none());
    }

    #[test]
    fn test_status_callback_request_validation() {
        let req = StatusCallbackRequest {
            external_id: "".to_string(),
            status: DeliveryStatus::Delivered,
            reason: None,
        };
        assert!(req.validate().is_err());
    }
}
