//! 通知服务错误类型定义
//!
//! 区分入队时同步暴露给调用方的校验错误、投递过程中内部消化的
//! 渠道错误，以及操作接口的状态冲突错误。

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use uuid::Uuid;

use crate::models::DeliveryStatus;

/// 通知服务错误类型
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    // 校验错误：入队时同步拒绝，不产生任何记录
    #[error("参数验证失败: {0}")]
    Validation(String),

    // 资源不存在
    #[error("投递记录不存在: {0}")]
    DeliveryNotFound(Uuid),

    // 状态冲突：对已进入发送流程或终态的记录执行非法操作
    #[error("当前状态不允许该操作: 状态={status}, 操作={action}")]
    InvalidTransition {
        status: DeliveryStatus,
        action: String,
    },

    // 渠道错误：由分发器捕获后写入失败原因，不向调用方抛出
    #[error("通知发送失败: 渠道={channel}, 原因={reason}")]
    SendFailed { channel: String, reason: String },

    #[error("内容渲染失败: {0}")]
    RenderFailed(String),

    // 系统错误
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Shared(#[from] edu_shared::EduError),

    #[error("内部错误: {0}")]
    Internal(String),
}

/// 服务层 Result 类型别名
pub type Result<T> = std::result::Result<T, NotifyError>;

impl NotifyError {
    /// 返回对应的 HTTP 状态码
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::DeliveryNotFound(_) => StatusCode::NOT_FOUND,
            Self::InvalidTransition { .. } => StatusCode::CONFLICT,
            Self::SendFailed { .. } | Self::RenderFailed(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Database(_) | Self::Shared(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// 返回错误码（用于 API 响应）
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::DeliveryNotFound(_) => "DELIVERY_NOT_FOUND",
            Self::InvalidTransition { .. } => "INVALID_TRANSITION",
            Self::SendFailed { .. } => "SEND_FAILED",
            Self::RenderFailed(_) => "RENDER_FAILED",
            Self::Database(_) => "DATABASE_ERROR",
            Self::Shared(_) => "SHARED_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl IntoResponse for NotifyError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // 系统级错误只返回通用提示，详细信息仅记录日志，防止信息泄露
        let message = match &self {
            Self::Database(e) => {
                tracing::error!(error = %e, "数据库操作失败");
                "服务内部错误，请稍后重试".to_string()
            }
            Self::Shared(e) => {
                tracing::error!(error = %e, "基础设施调用失败");
                "服务内部错误，请稍后重试".to_string()
            }
            Self::Internal(e) => {
                tracing::error!(error = %e, "内部错误");
                "服务内部错误，请稍后重试".to_string()
            }
            other => other.to_string(),
        };

        let body = json!({
            "success": false,
            "code": self.error_code(),
            "message": message,
            "data": serde_json::Value::Null
        });

        (status, axum::Json(body)).into_response()
    }
}

/// 从 validator 错误转换
impl From<validator::ValidationErrors> for NotifyError {
    fn from(errors: validator::ValidationErrors) -> Self {
        Self::Validation(errors.to_string())
    }
}

/// 从 JSON 序列化错误转换
impl From<serde_json::Error> for NotifyError {
    fn from(err: serde_json::Error) -> Self {
        Self::Internal(format!("JSON 处理错误: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::response::IntoResponse;

    #[test]
    fn test_error_status_codes() {
        assert_eq!(
            NotifyError::Validation("test".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            NotifyError::DeliveryNotFound(Uuid::nil()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            NotifyError::InvalidTransition {
                status: DeliveryStatus::Processing,
                action: "cancel".into(),
            }
            .status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            NotifyError::Internal("test".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(
            NotifyError::Validation("test".into()).error_code(),
            "VALIDATION_ERROR"
        );
        assert_eq!(
            NotifyError::SendFailed {
                channel: "email".into(),
                reason: "timeout".into(),
            }
            .error_code(),
            "SEND_FAILED"
        );
    }

    #[test]
    fn test_display_contains_context() {
        let err = NotifyError::SendFailed {
            channel: "push".to_string(),
            reason: "网关超时".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("push"));
        assert!(msg.contains("网关超时"));

        let err = NotifyError::InvalidTransition {
            status: DeliveryStatus::Delivered,
            action: "retry".to_string(),
        };
        assert!(err.to_string().contains("delivered"));
        assert!(err.to_string().contains("retry"));
    }

    #[tokio::test]
    async fn test_into_response_body_structure() {
        let response = NotifyError::Validation("recipient 不能为空".into()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body_bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("读取响应体失败");
        let body: serde_json::Value =
            serde_json::from_slice(&body_bytes).expect("响应体不是合法 JSON");

        assert_eq!(body["success"], json!(false));
        assert_eq!(body["code"], json!("VALIDATION_ERROR"));
        assert!(body["message"].as_str().unwrap().contains("recipient"));
        assert!(body["data"].is_null());
    }

    #[tokio::test]
    async fn test_system_errors_hide_internal_details() {
        let response =
            NotifyError::Internal("connection pool exhausted at shard 3".into()).into_response();
        let body_bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&body_bytes).unwrap();
        let message = body["message"].as_str().unwrap();

        assert!(!message.contains("connection pool"));
        assert!(message.contains("服务内部错误"));
    }

    #[test]
    fn test_from_validation_errors() {
        use validator::{ValidationError, ValidationErrors};

        let mut errors = ValidationErrors::new();
        let mut field_error = ValidationError::new("length");
        field_error.message = Some("接收者列表不能为空".into());
        errors.add("recipient_ids", field_error);

        let err: NotifyError = errors.into();
        match &err {
            NotifyError::Validation(msg) => assert!(msg.contains("recipient_ids")),
            other => panic!("期望 Validation 变体，实际: {:?}", other),
        }
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }
}
