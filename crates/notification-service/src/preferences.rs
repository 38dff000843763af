//! 用户通知偏好门禁
//!
//! 偏好存储由独立的用户服务维护，核心引擎只依赖其布尔判定：
//! 某用户是否接收该类型通知、当前是否处于其偏好的接收时段。
//! 任一判定为否时，入队被跳过——这是正常业务结果而非错误。

use async_trait::async_trait;

use crate::models::NotificationType;

/// 偏好门禁
///
/// 生产环境由用户偏好服务的客户端实现；测试中使用 mockall 模拟。
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PreferenceGate: Send + Sync {
    /// 用户是否启用了该类型通知
    async fn is_enabled(&self, user_id: &str, notification_type: NotificationType) -> bool;

    /// 当前时刻是否在用户偏好的接收时段内
    async fn is_within_preferred_window(
        &self,
        user_id: &str,
        notification_type: NotificationType,
    ) -> bool;
}

/// 全量放行的默认门禁
///
/// 用于偏好服务尚未接入的部署形态，以及本地开发环境。
pub struct AllowAllGate;

#[async_trait]
impl PreferenceGate for AllowAllGate {
    async fn is_enabled(&self, _user_id: &str, _notification_type: NotificationType) -> bool {
        true
    }

    async fn is_within_preferred_window(
        &self,
        _user_id: &str,
        _notification_type: NotificationType,
    ) -> bool {
        true
    }
}
