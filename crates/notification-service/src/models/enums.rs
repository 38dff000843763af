//! 通知投递枚举类型定义
//!
//! 所有枚举都支持数据库（sqlx）和 JSON（serde）序列化

use serde::{Deserialize, Serialize};

/// 投递渠道
///
/// 同一条逻辑通知可经由多个渠道各自独立投递
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
pub enum NotificationChannel {
    /// 邮件 - 经 SMTP 适配器发送
    Email,
    /// 推送 - 经推送网关发送，网关返回外部消息 ID 供回执追踪
    Push,
    /// 站内信 - 同步写入用户收件箱
    InApp,
}

impl NotificationChannel {
    /// 渠道标签，用于日志和指标
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::Push => "push",
            Self::InApp => "in_app",
        }
    }
}

impl std::fmt::Display for NotificationChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// 通知类型
///
/// 按平台业务事件划分，决定内容模板和用户偏好的查询维度
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
pub enum NotificationType {
    /// 日程提醒 - 直播课/线下课开始前提醒
    ScheduleReminder,
    /// 测验提醒 - 测验开放或临近截止提醒
    QuizReminder,
    /// 内容更新 - 已报名课程发布新课时
    ContentUpdate,
    /// 课程公告 - 讲师向学员发布的公告
    CourseAnnouncement,
    /// 系统通知 - 平台级消息
    System,
}

impl NotificationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ScheduleReminder => "schedule_reminder",
            Self::QuizReminder => "quiz_reminder",
            Self::ContentUpdate => "content_update",
            Self::CourseAnnouncement => "course_announcement",
            Self::System => "system",
        }
    }
}

impl std::fmt::Display for NotificationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// 投递状态
///
/// 记录在投递管道中的生命周期：
///
/// ```text
/// scheduled --promote--> pending --claim--> processing --+--> sent --> delivered
///                           ^                            |
///                           +------retry due-------- failed (retryable)
/// pending --24h 未处理--> expired
/// scheduled/pending --cancel--> cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
pub enum DeliveryStatus {
    /// 定时等待 - scheduled_at 到期后由提升任务转为 pending
    Scheduled,
    /// 待发送 - 等待调度任务领取
    Pending,
    /// 发送中 - 已被调度任务领取，正在调用渠道
    Processing,
    /// 已发出 - 渠道接受，等待（可选的）投递回执
    Sent,
    /// 已送达 - 渠道回执确认到达用户
    Delivered,
    /// 发送失败 - 还有重试余量时由重试任务重新入队，否则为终态
    Failed,
    /// 已过期 - pending 超时未被处理，与发送失败区分
    Expired,
    /// 已取消 - 发送前被调用方取消
    Cancelled,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Sent => "sent",
            Self::Delivered => "delivered",
            Self::Failed => "failed",
            Self::Expired => "expired",
            Self::Cancelled => "cancelled",
        }
    }

    /// 是否为调度器不再自动触碰的状态
    ///
    /// failed 的终态性取决于重试余量，需结合记录判断，
    /// 见 [`crate::models::DeliveryRecord::is_terminal`]。
    pub fn is_settled(&self) -> bool {
        matches!(self, Self::Delivered | Self::Expired | Self::Cancelled)
    }

    /// 是否允许调用方取消
    ///
    /// 已进入发送流程（processing 及之后）的记录不可取消。
    pub fn is_cancellable(&self) -> bool {
        matches!(self, Self::Scheduled | Self::Pending)
    }
}

impl std::fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_serde_roundtrip() {
        let json = serde_json::to_string(&NotificationChannel::InApp).unwrap();
        assert_eq!(json, "\"IN_APP\"");

        let parsed: NotificationChannel = serde_json::from_str("\"EMAIL\"").unwrap();
        assert_eq!(parsed, NotificationChannel::Email);
    }

    #[test]
    fn test_notification_type_serde() {
        let json = serde_json::to_string(&NotificationType::ScheduleReminder).unwrap();
        assert_eq!(json, "\"SCHEDULE_REMINDER\"");

        let parsed: NotificationType = serde_json::from_str("\"COURSE_ANNOUNCEMENT\"").unwrap();
        assert_eq!(parsed, NotificationType::CourseAnnouncement);
    }

    #[test]
    fn test_status_settled() {
        assert!(DeliveryStatus::Delivered.is_settled());
        assert!(DeliveryStatus::Expired.is_settled());
        assert!(DeliveryStatus::Cancelled.is_settled());

        assert!(!DeliveryStatus::Scheduled.is_settled());
        assert!(!DeliveryStatus::Pending.is_settled());
        assert!(!DeliveryStatus::Processing.is_settled());
        assert!(!DeliveryStatus::Sent.is_settled());
        // failed 是否终态取决于重试余量，枚举层面不做判定
        assert!(!DeliveryStatus::Failed.is_settled());
    }

    #[test]
    fn test_status_cancellable() {
        assert!(DeliveryStatus::Scheduled.is_cancellable());
        assert!(DeliveryStatus::Pending.is_cancellable());

        assert!(!DeliveryStatus::Processing.is_cancellable());
        assert!(!DeliveryStatus::Sent.is_cancellable());
        assert!(!DeliveryStatus::Delivered.is_cancellable());
        assert!(!DeliveryStatus::Failed.is_cancellable());
        assert!(!DeliveryStatus::Expired.is_cancellable());
        assert!(!DeliveryStatus::Cancelled.is_cancellable());
    }

    #[test]
    fn test_status_display_matches_storage_form() {
        // Display 输出与数据库存储值一致，便于在 SQL 日志中直接对照
        assert_eq!(DeliveryStatus::Pending.to_string(), "pending");
        assert_eq!(DeliveryStatus::Processing.to_string(), "processing");
        assert_eq!(NotificationChannel::InApp.to_string(), "in_app");
        assert_eq!(NotificationType::QuizReminder.to_string(), "quiz_reminder");
    }
}
