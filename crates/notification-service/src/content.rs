//! 通知内容解析
//!
//! 根据通知类型生成对应的标题和正文内容。核心引擎把渲染结果当作
//! 不透明文本持久化，不解释模板语法。当前使用硬编码模板以降低
//! 外部依赖，未来可扩展为从数据库或配置中心动态加载。

use crate::error::{NotifyError, Result};
use crate::models::{NotificationChannel, NotificationType};

/// 渲染结果：渠道可直接发送的标题与正文
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedContent {
    pub subject: String,
    pub body: String,
}

/// 内容解析器
///
/// 外部模板系统的接入点。实现方负责按通知类型、渠道和语言
/// 产出最终文本；引擎不回查模板，记录中保存的即为发送内容。
pub trait ContentResolver: Send + Sync {
    fn render(
        &self,
        notification_type: NotificationType,
        channel: NotificationChannel,
        locale: &str,
        context: &serde_json::Value,
    ) -> Result<RenderedContent>;
}

/// 硬编码模板解析器
///
/// 标题保持简洁固定，便于客户端聚合展示同类通知；
/// 正文从 context 中提取业务字段填充。locale 暂未参与渲染，
/// 随记录元数据保存，供模板系统接入后使用。
pub struct TemplateContentResolver;

impl ContentResolver for TemplateContentResolver {
    fn render(
        &self,
        notification_type: NotificationType,
        channel: NotificationChannel,
        _locale: &str,
        context: &serde_json::Value,
    ) -> Result<RenderedContent> {
        let subject = render_subject(notification_type);
        let body = render_body(notification_type, context);

        if body.is_empty() {
            return Err(NotifyError::RenderFailed(format!(
                "类型 {} 渲染出空正文",
                notification_type
            )));
        }

        // 推送渠道受展示长度限制，截断过长正文
        let body = match channel {
            NotificationChannel::Push => truncate_chars(&body, 120),
            _ => body,
        };

        Ok(RenderedContent { subject, body })
    }
}

/// 根据通知类型渲染标题
fn render_subject(notification_type: NotificationType) -> String {
    match notification_type {
        NotificationType::ScheduleReminder => "课程即将开始".to_string(),
        NotificationType::QuizReminder => "测验提醒".to_string(),
        NotificationType::ContentUpdate => "课程内容更新".to_string(),
        NotificationType::CourseAnnouncement => "课程公告".to_string(),
        NotificationType::System => "系统通知".to_string(),
    }
}

/// 根据通知类型和上下文数据渲染正文
///
/// 对于缺失字段使用默认占位符，避免因上游数据不完整导致通知发送失败。
fn render_body(notification_type: NotificationType, context: &serde_json::Value) -> String {
    match notification_type {
        NotificationType::ScheduleReminder => {
            let course = extract_str(context, "course_name", "您的课程");
            let starts = extract_str(context, "starts_at", "即将");
            format!("「{course}」将于 {starts} 开始，请准时参加")
        }
        NotificationType::QuizReminder => {
            let quiz = extract_str(context, "quiz_name", "测验");
            let deadline = extract_str(context, "deadline", "近期");
            format!("「{quiz}」将于 {deadline} 截止，尚未完成请尽快提交")
        }
        NotificationType::ContentUpdate => {
            let course = extract_str(context, "course_name", "您报名的课程");
            let lesson = extract_str(context, "lesson_name", "新课时");
            format!("「{course}」发布了新内容：{lesson}")
        }
        NotificationType::CourseAnnouncement => {
            let course = extract_str(context, "course_name", "课程");
            let announcement = extract_str(context, "announcement", "");
            if announcement.is_empty() {
                format!("「{course}」有新公告，请查看")
            } else {
                format!("「{course}」公告：{announcement}")
            }
        }
        NotificationType::System => extract_str(context, "message", "您有一条新的系统通知"),
    }
}

/// 从 JSON 对象中安全提取字符串值
///
/// 优先取字符串类型的值，对数值类型自动转换为字符串表示，
/// 确保模板渲染不会因类型不匹配而 panic。
fn extract_str(data: &serde_json::Value, key: &str, default: &str) -> String {
    data.get(key)
        .map(|v| match v {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .unwrap_or_else(|| default.to_string())
}

/// 按字符数截断，避免在 UTF-8 边界中间切断
fn truncate_chars(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    s.chars().take(max_chars).collect()
}
