//! 数据模型定义

pub mod delivery;
pub mod enums;

pub use delivery::{BulkEnqueueOutcome, DeliveryRecord, EnqueueOutcome, NewDelivery};
pub use enums::{DeliveryStatus, NotificationChannel, NotificationType};
