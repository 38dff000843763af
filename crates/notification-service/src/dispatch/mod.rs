//! 渠道分发：发送器抽象与结果到状态迁移的映射

pub mod dispatcher;
pub mod sender;

pub use dispatcher::ChannelDispatcher;
pub use sender::{ChannelSender, EmailSender, InAppSender, PushSender, SendOutcome, default_senders};
