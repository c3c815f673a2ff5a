//! 领域实体定义
//!
//! 包含私聊客户端的核心实体：好友、消息、会话。

pub mod conversation;
pub mod message;
pub mod peer;

// 重新导出核心实体
pub use conversation::{AppendOutcome, Conversation, ConversationStore};
pub use message::{Message, MessageContent, MessageKind, ReadFlag};
pub use peer::{Peer, Presence};
