//! 私聊客户端核心领域模型
//!
//! 包含好友、消息、会话等核心实体，入站事件的标签化表示，以及消息类型归类规则。

pub mod classification;
pub mod entities;
pub mod errors;
pub mod events;
pub mod value_objects;

// 重新导出常用类型
pub use classification::{KindClassifier, LegacyAttachmentClassifier};
pub use entities::*;
pub use errors::*;
pub use events::*;
pub use value_objects::*;
