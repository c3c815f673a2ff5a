//! 领域事件定义
//!
//! 入站事件在传输边界解码一次，之后的处理只面对带标签的变体。

pub mod inbound;

// 重新导出事件类型
pub use inbound::*;
