//! 领域模型错误定义
//!
//! 定义了领域层可能出现的错误类型，提供清晰的错误上下文。

use thiserror::Error;

/// 领域模型错误类型
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DomainError {
    /// 消息内容为空
    #[error("消息内容不能为空")]
    EmptyContent,

    /// 消息内容超过长度限制
    #[error("消息内容过长: {length} 字节 (上限 {max})")]
    ContentTooLong { length: usize, max: usize },

    /// 入站事件无法归类为消息、已读回执或在线通知
    #[error("无法识别的入站事件: {reason}")]
    MalformedEvent { reason: String },
}

impl DomainError {
    /// 创建入站事件格式错误
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedEvent {
            reason: reason.into(),
        }
    }
}

/// 领域模型结果类型
pub type DomainResult<T> = Result<T, DomainError>;
