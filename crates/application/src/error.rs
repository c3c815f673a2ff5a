use domain::{DomainError, PeerId};
use thiserror::Error;

/// 传输通道错误
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// 无法建立或维持连接；由通道的重连循环自动恢复
    #[error("connection error: {0}")]
    Connection(String),
    /// 通道当前未连接，发送不会被缓冲
    #[error("transport not connected")]
    NotConnected,
    /// 通道已关闭（会话结束）
    #[error("transport closed")]
    Closed,
    #[error("encode error: {0}")]
    Encode(String),
}

impl TransportError {
    pub fn connection(message: impl Into<String>) -> Self {
        TransportError::Connection(message.into())
    }
}

/// 外部服务（目录、历史、已读回执、附件）调用错误
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ServiceError {
    /// 网络故障或服务端 5xx，可以重试
    #[error("service unavailable: {0}")]
    Unavailable(String),
    /// 服务端明确拒绝
    #[error("service rejected request ({code}): {message}")]
    Rejected { code: i32, message: String },
    #[error("unexpected response: {0}")]
    Decode(String),
}

impl ServiceError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        ServiceError::Unavailable(message.into())
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, ServiceError::Unavailable(_))
    }
}

#[derive(Debug, Error)]
pub enum ApplicationError {
    #[error("domain error: {0}")]
    Domain(#[from] DomainError),
    /// 未连接时尝试发送；不会在内部重试，由调用方决定是否重新发送
    #[error("not connected: message was not sent")]
    NotConnected,
    #[error("transport error: {0}")]
    Transport(TransportError),
    /// 历史回填失败；会话仍然打开，历史为空或旧数据
    #[error("history fetch for peer {peer} failed: {source}")]
    HistoryFetch { peer: PeerId, source: ServiceError },
    #[error("directory error: {0}")]
    Directory(ServiceError),
    #[error("attachment upload failed: {0}")]
    Upload(ServiceError),
    #[error("session closed")]
    SessionClosed,
}

impl From<TransportError> for ApplicationError {
    fn from(value: TransportError) -> Self {
        match value {
            TransportError::NotConnected => ApplicationError::NotConnected,
            other => ApplicationError::Transport(other),
        }
    }
}
