//! 传输通道抽象
//!
//! 每个客户端会话一条持久双向连接。通道的事件回调（入站事件、断开、重连）
//! 统一表示为一条有序的 [`TransportEvent`] 流，由唯一的会话任务消费。

use async_trait::async_trait;
use domain::{InboundEvent, MessageKind, PeerId};
use serde::{Deserialize, Serialize};

use crate::error::TransportError;

/// 连接状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl ConnectionState {
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
        }
    }
}

/// 通道向会话投递的事件，按到达顺序排列
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// 正在建立（或重新建立）连接
    Connecting,
    /// 连接已建立且订阅完成；`reconnect` 表示这是断线后的重连
    Connected { reconnect: bool },
    /// 连接断开，通道会在固定延迟后自动重连
    Disconnected { reason: String },
    /// 已在传输边界解码的入站事件
    Inbound(InboundEvent),
}

/// 发往服务端的私聊消息
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub receiver_id: PeerId,
    pub content: String,
    pub kind: MessageKind,
}

/// 持久双向通道
///
/// `send_message` 是即发即弃的：返回 `Ok` 只表示已交给通道，
/// 不保证调用返回前已经写到网络上，也没有传输层确认。
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait TransportChannel: Send + Sync {
    /// 当前连接状态
    fn state(&self) -> ConnectionState;

    /// 发送消息；未连接时返回 [`TransportError::NotConnected`]，不做缓冲
    async fn send_message(&self, message: &OutboundMessage) -> Result<(), TransportError>;

    /// 关闭通道：取消订阅、停止重连循环
    async fn close(&self);
}
