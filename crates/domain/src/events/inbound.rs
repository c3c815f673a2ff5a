//! 入站事件
//!
//! 线路上的负载是靠数字标签区分的松散 JSON；传输适配器把它们解码为
//! [`InboundEvent`]，下游不再做任何形状探测。

use serde::{Deserialize, Serialize};

use crate::classification::KindClassifier;
use crate::entities::message::{Message, MessageKind, ReadFlag};
use crate::errors::DomainError;
use crate::value_objects::{PeerId, ServerMessageId, Timestamp};

/// 好友发来的一条新消息（尚未入库）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncomingMessage {
    pub id: Option<ServerMessageId>,
    pub sender_id: PeerId,
    pub receiver_id: Option<PeerId>,
    pub content: String,
    pub kind: MessageKind,
    pub created_at: Option<Timestamp>,
}

impl IncomingMessage {
    /// 转换为会话消息：执行类型归类，缺省接收方为自己，缺省时间为本地时钟。
    /// 已读状态由已读状态追踪器在到达时决定，这里一律为未读。
    pub fn into_message(
        self,
        me: PeerId,
        received_at: Timestamp,
        classifier: &dyn KindClassifier,
    ) -> Message {
        let kind = classifier.classify(self.kind, &self.content);
        Message {
            id: self.id,
            local_ref: None,
            sender_id: self.sender_id,
            receiver_id: self.receiver_id.unwrap_or(me),
            content: self.content,
            kind,
            created_at: self.created_at.unwrap_or(received_at),
            read: ReadFlag::Unread,
        }
    }
}

/// 广播主题上的在线状态通知
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PresenceNotice {
    Online,
    Offline,
    /// 其他通知文本，同样触发好友列表刷新
    Other(String),
}

impl PresenceNotice {
    pub fn parse(body: &str) -> Self {
        match body.trim().trim_matches('"') {
            "online" => PresenceNotice::Online,
            "offline" => PresenceNotice::Offline,
            other => PresenceNotice::Other(other.to_string()),
        }
    }
}

/// 无法归类的入站事件，记录警告后丢弃
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MalformedEvent {
    pub topic: String,
    pub reason: String,
}

impl MalformedEvent {
    pub fn new(topic: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            reason: reason.into(),
        }
    }

    /// 转为领域错误，用于日志和统计
    pub fn into_error(self) -> DomainError {
        DomainError::malformed(format!("{}: {}", self.topic, self.reason))
    }
}

/// 入站事件
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InboundEvent {
    /// 新消息
    NewMessage(IncomingMessage),
    /// `reader` 已读了本端此前发给他的全部消息
    ReadReceipt { reader: PeerId },
    /// 在线状态变化
    Presence(PresenceNotice),
    /// 解码失败
    Malformed(MalformedEvent),
}
