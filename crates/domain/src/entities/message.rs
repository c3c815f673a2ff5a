//! 私聊消息实体

use serde::{Deserialize, Serialize};

use crate::errors::{DomainError, DomainResult};
use crate::value_objects::{LocalRef, PeerId, ServerMessageId, Timestamp};

/// 消息类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    #[default]
    Text,
    /// 内容为附件（图片）URI
    Image,
}

impl MessageKind {
    /// 线路格式中的数字标签
    pub fn wire_tag(self) -> i32 {
        match self {
            MessageKind::Text => 0,
            MessageKind::Image => 1,
        }
    }

    pub fn from_wire_tag(tag: i32) -> Option<Self> {
        match tag {
            0 => Some(MessageKind::Text),
            1 => Some(MessageKind::Image),
            _ => None,
        }
    }
}

/// 已读标记。一旦变为 `Read` 就不会再回到 `Unread`。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ReadFlag {
    #[default]
    Unread,
    Read,
}

impl ReadFlag {
    pub fn wire_value(self) -> i32 {
        match self {
            ReadFlag::Unread => 0,
            ReadFlag::Read => 1,
        }
    }

    /// 非零即视为已读
    pub fn from_wire_value(value: i32) -> Self {
        if value == 0 {
            ReadFlag::Unread
        } else {
            ReadFlag::Read
        }
    }
}

/// 经过校验的外发消息内容
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageContent(String);

impl MessageContent {
    /// 单条消息内容上限（10KB）
    pub const MAX_LENGTH: usize = 10 * 1024;

    pub fn parse(value: impl Into<String>) -> DomainResult<Self> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(DomainError::EmptyContent);
        }
        if value.len() > Self::MAX_LENGTH {
            return Err(DomainError::ContentTooLong {
                length: value.len(),
                max: Self::MAX_LENGTH,
            });
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// 服务端ID；本地乐观发送且尚未确认的消息为 `None`
    pub id: Option<ServerMessageId>,
    /// 本地发送时生成的引用
    pub local_ref: Option<LocalRef>,
    pub sender_id: PeerId,
    pub receiver_id: PeerId,
    /// 文本内容或附件URI
    pub content: String,
    pub kind: MessageKind,
    pub created_at: Timestamp,
    pub read: ReadFlag,
}

impl Message {
    /// 构造本地乐观发送的消息：无服务端ID、未读
    pub fn outgoing(
        sender_id: PeerId,
        receiver_id: PeerId,
        content: MessageContent,
        kind: MessageKind,
        created_at: Timestamp,
    ) -> Self {
        Self {
            id: None,
            local_ref: Some(LocalRef::generate()),
            sender_id,
            receiver_id,
            content: content.into_inner(),
            kind,
            created_at,
            read: ReadFlag::Unread,
        }
    }

    pub fn is_read(&self) -> bool {
        self.read == ReadFlag::Read
    }

    /// 标记为已读，返回是否发生了 0→1 的翻转
    pub fn mark_read(&mut self) -> bool {
        if self.read == ReadFlag::Read {
            return false;
        }
        self.read = ReadFlag::Read;
        true
    }

    pub fn is_from(&self, peer: PeerId) -> bool {
        self.sender_id == peer
    }

    /// 会话另一方的ID
    pub fn counterpart(&self, me: PeerId) -> PeerId {
        if self.sender_id == me {
            self.receiver_id
        } else {
            self.sender_id
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn mark_read_is_monotonic() {
        let mut msg = Message::outgoing(
            PeerId(1),
            PeerId(2),
            MessageContent::parse("hi").unwrap(),
            MessageKind::Text,
            Utc::now(),
        );
        assert!(!msg.is_read());
        assert!(msg.mark_read());
        assert!(!msg.mark_read());
        assert!(msg.is_read());
    }

    #[test]
    fn outgoing_message_has_no_server_id() {
        let msg = Message::outgoing(
            PeerId(1),
            PeerId(2),
            MessageContent::parse("hi").unwrap(),
            MessageKind::Text,
            Utc::now(),
        );
        assert!(msg.id.is_none());
        assert!(msg.local_ref.is_some());
        assert_eq!(msg.read, ReadFlag::Unread);
        assert_eq!(msg.counterpart(PeerId(1)), PeerId(2));
        assert_eq!(msg.counterpart(PeerId(2)), PeerId(1));
    }

    #[test]
    fn blank_content_is_rejected() {
        assert_eq!(MessageContent::parse("   "), Err(DomainError::EmptyContent));
        let long = "x".repeat(MessageContent::MAX_LENGTH + 1);
        assert!(matches!(
            MessageContent::parse(long),
            Err(DomainError::ContentTooLong { .. })
        ));
    }

    #[test]
    fn wire_tags() {
        assert_eq!(MessageKind::from_wire_tag(1), Some(MessageKind::Image));
        assert_eq!(MessageKind::from_wire_tag(99), None);
        assert_eq!(ReadFlag::from_wire_value(1), ReadFlag::Read);
        assert_eq!(ReadFlag::from_wire_value(0), ReadFlag::Unread);
    }
}
