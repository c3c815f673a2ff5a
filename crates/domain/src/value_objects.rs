use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 统一的时间戳类型。
pub type Timestamp = DateTime<Utc>;

/// 会话对端（好友）的唯一标识，由目录服务分配。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(pub i64);

impl PeerId {
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    pub fn value(self) -> i64 {
        self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for PeerId {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl From<PeerId> for i64 {
    fn from(value: PeerId) -> Self {
        value.0
    }
}

/// 服务端分配的消息ID。本地乐观发送的消息在确认前没有该ID。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServerMessageId(pub i64);

impl ServerMessageId {
    pub fn new(id: i64) -> Self {
        Self(id)
    }
}

impl fmt::Display for ServerMessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for ServerMessageId {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

/// 客户端为乐观发送生成的本地引用，调用方据此识别发送失败的消息并重新发送。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocalRef(pub Uuid);

impl LocalRef {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for LocalRef {
    fn default() -> Self {
        Self::generate()
    }
}

impl fmt::Display for LocalRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for LocalRef {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}
