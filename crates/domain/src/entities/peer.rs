//! 好友（会话对端）实体

use serde::{Deserialize, Serialize};

use crate::value_objects::PeerId;

/// 在线状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Presence {
    Online,
    #[default]
    Offline,
}

impl Presence {
    pub fn from_online(online: bool) -> Self {
        if online {
            Presence::Online
        } else {
            Presence::Offline
        }
    }

    pub fn is_online(self) -> bool {
        matches!(self, Presence::Online)
    }
}

/// 可以与之私聊的好友。
///
/// 会话开始时和收到在线状态通知时由目录服务填充；
/// 除在线状态外，核心逻辑从不修改其他字段。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Peer {
    pub id: PeerId,
    pub display_name: String,
    pub avatar: Option<String>,
    pub presence: Presence,
}

impl Peer {
    pub fn new(
        id: PeerId,
        display_name: impl Into<String>,
        avatar: Option<String>,
        presence: Presence,
    ) -> Self {
        Self {
            id,
            display_name: display_name.into(),
            avatar,
            presence,
        }
    }

    /// 更新在线状态，返回状态是否发生变化
    pub fn set_presence(&mut self, presence: Presence) -> bool {
        let changed = self.presence != presence;
        self.presence = presence;
        changed
    }
}
