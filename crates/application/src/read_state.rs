//! 已读状态追踪
//!
//! 规则：消息到达时，发送方正是当前聚焦的好友则直接记为已读；
//! 否则记为未读，并把该好友的待提醒计数加一。
//! 切换聚焦时乐观地把该好友的未读消息全部翻为已读，不做回滚：
//! 错误的“已读”只是显示问题，错误的“未读”不可接受。

use domain::{AppendOutcome, Message, PeerId};

use crate::session_state::SessionState;

/// 一条入站消息的处理结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arrival {
    /// 来自聚焦好友，到达即已读
    ReadOnArrival { peer: PeerId },
    /// 来自非聚焦好友，存为未读
    Unread { peer: PeerId, pending: u32 },
    /// 服务端ID重复，已丢弃
    Duplicate { peer: PeerId },
    /// 服务端回显的本端消息，原样存储
    Echo { peer: PeerId },
}

/// 聚焦切换结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FocusChange {
    pub previous: Option<PeerId>,
    pub cleared_pending: u32,
    pub optimistically_read: usize,
}

/// 历史回填结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryApplied {
    pub stored: usize,
    pub optimistically_read: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct ReadStateTracker {
    me: PeerId,
}

impl ReadStateTracker {
    pub fn new(me: PeerId) -> Self {
        Self { me }
    }

    pub fn me(&self) -> PeerId {
        self.me
    }

    pub fn on_arrival(&self, state: &mut SessionState, mut message: Message) -> Arrival {
        let peer = message.counterpart(self.me);

        if message.sender_id == self.me {
            return match state.conversations.append(peer, message) {
                AppendOutcome::Appended => Arrival::Echo { peer },
                AppendOutcome::Duplicate => Arrival::Duplicate { peer },
            };
        }

        let focused = state.is_focused(peer);
        if focused {
            message.mark_read();
        }

        match state.conversations.append(peer, message) {
            AppendOutcome::Duplicate => Arrival::Duplicate { peer },
            AppendOutcome::Appended if focused => Arrival::ReadOnArrival { peer },
            AppendOutcome::Appended => Arrival::Unread {
                peer,
                pending: state.increment_pending(peer),
            },
        }
    }

    /// 聚焦到 `peer`：待提醒计数立即清零，并乐观翻转其未读消息
    pub fn focus(&self, state: &mut SessionState, peer: PeerId) -> FocusChange {
        let previous = state.focused.replace(peer);
        let cleared_pending = state.clear_pending(peer);
        let optimistically_read = self.flip_incoming(state, peer);
        FocusChange {
            previous,
            cleared_pending,
            optimistically_read,
        }
    }

    pub fn blur(&self, state: &mut SessionState) -> Option<PeerId> {
        state.focused.take()
    }

    /// 用回填历史替换会话；本地已读状态不会被旧数据覆盖。
    /// 若该好友仍在聚焦中，回填的未读消息同样乐观翻转
    pub fn apply_history(
        &self,
        state: &mut SessionState,
        peer: PeerId,
        newest_first: Vec<Message>,
    ) -> HistoryApplied {
        let stored = state.conversations.replace_history(peer, newest_first);
        let optimistically_read = if state.is_focused(peer) {
            self.flip_incoming(state, peer)
        } else {
            0
        };
        HistoryApplied {
            stored,
            optimistically_read,
        }
    }

    /// `reader` 的已读回执：本端发给他的消息全部翻为已读，其他会话不受影响
    pub fn apply_receipt(&self, state: &mut SessionState, reader: PeerId) -> usize {
        let me = self.me;
        state
            .conversations
            .mark_read(reader, |m| m.sender_id == me && m.receiver_id == reader)
    }

    fn flip_incoming(&self, state: &mut SessionState, peer: PeerId) -> usize {
        state.conversations.mark_read(peer, |m| m.is_from(peer))
    }
}
