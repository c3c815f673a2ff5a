//! 会话与会话存储
//!
//! 每个好友一条按时间顺序（最旧在前）排列的消息序列，
//! 未读数随追加、替换、标记已读增量维护，且必须始终等于重新计数的结果。

use std::collections::{HashMap, HashSet};

use crate::entities::message::Message;
use crate::value_objects::{PeerId, ServerMessageId};

/// 追加结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Appended,
    /// 已存在相同服务端ID的消息，被丢弃
    Duplicate,
}

/// 与单个好友的会话
#[derive(Debug, Clone)]
pub struct Conversation {
    peer: PeerId,
    messages: Vec<Message>,
    unread: usize,
    known_ids: HashSet<ServerMessageId>,
}

impl Conversation {
    pub fn new(peer: PeerId) -> Self {
        Self {
            peer,
            messages: Vec::new(),
            unread: 0,
            known_ids: HashSet::new(),
        }
    }

    pub fn peer(&self) -> PeerId {
        self.peer
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// 增量维护的未读数：发送方为该好友且未读的消息数
    pub fn unread_count(&self) -> usize {
        self.unread
    }

    /// 从消息序列重新计算未读数
    pub fn recount_unread(&self) -> usize {
        self.messages
            .iter()
            .filter(|m| self.counts_as_unread(m))
            .count()
    }

    fn counts_as_unread(&self, message: &Message) -> bool {
        message.is_from(self.peer) && !message.is_read()
    }

    /// 追加到末尾；携带已存在服务端ID的消息会被去重
    pub fn append(&mut self, message: Message) -> AppendOutcome {
        if let Some(id) = message.id {
            if !self.known_ids.insert(id) {
                return AppendOutcome::Duplicate;
            }
        }
        if self.counts_as_unread(&message) {
            self.unread += 1;
        }
        self.messages.push(message);
        AppendOutcome::Appended
    }

    /// 用回填历史替换整个序列。
    ///
    /// 历史接口按最新在前返回，这里反转后按最旧在前存储；
    /// 同一批次内重复的服务端ID只保留第一次出现。
    /// 本地已读的消息在新批次中保持已读（服务端可能还没处理回执）；
    /// 没有服务端ID的本地消息（乐观发送，包括发送失败待重发的）按时间插回序列。
    pub fn replace_history(&mut self, newest_first: Vec<Message>) -> usize {
        let read_ids: HashSet<ServerMessageId> = self
            .messages
            .iter()
            .filter(|m| m.is_read())
            .filter_map(|m| m.id)
            .collect();
        let local: Vec<Message> = self
            .messages
            .drain(..)
            .filter(|m| m.id.is_none())
            .collect();

        self.known_ids.clear();
        self.unread = 0;
        for mut message in newest_first.into_iter().rev() {
            if message.id.is_some_and(|id| read_ids.contains(&id)) {
                message.mark_read();
            }
            self.append(message);
        }

        for message in local {
            if self.counts_as_unread(&message) {
                self.unread += 1;
            }
            let at = self
                .messages
                .partition_point(|m| m.created_at <= message.created_at);
            self.messages.insert(at, message);
        }
        self.messages.len()
    }

    /// 将满足条件的消息标记为已读，返回翻转数量
    pub fn mark_read<F>(&mut self, predicate: F) -> usize
    where
        F: Fn(&Message) -> bool,
    {
        let peer = self.peer;
        let mut flipped = 0;
        let mut unread_cleared = 0;
        for message in self.messages.iter_mut().filter(|m| predicate(m)) {
            if message.mark_read() {
                flipped += 1;
                if message.sender_id == peer {
                    unread_cleared += 1;
                }
            }
        }
        self.unread -= unread_cleared;
        flipped
    }
}

/// 按好友ID索引的会话集合，由单个客户端会话独占，没有独立生命周期
#[derive(Debug, Clone, Default)]
pub struct ConversationStore {
    conversations: HashMap<PeerId, Conversation>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, peer: PeerId, message: Message) -> AppendOutcome {
        self.conversations
            .entry(peer)
            .or_insert_with(|| Conversation::new(peer))
            .append(message)
    }

    pub fn replace_history(&mut self, peer: PeerId, newest_first: Vec<Message>) -> usize {
        self.conversations
            .entry(peer)
            .or_insert_with(|| Conversation::new(peer))
            .replace_history(newest_first)
    }

    /// 对指定会话中满足条件的消息标记已读；会话不存在时返回 0
    pub fn mark_read<F>(&mut self, peer: PeerId, predicate: F) -> usize
    where
        F: Fn(&Message) -> bool,
    {
        self.conversations
            .get_mut(&peer)
            .map(|conversation| conversation.mark_read(predicate))
            .unwrap_or(0)
    }

    pub fn get(&self, peer: PeerId) -> Option<&Conversation> {
        self.conversations.get(&peer)
    }

    pub fn unread_count(&self, peer: PeerId) -> usize {
        self.get(peer).map(Conversation::unread_count).unwrap_or(0)
    }

    pub fn total_unread(&self) -> usize {
        self.conversations.values().map(Conversation::unread_count).sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Conversation> {
        self.conversations.values()
    }
}
