//! 会话状态
//!
//! 由投递会话独占：当前聚焦的好友、全部会话、每个好友的待提醒计数和好友目录。
//! 待提醒计数独立于未读数，打开会话的瞬间清零，不等待已读回执往返。

use std::collections::{BTreeMap, HashMap};

use domain::{Conversation, ConversationStore, Peer, PeerId};

#[derive(Debug, Default)]
pub struct SessionState {
    pub(crate) focused: Option<PeerId>,
    pub(crate) conversations: ConversationStore,
    pub(crate) pending: HashMap<PeerId, u32>,
    pub(crate) peers: BTreeMap<PeerId, Peer>,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn focused(&self) -> Option<PeerId> {
        self.focused
    }

    pub fn is_focused(&self, peer: PeerId) -> bool {
        self.focused == Some(peer)
    }

    pub fn conversations(&self) -> &ConversationStore {
        &self.conversations
    }

    pub fn conversation(&self, peer: PeerId) -> Option<&Conversation> {
        self.conversations.get(peer)
    }

    pub fn unread_count(&self, peer: PeerId) -> usize {
        self.conversations.unread_count(peer)
    }

    pub fn pending_count(&self, peer: PeerId) -> u32 {
        self.pending.get(&peer).copied().unwrap_or(0)
    }

    /// 全部好友待提醒数之和，标题提醒使用该值
    pub fn total_pending(&self) -> u32 {
        self.pending.values().sum()
    }

    pub fn peers(&self) -> impl Iterator<Item = &Peer> {
        self.peers.values()
    }

    pub fn peer(&self, peer: PeerId) -> Option<&Peer> {
        self.peers.get(&peer)
    }

    pub(crate) fn increment_pending(&mut self, peer: PeerId) -> u32 {
        let count = self.pending.entry(peer).or_insert(0);
        *count += 1;
        *count
    }

    pub(crate) fn clear_pending(&mut self, peer: PeerId) -> u32 {
        self.pending.remove(&peer).unwrap_or(0)
    }

    /// 合并目录服务返回的好友列表：已知好友只更新在线状态，新好友加入
    pub(crate) fn merge_peers(&mut self, peers: Vec<Peer>) -> usize {
        let mut presence_changes = 0;
        for peer in peers {
            match self.peers.get_mut(&peer.id) {
                Some(known) => {
                    if known.set_presence(peer.presence) {
                        presence_changes += 1;
                    }
                }
                None => {
                    self.peers.insert(peer.id, peer);
                }
            }
        }
        presence_changes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::Presence;

    #[test]
    fn merge_peers_only_updates_presence_of_known_peers() {
        let mut state = SessionState::new();
        state.merge_peers(vec![Peer::new(PeerId(7), "Alice", None, Presence::Offline)]);

        let changes = state.merge_peers(vec![
            Peer::new(PeerId(7), "Renamed", Some("/a.png".into()), Presence::Online),
            Peer::new(PeerId(8), "Bob", None, Presence::Online),
        ]);

        assert_eq!(changes, 1);
        let alice = state.peer(PeerId(7)).unwrap();
        assert_eq!(alice.display_name, "Alice");
        assert_eq!(alice.avatar, None);
        assert!(alice.presence.is_online());
        assert!(state.peer(PeerId(8)).is_some());
    }

    #[test]
    fn pending_counts_are_independent_per_peer() {
        let mut state = SessionState::new();
        state.increment_pending(PeerId(7));
        state.increment_pending(PeerId(7));
        state.increment_pending(PeerId(8));

        assert_eq!(state.total_pending(), 3);
        assert_eq!(state.clear_pending(PeerId(7)), 2);
        assert_eq!(state.pending_count(PeerId(7)), 0);
        assert_eq!(state.total_pending(), 1);
    }
}
