//! 内存实现，供场景测试和本地演示使用

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use domain::{Message, Peer, PeerId, Timestamp};
use tokio::sync::RwLock;

use crate::api::{AttachmentService, DirectoryService, HistoryService, ReadReceiptService};
use crate::clock::Clock;
use crate::error::{ServiceError, TransportError};
use crate::notifier::NotificationSink;
use crate::transport::{ConnectionState, OutboundMessage, TransportChannel};

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Default)]
pub struct MemoryDirectory {
    peers: RwLock<Vec<Peer>>,
    failure: RwLock<Option<ServiceError>>,
    calls: AtomicU32,
}

impl MemoryDirectory {
    pub fn new(peers: Vec<Peer>) -> Self {
        Self {
            peers: RwLock::new(peers),
            ..Self::default()
        }
    }

    pub async fn set_peers(&self, peers: Vec<Peer>) {
        *self.peers.write().await = peers;
    }

    pub async fn fail_with(&self, error: Option<ServiceError>) {
        *self.failure.write().await = error;
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DirectoryService for MemoryDirectory {
    async fn list_peers(&self) -> Result<Vec<Peer>, ServiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.failure.read().await.clone() {
            return Err(error);
        }
        Ok(self.peers.read().await.clone())
    }
}

/// 历史服务：按好友保存最新在前的消息，忽略分页
#[derive(Default)]
pub struct MemoryHistory {
    pages: RwLock<HashMap<PeerId, Vec<Message>>>,
    failures: RwLock<VecDeque<ServiceError>>,
    requests: RwLock<Vec<(PeerId, u32, u32)>>,
}

impl MemoryHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_history(&self, peer: PeerId, newest_first: Vec<Message>) {
        self.pages.write().await.insert(peer, newest_first);
    }

    /// 接下来的一次请求返回 `error`
    pub async fn fail_next(&self, error: ServiceError) {
        self.failures.write().await.push_back(error);
    }

    pub async fn requests(&self) -> Vec<(PeerId, u32, u32)> {
        self.requests.read().await.clone()
    }
}

#[async_trait]
impl HistoryService for MemoryHistory {
    async fn fetch_history(
        &self,
        peer: PeerId,
        page: u32,
        page_size: u32,
    ) -> Result<Vec<Message>, ServiceError> {
        self.requests.write().await.push((peer, page, page_size));
        if let Some(error) = self.failures.write().await.pop_front() {
            return Err(error);
        }
        let pages = self.pages.read().await;
        Ok(pages
            .get(&peer)
            .map(|messages| messages.iter().take(page_size as usize).cloned().collect())
            .unwrap_or_default())
    }
}

#[derive(Default)]
pub struct RecordingReceipts {
    calls: RwLock<Vec<PeerId>>,
    failures: RwLock<VecDeque<ServiceError>>,
}

impl RecordingReceipts {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn fail_next(&self, error: ServiceError) {
        self.failures.write().await.push_back(error);
    }

    /// 每次请求（包括重试）都会记录
    pub async fn calls(&self) -> Vec<PeerId> {
        self.calls.read().await.clone()
    }
}

#[async_trait]
impl ReadReceiptService for RecordingReceipts {
    async fn mark_conversation_read(&self, peer: PeerId) -> Result<(), ServiceError> {
        self.calls.write().await.push(peer);
        match self.failures.write().await.pop_front() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[derive(Default)]
pub struct MemoryAttachments {
    uploads: RwLock<Vec<(String, usize)>>,
    failure: RwLock<Option<ServiceError>>,
}

impl MemoryAttachments {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn fail_with(&self, error: Option<ServiceError>) {
        *self.failure.write().await = error;
    }

    pub async fn uploads(&self) -> Vec<(String, usize)> {
        self.uploads.read().await.clone()
    }
}

#[async_trait]
impl AttachmentService for MemoryAttachments {
    async fn upload(&self, file_name: &str, bytes: Vec<u8>) -> Result<String, ServiceError> {
        if let Some(error) = self.failure.read().await.clone() {
            return Err(error);
        }
        let mut uploads = self.uploads.write().await;
        uploads.push((file_name.to_string(), bytes.len()));
        Ok(format!("/files/{}-{}", uploads.len(), file_name))
    }
}

/// 记录所有发出消息的传输通道；连接状态由测试直接设置
pub struct RecordingTransport {
    state: Mutex<ConnectionState>,
    sent: Mutex<Vec<OutboundMessage>>,
    failures: Mutex<VecDeque<TransportError>>,
    closed: AtomicBool,
}

impl Default for RecordingTransport {
    fn default() -> Self {
        Self::new(ConnectionState::Disconnected)
    }
}

impl RecordingTransport {
    pub fn new(state: ConnectionState) -> Self {
        Self {
            state: Mutex::new(state),
            sent: Mutex::new(Vec::new()),
            failures: Mutex::new(VecDeque::new()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn set_state(&self, state: ConnectionState) {
        *lock(&self.state) = state;
    }

    pub fn fail_next(&self, error: TransportError) {
        lock(&self.failures).push_back(error);
    }

    pub fn sent(&self) -> Vec<OutboundMessage> {
        lock(&self.sent).clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TransportChannel for RecordingTransport {
    fn state(&self) -> ConnectionState {
        *lock(&self.state)
    }

    async fn send_message(&self, message: &OutboundMessage) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        if let Some(error) = lock(&self.failures).pop_front() {
            return Err(error);
        }
        if self.state() != ConnectionState::Connected {
            return Err(TransportError::NotConnected);
        }
        lock(&self.sent).push(message.clone());
        Ok(())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.set_state(ConnectionState::Disconnected);
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    cues: AtomicU32,
    titles: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cues(&self) -> u32 {
        self.cues.load(Ordering::SeqCst)
    }

    pub fn titles(&self) -> Vec<String> {
        lock(&self.titles).clone()
    }

    pub fn last_title(&self) -> Option<String> {
        lock(&self.titles).last().cloned()
    }
}

impl NotificationSink for RecordingNotifier {
    fn audible_cue(&self) {
        self.cues.fetch_add(1, Ordering::SeqCst);
    }

    fn set_title(&self, title: &str) {
        lock(&self.titles).push(title.to_string());
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub Timestamp);

impl Clock for FixedClock {
    fn now(&self) -> Timestamp {
        self.0
    }
}
