//! 投递会话
//!
//! 每个已认证客户端会话一个实例，独占会话状态。
//! 入站事件与调用方命令都由同一个任务串行处理（见 [`crate::runner`]），
//! 会话本身因此不需要加锁。

use std::sync::Arc;

use domain::{
    InboundEvent, KindClassifier, LegacyAttachmentClassifier, LocalRef, Message, MessageContent,
    MessageKind, Peer, PeerId, PresenceNotice,
};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::api::{AttachmentService, DirectoryService, HistoryService, ReadReceiptService};
use crate::clock::Clock;
use crate::error::{ApplicationError, ServiceError};
use crate::escalator::{EscalationConfig, EscalationState, NotificationEscalator};
use crate::notifier::NotificationSink;
use crate::read_state::{Arrival, ReadStateTracker};
use crate::retry::{retry_async, RetryConfig};
use crate::session_state::SessionState;
use crate::transport::{ConnectionState, OutboundMessage, TransportChannel, TransportEvent};

/// 会话依赖的外部端口
#[derive(Clone)]
pub struct DeliverySessionDependencies {
    pub transport: Arc<dyn TransportChannel>,
    pub directory: Arc<dyn DirectoryService>,
    pub history: Arc<dyn HistoryService>,
    pub receipts: Arc<dyn ReadReceiptService>,
    pub attachments: Arc<dyn AttachmentService>,
    pub notifier: Arc<dyn NotificationSink>,
    pub clock: Arc<dyn Clock>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliverySettings {
    pub history_page_size: u32,
    pub receipt_retry: RetryConfig,
    pub escalation: EscalationConfig,
}

impl Default for DeliverySettings {
    fn default() -> Self {
        Self {
            history_page_size: 50,
            receipt_retry: RetryConfig::default(),
            escalation: EscalationConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    /// 无法识别而丢弃的入站事件
    pub malformed_dropped: u64,
    pub history_failures: u64,
}

/// 打开会话的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenedConversation {
    pub peer: PeerId,
    pub previous: Option<PeerId>,
    pub cleared_pending: u32,
    pub history_loaded: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PeerSummary {
    pub peer: Peer,
    pub unread: usize,
    pub pending: u32,
    pub escalation: EscalationState,
}

/// 渲染用的会话快照
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSnapshot {
    pub me: PeerId,
    pub connection: ConnectionState,
    pub focused: Option<PeerId>,
    pub peers: Vec<PeerSummary>,
    pub total_pending: u32,
    pub title: String,
    pub flashing: bool,
    pub stats: SessionStats,
}

pub struct DeliverySession {
    deps: DeliverySessionDependencies,
    settings: DeliverySettings,
    classifier: Arc<dyn KindClassifier>,
    tracker: ReadStateTracker,
    state: SessionState,
    escalator: NotificationEscalator,
    connection: ConnectionState,
    stats: SessionStats,
    cancel: CancellationToken,
    closed: bool,
}

impl DeliverySession {
    pub fn new(me: PeerId, deps: DeliverySessionDependencies, settings: DeliverySettings) -> Self {
        Self::with_classifier(me, deps, settings, Arc::new(LegacyAttachmentClassifier))
    }

    pub fn with_classifier(
        me: PeerId,
        deps: DeliverySessionDependencies,
        settings: DeliverySettings,
        classifier: Arc<dyn KindClassifier>,
    ) -> Self {
        let cancel = CancellationToken::new();
        let escalator = NotificationEscalator::new(
            settings.escalation.clone(),
            deps.notifier.clone(),
            cancel.clone(),
        );
        Self {
            deps,
            settings,
            classifier,
            tracker: ReadStateTracker::new(me),
            state: SessionState::new(),
            escalator,
            connection: ConnectionState::Disconnected,
            stats: SessionStats::default(),
            cancel,
            closed: false,
        }
    }

    pub fn me(&self) -> PeerId {
        self.tracker.me()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn escalation_state(&self, peer: PeerId) -> EscalationState {
        self.escalator.state(peer)
    }

    pub fn escalator(&self) -> &NotificationEscalator {
        &self.escalator
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    /// 会话开始：加载好友目录，失败只记录日志
    pub async fn start(&mut self) {
        info!(me = %self.me(), "投递会话启动");
        if let Err(e) = self.refresh_peers().await {
            warn!(error = %e, "加载好友列表失败");
        }
    }

    pub async fn refresh_peers(&mut self) -> Result<usize, ApplicationError> {
        let peers = self
            .deps
            .directory
            .list_peers()
            .await
            .map_err(ApplicationError::Directory)?;
        let count = peers.len();
        let changes = self.state.merge_peers(peers);
        debug!(count, presence_changes = changes, "好友列表已刷新");
        Ok(count)
    }

    pub async fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Connecting => {
                self.connection = ConnectionState::Connecting;
                debug!("正在连接");
            }
            TransportEvent::Connected { reconnect } => {
                self.connection = ConnectionState::Connected;
                if reconnect {
                    // 重连不回放断线期间的消息，需要显式刷新会话
                    info!("传输通道已重连");
                } else {
                    info!("传输通道已连接");
                }
            }
            TransportEvent::Disconnected { reason } => {
                // 通道会自动重连，会话保持可用
                self.connection = ConnectionState::Connecting;
                warn!(reason = %reason, "传输通道断开，等待重连");
            }
            TransportEvent::Inbound(event) => self.handle_inbound(event).await,
        }
    }

    pub async fn handle_inbound(&mut self, event: InboundEvent) {
        match event {
            InboundEvent::NewMessage(incoming) => {
                let message =
                    incoming.into_message(self.me(), self.deps.clock.now(), self.classifier.as_ref());
                self.on_message(message);
            }
            InboundEvent::ReadReceipt { reader } => {
                let flipped = self.tracker.apply_receipt(&mut self.state, reader);
                debug!(reader = %reader, flipped, "收到已读回执");
            }
            InboundEvent::Presence(notice) => match notice {
                PresenceNotice::Online | PresenceNotice::Offline => {
                    if let Err(e) = self.refresh_peers().await {
                        warn!(error = %e, "在线状态变化后刷新好友列表失败");
                    }
                }
                PresenceNotice::Other(body) => {
                    debug!(body = %body, "忽略未知通知");
                }
            },
            InboundEvent::Malformed(malformed) => {
                self.stats.malformed_dropped += 1;
                let error = malformed.into_error();
                warn!(error = %error, "丢弃无法识别的入站事件");
            }
        }
    }

    fn on_message(&mut self, message: Message) {
        match self.tracker.on_arrival(&mut self.state, message) {
            Arrival::Unread { peer, pending } => {
                debug!(peer = %peer, pending, "收到未读消息");
                self.escalator
                    .on_unread_arrival(peer, self.state.total_pending());
            }
            Arrival::ReadOnArrival { peer } => {
                debug!(peer = %peer, "聚焦会话收到消息");
                self.spawn_read_receipt(peer);
            }
            Arrival::Duplicate { peer } => {
                debug!(peer = %peer, "丢弃重复消息");
            }
            Arrival::Echo { peer } => {
                debug!(peer = %peer, "收到本端消息回显");
            }
        }
    }

    /// 打开与 `peer` 的会话
    ///
    /// 待提醒计数立即清零、未读消息乐观翻为已读，随后异步发出已读回执并回填历史。
    /// 历史回填失败时会话仍然处于打开状态，错误只返回这一次。
    pub async fn open_conversation(
        &mut self,
        peer: PeerId,
    ) -> Result<OpenedConversation, ApplicationError> {
        let change = self.tracker.focus(&mut self.state, peer);
        self.escalator
            .on_peer_cleared(peer, self.state.total_pending());
        self.escalator.on_attention();
        self.spawn_read_receipt(peer);

        info!(peer = %peer, cleared = change.cleared_pending, "打开会话");
        let history_loaded = self.load_history(peer).await?;

        Ok(OpenedConversation {
            peer,
            previous: change.previous,
            cleared_pending: change.cleared_pending,
            history_loaded,
        })
    }

    /// 显式重新拉取历史；断线期间漏掉的消息只能这样补回
    pub async fn refresh_conversation(&mut self, peer: PeerId) -> Result<usize, ApplicationError> {
        self.load_history(peer).await
    }

    pub fn clear_focus(&mut self) -> Option<PeerId> {
        self.tracker.blur(&mut self.state)
    }

    /// 用户与应用发生了交互
    pub fn acknowledge_attention(&mut self) {
        self.escalator.on_attention();
    }

    /// 乐观发送文本消息
    ///
    /// 未连接时返回 [`ApplicationError::NotConnected`]，消息不会入库。
    /// 通道发送失败时本地消息保留，由调用方凭返回错误决定是否重发，内部不重试。
    pub async fn send_text(&mut self, peer: PeerId, text: &str) -> Result<LocalRef, ApplicationError> {
        let content = MessageContent::parse(text)?;
        self.send(peer, content, MessageKind::Text).await
    }

    /// 先上传附件，再以图片消息发送其 URI
    pub async fn send_image(
        &mut self,
        peer: PeerId,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> Result<LocalRef, ApplicationError> {
        self.ensure_connected()?;
        let uri = self
            .deps
            .attachments
            .upload(file_name, bytes)
            .await
            .map_err(ApplicationError::Upload)?;
        let content = MessageContent::parse(uri)?;
        self.send(peer, content, MessageKind::Image).await
    }

    async fn send(
        &mut self,
        peer: PeerId,
        content: MessageContent,
        kind: MessageKind,
    ) -> Result<LocalRef, ApplicationError> {
        self.ensure_connected()?;

        let message = Message::outgoing(self.me(), peer, content, kind, self.deps.clock.now());
        let local_ref = message.local_ref.unwrap_or_else(LocalRef::generate);
        let outbound = OutboundMessage {
            receiver_id: peer,
            content: message.content.clone(),
            kind,
        };
        self.state.conversations.append(peer, message);

        self.deps
            .transport
            .send_message(&outbound)
            .await
            .map_err(|e| {
                warn!(peer = %peer, local_ref = %local_ref, error = %e, "消息发送失败");
                ApplicationError::from(e)
            })?;
        Ok(local_ref)
    }

    fn ensure_connected(&self) -> Result<(), ApplicationError> {
        if self.closed || self.connection != ConnectionState::Connected {
            return Err(ApplicationError::NotConnected);
        }
        Ok(())
    }

    async fn load_history(&mut self, peer: PeerId) -> Result<usize, ApplicationError> {
        let fetched = self
            .deps
            .history
            .fetch_history(peer, 1, self.settings.history_page_size)
            .await;

        let mut messages = match fetched {
            Ok(messages) => messages,
            Err(source) => {
                self.stats.history_failures += 1;
                warn!(peer = %peer, error = %source, "历史消息加载失败");
                return Err(ApplicationError::HistoryFetch { peer, source });
            }
        };

        for message in &mut messages {
            message.kind = self.classifier.classify(message.kind, &message.content);
        }
        let applied = self.tracker.apply_history(&mut self.state, peer, messages);
        debug!(peer = %peer, stored = applied.stored, "历史消息已回填");
        Ok(applied.stored)
    }

    fn spawn_read_receipt(&self, peer: PeerId) {
        let receipts = self.deps.receipts.clone();
        let retry = self.settings.receipt_retry.clone();
        let token = self.cancel.child_token();

        tokio::spawn(async move {
            let receipts = &receipts;
            let outcome = tokio::select! {
                _ = token.cancelled() => {
                    debug!(peer = %peer, "会话结束，放弃已读回执");
                    return;
                }
                outcome = retry_async(&retry, ServiceError::is_transient, move || {
                    receipts.mark_conversation_read(peer)
                }) => outcome,
            };
            if let Err(e) = outcome {
                warn!(peer = %peer, error = %e, "已读回执发送失败");
            }
        });
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let peers = self
            .state
            .peers()
            .map(|peer| PeerSummary {
                peer: peer.clone(),
                unread: self.state.unread_count(peer.id),
                pending: self.state.pending_count(peer.id),
                escalation: self.escalator.state(peer.id),
            })
            .collect();

        SessionSnapshot {
            me: self.me(),
            connection: self.connection,
            focused: self.state.focused(),
            peers,
            total_pending: self.state.total_pending(),
            title: self.escalator.current_title(),
            flashing: self.escalator.is_flashing(),
            stats: self.stats,
        }
    }

    /// 结束会话：取消后台任务、停止标题闪烁、关闭通道。重复调用无副作用
    pub async fn shutdown(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.cancel.cancel();
        self.escalator.shutdown();
        self.deps.transport.close().await;
        self.connection = ConnectionState::Disconnected;
        info!(me = %self.me(), "投递会话已结束");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{
        MockAttachmentService, MockDirectoryService, MockHistoryService, MockReadReceiptService,
    };
    use crate::error::TransportError;
    use crate::memory::FixedClock;
    use crate::notifier::MockNotificationSink;
    use crate::transport::MockTransportChannel;
    use chrono::Utc;

    struct Mocks {
        transport: MockTransportChannel,
        directory: MockDirectoryService,
        history: MockHistoryService,
        receipts: MockReadReceiptService,
        attachments: MockAttachmentService,
        notifier: MockNotificationSink,
    }

    impl Mocks {
        fn new() -> Self {
            Self {
                transport: MockTransportChannel::new(),
                directory: MockDirectoryService::new(),
                history: MockHistoryService::new(),
                receipts: MockReadReceiptService::new(),
                attachments: MockAttachmentService::new(),
                notifier: MockNotificationSink::new(),
            }
        }

        fn into_session(self, settings: DeliverySettings) -> DeliverySession {
            let deps = DeliverySessionDependencies {
                transport: Arc::new(self.transport),
                directory: Arc::new(self.directory),
                history: Arc::new(self.history),
                receipts: Arc::new(self.receipts),
                attachments: Arc::new(self.attachments),
                notifier: Arc::new(self.notifier),
                clock: Arc::new(FixedClock(Utc::now())),
            };
            DeliverySession::new(PeerId(1), deps, settings)
        }
    }

    #[tokio::test]
    async fn disconnected_send_never_reaches_transport() {
        let mut mocks = Mocks::new();
        mocks.transport.expect_send_message().never();
        let mut session = mocks.into_session(DeliverySettings::default());

        let result = session.send_text(PeerId(7), "hello").await;

        assert!(matches!(result, Err(ApplicationError::NotConnected)));
        assert_eq!(session.state().conversations().total_unread(), 0);
    }

    #[tokio::test]
    async fn transport_not_connected_maps_to_not_connected() {
        let mut mocks = Mocks::new();
        mocks
            .transport
            .expect_send_message()
            .times(1)
            .returning(|_| Err(TransportError::NotConnected));
        let mut session = mocks.into_session(DeliverySettings::default());
        session
            .handle_transport_event(TransportEvent::Connected { reconnect: false })
            .await;

        let result = session.send_text(PeerId(7), "hello").await;
        assert!(matches!(result, Err(ApplicationError::NotConnected)));
    }

    #[tokio::test]
    async fn history_is_requested_with_configured_page_size() {
        let mut mocks = Mocks::new();
        mocks
            .history
            .expect_fetch_history()
            .withf(|peer, page, size| *peer == PeerId(7) && *page == 1 && *size == 20)
            .times(1)
            .returning(|_, _, _| Ok(Vec::new()));
        mocks.transport.expect_close().times(1).return_const(());
        let settings = DeliverySettings {
            history_page_size: 20,
            ..DeliverySettings::default()
        };
        let mut session = mocks.into_session(settings);

        let stored = session.refresh_conversation(PeerId(7)).await.unwrap();
        assert_eq!(stored, 0);
        session.shutdown().await;
        session.shutdown().await;
    }

    #[tokio::test]
    async fn rejected_directory_is_surfaced_from_refresh() {
        let mut mocks = Mocks::new();
        mocks.directory.expect_list_peers().returning(|| {
            Err(ServiceError::Rejected {
                code: 401,
                message: "unauthorized".into(),
            })
        });
        let mut session = mocks.into_session(DeliverySettings::default());

        assert!(matches!(
            session.refresh_peers().await,
            Err(ApplicationError::Directory(ServiceError::Rejected { code: 401, .. }))
        ));
    }
}
