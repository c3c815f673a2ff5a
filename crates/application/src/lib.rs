//! 应用层实现。
//!
//! 客户端投递会话：把持久通道上的入站事件转成会话状态，
//! 维护已读/未读与提醒升级，并对外部服务（目录、历史、已读回执、附件、
//! 传输通道、提醒出口）只依赖抽象接口。

pub mod api;
pub mod clock;
pub mod error;
pub mod escalator;
pub mod memory;
pub mod notifier;
pub mod read_state;
pub mod retry;
pub mod runner;
pub mod session;
pub mod session_state;
pub mod transport;

pub use api::{AttachmentService, DirectoryService, HistoryService, ReadReceiptService};
pub use clock::{Clock, SystemClock};
pub use error::{ApplicationError, ServiceError, TransportError};
pub use escalator::{EscalationConfig, EscalationState, NotificationEscalator};
pub use notifier::NotificationSink;
pub use read_state::{Arrival, FocusChange, HistoryApplied, ReadStateTracker};
pub use retry::{retry_async, Backoff, RetryConfig};
pub use runner::{run_session, spawn_session, SessionCommand, SessionHandle};
pub use session::{
    DeliverySession, DeliverySessionDependencies, DeliverySettings, OpenedConversation,
    PeerSummary, SessionSnapshot, SessionStats,
};
pub use session_state::SessionState;
pub use transport::{ConnectionState, OutboundMessage, TransportChannel, TransportEvent};

#[cfg(any(test, feature = "testing"))]
pub use api::{
    MockAttachmentService, MockDirectoryService, MockHistoryService, MockReadReceiptService,
};
#[cfg(any(test, feature = "testing"))]
pub use notifier::MockNotificationSink;
#[cfg(any(test, feature = "testing"))]
pub use transport::MockTransportChannel;
