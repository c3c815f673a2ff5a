//! 基础设施层实现。
//!
//! 提供 STOMP over WebSocket 传输通道、REST 客户端和终端提醒出口，
//! 实现应用层定义的接口。

pub mod http;
pub mod notifier;
pub mod stomp;
pub mod transport;
pub mod wire;

pub use http::HttpChatApi;
pub use notifier::TracingNotificationSink;
pub use stomp::{Command, Frame, StompError};
pub use transport::{StompSettings, StompTransport};
