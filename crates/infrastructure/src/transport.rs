//! STOMP over WebSocket 传输通道
//!
//! 后台任务维护连接：建立 WebSocket、发送 CONNECT、订阅个人队列与通知主题，
//! 把收到的 MESSAGE 帧在边界处解码成 [`InboundEvent`] 投递给会话。
//! 断线后按固定延迟无限重连，直到通道被关闭。断线期间的发送直接失败，不做缓冲。

use std::sync::{Arc, Mutex};
use std::time::Duration;

use application::{ConnectionState, OutboundMessage, TransportChannel, TransportError, TransportEvent};
use async_trait::async_trait;
use domain::{InboundEvent, MalformedEvent};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::stomp::{Command, Frame};
use crate::wire::{decode_inbound, encode_outbound, Topics};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StompSettings {
    /// WebSocket 地址，例如 `ws://127.0.0.1:8080/ws`
    pub endpoint: String,
    pub reconnect_delay: Duration,
    pub personal_topic: String,
    pub notice_topic: String,
    pub send_destination: String,
    pub event_buffer: usize,
}

impl StompSettings {
    fn topics(&self) -> Topics {
        Topics {
            personal: self.personal_topic.clone(),
            notice: self.notice_topic.clone(),
        }
    }

    fn host(&self) -> &str {
        let without_scheme = self
            .endpoint
            .split_once("://")
            .map(|(_, rest)| rest)
            .unwrap_or(&self.endpoint);
        without_scheme.split('/').next().unwrap_or(without_scheme)
    }
}

struct Shared {
    settings: StompSettings,
    state: Mutex<ConnectionState>,
    /// 当前连接的写队列；断开时置空，队列中未写出的帧随之丢弃
    outbound: Mutex<Option<mpsc::UnboundedSender<WsMessage>>>,
    cancel: CancellationToken,
}

impl Shared {
    fn set_state(&self, state: ConnectionState) {
        *self.state.lock().unwrap_or_else(|p| p.into_inner()) = state;
    }

    fn state(&self) -> ConnectionState {
        *self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn set_outbound(&self, sender: Option<mpsc::UnboundedSender<WsMessage>>) {
        *self.outbound.lock().unwrap_or_else(|p| p.into_inner()) = sender;
    }
}

/// 连接结束的原因
enum Ended {
    /// 通道被关闭
    Cancelled,
    /// 会话已不再接收事件
    Abandoned,
    Lost(String),
}

pub struct StompTransport {
    shared: Arc<Shared>,
    task: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl StompTransport {
    /// 启动后台连接任务；返回的事件流由会话独占消费
    pub fn connect(
        settings: StompSettings,
        credential: impl Into<String>,
    ) -> (Self, mpsc::Receiver<TransportEvent>) {
        let (events_tx, events_rx) = mpsc::channel(settings.event_buffer.max(1));
        let shared = Arc::new(Shared {
            settings,
            state: Mutex::new(ConnectionState::Disconnected),
            outbound: Mutex::new(None),
            cancel: CancellationToken::new(),
        });

        let task = tokio::spawn(connection_loop(shared.clone(), credential.into(), events_tx));
        (
            Self {
                shared,
                task: tokio::sync::Mutex::new(Some(task)),
            },
            events_rx,
        )
    }
}

#[async_trait]
impl TransportChannel for StompTransport {
    fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    async fn send_message(&self, message: &OutboundMessage) -> Result<(), TransportError> {
        if self.shared.cancel.is_cancelled() {
            return Err(TransportError::Closed);
        }
        let body = encode_outbound(message).map_err(|e| TransportError::Encode(e.to_string()))?;
        let frame = Frame::send(&self.shared.settings.send_destination, body).encode();

        let outbound = self.shared.outbound.lock().unwrap_or_else(|p| p.into_inner());
        match outbound.as_ref() {
            Some(sender) if self.shared.state() == ConnectionState::Connected => sender
                .send(WsMessage::text(frame))
                .map_err(|_| TransportError::NotConnected),
            _ => Err(TransportError::NotConnected),
        }
    }

    async fn close(&self) {
        self.shared.cancel.cancel();
        if let Some(task) = self.task.lock().await.take() {
            if tokio::time::timeout(CLOSE_TIMEOUT, task).await.is_err() {
                warn!("等待传输任务退出超时");
            }
        }
        self.shared.set_state(ConnectionState::Disconnected);
    }
}

impl Drop for StompTransport {
    fn drop(&mut self) {
        self.shared.cancel.cancel();
    }
}

async fn connection_loop(
    shared: Arc<Shared>,
    credential: String,
    events: mpsc::Sender<TransportEvent>,
) {
    let cancel = shared.cancel.clone();
    let delay = shared.settings.reconnect_delay;
    let mut connected_before = false;

    loop {
        shared.set_state(ConnectionState::Connecting);
        if events.send(TransportEvent::Connecting).await.is_err() {
            break;
        }

        let attempt = tokio::select! {
            _ = cancel.cancelled() => break,
            attempt = establish(&shared.settings, &credential) => attempt,
        };

        let reason = match attempt {
            Ok(ws) => {
                let reconnect = connected_before;
                connected_before = true;
                match pump(&shared, ws, reconnect, &events).await {
                    Ended::Cancelled | Ended::Abandoned => break,
                    Ended::Lost(reason) => reason,
                }
            }
            Err(e) => e.to_string(),
        };

        shared.set_state(ConnectionState::Connecting);
        warn!(reason = %reason, delay_ms = delay.as_millis() as u64, "连接断开，稍后重连");
        if events
            .send(TransportEvent::Disconnected { reason })
            .await
            .is_err()
        {
            break;
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }

    shared.set_outbound(None);
    shared.set_state(ConnectionState::Disconnected);
    debug!("传输任务退出");
}

/// 建立 WebSocket 并完成 STOMP 握手与订阅
async fn establish(settings: &StompSettings, credential: &str) -> Result<WsStream, TransportError> {
    let (mut ws, _response) = connect_async(settings.endpoint.as_str())
        .await
        .map_err(|e| TransportError::connection(format!("WebSocket 连接失败: {e}")))?;

    send_frame(&mut ws, Frame::connect(settings.host(), credential, (0, 0))).await?;

    let connected = tokio::time::timeout(HANDSHAKE_TIMEOUT, async {
        while let Some(message) = ws.next().await {
            let message = message.map_err(|e| TransportError::connection(e.to_string()))?;
            let WsMessage::Text(text) = message else {
                continue;
            };
            match Frame::decode(text.as_str()) {
                Ok(Some(frame)) if frame.command == Command::Connected => return Ok(frame),
                Ok(Some(frame)) if frame.command == Command::Error => {
                    return Err(TransportError::connection(error_reason(&frame)));
                }
                Ok(_) => continue,
                Err(e) => return Err(TransportError::connection(e.to_string())),
            }
        }
        Err(TransportError::connection("握手期间连接关闭"))
    })
    .await
    .map_err(|_| TransportError::connection("STOMP 握手超时"))??;

    debug!(version = ?connected.get("version"), "STOMP 已连接");

    send_frame(&mut ws, Frame::subscribe("sub-0", &settings.personal_topic)).await?;
    send_frame(&mut ws, Frame::subscribe("sub-1", &settings.notice_topic)).await?;
    Ok(ws)
}

async fn send_frame(ws: &mut WsStream, frame: Frame) -> Result<(), TransportError> {
    ws.send(WsMessage::text(frame.encode()))
        .await
        .map_err(|e| TransportError::connection(e.to_string()))
}

fn error_reason(frame: &Frame) -> String {
    frame
        .get("message")
        .map(str::to_string)
        .unwrap_or_else(|| frame.body.clone())
}

/// 一次连接的读写循环
async fn pump(
    shared: &Shared,
    ws: WsStream,
    reconnect: bool,
    events: &mpsc::Sender<TransportEvent>,
) -> Ended {
    let topics = shared.settings.topics();
    let (mut sink, mut stream) = ws.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel();
    shared.set_outbound(Some(outbound_tx));
    shared.set_state(ConnectionState::Connected);
    info!(endpoint = %shared.settings.endpoint, reconnect, "传输通道已连接");

    if events
        .send(TransportEvent::Connected { reconnect })
        .await
        .is_err()
    {
        return Ended::Abandoned;
    }

    let ended = loop {
        tokio::select! {
            _ = shared.cancel.cancelled() => {
                let _ = sink.send(WsMessage::text(Frame::disconnect("bye").encode())).await;
                let _ = sink.close().await;
                break Ended::Cancelled;
            }
            outgoing = outbound_rx.recv() => {
                let Some(message) = outgoing else {
                    break Ended::Lost("写队列已关闭".to_string());
                };
                if let Err(e) = sink.send(message).await {
                    break Ended::Lost(format!("发送失败: {e}"));
                }
            }
            incoming = stream.next() => {
                let text = match incoming {
                    Some(Ok(WsMessage::Text(text))) => text,
                    Some(Ok(WsMessage::Close(frame))) => {
                        let reason = frame
                            .map(|f| f.reason.as_str().to_string())
                            .unwrap_or_else(|| "服务端关闭连接".to_string());
                        break Ended::Lost(reason);
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => break Ended::Lost(e.to_string()),
                    None => break Ended::Lost("连接已结束".to_string()),
                };

                let event = match Frame::decode(text.as_str()) {
                    Ok(None) => continue,
                    Ok(Some(frame)) => match frame.command {
                        Command::Message => {
                            let destination = frame.get("destination").unwrap_or_default();
                            decode_inbound(&topics, destination, &frame.body)
                        }
                        Command::Error => break Ended::Lost(error_reason(&frame)),
                        other => {
                            debug!(command = %other, "忽略帧");
                            continue;
                        }
                    },
                    Err(e) => InboundEvent::Malformed(MalformedEvent::new("stomp", e.to_string())),
                };

                if events.send(TransportEvent::Inbound(event)).await.is_err() {
                    break Ended::Abandoned;
                }
            }
        }
    };

    shared.set_outbound(None);
    ended
}
