//! STOMP 传输通道集成测试
//!
//! 在本地用 tokio-tungstenite 起一个最小的 STOMP broker，验证握手、订阅、
//! 入站解码、发送和断线重连。

use std::time::Duration;

use application::{ConnectionState, OutboundMessage, TransportChannel, TransportError, TransportEvent};
use domain::{InboundEvent, MessageKind, PeerId, PresenceNotice};
use futures_util::{SinkExt, StreamExt};
use infrastructure::{Command, Frame, StompSettings, StompTransport};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;

const WAIT: Duration = Duration::from_secs(5);

enum BrokerCommand {
    Push { destination: String, body: String },
    DropConnection,
}

/// 测试辅助结构：本地 broker，按连接序号上报收到的帧
struct Broker {
    endpoint: String,
    frames: mpsc::UnboundedReceiver<(u32, Frame)>,
    commands: mpsc::UnboundedSender<BrokerCommand>,
}

impl Broker {
    async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (frames_tx, frames) = mpsc::unbounded_channel();
        let (commands, mut commands_rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            let mut connection = 0u32;
            while let Ok((socket, _)) = listener.accept().await {
                connection += 1;
                let Ok(mut ws) = accept_async(socket).await else {
                    continue;
                };
                loop {
                    tokio::select! {
                        incoming = ws.next() => {
                            let Some(Ok(WsMessage::Text(text))) = incoming else { break };
                            let Ok(Some(frame)) = Frame::decode(text.as_str()) else { continue };
                            if frame.command == Command::Connect {
                                let reply = Frame::new(Command::Connected).header("version", "1.2");
                                let _ = ws.send(WsMessage::text(reply.encode())).await;
                            }
                            let _ = frames_tx.send((connection, frame));
                        }
                        command = commands_rx.recv() => match command {
                            Some(BrokerCommand::Push { destination, body }) => {
                                let frame = Frame::new(Command::Message)
                                    .header("destination", destination)
                                    .header("subscription", "sub-0")
                                    .header("message-id", "m-1")
                                    .with_body(body);
                                let _ = ws.send(WsMessage::text(frame.encode())).await;
                            }
                            Some(BrokerCommand::DropConnection) | None => break,
                        },
                    }
                }
            }
        });

        Self {
            endpoint: format!("ws://{addr}/ws"),
            frames,
            commands,
        }
    }

    async fn next_frame(&mut self) -> (u32, Frame) {
        timeout(WAIT, self.frames.recv()).await.unwrap().unwrap()
    }

    fn push(&self, destination: &str, body: &str) {
        let _ = self.commands.send(BrokerCommand::Push {
            destination: destination.to_string(),
            body: body.to_string(),
        });
    }
}

fn settings(endpoint: String, reconnect_delay: Duration) -> StompSettings {
    StompSettings {
        endpoint,
        reconnect_delay,
        personal_topic: "/user/queue/chat".into(),
        notice_topic: "/topic/notice".into(),
        send_destination: "/app/send".into(),
        event_buffer: 32,
    }
}

async fn next_event(events: &mut mpsc::Receiver<TransportEvent>) -> TransportEvent {
    timeout(WAIT, events.recv()).await.unwrap().unwrap()
}

async fn expect_handshake(broker: &mut Broker, connection: u32) {
    let (n, connect) = broker.next_frame().await;
    assert_eq!(n, connection);
    assert_eq!(connect.command, Command::Connect);
    assert_eq!(connect.get("Authorization"), Some("Bearer secret"));
    assert_eq!(connect.get("accept-version"), Some("1.2"));

    let mut destinations = Vec::new();
    for _ in 0..2 {
        let (_, subscribe) = broker.next_frame().await;
        assert_eq!(subscribe.command, Command::Subscribe);
        destinations.push(subscribe.get("destination").unwrap().to_string());
    }
    assert_eq!(destinations, vec!["/user/queue/chat", "/topic/notice"]);
}

#[tokio::test]
async fn connects_decodes_sends_and_reconnects() {
    let mut broker = Broker::start().await;
    let (transport, mut events) = StompTransport::connect(
        settings(broker.endpoint.clone(), Duration::from_millis(300)),
        "secret",
    );

    assert_eq!(next_event(&mut events).await, TransportEvent::Connecting);
    assert_eq!(
        next_event(&mut events).await,
        TransportEvent::Connected { reconnect: false }
    );
    expect_handshake(&mut broker, 1).await;
    assert_eq!(transport.state(), ConnectionState::Connected);

    transport
        .send_message(&OutboundMessage {
            receiver_id: PeerId(7),
            content: "你好".into(),
            kind: MessageKind::Text,
        })
        .await
        .unwrap();
    let (_, sent) = broker.next_frame().await;
    assert_eq!(sent.command, Command::Send);
    assert_eq!(sent.get("destination"), Some("/app/send"));
    let body: serde_json::Value = serde_json::from_str(&sent.body).unwrap();
    assert_eq!(
        body,
        serde_json::json!({"receiverId": 7, "content": "你好", "type": 0})
    );

    broker.push(
        "/user/queue/chat",
        r#"{"senderId":7,"receiverId":1,"content":"hi","msgType":0,"isRead":0}"#,
    );
    match next_event(&mut events).await {
        TransportEvent::Inbound(InboundEvent::NewMessage(message)) => {
            assert_eq!(message.sender_id, PeerId(7));
            assert_eq!(message.content, "hi");
        }
        other => panic!("unexpected event {other:?}"),
    }

    broker.push("/user/queue/chat", r#"{"senderId":7,"type":99,"content":"READ"}"#);
    assert_eq!(
        next_event(&mut events).await,
        TransportEvent::Inbound(InboundEvent::ReadReceipt { reader: PeerId(7) })
    );

    broker.push("/topic/notice", "online");
    assert_eq!(
        next_event(&mut events).await,
        TransportEvent::Inbound(InboundEvent::Presence(PresenceNotice::Online))
    );

    broker.push("/user/queue/chat", "{broken");
    assert!(matches!(
        next_event(&mut events).await,
        TransportEvent::Inbound(InboundEvent::Malformed(_))
    ));

    let _ = broker.commands.send(BrokerCommand::DropConnection);
    assert!(matches!(
        next_event(&mut events).await,
        TransportEvent::Disconnected { .. }
    ));
    assert_ne!(transport.state(), ConnectionState::Connected);
    assert_eq!(
        transport
            .send_message(&OutboundMessage {
                receiver_id: PeerId(7),
                content: "during outage".into(),
                kind: MessageKind::Text,
            })
            .await,
        Err(TransportError::NotConnected)
    );

    assert_eq!(next_event(&mut events).await, TransportEvent::Connecting);
    assert_eq!(
        next_event(&mut events).await,
        TransportEvent::Connected { reconnect: true }
    );
    expect_handshake(&mut broker, 2).await;

    transport.close().await;
    assert_eq!(transport.state(), ConnectionState::Disconnected);
    assert_eq!(
        transport
            .send_message(&OutboundMessage {
                receiver_id: PeerId(7),
                content: "after close".into(),
                kind: MessageKind::Text,
            })
            .await,
        Err(TransportError::Closed)
    );
}

#[tokio::test]
async fn keeps_retrying_until_closed() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let (transport, mut events) = StompTransport::connect(
        settings(format!("ws://{addr}/ws"), Duration::from_millis(20)),
        "secret",
    );

    for _ in 0..2 {
        assert_eq!(next_event(&mut events).await, TransportEvent::Connecting);
        assert!(matches!(
            next_event(&mut events).await,
            TransportEvent::Disconnected { .. }
        ));
    }

    transport.close().await;
    // 后台任务退出后事件流结束
    let drained = timeout(WAIT, async {
        while events.recv().await.is_some() {}
    })
    .await;
    assert!(drained.is_ok());
    assert_eq!(transport.state(), ConnectionState::Disconnected);
}
