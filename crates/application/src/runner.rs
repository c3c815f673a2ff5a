//! 会话任务
//!
//! 一个任务独占 [`DeliverySession`]，按顺序处理传输事件与调用方命令。
//! 调用方通过可克隆的 [`SessionHandle`] 发命令，每条命令携带一个 oneshot 回复。

use domain::{LocalRef, Message, PeerId};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::error::ApplicationError;
use crate::session::{DeliverySession, OpenedConversation, SessionSnapshot};
use crate::transport::TransportEvent;

const COMMAND_BUFFER: usize = 64;

type Reply<T> = oneshot::Sender<T>;

#[derive(Debug)]
pub enum SessionCommand {
    Open {
        peer: PeerId,
        reply: Reply<Result<OpenedConversation, ApplicationError>>,
    },
    Refresh {
        peer: PeerId,
        reply: Reply<Result<usize, ApplicationError>>,
    },
    RefreshPeers {
        reply: Reply<Result<usize, ApplicationError>>,
    },
    ClearFocus {
        reply: Reply<Option<PeerId>>,
    },
    SendText {
        peer: PeerId,
        text: String,
        reply: Reply<Result<LocalRef, ApplicationError>>,
    },
    SendImage {
        peer: PeerId,
        file_name: String,
        bytes: Vec<u8>,
        reply: Reply<Result<LocalRef, ApplicationError>>,
    },
    Acknowledge {
        reply: Reply<()>,
    },
    Snapshot {
        reply: Reply<SessionSnapshot>,
    },
    Conversation {
        peer: PeerId,
        reply: Reply<Vec<Message>>,
    },
    Shutdown {
        reply: Reply<()>,
    },
}

#[derive(Debug, Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<SessionCommand>,
}

impl SessionHandle {
    async fn request<T>(
        &self,
        build: impl FnOnce(Reply<T>) -> SessionCommand,
    ) -> Result<T, ApplicationError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(build(reply))
            .await
            .map_err(|_| ApplicationError::SessionClosed)?;
        response.await.map_err(|_| ApplicationError::SessionClosed)
    }

    pub async fn open_conversation(
        &self,
        peer: PeerId,
    ) -> Result<OpenedConversation, ApplicationError> {
        self.request(|reply| SessionCommand::Open { peer, reply })
            .await?
    }

    pub async fn refresh_conversation(&self, peer: PeerId) -> Result<usize, ApplicationError> {
        self.request(|reply| SessionCommand::Refresh { peer, reply })
            .await?
    }

    pub async fn refresh_peers(&self) -> Result<usize, ApplicationError> {
        self.request(|reply| SessionCommand::RefreshPeers { reply })
            .await?
    }

    pub async fn clear_focus(&self) -> Result<Option<PeerId>, ApplicationError> {
        self.request(|reply| SessionCommand::ClearFocus { reply }).await
    }

    pub async fn send_text(
        &self,
        peer: PeerId,
        text: impl Into<String>,
    ) -> Result<LocalRef, ApplicationError> {
        let text = text.into();
        self.request(|reply| SessionCommand::SendText { peer, text, reply })
            .await?
    }

    pub async fn send_image(
        &self,
        peer: PeerId,
        file_name: impl Into<String>,
        bytes: Vec<u8>,
    ) -> Result<LocalRef, ApplicationError> {
        let file_name = file_name.into();
        self.request(|reply| SessionCommand::SendImage {
            peer,
            file_name,
            bytes,
            reply,
        })
        .await?
    }

    pub async fn acknowledge_attention(&self) -> Result<(), ApplicationError> {
        self.request(|reply| SessionCommand::Acknowledge { reply })
            .await
    }

    pub async fn snapshot(&self) -> Result<SessionSnapshot, ApplicationError> {
        self.request(|reply| SessionCommand::Snapshot { reply }).await
    }

    /// 与 `peer` 的会话消息副本，按时间升序
    pub async fn conversation(&self, peer: PeerId) -> Result<Vec<Message>, ApplicationError> {
        self.request(|reply| SessionCommand::Conversation { peer, reply })
            .await
    }

    /// 请求结束会话并等待清理完成；会话已结束时直接返回
    pub async fn shutdown(&self) {
        if self
            .request(|reply| SessionCommand::Shutdown { reply })
            .await
            .is_err()
        {
            debug!("会话已结束");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }
}

/// 启动会话任务，返回命令句柄和任务句柄
pub fn spawn_session(
    session: DeliverySession,
    events: mpsc::Receiver<TransportEvent>,
) -> (SessionHandle, JoinHandle<()>) {
    let (commands_tx, commands_rx) = mpsc::channel(COMMAND_BUFFER);
    let task = tokio::spawn(run_session(session, events, commands_rx));
    (
        SessionHandle {
            commands: commands_tx,
        },
        task,
    )
}

/// 会话主循环
///
/// 传输事件优先于命令处理。命令通道关闭、收到 `Shutdown` 或传输事件流结束时退出，
/// 退出前总是执行会话清理。
pub async fn run_session(
    mut session: DeliverySession,
    mut events: mpsc::Receiver<TransportEvent>,
    mut commands: mpsc::Receiver<SessionCommand>,
) {
    session.start().await;
    let mut shutdown_reply = None;

    loop {
        tokio::select! {
            biased;
            event = events.recv() => match event {
                Some(event) => session.handle_transport_event(event).await,
                None => {
                    info!("传输事件流结束");
                    break;
                }
            },
            command = commands.recv() => match command {
                Some(SessionCommand::Shutdown { reply }) => {
                    shutdown_reply = Some(reply);
                    break;
                }
                Some(command) => dispatch(&mut session, command).await,
                None => {
                    debug!("所有会话句柄已释放");
                    break;
                }
            },
        }
    }

    session.shutdown().await;
    if let Some(reply) = shutdown_reply {
        let _ = reply.send(());
    }
}

async fn dispatch(session: &mut DeliverySession, command: SessionCommand) {
    // 调用方可能已放弃等待，回复失败直接忽略
    match command {
        SessionCommand::Open { peer, reply } => {
            let _ = reply.send(session.open_conversation(peer).await);
        }
        SessionCommand::Refresh { peer, reply } => {
            let _ = reply.send(session.refresh_conversation(peer).await);
        }
        SessionCommand::RefreshPeers { reply } => {
            let _ = reply.send(session.refresh_peers().await);
        }
        SessionCommand::ClearFocus { reply } => {
            let _ = reply.send(session.clear_focus());
        }
        SessionCommand::SendText { peer, text, reply } => {
            let _ = reply.send(session.send_text(peer, &text).await);
        }
        SessionCommand::SendImage {
            peer,
            file_name,
            bytes,
            reply,
        } => {
            let _ = reply.send(session.send_image(peer, &file_name, bytes).await);
        }
        SessionCommand::Acknowledge { reply } => {
            session.acknowledge_attention();
            let _ = reply.send(());
        }
        SessionCommand::Snapshot { reply } => {
            let _ = reply.send(session.snapshot());
        }
        SessionCommand::Conversation { peer, reply } => {
            let messages = session
                .state()
                .conversation(peer)
                .map(|c| c.messages().to_vec())
                .unwrap_or_default();
            let _ = reply.send(messages);
        }
        SessionCommand::Shutdown { reply } => {
            session.shutdown().await;
            let _ = reply.send(());
        }
    }
}
