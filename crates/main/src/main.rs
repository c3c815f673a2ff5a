//! 主应用程序入口
//!
//! 终端聊天客户端：加载配置，连接 STOMP 通道，启动投递会话，从标准输入读取命令。

mod commands;

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use application::{
    spawn_session, ApplicationError, DeliverySession, DeliverySessionDependencies,
    DeliverySettings, EscalationConfig, RetryConfig, SessionHandle, SystemClock,
};
use commands::CliCommand;
use config::ClientConfig;
use domain::{PeerId, ReadFlag};
use infrastructure::{HttpChatApi, StompSettings, StompTransport, TracingNotificationSink};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "moonchat=info,application=info,infrastructure=info,warn";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .init();

    let cfg = ClientConfig::load().context("加载配置失败")?;
    info!("配置: {}", cfg.sanitize());

    let me = PeerId(cfg.identity.subject_id);
    let api = Arc::new(
        HttpChatApi::new(
            cfg.server.base_url.clone(),
            cfg.identity.credential.expose(),
            cfg.request_timeout(),
        )
        .context("创建 REST 客户端失败")?,
    );

    let (transport, events) = StompTransport::connect(
        StompSettings {
            endpoint: cfg.websocket_endpoint(),
            reconnect_delay: cfg.reconnect_delay(),
            personal_topic: cfg.transport.personal_topic.clone(),
            notice_topic: cfg.transport.notice_topic.clone(),
            send_destination: cfg.transport.send_destination.clone(),
            event_buffer: cfg.transport.event_buffer,
        },
        cfg.connect_bearer(),
    );

    let session = DeliverySession::new(
        me,
        DeliverySessionDependencies {
            transport: Arc::new(transport),
            directory: api.clone(),
            history: api.clone(),
            receipts: api.clone(),
            attachments: api,
            notifier: Arc::new(TracingNotificationSink::new(
                cfg.notification.base_title.clone(),
            )),
            clock: Arc::new(SystemClock),
        },
        DeliverySettings {
            history_page_size: cfg.history.page_size,
            receipt_retry: RetryConfig::new(cfg.receipts.max_attempts, cfg.receipt_base_delay()),
            escalation: EscalationConfig {
                base_title: cfg.notification.base_title.clone(),
                flash_interval: cfg.flash_interval(),
            },
        },
    );

    let (handle, mut session_task) = spawn_session(session, events);
    info!(me = %me, "MoonChat 已启动，输入 /help 查看命令");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut session_finished = false;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("收到 Ctrl-C，正在退出");
                break;
            }
            result = &mut session_task => {
                session_finished = true;
                if let Err(e) = result {
                    error!(error = %e, "会话任务异常结束");
                } else {
                    warn!("会话已结束");
                }
                break;
            }
            line = lines.next_line() => {
                let Some(line) = line.context("读取标准输入失败")? else {
                    break;
                };
                match commands::parse(&line) {
                    Ok(None) => {}
                    Ok(Some(CliCommand::Quit)) => break,
                    Ok(Some(command)) => execute(&handle, command).await,
                    Err(e) => println!("{e}"),
                }
            }
        }
    }

    handle.shutdown().await;
    if !session_finished {
        if let Err(e) = session_task.await {
            error!(error = %e, "会话任务异常结束");
        }
    }
    info!("已退出");
    Ok(())
}

async fn execute(handle: &SessionHandle, command: CliCommand) {
    let outcome = match command {
        CliCommand::Open(peer) => handle.open_conversation(peer).await.map(|opened| {
            println!(
                "已打开与 {} 的会话，载入 {} 条历史，清除 {} 条提醒",
                peer, opened.history_loaded, opened.cleared_pending
            );
        }),
        CliCommand::Send(peer, text) => handle.send_text(peer, text).await.map(|local_ref| {
            println!("已发送 ({local_ref})");
        }),
        CliCommand::Image(peer, path) => send_image(handle, peer, &path).await,
        CliCommand::Refresh(peer) => handle.refresh_conversation(peer).await.map(|stored| {
            println!("已刷新与 {peer} 的会话，共 {stored} 条");
        }),
        CliCommand::History(peer) => handle.conversation(peer).await.map(|messages| {
            for message in messages {
                let read = match message.read {
                    ReadFlag::Read => "已读",
                    ReadFlag::Unread => "未读",
                };
                println!(
                    "[{}] {} -> {} ({:?}, {}): {}",
                    message.created_at.format("%m-%d %H:%M"),
                    message.sender_id,
                    message.receiver_id,
                    message.kind,
                    read,
                    message.content
                );
            }
        }),
        CliCommand::Leave => handle.clear_focus().await.map(|left| match left {
            Some(peer) => println!("已离开与 {peer} 的会话"),
            None => println!("当前没有打开的会话"),
        }),
        CliCommand::Ack => handle.acknowledge_attention().await,
        CliCommand::Status => handle.snapshot().await.map(|snapshot| {
            println!(
                "连接: {}  当前会话: {}  标题: {}",
                snapshot.connection.as_str(),
                snapshot
                    .focused
                    .map(|p| p.to_string())
                    .unwrap_or_else(|| "-".into()),
                snapshot.title
            );
            for summary in snapshot.peers {
                println!(
                    "  {:>6} {:<16} {:<7} 未读 {:<3} 提醒 {:<3} {:?}",
                    summary.peer.id,
                    summary.peer.display_name,
                    if summary.peer.presence.is_online() { "在线" } else { "离线" },
                    summary.unread,
                    summary.pending,
                    summary.escalation
                );
            }
            if snapshot.stats.malformed_dropped > 0 || snapshot.stats.history_failures > 0 {
                println!(
                    "  丢弃事件 {}，历史加载失败 {}",
                    snapshot.stats.malformed_dropped, snapshot.stats.history_failures
                );
            }
        }),
        CliCommand::Help => {
            println!("{}", commands::HELP);
            Ok(())
        }
        CliCommand::Quit => Ok(()),
    };

    if let Err(e) = outcome {
        match e {
            ApplicationError::NotConnected => println!("尚未连接，消息未发送，请稍后重试"),
            other => println!("操作失败: {other}"),
        }
    }
}

async fn send_image(handle: &SessionHandle, peer: PeerId, path: &Path) -> Result<(), ApplicationError> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) => {
            println!("读取文件失败 {}: {e}", path.display());
            return Ok(());
        }
    };
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".to_string());
    let local_ref = handle.send_image(peer, file_name, bytes).await?;
    println!("图片已发送 ({local_ref})");
    Ok(())
}
