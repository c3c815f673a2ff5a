//! 终端命令解析

use std::path::PathBuf;

use domain::PeerId;
use thiserror::Error;

pub const HELP: &str = "\
/open <好友ID>            打开会话并加载历史
/send <好友ID> <内容>     发送文本
/image <好友ID> <文件>    上传图片并发送
/refresh <好友ID>         重新拉取历史
/history <好友ID>         查看会话消息
/leave                    离开当前会话
/ack                      确认提醒（停止标题闪烁）
/status                   查看连接与未读状态
/quit                     退出";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CliCommand {
    Open(PeerId),
    Send(PeerId, String),
    Image(PeerId, PathBuf),
    Refresh(PeerId),
    History(PeerId),
    Leave,
    Ack,
    Status,
    Help,
    Quit,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("未知命令: {0}（输入 /help 查看帮助）")]
    Unknown(String),
    #[error("{command} 缺少参数: {missing}")]
    MissingArgument {
        command: &'static str,
        missing: &'static str,
    },
    #[error("好友ID 必须是整数: {0}")]
    InvalidPeer(String),
}

/// 解析一行输入；空行返回 `Ok(None)`
pub fn parse(line: &str) -> Result<Option<CliCommand>, CommandError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }

    let (name, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
    let rest = rest.trim();

    let command = match name {
        "/open" => CliCommand::Open(peer_arg("/open", rest)?),
        "/refresh" => CliCommand::Refresh(peer_arg("/refresh", rest)?),
        "/history" => CliCommand::History(peer_arg("/history", rest)?),
        "/send" => {
            let (peer, text) = peer_and_rest("/send", rest, "内容")?;
            CliCommand::Send(peer, text.to_string())
        }
        "/image" => {
            let (peer, path) = peer_and_rest("/image", rest, "文件路径")?;
            CliCommand::Image(peer, PathBuf::from(path))
        }
        "/leave" => CliCommand::Leave,
        "/ack" => CliCommand::Ack,
        "/status" => CliCommand::Status,
        "/help" => CliCommand::Help,
        "/quit" | "/exit" => CliCommand::Quit,
        other => return Err(CommandError::Unknown(other.to_string())),
    };
    Ok(Some(command))
}

fn peer_arg(command: &'static str, value: &str) -> Result<PeerId, CommandError> {
    let value = value.split_whitespace().next().ok_or(CommandError::MissingArgument {
        command,
        missing: "好友ID",
    })?;
    value
        .parse::<i64>()
        .map(PeerId)
        .map_err(|_| CommandError::InvalidPeer(value.to_string()))
}

fn peer_and_rest<'a>(
    command: &'static str,
    value: &'a str,
    missing: &'static str,
) -> Result<(PeerId, &'a str), CommandError> {
    let peer = peer_arg(command, value)?;
    let rest = value
        .split_once(char::is_whitespace)
        .map(|(_, rest)| rest.trim())
        .filter(|rest| !rest.is_empty())
        .ok_or(CommandError::MissingArgument { command, missing })?;
    Ok((peer, rest))
}
