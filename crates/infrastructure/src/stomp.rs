//! STOMP 1.2 帧编解码
//!
//! 只实现客户端需要的子集：CONNECT / CONNECTED / SUBSCRIBE / SEND / MESSAGE /
//! ERROR / DISCONNECT / RECEIPT。每个 WebSocket 文本消息承载一帧，
//! 单独的换行是心跳。

use std::fmt;

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StompError {
    #[error("未知的 STOMP 命令: {0}")]
    UnknownCommand(String),
    #[error("非法的帧头: {0}")]
    MalformedHeader(String),
    #[error("非法的转义序列: {0}")]
    InvalidEscape(String),
    #[error("帧缺少 NUL 结束符")]
    MissingTerminator,
    #[error("content-length 非法: {0}")]
    InvalidContentLength(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Connect,
    Connected,
    Subscribe,
    Send,
    Message,
    Error,
    Disconnect,
    Receipt,
}

impl Command {
    pub fn as_str(self) -> &'static str {
        match self {
            Command::Connect => "CONNECT",
            Command::Connected => "CONNECTED",
            Command::Subscribe => "SUBSCRIBE",
            Command::Send => "SEND",
            Command::Message => "MESSAGE",
            Command::Error => "ERROR",
            Command::Disconnect => "DISCONNECT",
            Command::Receipt => "RECEIPT",
        }
    }

    fn parse(value: &str) -> Result<Self, StompError> {
        Ok(match value {
            "CONNECT" | "STOMP" => Command::Connect,
            "CONNECTED" => Command::Connected,
            "SUBSCRIBE" => Command::Subscribe,
            "SEND" => Command::Send,
            "MESSAGE" => Command::Message,
            "ERROR" => Command::Error,
            "DISCONNECT" => Command::Disconnect,
            "RECEIPT" => Command::Receipt,
            other => return Err(StompError::UnknownCommand(other.to_string())),
        })
    }

    /// CONNECT 与 CONNECTED 帧的帧头不做转义
    fn escapes_headers(self) -> bool {
        !matches!(self, Command::Connect | Command::Connected)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub command: Command,
    headers: Vec<(String, String)>,
    pub body: String,
}

impl Frame {
    pub fn new(command: Command) -> Self {
        Self {
            command,
            headers: Vec::new(),
            body: String::new(),
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// 重复帧头以第一个为准
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn headers(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn connect(host: &str, bearer: &str, heart_beat: (u64, u64)) -> Self {
        Frame::new(Command::Connect)
            .header("accept-version", "1.2")
            .header("host", host)
            .header("heart-beat", format!("{},{}", heart_beat.0, heart_beat.1))
            .header("Authorization", format!("Bearer {bearer}"))
    }

    pub fn subscribe(id: &str, destination: &str) -> Self {
        Frame::new(Command::Subscribe)
            .header("id", id)
            .header("destination", destination)
            .header("ack", "auto")
    }

    pub fn send(destination: &str, json_body: String) -> Self {
        Frame::new(Command::Send)
            .header("destination", destination)
            .header("content-type", "application/json")
            .with_body(json_body)
    }

    pub fn disconnect(receipt: &str) -> Self {
        Frame::new(Command::Disconnect).header("receipt", receipt)
    }

    pub fn encode(&self) -> String {
        let escape = self.command.escapes_headers();
        let mut out = String::with_capacity(64 + self.body.len());
        out.push_str(self.command.as_str());
        out.push('\n');
        for (name, value) in &self.headers {
            if escape {
                out.push_str(&escape_header(name));
                out.push(':');
                out.push_str(&escape_header(value));
            } else {
                out.push_str(name);
                out.push(':');
                out.push_str(value);
            }
            out.push('\n');
        }
        if !self.body.is_empty() && self.get("content-length").is_none() {
            out.push_str(&format!("content-length:{}\n", self.body.len()));
        }
        out.push('\n');
        out.push_str(&self.body);
        out.push('\0');
        out
    }

    /// 解码一帧；纯心跳返回 `Ok(None)`
    pub fn decode(text: &str) -> Result<Option<Frame>, StompError> {
        let text = text.trim_start_matches(['\r', '\n']);
        if text.is_empty() {
            return Ok(None);
        }

        let (command_line, mut rest) = split_line(text).ok_or(StompError::MissingTerminator)?;
        let command = Command::parse(command_line)?;
        let escape = command.escapes_headers();

        let mut headers = Vec::new();
        loop {
            let (line, remaining) = split_line(rest).ok_or(StompError::MissingTerminator)?;
            rest = remaining;
            if line.is_empty() {
                break;
            }
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| StompError::MalformedHeader(line.to_string()))?;
            if escape {
                headers.push((unescape_header(name)?, unescape_header(value)?));
            } else {
                headers.push((name.to_string(), value.to_string()));
            }
        }

        let mut frame = Frame {
            command,
            headers,
            body: String::new(),
        };

        frame.body = match frame.get("content-length") {
            Some(length) => {
                let length: usize = length
                    .trim()
                    .parse()
                    .map_err(|_| StompError::InvalidContentLength(length.to_string()))?;
                if rest.len() < length || !rest.is_char_boundary(length) {
                    return Err(StompError::InvalidContentLength(length.to_string()));
                }
                if !rest[length..].starts_with('\0') {
                    return Err(StompError::MissingTerminator);
                }
                rest[..length].to_string()
            }
            None => {
                let end = rest.find('\0').ok_or(StompError::MissingTerminator)?;
                rest[..end].to_string()
            }
        };

        Ok(Some(frame))
    }
}

fn split_line(text: &str) -> Option<(&str, &str)> {
    let end = text.find('\n')?;
    let line = text[..end].strip_suffix('\r').unwrap_or(&text[..end]);
    Some((line, &text[end + 1..]))
}

fn escape_header(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            ':' => out.push_str("\\c"),
            other => out.push(other),
        }
    }
    out
}

fn unescape_header(value: &str) -> Result<String, StompError> {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('c') => out.push(':'),
            _ => return Err(StompError::InvalidEscape(value.to_string())),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_frame_has_content_length_and_terminator() {
        let encoded = Frame::send("/app/send", r#"{"a":1}"#.to_string()).encode();
        assert_eq!(
            encoded,
            "SEND\ndestination:/app/send\ncontent-type:application/json\ncontent-length:7\n\n{\"a\":1}\0"
        );
    }

    #[test]
    fn connect_headers_are_not_escaped() {
        let encoded = Frame::connect("chat.local:8080", "abc", (0, 0)).encode();
        assert!(encoded.contains("host:chat.local:8080\n"));
        assert!(encoded.contains("Authorization:Bearer abc\n"));
    }

    #[test]
    fn decodes_message_frame_with_escaped_headers() {
        let raw = "MESSAGE\r\ndestination:/user/queue/chat\r\nx-note:a\\cb\\\\c\\n\r\nsubscription:sub-0\r\n\r\n{\"content\":\"hi\"}\0\n";
        let frame = Frame::decode(raw).unwrap().unwrap();

        assert_eq!(frame.command, Command::Message);
        assert_eq!(frame.get("destination"), Some("/user/queue/chat"));
        assert_eq!(frame.get("x-note"), Some("a:b\\c\n"));
        assert_eq!(frame.body, "{\"content\":\"hi\"}");
    }

    #[test]
    fn content_length_allows_nul_in_body() {
        let raw = "MESSAGE\ncontent-length:3\n\na\0b\0";
        let frame = Frame::decode(raw).unwrap().unwrap();
        assert_eq!(frame.body, "a\0b");
    }

    #[test]
    fn heartbeat_is_not_a_frame() {
        assert_eq!(Frame::decode("\n").unwrap(), None);
        assert_eq!(Frame::decode("\r\n\r\n").unwrap(), None);
    }

    #[test]
    fn first_repeated_header_wins() {
        let raw = "MESSAGE\ndestination:/a\ndestination:/b\n\n\0";
        let frame = Frame::decode(raw).unwrap().unwrap();
        assert_eq!(frame.get("destination"), Some("/a"));
    }

    #[test]
    fn rejects_broken_frames() {
        assert_eq!(
            Frame::decode("NOPE\n\n\0"),
            Err(StompError::UnknownCommand("NOPE".into()))
        );
        assert_eq!(
            Frame::decode("MESSAGE\nbroken\n\n\0"),
            Err(StompError::MalformedHeader("broken".into()))
        );
        assert_eq!(
            Frame::decode("MESSAGE\nx:\\t\n\n\0"),
            Err(StompError::InvalidEscape("\\t".into()))
        );
        assert_eq!(Frame::decode("MESSAGE\n\nbody"), Err(StompError::MissingTerminator));
        assert!(matches!(
            Frame::decode("MESSAGE\ncontent-length:99\n\nbody\0"),
            Err(StompError::InvalidContentLength(_))
        ));
    }

    #[test]
    fn encoded_headers_decode_back() {
        let frame = Frame::new(Command::Message)
            .header("destination", "/topic/notice")
            .header("note", "line\nwith:colon")
            .with_body("online");
        let decoded = Frame::decode(&frame.encode()).unwrap().unwrap();
        assert_eq!(decoded.get("note"), Some("line\nwith:colon"));
        assert_eq!(decoded.body, "online");
    }
}
