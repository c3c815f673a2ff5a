//! 服务端报文格式
//!
//! REST 响应统一为 `{code, msg, data}` 信封；推送的聊天消息与已读回执共用同一个队列，
//! 以 `type` / `msgType` 区分，99 为已读回执。这里是唯一做形状判断的地方，
//! 解码结果直接是 [`InboundEvent`]。

use application::{OutboundMessage, ServiceError};
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use domain::{
    IncomingMessage, InboundEvent, MalformedEvent, Message, MessageKind, Peer, PeerId, Presence,
    PresenceNotice, ReadFlag, ServerMessageId, Timestamp,
};
use serde::{Deserialize, Serialize};

/// 已读回执的保留类型
pub const READ_RECEIPT_TAG: i32 = 99;
pub const SUCCESS_CODE: i32 = 200;

#[derive(Debug, Clone, Deserialize)]
pub struct ApiEnvelope<T> {
    pub code: i32,
    #[serde(default)]
    pub msg: Option<String>,
    pub data: Option<T>,
}

impl<T> ApiEnvelope<T> {
    pub fn into_result(self) -> Result<Option<T>, ServiceError> {
        if self.code == SUCCESS_CODE {
            Ok(self.data)
        } else {
            Err(ServiceError::Rejected {
                code: self.code,
                message: self.msg.unwrap_or_default(),
            })
        }
    }

    /// `data` 必须存在
    pub fn into_data(self) -> Result<T, ServiceError> {
        self.into_result()?
            .ok_or_else(|| ServiceError::Decode("响应缺少 data 字段".to_string()))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireFriend {
    pub id: i64,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub nickname: Option<String>,
    #[serde(default)]
    pub avatar: Option<String>,
    #[serde(default)]
    pub online: bool,
}

impl WireFriend {
    pub fn into_peer(self) -> Peer {
        let display_name = self
            .nickname
            .filter(|n| !n.trim().is_empty())
            .or(self.username)
            .unwrap_or_else(|| self.id.to_string());
        Peer::new(
            PeerId(self.id),
            display_name,
            self.avatar.filter(|a| !a.is_empty()),
            Presence::from_online(self.online),
        )
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WirePage<T> {
    #[serde(default = "Vec::new")]
    pub records: Vec<T>,
    pub total: Option<u64>,
}

/// 推送或历史中的一条聊天记录
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireChatMessage {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub sender_id: Option<i64>,
    #[serde(default)]
    pub receiver_id: Option<i64>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default, alias = "type")]
    pub msg_type: Option<i32>,
    #[serde(default)]
    pub create_time: Option<String>,
    #[serde(default)]
    pub is_read: Option<i32>,
}

impl WireChatMessage {
    /// 历史记录转为会话消息；类型归类由会话统一执行
    pub fn into_message(self) -> Result<Message, String> {
        let sender_id = self.sender_id.ok_or("缺少 senderId")?;
        let receiver_id = self.receiver_id.ok_or("缺少 receiverId")?;
        let tag = self.msg_type.unwrap_or(0);
        let kind = MessageKind::from_wire_tag(tag).ok_or_else(|| format!("未知消息类型 {tag}"))?;
        let created_at = self
            .create_time
            .as_deref()
            .and_then(parse_timestamp)
            .ok_or("缺少或无法解析 createTime")?;
        Ok(Message {
            id: self.id.map(ServerMessageId),
            local_ref: None,
            sender_id: PeerId(sender_id),
            receiver_id: PeerId(receiver_id),
            content: self.content.unwrap_or_default(),
            kind,
            created_at,
            read: ReadFlag::from_wire_value(self.is_read.unwrap_or(0)),
        })
    }
}

/// 发送到 `/app/send` 的消息体
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WireOutbound<'a> {
    pub receiver_id: i64,
    pub content: &'a str,
    #[serde(rename = "type")]
    pub kind: i32,
}

impl<'a> From<&'a OutboundMessage> for WireOutbound<'a> {
    fn from(message: &'a OutboundMessage) -> Self {
        Self {
            receiver_id: message.receiver_id.0,
            content: &message.content,
            kind: message.kind.wire_tag(),
        }
    }
}

pub fn encode_outbound(message: &OutboundMessage) -> Result<String, serde_json::Error> {
    serde_json::to_string(&WireOutbound::from(message))
}

/// 服务端时间：RFC 3339，或不带时区的 `LocalDateTime`（按 UTC 处理）
pub fn parse_timestamp(value: &str) -> Option<Timestamp> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Some(parsed.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
        .map(|naive| Utc.from_utc_datetime(&naive))
}

/// 订阅目的地
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    pub personal: String,
    pub notice: String,
}

/// 把一条 MESSAGE 帧的目的地与正文解码为入站事件；无法识别的一律为 `Malformed`
pub fn decode_inbound(topics: &Topics, destination: &str, body: &str) -> InboundEvent {
    if destination == topics.notice {
        return InboundEvent::Presence(PresenceNotice::parse(body));
    }
    if destination != topics.personal {
        return InboundEvent::Malformed(MalformedEvent::new(destination, "未订阅的目的地"));
    }

    let wire: WireChatMessage = match serde_json::from_str(body) {
        Ok(wire) => wire,
        Err(e) => return InboundEvent::Malformed(MalformedEvent::new(destination, e.to_string())),
    };

    let malformed = |reason: &str| InboundEvent::Malformed(MalformedEvent::new(destination, reason));

    let Some(sender_id) = wire.sender_id else {
        return malformed("缺少 senderId");
    };

    match wire.msg_type.unwrap_or(0) {
        READ_RECEIPT_TAG => InboundEvent::ReadReceipt {
            reader: PeerId(sender_id),
        },
        tag => {
            let Some(kind) = MessageKind::from_wire_tag(tag) else {
                return malformed(&format!("未知消息类型 {tag}"));
            };
            let Some(content) = wire.content else {
                return malformed("缺少 content");
            };
            InboundEvent::NewMessage(IncomingMessage {
                id: wire.id.map(ServerMessageId),
                sender_id: PeerId(sender_id),
                receiver_id: wire.receiver_id.map(PeerId),
                content,
                kind,
                created_at: wire.create_time.as_deref().and_then(parse_timestamp),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn topics() -> Topics {
        Topics {
            personal: "/user/queue/chat".into(),
            notice: "/topic/notice".into(),
        }
    }

    #[test]
    fn decodes_pushed_chat_message() {
        let body = r#"{"id":null,"senderId":7,"receiverId":1,"content":"你好","msgType":0,"isRead":0,"createTime":"2024-05-01T07:00:03"}"#;
        let InboundEvent::NewMessage(message) = decode_inbound(&topics(), "/user/queue/chat", body)
        else {
            panic!("expected a new message");
        };
        assert_eq!(message.sender_id, PeerId(7));
        assert_eq!(message.receiver_id, Some(PeerId(1)));
        assert_eq!(message.kind, MessageKind::Text);
        assert_eq!(message.id, None);
        assert_eq!(
            message.created_at,
            Some(Utc.with_ymd_and_hms(2024, 5, 1, 7, 0, 3).unwrap())
        );
    }

    #[test]
    fn type_99_is_a_read_receipt() {
        let body = r#"{"senderId":7,"type":99,"content":"READ"}"#;
        assert_eq!(
            decode_inbound(&topics(), "/user/queue/chat", body),
            InboundEvent::ReadReceipt { reader: PeerId(7) }
        );
    }

    #[test]
    fn notice_topic_carries_presence() {
        assert_eq!(
            decode_inbound(&topics(), "/topic/notice", "online"),
            InboundEvent::Presence(PresenceNotice::Online)
        );
    }

    #[test]
    fn unclassifiable_events_are_malformed() {
        let cases = [
            ("/user/queue/chat", "not json"),
            ("/user/queue/chat", r#"{"content":"hi"}"#),
            ("/user/queue/chat", r#"{"senderId":7,"type":42,"content":"?"}"#),
            ("/user/queue/chat", r#"{"senderId":7,"type":0}"#),
            ("/queue/other", "{}"),
        ];
        for (destination, body) in cases {
            assert!(
                matches!(decode_inbound(&topics(), destination, body), InboundEvent::Malformed(_)),
                "{destination} {body}"
            );
        }
    }

    #[test]
    fn outbound_uses_server_field_names() {
        let json = encode_outbound(&OutboundMessage {
            receiver_id: PeerId(7),
            content: "/files/a.png".into(),
            kind: MessageKind::Image,
        })
        .unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(
            value,
            serde_json::json!({"receiverId": 7, "content": "/files/a.png", "type": 1})
        );
    }

    #[test]
    fn envelope_code_other_than_200_is_rejected() {
        let envelope: ApiEnvelope<String> =
            serde_json::from_str(r#"{"code":500,"msg":"只支持图片格式","data":null}"#).unwrap();
        assert_eq!(
            envelope.into_data(),
            Err(ServiceError::Rejected {
                code: 500,
                message: "只支持图片格式".into()
            })
        );
    }

    #[test]
    fn history_record_keeps_read_flag_and_falls_back_to_username() {
        let wire: WireChatMessage = serde_json::from_str(
            r#"{"id":11,"senderId":1,"receiverId":7,"content":"x","msgType":1,"isRead":1,"createTime":"2024-05-01 07:00:00"}"#,
        )
        .unwrap();
        let message = wire.into_message().unwrap();
        assert_eq!(message.id, Some(ServerMessageId(11)));
        assert_eq!(message.kind, MessageKind::Image);
        assert!(message.is_read());

        let friend: WireFriend =
            serde_json::from_str(r#"{"id":7,"username":"alice","nickname":"","online":true}"#)
                .unwrap();
        let peer = friend.into_peer();
        assert_eq!(peer.display_name, "alice");
        assert!(peer.presence.is_online());
    }
}
